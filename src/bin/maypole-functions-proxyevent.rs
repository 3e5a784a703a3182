//! "Proxy event" server for the places-autocomplete proxy.
//!
//! This executable expects to be invoked through AWS API Gateway's "proxy
//! event" protocol, which is what gives us HTTP methods, headers and status
//! codes to work with.

use lambda_http::{run, service_fn, Error, Request};

use maypole_functions::{config::PlacesSettings, init_logging, places::PlacesProxy};

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_logging();

    let proxy = PlacesProxy::new(PlacesSettings::from_env())?;
    let ref_proxy = &proxy;

    run(service_fn(|req: Request| async move { ref_proxy.handle(req).await })).await?;
    Ok(())
}
