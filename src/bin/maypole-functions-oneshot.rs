//! "Oneshot" version of the triggered Maypole functions.
//!
//! This executable runs one function, based on arguments given on the
//! command line. It's also the easiest way for an operator to run
//! `purgeuser` against a user listed in the deletion-failure table.

use lambda_runtime::Error;
use serde_json::Value;
use std::env;

use maypole_functions::Services;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let mut args = env::args();
    args.next(); // skip argv[0]

    let name = args.next().ok_or_else(|| -> Error {
        "first argument should be the function to run \
        (accountdeletion, notify, thumbnails, purgeuser)"
            .into()
    })?;

    let json_text = args
        .next()
        .ok_or_else(|| -> Error { "second argument should be JSON payload text".into() })?;
    let payload: Value = serde_json::from_str(&json_text)?;

    let svcs = Services::init().await?;
    let result = svcs.dispatch(name, Some(payload)).await?;

    serde_json::to_writer(std::io::stdout().lock(), &result)?;
    Ok(())
}
