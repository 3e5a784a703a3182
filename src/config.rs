//! Runtime configuration, read from the Lambda environment.
//!
//! Everything here comes from environment variables set on the function
//! definition. AWS credentials and the region are *not* handled here; those
//! come from `aws_config::load_from_env()` like every other AWS SDK consumer.

use anyhow::{anyhow, Result};
use std::time::Duration;

use crate::ENVIRONMENT;

pub const DEFAULT_PLACES_ENDPOINT: &str = "https://places.googleapis.com/v1/places:autocomplete";

pub const DEFAULT_FIELD_MASK: &str = "suggestions.placePrediction.placeId,\
    suggestions.placePrediction.text,\
    suggestions.placePrediction.structuredFormat";

const PLACES_TIMEOUT: Duration = Duration::from_secs(10);

/// Names of the DynamoDB tables used by the trigger handlers.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Tables {
    pub users: String,
    pub usernames: String,
    pub notifications: String,
    pub deletion_failures: String,
}

impl Tables {
    pub fn for_environment(env: &str) -> Self {
        Tables {
            users: format!("maypole-{env}-users"),
            usernames: format!("maypole-{env}-usernames"),
            notifications: format!("maypole-{env}-notifications"),
            deletion_failures: format!("maypole-{env}-deletion_failures"),
        }
    }
}

/// Settings for the event-triggered services.
#[derive(Clone, Debug)]
pub struct Settings {
    pub environment: String,
    pub tables: Tables,
    /// Only needed by the functions that delete accounts.
    pub user_pool_id: Option<String>,
    /// Only needed by the notification dispatcher.
    pub push_platform_arn: Option<String>,
    pub localtest_arn: Option<String>,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup. Empty values count as
    /// unset.
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let environment = get("MAYPOLE_ENVIRONMENT").unwrap_or_else(|| ENVIRONMENT.to_owned());

        if environment.contains(|c: char| c.is_whitespace() || c == '/') {
            return Err(anyhow!("bad MAYPOLE_ENVIRONMENT value `{environment}`"));
        }

        Ok(Settings {
            tables: Tables::for_environment(&environment),
            environment,
            user_pool_id: get("MAYPOLE_USER_POOL_ID"),
            push_platform_arn: get("MAYPOLE_PUSH_PLATFORM_ARN"),
            localtest_arn: get("MAYPOLE_LOCALTEST_ARN"),
        })
    }
}

/// Settings for the places proxy. None of these are required: the API key
/// can also arrive with each request.
#[derive(Clone, Debug)]
pub struct PlacesSettings {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub timeout: Duration,
}

impl Default for PlacesSettings {
    fn default() -> Self {
        PlacesSettings {
            api_key: None,
            endpoint: DEFAULT_PLACES_ENDPOINT.to_owned(),
            timeout: PLACES_TIMEOUT,
        }
    }
}

impl PlacesSettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        PlacesSettings {
            api_key: get("GOOGLE_PLACES_API_KEY"),
            endpoint: get("MAYPOLE_PLACES_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_PLACES_ENDPOINT.to_owned()),
            ..Default::default()
        }
    }
}
