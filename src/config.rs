use aws_config::{BehaviorVersion, SdkConfig};
use aws_credential_types::provider::SharedCredentialsProvider;
use aws_sdk_sns::{
    config::{Credentials, Region},
    Client as SnsClient,
};
use chrono::Duration;
use log::{error, info, warn};
use mongodb::Client as MongoClient;
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::{
    model::{
        common::enrollment::CapacityPolicy,
        mongodb::{ensure_indexes_exist, Store, DEFAULT_TRANSACTION_ATTEMPTS},
    },
    notifier::Notifier,
};

/// Application configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // non-secrets
    #[serde(default)]
    capacity_policy: CapacityPolicy,
    #[serde(default = "default_transaction_attempts")]
    transaction_attempts: u32,
    #[serde(default = "default_snapshot_retry_secs")]
    snapshot_retry_secs: u32,
    #[serde(default)]
    ballot_url: Option<String>,
    // secrets
    jwt_secret: String,
}

fn default_transaction_attempts() -> u32 {
    DEFAULT_TRANSACTION_ATTEMPTS
}

fn default_snapshot_retry_secs() -> u32 {
    300
}

impl Config {
    /// What to do with enrollment batches that overflow a roster, unless the
    /// request says otherwise.
    pub fn capacity_policy(&self) -> CapacityPolicy {
        self.capacity_policy
    }

    /// How many times a conflicting transaction is attempted.
    pub fn transaction_attempts(&self) -> u32 {
        self.transaction_attempts
    }

    /// Delay before a failed result snapshot is retried.
    pub fn snapshot_retry_interval(&self) -> Duration {
        Duration::seconds(self.snapshot_retry_secs.into())
    }

    /// Base URL of the voter-facing site, used in invitations.
    pub fn ballot_url(&self) -> Option<&str> {
        self.ballot_url.as_deref()
    }

    /// Secret key used to verify identity tokens.
    pub fn jwt_secret(&self) -> &[u8] {
        self.jwt_secret.as_bytes()
    }
}

/// A fairing that loads the application config and puts it in managed state.
/// This could easily be achieved using `AdHoc::config`, but is written out
/// explicitly for symmetry with the other fairings and control over error
/// messages.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load application config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        info!(
            "Loaded application config: capacity policy {:?}, {} transaction attempts",
            config.capacity_policy, config.transaction_attempts
        );

        Ok(rocket.manage(config))
    }
}

/// Configuration for the database.
#[derive(Deserialize)]
struct DbConfig {
    #[serde(default = "default_db_name")]
    db_name: String,
    // secrets
    db_uri: String,
}

fn default_db_name() -> String {
    "ballots".to_string()
}

/// A fairing that loads the MongoDB config, connects to the database,
/// ensures the indexes exist, and places a [`Store`] into managed state.
/// This fairing reads the transaction settings from [`Config`], and so must
/// be attached after [`ConfigFairing`].
pub struct DatabaseFairing;

#[rocket::async_trait]
impl Fairing for DatabaseFairing {
    fn info(&self) -> Info {
        Info {
            name: "MongoDB",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<DbConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load database config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        let attempts = rocket
            .state::<Config>()
            .map_or(DEFAULT_TRANSACTION_ATTEMPTS, Config::transaction_attempts);
        info!("Loaded database config, connecting...");

        // Construct the connection.
        let client = match MongoClient::with_uri_str(config.db_uri).await {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to connect to database: {e}");
                return Err(rocket);
            }
        };
        let store = Store::new(client, &config.db_name)
            .with_transaction_attempts(attempts);

        // Ensure the required indexes exist.
        if let Err(e) = ensure_indexes_exist(store.db()).await {
            error!("Failed to set up database indexes: {e}");
            return Err(rocket);
        }
        info!("...database connection online!");

        Ok(rocket.manage(store))
    }
}

/// Configuration for the AWS connection. Invitations are only sent if all
/// of it is present.
#[derive(Deserialize)]
struct AwsConfig {
    // non-secrets
    aws_region: Option<String>,
    aws_access_key_id: Option<String>,
    invitation_topic_arn: Option<String>,
    // secrets
    aws_secret_access_key: Option<String>,
}

/// A fairing that loads the AWS config and places a [`Notifier`] into
/// managed state; a disabled one if AWS is not configured.
pub struct NotifierFairing;

#[rocket::async_trait]
impl Fairing for NotifierFairing {
    fn info(&self) -> Info {
        Info {
            name: "AWS SNS",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        // Load the config.
        let config = match rocket.figment().extract::<AwsConfig>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load AWS config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        let ballot_url = rocket
            .state::<Config>()
            .and_then(|c| c.ballot_url())
            .map(str::to_string);

        let notifier = match config {
            AwsConfig {
                aws_region: Some(region),
                aws_access_key_id: Some(key_id),
                aws_secret_access_key: Some(secret),
                invitation_topic_arn: Some(topic_arn),
            } => {
                let aws_config = SdkConfig::builder()
                    .region(Region::new(region))
                    .credentials_provider(SharedCredentialsProvider::new(Credentials::new(
                        key_id,
                        secret,
                        None,
                        None,
                        "rocket config",
                    )))
                    .behavior_version(BehaviorVersion::latest())
                    .build();
                info!("Loaded Amazon SNS config, invitations go to {topic_arn}");
                Notifier::new(SnsClient::new(&aws_config), topic_arn, ballot_url)
            }
            _ => {
                warn!("AWS is not fully configured; voter invitations are disabled");
                Notifier::disabled()
            }
        };

        Ok(rocket.manage(notifier))
    }
}
