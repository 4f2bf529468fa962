// src/config.rs
use serde::Deserialize;

/// Which request states still accept line edits (add/change/remove paint).
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LineEditPolicy {
    DraftOnly,
    #[default]
    DraftAndFormed,
    /// Every state that is not terminal.
    AnyOpen,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database_url: Option<String>,
    pub jwt_secret: String,
    #[serde(default = "default_jwt_ttl_minutes")]
    pub jwt_ttl_minutes: i64,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,
    pub maintenance_key: String,
    #[serde(default)]
    pub blob_endpoint: Option<String>,
    #[serde(default = "default_blob_bucket")]
    pub blob_bucket: String,
    #[serde(default)]
    pub blob_token: Option<String>,
    #[serde(default = "default_revocation_timeout_ms")]
    pub revocation_timeout_ms: u64,
    #[serde(default)]
    pub line_edit_policy: LineEditPolicy,
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
}

fn default_jwt_ttl_minutes() -> i64 {
    60
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_bcrypt_cost() -> u32 {
    bcrypt::DEFAULT_COST
}

fn default_blob_bucket() -> String {
    "paints".to_string()
}

fn default_revocation_timeout_ms() -> u64 {
    250
}

fn default_run_migrations() -> bool {
    true
}

fn default_db_max_connections() -> u32 {
    10
}

impl Config {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    /// Builds a config from explicit key/value pairs, same rules as the environment.
    pub fn from_pairs<I>(pairs: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter(pairs)
    }
}
