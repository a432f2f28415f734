use crate::engine_api::sensitive_url::SensitiveUrl;
use crate::header_cache::DEFAULT_HEADER_CACHE_SIZE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_RPC_DIAL_URL: &str = "http://localhost:8551";
pub const DEFAULT_JWT_SECRET_PATH: &str = "./jwt.hex";
pub const DEFAULT_REQUIRED_CHAIN_ID: u64 = 80094;

/// Settings for the engine connection and the local payload builder.
///
/// Durations are written as integer milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub rpc_dial_url: SensitiveUrl,
    /// Attempts per request when the failure is at the transport level.
    pub rpc_retries: usize,
    #[serde(with = "duration_millis")]
    pub rpc_timeout: Duration,
    #[serde(with = "duration_millis")]
    pub rpc_startup_check_interval: Duration,
    #[serde(with = "duration_millis")]
    pub rpc_jwt_refresh_interval: Duration,
    pub jwt_secret_path: PathBuf,
    pub required_chain_id: u64,
    #[serde(with = "duration_millis")]
    pub payload_timeout: Duration,
    pub header_cache_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc_dial_url: default_dial_url(),
            rpc_retries: 3,
            rpc_timeout: Duration::from_secs(2),
            rpc_startup_check_interval: Duration::from_secs(3),
            rpc_jwt_refresh_interval: Duration::from_secs(30),
            jwt_secret_path: PathBuf::from(DEFAULT_JWT_SECRET_PATH),
            required_chain_id: DEFAULT_REQUIRED_CHAIN_ID,
            payload_timeout: Duration::from_millis(2_500),
            header_cache_size: DEFAULT_HEADER_CACHE_SIZE,
        }
    }
}

fn default_dial_url() -> SensitiveUrl {
    match SensitiveUrl::parse(DEFAULT_RPC_DIAL_URL) {
        Ok(url) => url,
        Err(e) => unreachable!("default dial url is valid: {:?}", e),
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
