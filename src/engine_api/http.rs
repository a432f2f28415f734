//! Contains an implementation of `EngineTransport` using the JSON-RPC API via HTTP.

use super::*;
use crate::engine_api::auth::JwtTokenManager;
use crate::engine_api::json_structures::*;
use crate::metrics;
use super::sensitive_url::SensitiveUrl;
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde_json::json;
use slog::{crit, debug, warn, Logger};

pub use reqwest::Client;

pub const STATIC_ID: u32 = 1;
pub const JSONRPC_VERSION: &str = "2.0";

pub const RETURN_FULL_TRANSACTION_OBJECTS: bool = false;

pub const ETH_GET_BLOCK_BY_NUMBER: &str = "eth_getBlockByNumber";
pub const ETH_GET_BLOCK_BY_HASH: &str = "eth_getBlockByHash";
pub const ETH_CHAIN_ID: &str = "eth_chainId";
pub const ETH_GET_LOGS: &str = "eth_getLogs";

pub const ENGINE_NEW_PAYLOAD_V2: &str = "engine_newPayloadV2";
pub const ENGINE_NEW_PAYLOAD_V3: &str = "engine_newPayloadV3";

pub const ENGINE_GET_PAYLOAD_V2: &str = "engine_getPayloadV2";
pub const ENGINE_GET_PAYLOAD_V3: &str = "engine_getPayloadV3";

pub const ENGINE_FORKCHOICE_UPDATED_V2: &str = "engine_forkchoiceUpdatedV2";
pub const ENGINE_FORKCHOICE_UPDATED_V3: &str = "engine_forkchoiceUpdatedV3";

pub const ENGINE_EXCHANGE_CAPABILITIES: &str = "engine_exchangeCapabilities";
pub const ENGINE_GET_CLIENT_VERSION_V1: &str = "engine_getClientVersionV1";

/// This error is returned during a `chainId` call by Geth.
pub const EIP155_ERROR_STR: &str = "chain not synced beyond EIP-155 replay-protection fork block";

/// Pause between attempts of a request that failed at the transport level.
pub const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Methods advertised through `engine_exchangeCapabilities`.
pub static ENGINE_CAPABILITIES: &[&str] = &[
    ENGINE_NEW_PAYLOAD_V2,
    ENGINE_NEW_PAYLOAD_V3,
    ENGINE_GET_PAYLOAD_V2,
    ENGINE_GET_PAYLOAD_V3,
    ENGINE_FORKCHOICE_UPDATED_V2,
    ENGINE_FORKCHOICE_UPDATED_V3,
    ENGINE_GET_CLIENT_VERSION_V1,
];

pub struct HttpJsonRpc {
    pub client: Client,
    pub url: SensitiveUrl,
    auth: Option<Arc<JwtTokenManager>>,
    max_attempts: usize,
    log: Logger,
}

impl HttpJsonRpc {
    /// `max_attempts` bounds how often a request failing at the transport level is sent.
    pub fn new(url: SensitiveUrl, max_attempts: usize, log: Logger) -> Result<Self, Error> {
        Ok(Self {
            client: Client::builder().build()?,
            url,
            auth: None,
            max_attempts: max_attempts.max(1),
            log,
        })
    }

    pub fn new_with_auth(
        url: SensitiveUrl,
        auth: Arc<JwtTokenManager>,
        max_attempts: usize,
        log: Logger,
    ) -> Result<Self, Error> {
        Ok(Self {
            auth: Some(auth),
            ..Self::new(url, max_attempts, log)?
        })
    }

    pub async fn rpc_request<D: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
        timeout: Duration,
    ) -> Result<D, Error> {
        let result = self.request(method, params, timeout).await?;
        serde_json::from_value(result).map_err(Into::into)
    }

    async fn send_once(
        &self,
        method: &str,
        params: &serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, Error> {
        let body = JsonRequestBody {
            jsonrpc: JSONRPC_VERSION,
            method,
            params: params.clone(),
            id: json!(STATIC_ID),
        };

        let mut request = self
            .client
            .post(self.url.full.clone())
            .timeout(timeout)
            .header(CONTENT_TYPE, "application/json")
            .json(&body);

        // The token is read at send time so a refresh between attempts is picked up.
        if let Some(auth) = &self.auth {
            request = request.bearer_auth(auth.token_for_request()?.as_str());
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::Auth(auth::Error::InvalidToken));
        }

        let bytes = response.bytes().await?;
        let body: JsonResponseBody = serde_json::from_slice(&bytes).map_err(|e| {
            Error::BadResponse(format!(
                "unparsable response with http status {}: {}",
                status, e
            ))
        })?;

        match (body.result, body.error) {
            (_, Some(error)) => {
                if error.message.contains(EIP155_ERROR_STR) {
                    Err(Error::Eip155Failure)
                } else {
                    Err(Error::from_rpc_error(error.code, error.message))
                }
            }
            (_, None) if !status.is_success() => Err(Error::BadResponse(format!(
                "http status {} without an error object",
                status
            ))),
            (result, None) => Ok(result),
        }
    }
}

#[async_trait]
impl EngineTransport for HttpJsonRpc {
    async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, Error> {
        let _timer = metrics::start_timer_vec(&metrics::ENGINE_REQUEST_TIMES, &[method]);
        let mut attempt = 1;
        loop {
            debug!(self.log, "Engine API request"; "method" => method, "attempt" => attempt);
            match self.send_once(method, &params, timeout).await {
                Err(e) if e.is_transport_error() && attempt < self.max_attempts => {
                    warn!(
                        self.log,
                        "Engine API request failed, retrying";
                        "method" => method,
                        "attempt" => attempt,
                        "error" => ?e,
                    );
                    attempt += 1;
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
                Err(Error::Auth(e)) => {
                    crit!(
                        self.log,
                        "Failed jwt authorization";
                        "error" => ?e,
                        "url" => %self.url,
                        "info" => "check the jwt secret shared with the execution client",
                    );
                    return Err(Error::Auth(e));
                }
                other => return other,
            }
        }
    }
}

impl std::fmt::Display for HttpJsonRpc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, auth={}", self.url, self.auth.is_some())
    }
}
