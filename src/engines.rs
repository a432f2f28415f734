//! Typed Engine API calls over an `EngineTransport`, plus the forkchoice and new-payload state
//! machines built on them.

use crate::config::Config;
use crate::engine_api::auth::{Auth, JwtTokenManager};
use crate::engine_api::ethspec::EthSpec;
use crate::engine_api::http::*;
use crate::engine_api::json_structures::*;
use crate::engine_api::{
    Address, BlockByNumberQuery, ClientCode, ClientVersionV1, CommitPrefix, EngineCapabilities,
    EngineTransport, Error as ApiError, ExecutionBlock, ExecutionBlockHash, ForkName,
    ForkchoiceState, ForkchoiceUpdatedResponse, GetPayloadResponse, Log, NewPayloadRequest,
    PayloadAttributes, PayloadId, PayloadStatusV1, LATEST_TAG,
};
use crate::header_cache::HeaderCache;
use crate::metrics;
use crate::payload_status::{process_payload_status, PayloadStatus};
use crate::serde_utils;
use crate::Error;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use slog::{crit, debug, error, info, warn, Logger};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Two-letter code this crate reports in `engine_getClientVersionV1`.
pub const CLIENT_CODE: &str = "BZ";
pub const CLIENT_NAME: &str = "bzb_engine_bridge";

#[derive(Clone, Copy, Debug)]
pub struct CapabilitiesCacheEntry {
    engine_capabilities: EngineCapabilities,
    fetch_time: Instant,
}

impl CapabilitiesCacheEntry {
    pub fn new(engine_capabilities: EngineCapabilities) -> Self {
        Self {
            engine_capabilities,
            fetch_time: Instant::now(),
        }
    }

    pub fn engine_capabilities(&self) -> EngineCapabilities {
        self.engine_capabilities
    }

    pub fn age(&self) -> Duration {
        Instant::now().duration_since(self.fetch_time)
    }

    /// returns `true` if the entry's age is >= age_limit
    pub fn older_than(&self, age_limit: Option<Duration>) -> bool {
        age_limit.map_or(false, |limit| self.age() >= limit)
    }
}

#[derive(Deserialize)]
#[serde(transparent)]
struct HexU64(#[serde(with = "serde_utils::u64_hex_be")] u64);

pub struct EngineClient<T> {
    transport: T,
    header_cache: HeaderCache,
    engine_capabilities_cache: Mutex<Option<CapabilitiesCacheEntry>>,
    rpc_timeout: Duration,
    log: Logger,
}

impl EngineClient<HttpJsonRpc> {
    /// Build an HTTP client authenticated with the secret at `config.jwt_secret_path`.
    ///
    /// The returned token manager signs on demand. Call `JwtTokenManager::start` to also keep a
    /// fresh token published in the background.
    pub fn from_config(
        config: &Config,
        log: Logger,
    ) -> Result<(Self, Arc<JwtTokenManager>), Error> {
        let auth = Auth::new_with_path(&config.jwt_secret_path, None, None)
            .map_err(|e| Error::ApiError(ApiError::Auth(e)))?;
        let token_manager = Arc::new(JwtTokenManager::new(auth, log.clone()));
        let transport = HttpJsonRpc::new_with_auth(
            config.rpc_dial_url.clone(),
            token_manager.clone(),
            config.rpc_retries,
            log.clone(),
        )?;
        let client = Self::new(transport, config.header_cache_size, config.rpc_timeout, log);
        Ok((client, token_manager))
    }
}

impl<T: EngineTransport> EngineClient<T> {
    pub fn new(transport: T, header_cache_size: usize, rpc_timeout: Duration, log: Logger) -> Self {
        Self {
            transport,
            header_cache: HeaderCache::new(header_cache_size),
            engine_capabilities_cache: Mutex::new(None),
            rpc_timeout,
            log,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn header_cache(&self) -> &HeaderCache {
        &self.header_cache
    }

    async fn rpc_request<D: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<D, ApiError> {
        debug!(self.log, "Engine API call"; "method" => method);
        let result = self
            .transport
            .request(method, params, self.rpc_timeout)
            .await?;
        serde_json::from_value(result).map_err(Into::into)
    }

    /// Wait for the execution client to answer `eth_chainId`, check it serves
    /// `required_chain_id`, then exchange capabilities.
    pub async fn start(
        &self,
        required_chain_id: u64,
        check_interval: Duration,
        shutdown: &CancellationToken,
    ) -> Result<EngineCapabilities, Error> {
        loop {
            match self.get_chain_id().await {
                Ok(chain_id) if chain_id == required_chain_id => {
                    info!(
                        self.log,
                        "Connected to execution client";
                        "chain_id" => chain_id,
                    );
                    break;
                }
                Ok(chain_id) => {
                    error!(
                        self.log,
                        "Execution client is on the wrong chain";
                        "expected" => required_chain_id,
                        "found" => chain_id,
                    );
                    return Err(Error::ApiError(ApiError::ChainIdMismatch {
                        expected: required_chain_id,
                        found: chain_id,
                    }));
                }
                Err(e) => {
                    if e.is_auth_error() {
                        crit!(
                            self.log,
                            "Execution client rejected our jwt";
                            "error" => ?e,
                        );
                    } else {
                        warn!(
                            self.log,
                            "Waiting for execution client";
                            "error" => ?e,
                            "retry_in" => ?check_interval,
                        );
                    }
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(check_interval) => {}
                    }
                }
            }
        }

        let capabilities = self.get_engine_capabilities(None).await?;
        for fork in [ForkName::Capella, ForkName::Deneb] {
            if !capabilities.supports(fork) {
                warn!(
                    self.log,
                    "Execution client is missing engine methods";
                    "fork" => %fork,
                );
            }
        }
        Ok(capabilities)
    }

    pub async fn get_chain_id(&self) -> Result<u64, ApiError> {
        let chain_id: HexU64 = self.rpc_request(ETH_CHAIN_ID, json!([])).await?;
        Ok(chain_id.0)
    }

    pub async fn get_logs(
        &self,
        block_hash: ExecutionBlockHash,
        addresses: &[Address],
    ) -> Result<Vec<Log>, ApiError> {
        let params = json!([{ "blockHash": block_hash, "address": addresses }]);
        self.rpc_request(ETH_GET_LOGS, params).await
    }

    pub async fn header_by_number(&self, number: u64) -> Result<Option<ExecutionBlock>, ApiError> {
        if let Some(header) = self.header_cache.get_by_number(number) {
            return Ok(Some(header));
        }
        self.fetch_header_by_number(BlockByNumberQuery::Number(number))
            .await
    }

    /// The execution client's current head. Never answered from the cache.
    pub async fn latest_header(&self) -> Result<Option<ExecutionBlock>, ApiError> {
        self.fetch_header_by_number(BlockByNumberQuery::Tag(LATEST_TAG))
            .await
    }

    async fn fetch_header_by_number(
        &self,
        query: BlockByNumberQuery<'_>,
    ) -> Result<Option<ExecutionBlock>, ApiError> {
        let params = json!([query, RETURN_FULL_TRANSACTION_OBJECTS]);
        let header: Option<ExecutionBlock> =
            self.rpc_request(ETH_GET_BLOCK_BY_NUMBER, params).await?;
        if let Some(header) = header {
            self.header_cache.put(header);
        }
        Ok(header)
    }

    pub async fn header_by_hash(
        &self,
        block_hash: ExecutionBlockHash,
    ) -> Result<Option<ExecutionBlock>, ApiError> {
        if let Some(header) = self.header_cache.get_by_hash(&block_hash) {
            return Ok(Some(header));
        }
        let params = json!([block_hash, RETURN_FULL_TRANSACTION_OBJECTS]);
        let header: Option<ExecutionBlock> =
            self.rpc_request(ETH_GET_BLOCK_BY_HASH, params).await?;
        if let Some(header) = header {
            self.header_cache.put(header);
        }
        Ok(header)
    }

    pub async fn exchange_capabilities(&self) -> Result<EngineCapabilities, ApiError> {
        let methods: Vec<String> = self
            .rpc_request(ENGINE_EXCHANGE_CAPABILITIES, json!([ENGINE_CAPABILITIES]))
            .await?;
        Ok(EngineCapabilities::from_methods(&methods))
    }

    /// Returns the execution engine capabilities resulting from a call to
    /// engine_exchangeCapabilities. If the capabilities cache is populated,
    /// returns the cached result without calling the engine.
    ///
    /// Set `age_limit` to `None` to always return the cached result, or to refetch
    /// when the cached entry is at least that old.
    pub async fn get_engine_capabilities(
        &self,
        age_limit: Option<Duration>,
    ) -> Result<EngineCapabilities, ApiError> {
        let mut lock = self.engine_capabilities_cache.lock().await;

        if let Some(cached) = lock.as_ref().filter(|entry| !entry.older_than(age_limit)) {
            return Ok(cached.engine_capabilities());
        }

        let engine_capabilities = self.exchange_capabilities().await?;
        *lock = Some(CapabilitiesCacheEntry::new(engine_capabilities));
        Ok(engine_capabilities)
    }

    /// Our own identity, as sent in `engine_getClientVersionV1`.
    pub fn local_client_version() -> ClientVersionV1 {
        ClientVersionV1 {
            code: ClientCode::Unknown(CLIENT_CODE.to_string()),
            name: CLIENT_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            commit: CommitPrefix("00000000".to_string()),
        }
    }

    /// Diagnostics only. Every reported version is counted in the metrics.
    pub async fn get_client_version_v1(&self) -> Result<Vec<ClientVersionV1>, ApiError> {
        let params = json!([JsonClientVersionV1::from(Self::local_client_version())]);
        let response: Vec<JsonClientVersionV1> = self
            .rpc_request(ENGINE_GET_CLIENT_VERSION_V1, params)
            .await?;

        let versions = response
            .into_iter()
            .map(ClientVersionV1::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(ApiError::InvalidClientVersion)?;

        for version in &versions {
            let code = version.code.to_string();
            metrics::inc_counter_vec(
                &metrics::ENGINE_CLIENT_VERSION,
                &[&code, &version.name, &version.version],
            );
            info!(
                self.log,
                "Execution client version";
                "code" => %version.code,
                "name" => &version.name,
                "version" => &version.version,
                "commit" => %version.commit,
            );
        }
        Ok(versions)
    }

    /// A single `engine_forkchoiceUpdated` call using the method version of `fork`.
    pub async fn forkchoice_updated(
        &self,
        forkchoice_state: ForkchoiceState,
        payload_attributes: Option<PayloadAttributes>,
        fork: ForkName,
    ) -> Result<ForkchoiceUpdatedResponse, ApiError> {
        let method = match fork {
            ForkName::Capella => ENGINE_FORKCHOICE_UPDATED_V2,
            ForkName::Deneb => ENGINE_FORKCHOICE_UPDATED_V3,
            ForkName::Electra => {
                return Err(ApiError::UnsupportedForkVariant(format!(
                    "forkchoice updated for {}",
                    fork
                )))
            }
        };
        let params = json!([
            JsonForkchoiceStateV1::from(forkchoice_state),
            payload_attributes.map(JsonPayloadAttributes::from)
        ]);
        let response: JsonForkchoiceUpdatedV1Response = self.rpc_request(method, params).await?;
        response.try_into()
    }

    /// Tell the execution client about a new head, optionally starting a payload build.
    ///
    /// Returns the payload id and the latest valid hash. SYNCING and ACCEPTED succeed without a
    /// latest valid hash. If the head is INVALID the update is replayed once with the safe block
    /// as head. A failed replay is returned as is, while a successful one is returned inside
    /// `Error::BadBlockProduced` since the rejected head must still be discarded.
    pub async fn notify_forkchoice_update(
        &self,
        forkchoice_state: ForkchoiceState,
        payload_attributes: Option<PayloadAttributes>,
        fork: ForkName,
    ) -> Result<(Option<PayloadId>, Option<ExecutionBlockHash>), Error> {
        let mut state = forkchoice_state;
        let mut is_retry = false;

        loop {
            let response = match self
                .forkchoice_updated(state, payload_attributes.clone(), fork)
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    error!(
                        self.log,
                        "Forkchoice update failed";
                        "error" => ?e,
                        "head_block_hash" => ?state.head_block_hash,
                        "safe_block_hash" => ?state.safe_block_hash,
                        "finalized_block_hash" => ?state.finalized_block_hash,
                        "is_retry" => is_retry,
                    );
                    return Err(e.into());
                }
            };

            let ForkchoiceUpdatedResponse {
                payload_status,
                payload_id,
            } = response;
            record_status(&metrics::ENGINE_FORKCHOICE_UPDATED, &payload_status);
            let status =
                match process_payload_status(state.head_block_hash, payload_status, &self.log) {
                    Ok(status) => status,
                    Err(e) => {
                        error!(
                            self.log,
                            "Malformed forkchoice update response";
                            "error" => ?e,
                            "head_block_hash" => ?state.head_block_hash,
                            "safe_block_hash" => ?state.safe_block_hash,
                            "finalized_block_hash" => ?state.finalized_block_hash,
                            "is_retry" => is_retry,
                        );
                        return Err(e.into());
                    }
                };

            let latest_valid_hash = match status {
                PayloadStatus::Valid { latest_valid_hash } => {
                    if payload_attributes.is_some() {
                        info!(
                            self.log,
                            "Forkchoice updated with payload attributes";
                            "head_block_hash" => ?state.head_block_hash,
                            "payload_id" => ?payload_id,
                        );
                    }
                    Some(latest_valid_hash)
                }
                optimistic @ (PayloadStatus::Syncing | PayloadStatus::Accepted) => {
                    warn!(
                        self.log,
                        "Execution client is optimistic about forkchoice update";
                        "status" => ?optimistic,
                        "head_block_hash" => ?state.head_block_hash,
                    );
                    None
                }
                PayloadStatus::Invalid {
                    latest_valid_hash,
                    validation_error,
                } => {
                    error!(
                        self.log,
                        "Forkchoice head rejected as invalid";
                        "head_block_hash" => ?state.head_block_hash,
                        "latest_valid_hash" => ?latest_valid_hash,
                        "validation_error" => ?validation_error,
                        "is_retry" => is_retry,
                    );
                    if is_retry {
                        return Err(Error::InvalidPayloadStatus {
                            latest_valid_hash,
                            validation_error,
                        });
                    }
                    is_retry = true;
                    state.head_block_hash = state.safe_block_hash;
                    continue;
                }
                PayloadStatus::InvalidBlockHash { validation_error } => {
                    error!(
                        self.log,
                        "Forkchoice head has an invalid block hash";
                        "head_block_hash" => ?state.head_block_hash,
                        "validation_error" => ?validation_error,
                        "is_retry" => is_retry,
                    );
                    if is_retry {
                        return Err(Error::InvalidBlockHashPayloadStatus { validation_error });
                    }
                    is_retry = true;
                    state.head_block_hash = state.safe_block_hash;
                    continue;
                }
            };

            if is_retry {
                return Err(Error::BadBlockProduced {
                    payload_id,
                    latest_valid_hash,
                });
            }
            return Ok((payload_id, latest_valid_hash));
        }
    }

    /// A single `engine_newPayload` call using the method version of the payload's fork.
    pub async fn new_payload<E: EthSpec>(
        &self,
        request: &NewPayloadRequest<E>,
    ) -> Result<PayloadStatusV1, Error> {
        let (method, params) = match request.fork_name() {
            ForkName::Capella => (ENGINE_NEW_PAYLOAD_V2, json!([request.execution_payload])),
            ForkName::Deneb => (
                ENGINE_NEW_PAYLOAD_V3,
                json!([
                    request.execution_payload,
                    request.versioned_hashes,
                    request.required_parent_beacon_block_root()?
                ]),
            ),
            fork => {
                return Err(Error::ApiError(ApiError::UnsupportedForkVariant(format!(
                    "new payload for {}",
                    fork
                ))))
            }
        };
        let response: JsonPayloadStatusV1 = self.rpc_request(method, params).await?;
        let status = PayloadStatusV1::try_from(response)?;
        record_status(&metrics::ENGINE_NEW_PAYLOAD, &status);
        Ok(status)
    }

    /// Validate `request` locally and hand it to the execution client.
    ///
    /// Returns `true` when the payload is known to be valid and `false` when the execution
    /// client has not finished validating it.
    pub async fn verify_and_notify_new_payload<E: EthSpec>(
        &self,
        request: &NewPayloadRequest<E>,
    ) -> Result<bool, Error> {
        request.perform_local_verifications()?;
        let block_hash = request.block_hash();

        if request.skip_if_exists {
            match self.header_by_hash(block_hash).await {
                Ok(Some(_)) => {
                    debug!(
                        self.log,
                        "Skipping new payload for known block";
                        "block_hash" => ?block_hash,
                    );
                    return Ok(true);
                }
                Ok(None) => {}
                Err(e) => debug!(
                    self.log,
                    "Could not check for existing block";
                    "block_hash" => ?block_hash,
                    "error" => ?e,
                ),
            }
        }

        let result = match self.new_payload(request).await {
            Ok(response) => {
                process_payload_status(block_hash, response, &self.log).map_err(Into::into)
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(PayloadStatus::Valid { .. }) => Ok(true),
            Ok(status @ (PayloadStatus::Syncing | PayloadStatus::Accepted)) => {
                debug!(
                    self.log,
                    "Payload not yet validated by execution client";
                    "status" => ?status,
                    "block_hash" => ?block_hash,
                );
                Ok(false)
            }
            Ok(status) => {
                error!(
                    self.log,
                    "Execution client rejected new payload";
                    "status" => ?status,
                    "block_hash" => ?block_hash,
                    "block_number" => request.block_number(),
                    "parent_hash" => ?request.parent_hash(),
                );
                Err(Error::BadBlockProduced {
                    payload_id: None,
                    latest_valid_hash: status.latest_valid_hash(),
                })
            }
            Err(e) if request.optimistic => {
                warn!(
                    self.log,
                    "New payload failed, importing optimistically";
                    "error" => ?e,
                    "block_hash" => ?block_hash,
                );
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Fetch a built payload using the method version of `fork`. A `null` result is reported as
    /// `Error::NilPayloadEnvelope`.
    pub async fn get_payload<E: EthSpec>(
        &self,
        payload_id: PayloadId,
        fork: ForkName,
    ) -> Result<GetPayloadResponse<E>, Error> {
        let params = json!([JsonPayloadIdRequest::from(payload_id)]);
        let response: Option<GetPayloadResponse<E>> = match fork {
            ForkName::Capella => self
                .rpc_request::<Option<JsonGetPayloadResponseV2<E>>>(ENGINE_GET_PAYLOAD_V2, params)
                .await?
                .map(Into::into),
            ForkName::Deneb => self
                .rpc_request::<Option<JsonGetPayloadResponseV3<E>>>(ENGINE_GET_PAYLOAD_V3, params)
                .await?
                .map(Into::into),
            ForkName::Electra => {
                return Err(Error::ApiError(ApiError::UnsupportedForkVariant(format!(
                    "get payload for {}",
                    fork
                ))))
            }
        };
        response.ok_or(Error::NilPayloadEnvelope)
    }
}

fn record_status(counter: &metrics::Result<metrics::IntCounterVec>, status: &PayloadStatusV1) {
    let label: &'static str = status.status.into();
    metrics::inc_counter_vec(counter, &[label]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine_api::ethspec::MainnetEthSpec;
    use crate::engine_api::{
        ExecutionPayload, ExecutionPayloadDeneb, Hash256, PayloadStatusV1Status,
    };
    use crate::test_utils::*;

    type E = MainnetEthSpec;

    const TIMEOUT: Duration = Duration::from_secs(2);

    fn client() -> EngineClient<MockTransport> {
        EngineClient::new(MockTransport::new(), 16, TIMEOUT, null_logger())
    }

    fn state() -> ForkchoiceState {
        ForkchoiceState {
            head_block_hash: ExecutionBlockHash::repeat_byte(0x11),
            safe_block_hash: ExecutionBlockHash::repeat_byte(0x22),
            finalized_block_hash: ExecutionBlockHash::repeat_byte(0x33),
        }
    }

    fn header(number: u64) -> ExecutionBlock {
        ExecutionBlock {
            block_hash: ExecutionBlockHash::repeat_byte(number as u8),
            block_number: number,
            parent_hash: ExecutionBlockHash::repeat_byte(number as u8 - 1),
            state_root: Hash256::zero(),
            timestamp: 12 * number,
        }
    }

    #[tokio::test]
    async fn headers_are_cached_under_both_keys() {
        let client = client();
        client
            .transport()
            .push_ok(ETH_GET_BLOCK_BY_NUMBER, block_json(header(5)));

        assert_eq!(client.header_by_number(5).await.unwrap(), Some(header(5)));
        assert_eq!(client.header_by_number(5).await.unwrap(), Some(header(5)));
        assert_eq!(
            client.header_by_hash(header(5).block_hash).await.unwrap(),
            Some(header(5))
        );

        let transport = client.transport();
        assert_eq!(transport.call_count(ETH_GET_BLOCK_BY_NUMBER), 1);
        assert_eq!(transport.call_count(ETH_GET_BLOCK_BY_HASH), 0);
        assert_eq!(
            transport.calls_to(ETH_GET_BLOCK_BY_NUMBER)[0],
            json!(["0x5", false])
        );
    }

    #[tokio::test]
    async fn unknown_header_is_none_and_not_cached() {
        let client = client();
        client
            .transport()
            .set_default(ETH_GET_BLOCK_BY_HASH, serde_json::Value::Null);

        let hash = ExecutionBlockHash::repeat_byte(9);
        assert_eq!(client.header_by_hash(hash).await.unwrap(), None);
        assert_eq!(client.header_by_hash(hash).await.unwrap(), None);
        assert_eq!(client.transport().call_count(ETH_GET_BLOCK_BY_HASH), 2);
        assert!(client.header_cache().is_empty());
    }

    #[tokio::test]
    async fn header_errors_propagate() {
        let client = client();
        client.transport().push_err(
            ETH_GET_BLOCK_BY_NUMBER,
            ApiError::from_rpc_error(-32603, "db closed".into()),
        );

        assert!(matches!(
            client.header_by_number(1).await,
            Err(ApiError::InternalError(m)) if m == "db closed"
        ));
    }

    #[tokio::test]
    async fn forkchoice_valid() {
        let client = client();
        let lvh = state().head_block_hash;
        client.transport().push_ok(
            ENGINE_FORKCHOICE_UPDATED_V3,
            forkchoice_updated_json(PayloadStatusV1Status::Valid, Some(lvh), Some([7; 8])),
        );

        let result = client
            .notify_forkchoice_update(state(), None, ForkName::Deneb)
            .await
            .unwrap();
        assert_eq!(result, (Some([7; 8]), Some(lvh)));

        let params = &client.transport().calls_to(ENGINE_FORKCHOICE_UPDATED_V3)[0];
        assert_eq!(params[0]["headBlockHash"], json!(format!("{:?}", lvh)));
        assert_eq!(params[1], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn forkchoice_soft_success() {
        for status in [PayloadStatusV1Status::Syncing, PayloadStatusV1Status::Accepted] {
            let client = client();
            client.transport().push_ok(
                ENGINE_FORKCHOICE_UPDATED_V3,
                forkchoice_updated_json(status, None, Some([1; 8])),
            );

            let result = client
                .notify_forkchoice_update(state(), None, ForkName::Deneb)
                .await;
            assert_eq!(result.unwrap(), (Some([1; 8]), None), "{:?}", status);
            assert_eq!(
                client.transport().call_count(ENGINE_FORKCHOICE_UPDATED_V3),
                1
            );
        }
    }

    #[tokio::test]
    async fn forkchoice_invalid_then_valid_reports_bad_block() {
        let client = client();
        let safe = state().safe_block_hash;
        let transport = client.transport();
        transport.push_ok(
            ENGINE_FORKCHOICE_UPDATED_V3,
            forkchoice_updated_json(PayloadStatusV1Status::Invalid, None, None),
        );
        transport.push_ok(
            ENGINE_FORKCHOICE_UPDATED_V3,
            forkchoice_updated_json(PayloadStatusV1Status::Valid, Some(safe), Some([0xaa; 8])),
        );

        let err = client
            .notify_forkchoice_update(state(), None, ForkName::Deneb)
            .await
            .unwrap_err();

        match err {
            Error::BadBlockProduced {
                payload_id,
                latest_valid_hash,
            } => {
                assert_eq!(payload_id, Some([0xaa; 8]));
                assert_eq!(latest_valid_hash, Some(safe));
            }
            other => panic!("unexpected {:?}", other),
        }

        let calls = transport.calls_to(ENGINE_FORKCHOICE_UPDATED_V3);
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[0][0]["headBlockHash"],
            json!(format!("{:?}", state().head_block_hash))
        );
        assert_eq!(calls[1][0]["headBlockHash"], json!(format!("{:?}", safe)));
        assert_eq!(calls[1][0]["safeBlockHash"], json!(format!("{:?}", safe)));
    }

    #[tokio::test]
    async fn forkchoice_retry_failure_propagates_verbatim() {
        let client = client();
        let transport = client.transport();
        transport.push_ok(
            ENGINE_FORKCHOICE_UPDATED_V3,
            forkchoice_updated_json(PayloadStatusV1Status::InvalidBlockHash, None, None),
        );
        transport.push_err(
            ENGINE_FORKCHOICE_UPDATED_V3,
            ApiError::from_rpc_error(-38002, "bad state".into()),
        );

        let err = client
            .notify_forkchoice_update(state(), None, ForkName::Deneb)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ApiError(ApiError::InvalidForkchoiceState(ref m)) if m == "bad state"
        ));
        assert_eq!(transport.call_count(ENGINE_FORKCHOICE_UPDATED_V3), 2);
    }

    #[tokio::test]
    async fn forkchoice_retries_at_most_once() {
        let client = client();
        client.transport().set_default(
            ENGINE_FORKCHOICE_UPDATED_V3,
            forkchoice_updated_json(PayloadStatusV1Status::Invalid, None, None),
        );

        let err = client
            .notify_forkchoice_update(state(), None, ForkName::Deneb)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPayloadStatus { .. }));
        assert_eq!(
            client.transport().call_count(ENGINE_FORKCHOICE_UPDATED_V3),
            2
        );
    }

    #[tokio::test]
    async fn forkchoice_uses_fork_method() {
        let client = client();
        client.transport().push_ok(
            ENGINE_FORKCHOICE_UPDATED_V2,
            forkchoice_updated_json(PayloadStatusV1Status::Syncing, None, None),
        );

        client
            .notify_forkchoice_update(state(), None, ForkName::Capella)
            .await
            .unwrap();
        assert_eq!(
            client.transport().call_count(ENGINE_FORKCHOICE_UPDATED_V2),
            1
        );
        assert!(matches!(
            client
                .notify_forkchoice_update(state(), None, ForkName::Electra)
                .await,
            Err(Error::ApiError(ApiError::UnsupportedForkVariant(_)))
        ));
    }

    #[tokio::test]
    async fn unknown_status_string_is_an_error() {
        let client = client();
        client.transport().push_ok(
            ENGINE_FORKCHOICE_UPDATED_V3,
            json!({"payloadStatus": {"status": "MAYBE", "latestValidHash": null}}),
        );

        assert!(matches!(
            client
                .notify_forkchoice_update(state(), None, ForkName::Deneb)
                .await,
            Err(Error::ApiError(ApiError::UnknownPayloadStatus(_)))
        ));
    }

    #[tokio::test]
    async fn forkchoice_valid_without_latest_valid_hash_is_logged() {
        let logs = CapturedLogs::default();
        let client = EngineClient::new(MockTransport::new(), 16, TIMEOUT, logs.logger());
        client.transport().push_ok(
            ENGINE_FORKCHOICE_UPDATED_V3,
            forkchoice_updated_json(PayloadStatusV1Status::Valid, None, Some([2; 8])),
        );

        let result = client
            .notify_forkchoice_update(state(), None, ForkName::Deneb)
            .await;

        assert!(matches!(
            result,
            Err(Error::ApiError(ApiError::BadResponse(_)))
        ));
        assert!(logs.contains(slog::Level::Error, "Malformed forkchoice update response"));
        assert_eq!(
            client.transport().call_count(ENGINE_FORKCHOICE_UPDATED_V3),
            1
        );
    }

    fn deneb_request() -> NewPayloadRequest<E> {
        let root = Hash256::repeat_byte(0x42);
        let payload = sealed_deneb_payload::<E>(
            ExecutionPayloadDeneb {
                block_number: 3,
                ..Default::default()
            },
            root,
        );
        NewPayloadRequest::new(ExecutionPayload::Deneb(payload), vec![], Some(root))
    }

    #[tokio::test]
    async fn new_payload_statuses() {
        let request = deneb_request();
        let hash = request.block_hash();
        let cases = [
            (PayloadStatusV1Status::Valid, Some(hash), Some(true)),
            (PayloadStatusV1Status::Syncing, None, Some(false)),
            (PayloadStatusV1Status::Accepted, None, Some(false)),
            (PayloadStatusV1Status::Invalid, None, None),
            (PayloadStatusV1Status::InvalidBlockHash, None, None),
        ];
        for (status, lvh, expected) in cases {
            let client = client();
            client
                .transport()
                .push_ok(ENGINE_NEW_PAYLOAD_V3, payload_status_json(status, lvh));
            let result = client.verify_and_notify_new_payload(&request).await;
            match expected {
                Some(accepted) => assert_eq!(result.unwrap(), accepted, "{:?}", status),
                None => assert!(result.unwrap_err().is_bad_block_produced(), "{:?}", status),
            }
        }
    }

    #[tokio::test]
    async fn new_payload_v3_params() {
        let client = client();
        let request = deneb_request();
        client.transport().push_ok(
            ENGINE_NEW_PAYLOAD_V3,
            payload_status_json(PayloadStatusV1Status::Syncing, None),
        );

        client.verify_and_notify_new_payload(&request).await.unwrap();

        let params = &client.transport().calls_to(ENGINE_NEW_PAYLOAD_V3)[0];
        assert_eq!(params[0]["blockNumber"], json!("0x3"));
        assert_eq!(params[1], json!([]));
        assert_eq!(
            params[2],
            json!(format!("{:?}", Hash256::repeat_byte(0x42)))
        );
    }

    #[tokio::test]
    async fn skip_if_exists_short_circuits() {
        let client = client();
        let request = deneb_request().with_skip_if_exists(true);
        client.header_cache().put(ExecutionBlock {
            block_hash: request.block_hash(),
            block_number: 3,
            parent_hash: request.parent_hash(),
            state_root: Hash256::zero(),
            timestamp: 0,
        });

        assert!(client.verify_and_notify_new_payload(&request).await.unwrap());
        assert_eq!(client.transport().call_count(ENGINE_NEW_PAYLOAD_V3), 0);
        assert_eq!(client.transport().call_count(ETH_GET_BLOCK_BY_HASH), 0);
    }

    #[tokio::test]
    async fn skip_if_exists_falls_through_for_unknown_block() {
        let client = client();
        let request = deneb_request().with_skip_if_exists(true);
        let transport = client.transport();
        transport.push_ok(ETH_GET_BLOCK_BY_HASH, serde_json::Value::Null);
        transport.push_ok(
            ENGINE_NEW_PAYLOAD_V3,
            payload_status_json(PayloadStatusV1Status::Valid, Some(request.block_hash())),
        );

        assert!(client.verify_and_notify_new_payload(&request).await.unwrap());
        assert_eq!(transport.call_count(ETH_GET_BLOCK_BY_HASH), 1);
        assert_eq!(transport.call_count(ENGINE_NEW_PAYLOAD_V3), 1);
    }

    #[tokio::test]
    async fn local_verification_failure_is_never_sent() {
        let client = client();
        let mut request = deneb_request();
        request.versioned_hashes.push(Hash256::repeat_byte(1));

        assert!(matches!(
            client.verify_and_notify_new_payload(&request).await,
            Err(Error::VersionedHashes(_))
        ));
        assert!(client.transport().calls().is_empty());
    }

    #[tokio::test]
    async fn optimistic_mode_swallows_engine_errors() {
        let client = client();
        let request = deneb_request().with_optimistic(true);
        let transport = client.transport();
        transport.push_err(ENGINE_NEW_PAYLOAD_V3, ApiError::Timeout);
        transport.push_ok(
            ENGINE_NEW_PAYLOAD_V3,
            payload_status_json(PayloadStatusV1Status::Invalid, None),
        );

        assert!(!client.verify_and_notify_new_payload(&request).await.unwrap());
        // INVALID is still fatal.
        assert!(client
            .verify_and_notify_new_payload(&request)
            .await
            .unwrap_err()
            .is_bad_block_produced());

        let strict = deneb_request();
        transport.push_err(ENGINE_NEW_PAYLOAD_V3, ApiError::Timeout);
        assert!(matches!(
            client.verify_and_notify_new_payload(&strict).await,
            Err(Error::ApiError(ApiError::Timeout))
        ));
    }

    #[tokio::test]
    async fn get_payload_dispatch() {
        let client = client();
        let payload = ExecutionPayloadDeneb::<E> {
            block_number: 9,
            block_hash: ExecutionBlockHash::repeat_byte(9),
            ..Default::default()
        };
        client
            .transport()
            .push_ok(ENGINE_GET_PAYLOAD_V3, get_payload_v3_json(payload.clone()));

        let response = client
            .get_payload::<E>([3; 8], ForkName::Deneb)
            .await
            .unwrap();
        assert_eq!(response.execution_payload_ref().block_number(), 9);
        assert!(response.blobs().is_some());
        assert_eq!(
            client.transport().calls_to(ENGINE_GET_PAYLOAD_V3)[0],
            json!(["0x0303030303030303"])
        );

        assert!(matches!(
            client.get_payload::<E>([3; 8], ForkName::Electra).await,
            Err(Error::ApiError(ApiError::UnsupportedForkVariant(_)))
        ));

        client
            .transport()
            .push_ok(ENGINE_GET_PAYLOAD_V2, serde_json::Value::Null);
        assert!(matches!(
            client.get_payload::<E>([3; 8], ForkName::Capella).await,
            Err(Error::NilPayloadEnvelope)
        ));
    }

    #[tokio::test]
    async fn chain_id_and_logs() {
        let client = client();
        let transport = client.transport();
        transport.push_ok(ETH_CHAIN_ID, json!("0x138de"));
        transport.push_ok(ETH_GET_LOGS, json!([]));

        assert_eq!(client.get_chain_id().await.unwrap(), 80094);

        let address = Address::repeat_byte(0x0d);
        let block_hash = ExecutionBlockHash::repeat_byte(1);
        assert!(client
            .get_logs(block_hash, &[address])
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            transport.calls_to(ETH_GET_LOGS)[0],
            json!([{ "blockHash": block_hash, "address": [address] }])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn start_waits_for_execution_client() {
        let client = client();
        let transport = client.transport();
        transport.push_err(ETH_CHAIN_ID, ApiError::Timeout);
        transport.push_err(ETH_CHAIN_ID, ApiError::Eip155Failure);
        transport.push_ok(ETH_CHAIN_ID, json!("0x138de"));
        transport.push_ok(
            ENGINE_EXCHANGE_CAPABILITIES,
            json!(ENGINE_CAPABILITIES),
        );

        let capabilities = client
            .start(80094, Duration::from_secs(3), &CancellationToken::new())
            .await
            .unwrap();
        assert!(capabilities.supports(ForkName::Deneb));
        assert_eq!(transport.call_count(ETH_CHAIN_ID), 3);

        // Cached from here on.
        client.get_engine_capabilities(None).await.unwrap();
        assert_eq!(transport.call_count(ENGINE_EXCHANGE_CAPABILITIES), 1);
    }

    #[tokio::test]
    async fn start_rejects_wrong_chain() {
        let client = client();
        client.transport().push_ok(ETH_CHAIN_ID, json!("0x1"));

        assert!(matches!(
            client
                .start(80094, Duration::from_secs(3), &CancellationToken::new())
                .await,
            Err(Error::ApiError(ApiError::ChainIdMismatch {
                expected: 80094,
                found: 1
            }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_cancellable() {
        let client = client();
        client
            .transport()
            .push_err(ETH_CHAIN_ID, ApiError::Timeout);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        assert!(matches!(
            client.start(80094, Duration::from_secs(3), &shutdown).await,
            Err(Error::Cancelled)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn capabilities_refetched_when_stale() {
        let client = client();
        client
            .transport()
            .set_default(ENGINE_EXCHANGE_CAPABILITIES, json!([ENGINE_NEW_PAYLOAD_V2]));

        let limit = Some(Duration::from_secs(60));
        client.get_engine_capabilities(limit).await.unwrap();
        client.get_engine_capabilities(limit).await.unwrap();
        assert_eq!(
            client.transport().call_count(ENGINE_EXCHANGE_CAPABILITIES),
            1
        );
        client
            .get_engine_capabilities(Some(Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(
            client.transport().call_count(ENGINE_EXCHANGE_CAPABILITIES),
            2
        );
    }

    #[tokio::test]
    async fn client_versions_are_parsed() {
        let client = client();
        client.transport().push_ok(
            ENGINE_GET_CLIENT_VERSION_V1,
            json!([{"code": "GE", "name": "Geth", "version": "1.14.0", "commit": "0xabcdef01"}]),
        );
        client.transport().push_ok(
            ENGINE_GET_CLIENT_VERSION_V1,
            json!([{"code": "GETH", "name": "Geth", "version": "1.14.0", "commit": "0xabcdef01"}]),
        );

        let versions = client.get_client_version_v1().await.unwrap();
        assert_eq!(versions[0].code, ClientCode::GoEthereum);
        assert_eq!(versions[0].commit.to_string(), "abcdef01");
        assert!(metrics::get_int_counter_vec_value(
            &metrics::ENGINE_CLIENT_VERSION,
            &["GE", "Geth", "1.14.0"]
        ) >= 1);

        assert!(matches!(
            client.get_client_version_v1().await,
            Err(ApiError::InvalidClientVersion(_))
        ));

        let sent = &client.transport().calls_to(ENGINE_GET_CLIENT_VERSION_V1)[0];
        assert_eq!(sent[0]["code"], json!(CLIENT_CODE));
    }
}
