//! Drives local payload production: triggers builds through forkchoice updates and collects the
//! built payloads.

use crate::engine_api::ethspec::EthSpec;
use crate::engine_api::{
    Address, EngineTransport, Error as ApiError, ExecutionBlock, ExecutionBlockHash, ForkName,
    ForkchoiceState, GetPayloadResponse, Hash256, PayloadAttributes, PayloadId, Withdrawal,
};
use crate::engines::EngineClient;
use crate::metrics;
use crate::payload_id_cache::{PayloadIdCache, Slot};
use crate::Error;
use slog::{debug, error, info, warn, Logger};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

pub type Epoch = u64;

pub const DEFAULT_SLOTS_PER_EPOCH: u64 = 32;
pub const DEFAULT_EPOCHS_PER_HISTORICAL_VECTOR: u64 = 65_536;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainStateError {
    /// The state holds no execution payload yet.
    NoLatestExecutionPayload,
    RandaoMixUnavailable { index: u64 },
    WithdrawalsUnavailable(String),
    /// Failure of the store backing the state.
    Backend(String),
}

/// Read access to the beacon state a payload is built on top of.
pub trait ChainState: Send + Sync {
    /// Header of the execution payload in the most recent beacon block.
    fn latest_execution_payload_header(&self) -> Result<ExecutionBlock, ChainStateError>;

    fn expected_withdrawals(&self) -> Result<Vec<Withdrawal>, ChainStateError>;

    fn randao_mix_at_index(&self, index: u64) -> Result<Hash256, ChainStateError>;

    fn fork_name_at_epoch(&self, epoch: Epoch) -> ForkName;

    fn slots_per_epoch(&self) -> u64 {
        DEFAULT_SLOTS_PER_EPOCH
    }

    fn epochs_per_historical_vector(&self) -> u64 {
        DEFAULT_EPOCHS_PER_HISTORICAL_VECTOR
    }

    fn epoch_at_slot(&self, slot: Slot) -> Epoch {
        slot / self.slots_per_epoch().max(1)
    }
}

pub struct PayloadBuilder<T> {
    engine: Arc<EngineClient<T>>,
    payload_ids: PayloadIdCache,
    suggested_fee_recipient: Address,
    payload_timeout: Duration,
    log: Logger,
}

impl<T: EngineTransport> PayloadBuilder<T> {
    pub fn new(
        engine: Arc<EngineClient<T>>,
        suggested_fee_recipient: Address,
        payload_timeout: Duration,
        log: Logger,
    ) -> Self {
        Self {
            engine,
            payload_ids: PayloadIdCache::new(),
            suggested_fee_recipient,
            payload_timeout,
            log,
        }
    }

    pub fn engine(&self) -> &Arc<EngineClient<T>> {
        &self.engine
    }

    pub fn payload_id_cache(&self) -> &PayloadIdCache {
        &self.payload_ids
    }

    /// Attributes for a payload at `slot`, using the RANDAO mix of the slot's epoch as it stands
    /// in `state`, i.e. before the new block is applied.
    pub fn build_payload_attributes<S: ChainState>(
        &self,
        state: &S,
        slot: Slot,
        timestamp: u64,
        parent_block_root: Hash256,
    ) -> Result<PayloadAttributes, Error> {
        let epoch = state.epoch_at_slot(slot);
        let withdrawals = state.expected_withdrawals()?;
        let prev_randao =
            state.randao_mix_at_index(epoch % state.epochs_per_historical_vector().max(1))?;

        PayloadAttributes::new(
            state.fork_name_at_epoch(epoch),
            timestamp,
            prev_randao,
            self.suggested_fee_recipient,
            withdrawals,
            parent_block_root,
        )
        .map_err(Into::into)
    }

    /// Start a payload build on top of `parent_eth1_hash` and remember its id under
    /// `(slot, parent_block_root)`.
    ///
    /// Returns `Ok(None)` when the execution client is still syncing and did not start a build.
    pub async fn request_payload<S: ChainState>(
        &self,
        state: &S,
        parent_eth1_hash: ExecutionBlockHash,
        finalized_eth1_hash: ExecutionBlockHash,
        slot: Slot,
        timestamp: u64,
        parent_block_root: Hash256,
    ) -> Result<Option<PayloadId>, Error> {
        let attributes =
            self.build_payload_attributes(state, slot, timestamp, parent_block_root)?;
        let fork = state.fork_name_at_epoch(state.epoch_at_slot(slot));
        let forkchoice_state = ForkchoiceState {
            head_block_hash: parent_eth1_hash,
            safe_block_hash: finalized_eth1_hash,
            finalized_block_hash: finalized_eth1_hash,
        };

        let (payload_id, latest_valid_hash) = self
            .engine
            .notify_forkchoice_update(forkchoice_state, Some(attributes), fork)
            .await
            .map_err(|e| {
                error!(
                    self.log,
                    "Failed to request payload build";
                    "error" => ?e,
                    "slot" => slot,
                    "parent_block_root" => ?parent_block_root,
                    "parent_eth1_hash" => ?parent_eth1_hash,
                );
                e
            })?;

        match (payload_id, latest_valid_hash) {
            (Some(payload_id), _) => {
                self.payload_ids.set(slot, parent_block_root, payload_id);
                debug!(
                    self.log,
                    "Payload build started";
                    "slot" => slot,
                    "payload_id" => ?payload_id,
                    "parent_block_root" => ?parent_block_root,
                );
                Ok(Some(payload_id))
            }
            // A latest valid hash is only present for VALID.
            (None, Some(_)) => {
                warn!(
                    self.log,
                    "Execution client accepted attributes without a payload id";
                    "slot" => slot,
                    "parent_eth1_hash" => ?parent_eth1_hash,
                );
                Err(Error::NilPayloadOnValidResponse)
            }
            (None, None) => Ok(None),
        }
    }

    /// Collect the payload for `(slot, parent_block_root)`.
    ///
    /// A build started earlier is fetched right away. If there is none, or fetching it fails, a
    /// new build is started and fetched after `payload_timeout`. Cancelling `shutdown` during
    /// that wait returns `Error::Cancelled`.
    pub async fn retrieve_built_payload<E: EthSpec, S: ChainState>(
        &self,
        shutdown: &CancellationToken,
        state: &S,
        slot: Slot,
        parent_block_root: Hash256,
        parent_eth1_hash: ExecutionBlockHash,
    ) -> Result<GetPayloadResponse<E>, Error> {
        let fork = state.fork_name_at_epoch(state.epoch_at_slot(slot));

        match self
            .payload_ids
            .get(slot, &parent_block_root)
            .filter(|payload_id| *payload_id != PayloadId::default())
        {
            Some(payload_id) => match self.get_payload::<E>(payload_id, fork, slot).await {
                Ok(envelope) => {
                    metrics::inc_counter_vec(&metrics::ENGINE_PAYLOAD_ID_CACHE, &[metrics::HIT]);
                    // Secondary key only. The lookup key stays in place.
                    self.payload_ids
                        .set(slot, envelope.parent_hash().into_root(), payload_id);
                    return Ok(envelope);
                }
                Err(e) => {
                    metrics::inc_counter_vec(&metrics::ENGINE_PAYLOAD_ID_CACHE, &[metrics::ERROR]);
                    warn!(
                        self.log,
                        "Failed to retrieve pre-built payload, building a new one";
                        "error" => ?e,
                        "slot" => slot,
                        "payload_id" => ?payload_id,
                    );
                }
            },
            None => {
                metrics::inc_counter_vec(&metrics::ENGINE_PAYLOAD_ID_CACHE, &[metrics::MISS]);
                debug!(
                    self.log,
                    "No pre-built payload, building a new one";
                    "slot" => slot,
                    "parent_block_root" => ?parent_block_root,
                );
            }
        }

        let latest = state.latest_execution_payload_header()?;
        let timestamp = std::cmp::max(unix_now_secs() + 1, latest.timestamp + 1);
        let payload_id = self
            .request_payload(
                state,
                parent_eth1_hash,
                latest.parent_hash,
                slot,
                timestamp,
                parent_block_root,
            )
            .await?
            .ok_or(Error::ApiError(ApiError::IsSyncing))?;

        info!(
            self.log,
            "Waiting for local payload to be built";
            "slot" => slot,
            "timeout" => ?self.payload_timeout,
        );
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(self.payload_timeout) => {}
        }

        self.get_payload(payload_id, fork, slot).await.map_err(|e| {
            error!(
                self.log,
                "Failed to retrieve locally built payload";
                "error" => ?e,
                "slot" => slot,
                "parent_block_root" => ?parent_block_root,
                "payload_id" => ?payload_id,
            );
            e
        })
    }

    /// Collect a payload whose build was started earlier. Never starts a build.
    pub async fn retrieve_payload<E: EthSpec, S: ChainState>(
        &self,
        state: &S,
        slot: Slot,
        parent_block_root: Hash256,
    ) -> Result<GetPayloadResponse<E>, Error> {
        let payload_id = self
            .payload_ids
            .get(slot, &parent_block_root)
            .ok_or(Error::PayloadIdNotFound)?;
        let fork = state.fork_name_at_epoch(state.epoch_at_slot(slot));
        self.get_payload(payload_id, fork, slot).await
    }

    /// Point the execution client at the latest payload in `state`, with its parent as safe and
    /// finalized. Used at startup, before any payload is requested.
    pub async fn send_force_head_fcu<S: ChainState>(
        &self,
        state: &S,
        slot: Slot,
    ) -> Result<(), Error> {
        let latest = state.latest_execution_payload_header()?;
        info!(
            self.log,
            "Sending startup forkchoice update to execution client";
            "head_eth1_hash" => ?latest.block_hash,
            "safe_eth1_hash" => ?latest.parent_hash,
            "slot" => slot,
        );

        let forkchoice_state = ForkchoiceState {
            head_block_hash: latest.block_hash,
            safe_block_hash: latest.parent_hash,
            finalized_block_hash: latest.parent_hash,
        };
        let fork = state.fork_name_at_epoch(state.epoch_at_slot(slot));
        self.engine
            .notify_forkchoice_update(forkchoice_state, None, fork)
            .await
            .map(|_| ())
    }

    pub fn prune_prior(&self, slot: Slot) {
        self.payload_ids.prune_prior(slot);
    }

    async fn get_payload<E: EthSpec>(
        &self,
        payload_id: PayloadId,
        fork: ForkName,
        slot: Slot,
    ) -> Result<GetPayloadResponse<E>, Error> {
        let envelope = self.engine.get_payload::<E>(payload_id, fork).await?;
        if envelope.execution_payload_ref().is_empty() {
            return Err(Error::EmptyPayload);
        }

        info!(
            self.log,
            "Payload retrieved from local builder";
            "slot" => slot,
            "block_hash" => ?envelope.block_hash(),
            "parent_hash" => ?envelope.parent_hash(),
            "override_builder" => envelope.should_override(),
            "num_blobs" => envelope.blobs().map_or(0, |bundle| bundle.len()),
        );
        if envelope.fee_recipient() != self.suggested_fee_recipient {
            warn!(
                self.log,
                "Payload fee recipient does not match suggested fee recipient";
                "info" => "check both the consensus and execution client configuration",
                "payload_fee_recipient" => ?envelope.fee_recipient(),
                "suggested_fee_recipient" => ?self.suggested_fee_recipient,
            );
        }
        Ok(envelope)
    }
}

fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine_api::ethspec::MainnetEthSpec;
    use crate::engine_api::http::{
        ENGINE_FORKCHOICE_UPDATED_V2, ENGINE_FORKCHOICE_UPDATED_V3, ENGINE_GET_PAYLOAD_V3,
    };
    use crate::engine_api::PayloadStatusV1Status;
    use crate::test_utils::*;
    use serde_json::json;

    fn builder() -> PayloadBuilder<MockTransport> {
        let engine = EngineClient::new(
            MockTransport::new(),
            8,
            Duration::from_secs(2),
            null_logger(),
        );
        PayloadBuilder::new(
            Arc::new(engine),
            Address::repeat_byte(0xfe),
            Duration::from_millis(2_500),
            null_logger(),
        )
    }

    #[test]
    fn attributes_from_chain_state() {
        let builder = builder();
        let mut state = MockChainState::new(ForkName::Deneb);
        // Slot 70 is in epoch 2.
        state.randao_mixes.insert(2, Hash256::repeat_byte(0x77));
        state.withdrawals.push(Withdrawal {
            index: 1,
            validator_index: 2,
            address: Address::repeat_byte(3),
            amount: 4,
        });

        let attributes = builder
            .build_payload_attributes(&state, 70, 1_234, Hash256::repeat_byte(0x99))
            .unwrap();
        assert_eq!(attributes.timestamp(), 1_234);
        assert_eq!(attributes.prev_randao(), Hash256::repeat_byte(0x77));
        assert_eq!(attributes.suggested_fee_recipient(), Address::repeat_byte(0xfe));
        assert_eq!(attributes.withdrawals().len(), 1);
        assert_eq!(
            attributes.parent_beacon_block_root().unwrap(),
            Hash256::repeat_byte(0x99)
        );
    }

    #[test]
    fn chain_state_errors_are_typed() {
        let builder = builder();
        let mut state = MockChainState::new(ForkName::Deneb);
        state.require_randao_mixes = true;

        assert!(matches!(
            builder.build_payload_attributes(&state, 70, 1, Hash256::zero()),
            Err(Error::ChainState(ChainStateError::RandaoMixUnavailable { index: 2 }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetch_after_wait_is_logged() {
        let logs = CapturedLogs::default();
        let engine = EngineClient::new(
            MockTransport::new(),
            16,
            Duration::from_secs(2),
            null_logger(),
        );
        let builder = PayloadBuilder::new(
            Arc::new(engine),
            Address::repeat_byte(0xfe),
            Duration::from_millis(2_500),
            logs.logger(),
        );
        let state = MockChainState::new(ForkName::Deneb);
        let transport = builder.engine().transport();
        transport.push_ok(
            ENGINE_FORKCHOICE_UPDATED_V3,
            forkchoice_updated_json(
                PayloadStatusV1Status::Valid,
                Some(state.latest_header.block_hash),
                Some([6; 8]),
            ),
        );
        transport.push_err(
            ENGINE_GET_PAYLOAD_V3,
            ApiError::from_rpc_error(-38001, "Unknown payload".into()),
        );

        let result = builder
            .retrieve_built_payload::<MainnetEthSpec, _>(
                &CancellationToken::new(),
                &state,
                3,
                Hash256::repeat_byte(0x10),
                state.latest_header.block_hash,
            )
            .await;

        assert!(matches!(
            result,
            Err(Error::ApiError(ApiError::UnknownPayload(_)))
        ));
        assert!(logs.contains(slog::Level::Error, "Failed to retrieve locally built payload"));
    }

    #[tokio::test]
    async fn request_payload_caches_id() {
        let builder = builder();
        let state = MockChainState::new(ForkName::Capella);
        let head = ExecutionBlockHash::repeat_byte(1);
        builder.engine().transport().push_ok(
            ENGINE_FORKCHOICE_UPDATED_V2,
            forkchoice_updated_json(PayloadStatusV1Status::Valid, Some(head), Some([5; 8])),
        );

        let root = Hash256::repeat_byte(0x10);
        let id = builder
            .request_payload(&state, head, ExecutionBlockHash::repeat_byte(2), 8, 100, root)
            .await
            .unwrap();
        assert_eq!(id, Some([5; 8]));
        assert_eq!(builder.payload_id_cache().get(8, &root), Some([5; 8]));

        let params = &builder
            .engine()
            .transport()
            .calls_to(ENGINE_FORKCHOICE_UPDATED_V2)[0];
        assert_eq!(params[1]["timestamp"], json!("0x64"));
        assert!(params[1].get("parentBeaconBlockRoot").is_none());
    }

    #[tokio::test]
    async fn nil_payload_id_on_valid() {
        let builder = builder();
        let state = MockChainState::new(ForkName::Deneb);
        let head = ExecutionBlockHash::repeat_byte(1);
        builder.engine().transport().push_ok(
            ENGINE_FORKCHOICE_UPDATED_V3,
            forkchoice_updated_json(PayloadStatusV1Status::Valid, Some(head), None),
        );

        assert!(matches!(
            builder
                .request_payload(&state, head, head, 1, 1, Hash256::zero())
                .await,
            Err(Error::NilPayloadOnValidResponse)
        ));
        assert!(builder.payload_id_cache().is_empty());
    }

    #[tokio::test]
    async fn syncing_without_id_is_not_an_error() {
        let builder = builder();
        let state = MockChainState::new(ForkName::Deneb);
        builder.engine().transport().push_ok(
            ENGINE_FORKCHOICE_UPDATED_V3,
            forkchoice_updated_json(PayloadStatusV1Status::Syncing, None, None),
        );

        let head = ExecutionBlockHash::repeat_byte(1);
        assert_eq!(
            builder
                .request_payload(&state, head, head, 1, 1, Hash256::zero())
                .await
                .unwrap(),
            None
        );
        assert!(builder.payload_id_cache().is_empty());
    }

    #[tokio::test]
    async fn retrieve_payload_requires_cached_id() {
        let builder = builder();
        let state = MockChainState::new(ForkName::Deneb);

        assert!(matches!(
            builder
                .retrieve_payload::<MainnetEthSpec, _>(&state, 1, Hash256::zero())
                .await,
            Err(Error::PayloadIdNotFound)
        ));
    }

    #[tokio::test]
    async fn force_head_fcu_uses_latest_header() {
        let builder = builder();
        let state = MockChainState::new(ForkName::Deneb);
        let latest = state.latest_header;
        builder.engine().transport().push_ok(
            ENGINE_FORKCHOICE_UPDATED_V3,
            forkchoice_updated_json(PayloadStatusV1Status::Syncing, None, None),
        );

        builder.send_force_head_fcu(&state, 11).await.unwrap();

        let params = &builder
            .engine()
            .transport()
            .calls_to(ENGINE_FORKCHOICE_UPDATED_V3)[0];
        assert_eq!(
            params[0],
            json!({
                "headBlockHash": latest.block_hash,
                "safeBlockHash": latest.parent_hash,
                "finalizedBlockHash": latest.parent_hash,
            })
        );
        assert_eq!(params[1], serde_json::Value::Null);
    }
}
