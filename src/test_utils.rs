//! Scripted collaborators for exercising `EngineClient` and `PayloadBuilder` without an
//! execution client.
use crate::block_hash::calculate_execution_block_hash;
use crate::engine_api::ethspec::EthSpec;
use crate::engine_api::json_structures::{
    JsonForkchoiceUpdatedV1Response, JsonGetPayloadResponseV2, JsonGetPayloadResponseV3,
    JsonPayloadStatusV1, TransparentJsonPayloadId,
};
use crate::engine_api::{
    BlobsBundle, EngineTransport, Error as ApiError, ExecutionBlock, ExecutionBlockHash,
    ExecutionPayloadCapella, ExecutionPayloadDeneb, ExecutionPayloadRef, ForkName, Hash256,
    PayloadId, PayloadStatusV1Status, Uint256, Withdrawal,
};
use crate::payload_builder::{ChainState, ChainStateError, Epoch};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use slog::{o, Level, Logger, Never, OwnedKVList, Record};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

pub fn null_logger() -> Logger {
    Logger::root(slog::Discard, o!())
}

/// A drain that keeps the level and message of every record.
///
/// Uses a std mutex since slog only accepts `RefUnwindSafe` drains.
#[derive(Clone, Default)]
pub struct CapturedLogs {
    records: Arc<std::sync::Mutex<Vec<(Level, String)>>>,
}

impl CapturedLogs {
    pub fn logger(&self) -> Logger {
        Logger::root(self.clone(), o!())
    }

    pub fn records(&self) -> Vec<(Level, String)> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// Whether a record at `level` has a message containing `needle`.
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.records()
            .iter()
            .any(|(l, msg)| *l == level && msg.contains(needle))
    }
}

impl slog::Drain for CapturedLogs {
    type Ok = ();
    type Err = Never;

    fn log(&self, record: &Record, _: &OwnedKVList) -> Result<(), Never> {
        if let Ok(mut records) = self.records.lock() {
            records.push((record.level(), record.msg().to_string()));
        }
        Ok(())
    }
}

/// Set `payload.block_hash` to the hash implied by its contents.
pub fn sealed_deneb_payload<E: EthSpec>(
    mut payload: ExecutionPayloadDeneb<E>,
    parent_beacon_block_root: Hash256,
) -> ExecutionPayloadDeneb<E> {
    payload.block_hash = calculate_execution_block_hash(
        ExecutionPayloadRef::Deneb(&payload),
        Some(parent_beacon_block_root),
    );
    payload
}

pub fn sealed_capella_payload<E: EthSpec>(
    mut payload: ExecutionPayloadCapella<E>,
) -> ExecutionPayloadCapella<E> {
    payload.block_hash =
        calculate_execution_block_hash(ExecutionPayloadRef::Capella(&payload), None);
    payload
}

pub fn payload_status_json(
    status: PayloadStatusV1Status,
    latest_valid_hash: Option<ExecutionBlockHash>,
) -> Value {
    serde_json::to_value(JsonPayloadStatusV1 {
        status: status.as_wire_str().to_string(),
        latest_valid_hash,
        validation_error: None,
    })
    .unwrap_or_default()
}

pub fn forkchoice_updated_json(
    status: PayloadStatusV1Status,
    latest_valid_hash: Option<ExecutionBlockHash>,
    payload_id: Option<PayloadId>,
) -> Value {
    serde_json::to_value(JsonForkchoiceUpdatedV1Response {
        payload_status: JsonPayloadStatusV1 {
            status: status.as_wire_str().to_string(),
            latest_valid_hash,
            validation_error: None,
        },
        payload_id: payload_id.map(TransparentJsonPayloadId),
    })
    .unwrap_or_default()
}

pub fn get_payload_v2_json<E: EthSpec>(payload: ExecutionPayloadCapella<E>) -> Value {
    serde_json::to_value(JsonGetPayloadResponseV2 {
        execution_payload: payload,
        block_value: Uint256::from(1_000_000_000u64),
    })
    .unwrap_or_default()
}

pub fn get_payload_v3_json<E: EthSpec>(payload: ExecutionPayloadDeneb<E>) -> Value {
    serde_json::to_value(JsonGetPayloadResponseV3 {
        execution_payload: payload,
        block_value: Uint256::from(1_000_000_000u64),
        blobs_bundle: BlobsBundle::default(),
        should_override_builder: false,
    })
    .unwrap_or_default()
}

pub fn block_json(block: ExecutionBlock) -> Value {
    serde_json::to_value(block).unwrap_or_default()
}

struct Scripted {
    delay: Duration,
    response: Result<Value, ApiError>,
}

/// An `EngineTransport` answering from per-method queues.
///
/// Queued responses are consumed in order. Once a method's queue is empty its sticky default is
/// returned, and without one the call fails with `BadResponse`. Every call is recorded.
#[derive(Default)]
pub struct MockTransport {
    queues: Mutex<HashMap<String, VecDeque<Scripted>>>,
    defaults: Mutex<HashMap<String, Value>>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_ok(&self, method: &str, result: Value) {
        self.push(method, Duration::ZERO, Ok(result));
    }

    pub fn push_err(&self, method: &str, error: ApiError) {
        self.push(method, Duration::ZERO, Err(error));
    }

    /// Respond only after `delay`. A delay at or beyond the request timeout yields `Timeout`.
    pub fn push_delayed(&self, method: &str, delay: Duration, result: Value) {
        self.push(method, delay, Ok(result));
    }

    fn push(&self, method: &str, delay: Duration, response: Result<Value, ApiError>) {
        self.queues
            .lock()
            .entry(method.to_string())
            .or_default()
            .push_back(Scripted { delay, response });
    }

    pub fn set_default(&self, method: &str, result: Value) {
        self.defaults.lock().insert(method.to_string(), result);
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().clone()
    }

    /// Params of every call to `method`, oldest first.
    pub fn calls_to(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
            .collect()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls.lock().iter().filter(|(m, _)| m == method).count()
    }
}

#[async_trait]
impl EngineTransport for MockTransport {
    async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, ApiError> {
        self.calls.lock().push((method.to_string(), params));

        let scripted = self
            .queues
            .lock()
            .get_mut(method)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(Scripted { delay, response }) => {
                if delay >= timeout {
                    tokio::time::sleep(timeout).await;
                    return Err(ApiError::Timeout);
                }
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                response
            }
            None => self.defaults.lock().get(method).cloned().ok_or_else(|| {
                ApiError::BadResponse(format!("no scripted response for {}", method))
            }),
        }
    }
}

/// Fixed chain state for builder tests.
#[derive(Clone, Debug)]
pub struct MockChainState {
    pub latest_header: ExecutionBlock,
    pub withdrawals: Vec<Withdrawal>,
    pub randao_mixes: HashMap<u64, Hash256>,
    /// Unset mixes read as zero unless this is set.
    pub require_randao_mixes: bool,
    pub fork: ForkName,
}

impl MockChainState {
    pub fn new(fork: ForkName) -> Self {
        Self {
            latest_header: ExecutionBlock {
                block_hash: ExecutionBlockHash::repeat_byte(0xb1),
                block_number: 100,
                parent_hash: ExecutionBlockHash::repeat_byte(0xb0),
                state_root: Hash256::zero(),
                timestamp: 1_700_000_000,
            },
            withdrawals: vec![],
            randao_mixes: HashMap::new(),
            require_randao_mixes: false,
            fork,
        }
    }
}

impl ChainState for MockChainState {
    fn latest_execution_payload_header(&self) -> Result<ExecutionBlock, ChainStateError> {
        Ok(self.latest_header)
    }

    fn expected_withdrawals(&self) -> Result<Vec<Withdrawal>, ChainStateError> {
        Ok(self.withdrawals.clone())
    }

    fn randao_mix_at_index(&self, index: u64) -> Result<Hash256, ChainStateError> {
        match self.randao_mixes.get(&index) {
            Some(mix) => Ok(*mix),
            None if self.require_randao_mixes => {
                Err(ChainStateError::RandaoMixUnavailable { index })
            }
            None => Ok(Hash256::zero()),
        }
    }

    fn fork_name_at_epoch(&self, _epoch: Epoch) -> ForkName {
        self.fork
    }
}
