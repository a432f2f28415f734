//! Engine API client and local payload builder for a beacon-chain node.
//!
//! `EngineClient` speaks JSON-RPC to an execution client through an `EngineTransport`, and
//! `PayloadBuilder` uses it to trigger payload builds with forkchoice updates and to collect the
//! results.
use engine_api::{Error as ApiError, ExecutionBlockHash, PayloadId};
use std::fmt;

pub mod block_hash;
pub mod config;
pub mod engine_api;
pub mod engines;
pub mod header_cache;
pub mod metrics;
pub mod payload_builder;
pub mod payload_id_cache;
pub mod payload_status;
pub mod serde_utils;
pub mod test_utils;
pub mod versioned_hashes;

pub use config::Config;
pub use engine_api::NewPayloadRequest;
pub use engines::EngineClient;
pub use payload_builder::{ChainState, ChainStateError, PayloadBuilder};

#[derive(Debug)]
pub enum Error {
    ApiError(ApiError),
    /// The execution client rejected the requested head and the forkchoice update was replayed
    /// against the safe head. The replay's result is carried so the caller can keep going.
    BadBlockProduced {
        payload_id: Option<PayloadId>,
        latest_valid_hash: Option<ExecutionBlockHash>,
    },
    InvalidPayloadStatus {
        latest_valid_hash: Option<ExecutionBlockHash>,
        validation_error: Option<String>,
    },
    InvalidBlockHashPayloadStatus {
        validation_error: Option<String>,
    },
    NilPayloadOnValidResponse,
    NilPayloadEnvelope,
    EmptyPayload,
    PayloadIdNotFound,
    Cancelled,
    BlockHashMismatch {
        computed: ExecutionBlockHash,
        payload: ExecutionBlockHash,
    },
    VersionedHashes(versioned_hashes::Error),
    ChainState(ChainStateError),
}

impl Error {
    pub fn is_bad_block_produced(&self) -> bool {
        matches!(self, Error::BadBlockProduced { .. })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ApiError(e) => write!(f, "engine api: {}", e),
            Error::BadBlockProduced { .. } => write!(f, "bad block produced"),
            Error::NilPayloadOnValidResponse => {
                write!(f, "nil payload id on a VALID forkchoice response")
            }
            Error::NilPayloadEnvelope => write!(f, "execution client returned no payload"),
            Error::EmptyPayload => write!(f, "execution client returned an empty payload"),
            Error::PayloadIdNotFound => write!(f, "no payload id cached for slot and parent"),
            Error::Cancelled => write!(f, "cancelled"),
            other => write!(f, "{:?}", other),
        }
    }
}

impl From<ApiError> for Error {
    fn from(e: ApiError) -> Self {
        Error::ApiError(e)
    }
}

impl From<ChainStateError> for Error {
    fn from(e: ChainStateError) -> Self {
        Error::ChainState(e)
    }
}

impl From<versioned_hashes::Error> for Error {
    fn from(e: versioned_hashes::Error) -> Self {
        Error::VersionedHashes(e)
    }
}
