use crate::engine_api::{
    Error as ApiError, ExecutionBlockHash, PayloadStatusV1, PayloadStatusV1Status,
};
use slog::{warn, Logger};

/// Provides a simpler, easier to parse version of `PayloadStatusV1` for upstream users.
///
/// It primarily ensures that the `latest_valid_hash` is always present when relevant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadStatus {
    Valid {
        latest_valid_hash: ExecutionBlockHash,
    },
    Invalid {
        latest_valid_hash: Option<ExecutionBlockHash>,
        validation_error: Option<String>,
    },
    Syncing,
    Accepted,
    InvalidBlockHash {
        validation_error: Option<String>,
    },
}

impl PayloadStatus {
    pub fn is_invalid(&self) -> bool {
        matches!(
            self,
            PayloadStatus::Invalid { .. } | PayloadStatus::InvalidBlockHash { .. }
        )
    }

    pub fn is_optimistic(&self) -> bool {
        matches!(self, PayloadStatus::Syncing | PayloadStatus::Accepted)
    }

    pub fn latest_valid_hash(&self) -> Option<ExecutionBlockHash> {
        match self {
            PayloadStatus::Valid { latest_valid_hash } => Some(*latest_valid_hash),
            PayloadStatus::Invalid {
                latest_valid_hash, ..
            } => *latest_valid_hash,
            _ => None,
        }
    }
}

/// Sanity-check a status returned for `block_hash`.
///
/// A VALID status without a `latest_valid_hash` is rejected. Other deviations from the Engine API
/// are logged and accepted.
pub fn process_payload_status(
    block_hash: ExecutionBlockHash,
    response: PayloadStatusV1,
    log: &Logger,
) -> Result<PayloadStatus, ApiError> {
    match response.status {
        PayloadStatusV1Status::Valid => match response.latest_valid_hash {
            Some(latest_valid_hash) => {
                if latest_valid_hash != block_hash {
                    warn!(
                        log,
                        "Malformed response from execution engine";
                        "msg" => "latest_valid_hash differs from the requested block",
                        "expected" => ?block_hash,
                        "latest_valid_hash" => ?latest_valid_hash,
                    );
                }
                Ok(PayloadStatus::Valid { latest_valid_hash })
            }
            None => Err(ApiError::BadResponse(format!(
                "status = VALID but null latest_valid_hash for {:?}",
                block_hash
            ))),
        },
        PayloadStatusV1Status::Invalid => Ok(PayloadStatus::Invalid {
            latest_valid_hash: response.latest_valid_hash,
            validation_error: response.validation_error,
        }),
        PayloadStatusV1Status::InvalidBlockHash => {
            warn_unexpected_latest_valid_hash(&response, log);
            Ok(PayloadStatus::InvalidBlockHash {
                validation_error: response.validation_error,
            })
        }
        PayloadStatusV1Status::Syncing => {
            warn_unexpected_latest_valid_hash(&response, log);
            Ok(PayloadStatus::Syncing)
        }
        PayloadStatusV1Status::Accepted => {
            warn_unexpected_latest_valid_hash(&response, log);
            Ok(PayloadStatus::Accepted)
        }
    }
}

fn warn_unexpected_latest_valid_hash(response: &PayloadStatusV1, log: &Logger) {
    // In the interests of being liberal with what we accept, only raise a warning here.
    if response.latest_valid_hash.is_some() {
        warn!(
            log,
            "Malformed response from execution engine";
            "msg" => "expected a null latest_valid_hash",
            "status" => ?response.status
        )
    }
}
