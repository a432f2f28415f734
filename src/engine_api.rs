use crate::engine_api::http::{
    ENGINE_FORKCHOICE_UPDATED_V2, ENGINE_FORKCHOICE_UPDATED_V3, ENGINE_GET_CLIENT_VERSION_V1,
    ENGINE_GET_PAYLOAD_V2, ENGINE_GET_PAYLOAD_V3, ENGINE_NEW_PAYLOAD_V2, ENGINE_NEW_PAYLOAD_V3,
};
use crate::serde_utils;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use strum::IntoStaticStr;
use superstruct::superstruct;

pub use ethereum_types::Address;
pub use ethers_core::types::{Bytes, Log};
pub use execution_payload::{
    ExecutionPayload, ExecutionPayloadCapella, ExecutionPayloadDeneb, ExecutionPayloadRef,
    Hash256, Transactions, Uint256, Withdrawals,
};
pub use json_structures::ExecutionBlockHash;
pub use new_payload_request::NewPayloadRequest;
pub use withdrawal::Withdrawal;

pub mod auth;
pub mod ethspec;
pub mod execution_payload;
pub mod http;
pub mod json_structures;
pub mod new_payload_request;
pub mod sensitive_url;
pub mod withdrawal;

use ethspec::EthSpec;

pub const LATEST_TAG: &str = "latest";

pub type PayloadId = [u8; 8];

pub const PARSE_ERROR_CODE: i64 = -32700;
pub const INVALID_REQUEST_CODE: i64 = -32600;
pub const METHOD_NOT_FOUND_CODE: i64 = -32601;
pub const INVALID_PARAMS_CODE: i64 = -32602;
pub const INTERNAL_ERROR_CODE: i64 = -32603;
pub const SERVER_ERROR_CODE: i64 = -32000;
pub const UNKNOWN_PAYLOAD_CODE: i64 = -38001;
pub const INVALID_FORKCHOICE_STATE_CODE: i64 = -38002;
pub const INVALID_PAYLOAD_ATTRIBUTES_CODE: i64 = -38003;
pub const REQUEST_TOO_LARGE_CODE: i64 = -38004;

#[derive(Debug)]
pub enum Error {
    HttpClient(reqwest::Error),
    Timeout,
    Auth(auth::Error),
    BadResponse(String),
    Json(serde_json::Error),
    ParseError(String),
    InvalidRequest(String),
    MethodNotFound(String),
    InvalidParams(String),
    InternalError(String),
    ServerError(String),
    UnknownPayload(String),
    InvalidForkchoiceState(String),
    InvalidPayloadAttributes(String),
    RequestTooLarge(String),
    UnknownRpcError { code: i64, message: String },
    Eip155Failure,
    IsSyncing,
    UnknownPayloadStatus(String),
    IncorrectStateVariant,
    UnsupportedForkVariant(String),
    InvalidClientVersion(String),
    ChainIdMismatch { expected: u64, found: u64 },
}

impl Error {
    /// Map a JSON-RPC error object onto the Engine API error taxonomy. Codes without a named
    /// variant all map to `UnknownRpcError`, keeping the code and message.
    pub fn from_rpc_error(code: i64, message: String) -> Self {
        match code {
            PARSE_ERROR_CODE => Error::ParseError(message),
            INVALID_REQUEST_CODE => Error::InvalidRequest(message),
            METHOD_NOT_FOUND_CODE => Error::MethodNotFound(message),
            INVALID_PARAMS_CODE => Error::InvalidParams(message),
            INTERNAL_ERROR_CODE => Error::InternalError(message),
            SERVER_ERROR_CODE => Error::ServerError(message),
            UNKNOWN_PAYLOAD_CODE => Error::UnknownPayload(message),
            INVALID_FORKCHOICE_STATE_CODE => Error::InvalidForkchoiceState(message),
            INVALID_PAYLOAD_ATTRIBUTES_CODE => Error::InvalidPayloadAttributes(message),
            REQUEST_TOO_LARGE_CODE => Error::RequestTooLarge(message),
            code => Error::UnknownRpcError { code, message },
        }
    }

    /// The numeric JSON-RPC code, if the peer answered with an error object.
    pub fn rpc_code(&self) -> Option<i64> {
        match self {
            Error::ParseError(_) => Some(PARSE_ERROR_CODE),
            Error::InvalidRequest(_) => Some(INVALID_REQUEST_CODE),
            Error::MethodNotFound(_) => Some(METHOD_NOT_FOUND_CODE),
            Error::InvalidParams(_) => Some(INVALID_PARAMS_CODE),
            Error::InternalError(_) => Some(INTERNAL_ERROR_CODE),
            Error::ServerError(_) => Some(SERVER_ERROR_CODE),
            Error::UnknownPayload(_) => Some(UNKNOWN_PAYLOAD_CODE),
            Error::InvalidForkchoiceState(_) => Some(INVALID_FORKCHOICE_STATE_CODE),
            Error::InvalidPayloadAttributes(_) => Some(INVALID_PAYLOAD_ATTRIBUTES_CODE),
            Error::RequestTooLarge(_) => Some(REQUEST_TOO_LARGE_CODE),
            Error::UnknownRpcError { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_json_rpc_error(&self) -> bool {
        self.rpc_code().is_some() || matches!(self, Error::Eip155Failure)
    }

    /// Failures to reach the peer or to read its reply. These are the only errors retried by
    /// the transport.
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Error::HttpClient(_) | Error::Timeout | Error::BadResponse(_)
        )
    }

    pub fn is_auth_error(&self) -> bool {
        matches!(self, Error::Auth(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Timeout => write!(f, "timeout from http client"),
            Error::UnknownPayload(m) => {
                write!(f, "payload does not exist or is not available: {}", m)
            }
            Error::InvalidForkchoiceState(m) => write!(f, "invalid forkchoice state: {}", m),
            Error::InvalidPayloadAttributes(m) => {
                write!(f, "payload attributes are invalid / inconsistent: {}", m)
            }
            Error::RequestTooLarge(m) => write!(f, "request too large: {}", m),
            Error::UnknownRpcError { code, message } => {
                write!(f, "unknown rpc error {}: {}", code, message)
            }
            other => write!(f, "{:?}", other),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if matches!(
            e.status(),
            Some(StatusCode::UNAUTHORIZED) | Some(StatusCode::FORBIDDEN)
        ) {
            Error::Auth(auth::Error::InvalidToken)
        } else if e.is_timeout() {
            Error::Timeout
        } else {
            Error::HttpClient(e)
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

impl From<auth::Error> for Error {
    fn from(e: auth::Error) -> Self {
        Error::Auth(e)
    }
}

/// Sends a single JSON-RPC call and hands back the raw `result` value.
#[async_trait]
pub trait EngineTransport: Send + Sync {
    async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, Error>;

    /// Issue a call whose result is not needed. Only errors are reported.
    async fn notify(
        &self,
        method: &str,
        params: serde_json::Value,
        timeout: Duration,
    ) -> Result<(), Error> {
        self.request(method, params, timeout).await.map(|_| ())
    }
}

#[async_trait]
impl<T: EngineTransport + ?Sized> EngineTransport for Arc<T> {
    async fn request(
        &self,
        method: &str,
        params: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, Error> {
        (**self).request(method, params, timeout).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForkName {
    Capella,
    Deneb,
    Electra,
}

impl fmt::Display for ForkName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForkName::Capella => "capella".fmt(f),
            ForkName::Deneb => "deneb".fmt(f),
            ForkName::Electra => "electra".fmt(f),
        }
    }
}

impl FromStr for ForkName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "capella" => Ok(ForkName::Capella),
            "deneb" => Ok(ForkName::Deneb),
            "electra" => Ok(ForkName::Electra),
            other => Err(format!("unknown fork name {}", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum PayloadStatusV1Status {
    Valid,
    Invalid,
    Syncing,
    Accepted,
    InvalidBlockHash,
}

impl FromStr for PayloadStatusV1Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "VALID" => Ok(Self::Valid),
            "INVALID" => Ok(Self::Invalid),
            "SYNCING" => Ok(Self::Syncing),
            "ACCEPTED" => Ok(Self::Accepted),
            "INVALID_BLOCK_HASH" => Ok(Self::InvalidBlockHash),
            other => Err(Error::UnknownPayloadStatus(other.to_string())),
        }
    }
}

impl PayloadStatusV1Status {
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            Self::Valid => "VALID",
            Self::Invalid => "INVALID",
            Self::Syncing => "SYNCING",
            Self::Accepted => "ACCEPTED",
            Self::InvalidBlockHash => "INVALID_BLOCK_HASH",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PayloadStatusV1 {
    pub status: PayloadStatusV1Status,
    pub latest_valid_hash: Option<ExecutionBlockHash>,
    pub validation_error: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BlockByNumberQuery<'a> {
    Tag(&'a str),
    Number(#[serde(with = "serde_utils::u64_hex_be")] u64),
}

/// The subset of an execution block header kept in the header cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionBlock {
    #[serde(rename = "hash")]
    pub block_hash: ExecutionBlockHash,
    #[serde(rename = "number", with = "serde_utils::u64_hex_be")]
    pub block_number: u64,
    pub parent_hash: ExecutionBlockHash,
    pub state_root: Hash256,
    #[serde(with = "serde_utils::u64_hex_be")]
    pub timestamp: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ForkchoiceState {
    pub head_block_hash: ExecutionBlockHash,
    pub safe_block_hash: ExecutionBlockHash,
    pub finalized_block_hash: ExecutionBlockHash,
}

#[superstruct(
    variants(V2, V3),
    variant_attributes(derive(Clone, Debug, Eq, Hash, PartialEq),),
    cast_error(ty = "Error", expr = "Error::IncorrectStateVariant"),
    partial_getter_error(ty = "Error", expr = "Error::IncorrectStateVariant")
)]
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct PayloadAttributes {
    #[superstruct(getter(copy))]
    pub timestamp: u64,
    #[superstruct(getter(copy))]
    pub prev_randao: Hash256,
    #[superstruct(getter(copy))]
    pub suggested_fee_recipient: Address,
    pub withdrawals: Vec<Withdrawal>,
    #[superstruct(only(V3), partial_getter(copy))]
    pub parent_beacon_block_root: Hash256,
}

impl PayloadAttributes {
    /// Build the attributes shape expected by `fork`.
    pub fn new(
        fork: ForkName,
        timestamp: u64,
        prev_randao: Hash256,
        suggested_fee_recipient: Address,
        withdrawals: Vec<Withdrawal>,
        parent_beacon_block_root: Hash256,
    ) -> Result<Self, Error> {
        match fork {
            ForkName::Capella => Ok(PayloadAttributes::V2(PayloadAttributesV2 {
                timestamp,
                prev_randao,
                suggested_fee_recipient,
                withdrawals,
            })),
            ForkName::Deneb => Ok(PayloadAttributes::V3(PayloadAttributesV3 {
                timestamp,
                prev_randao,
                suggested_fee_recipient,
                withdrawals,
                parent_beacon_block_root,
            })),
            ForkName::Electra => Err(Error::UnsupportedForkVariant(format!(
                "payload attributes for {}",
                fork
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ForkchoiceUpdatedResponse {
    pub payload_status: PayloadStatusV1,
    pub payload_id: Option<PayloadId>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobsBundle {
    pub commitments: Vec<Bytes>,
    pub proofs: Vec<Bytes>,
    pub blobs: Vec<Bytes>,
}

impl BlobsBundle {
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

/// A payload built by the execution client, with its value and any blobs.
#[superstruct(
    variants(Capella, Deneb),
    variant_attributes(derive(Clone, Debug, PartialEq),),
    cast_error(ty = "Error", expr = "Error::IncorrectStateVariant"),
    partial_getter_error(ty = "Error", expr = "Error::IncorrectStateVariant")
)]
#[derive(Clone, Debug, PartialEq)]
pub struct GetPayloadResponse<E: EthSpec> {
    #[superstruct(only(Capella), partial_getter(rename = "execution_payload_capella"))]
    pub execution_payload: ExecutionPayloadCapella<E>,
    #[superstruct(only(Deneb), partial_getter(rename = "execution_payload_deneb"))]
    pub execution_payload: ExecutionPayloadDeneb<E>,
    pub block_value: Uint256,
    #[superstruct(only(Deneb))]
    pub blobs_bundle: BlobsBundle,
    #[superstruct(only(Deneb), partial_getter(copy))]
    pub should_override_builder: bool,
}

impl<E: EthSpec> GetPayloadResponse<E> {
    pub fn execution_payload_ref(&self) -> ExecutionPayloadRef<'_, E> {
        match self {
            GetPayloadResponse::Capella(inner) => {
                ExecutionPayloadRef::Capella(&inner.execution_payload)
            }
            GetPayloadResponse::Deneb(inner) => {
                ExecutionPayloadRef::Deneb(&inner.execution_payload)
            }
        }
    }

    pub fn block_hash(&self) -> ExecutionBlockHash {
        self.execution_payload_ref().block_hash()
    }

    pub fn parent_hash(&self) -> ExecutionBlockHash {
        self.execution_payload_ref().parent_hash()
    }

    pub fn fee_recipient(&self) -> Address {
        self.execution_payload_ref().fee_recipient()
    }

    /// Blobs bundle, absent before Deneb.
    pub fn blobs(&self) -> Option<&BlobsBundle> {
        self.blobs_bundle().ok()
    }

    /// Whether the execution client asks us to prefer its payload over an external builder's.
    pub fn should_override(&self) -> bool {
        self.should_override_builder().unwrap_or(false)
    }
}

impl<E: EthSpec> From<GetPayloadResponse<E>> for ExecutionPayload<E> {
    fn from(response: GetPayloadResponse<E>) -> Self {
        match response {
            GetPayloadResponse::Capella(inner) => {
                ExecutionPayload::Capella(inner.execution_payload)
            }
            GetPayloadResponse::Deneb(inner) => ExecutionPayload::Deneb(inner.execution_payload),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EngineCapabilities {
    pub new_payload_v2: bool,
    pub new_payload_v3: bool,
    pub forkchoice_updated_v2: bool,
    pub forkchoice_updated_v3: bool,
    pub get_payload_v2: bool,
    pub get_payload_v3: bool,
    pub get_client_version_v1: bool,
}

impl EngineCapabilities {
    pub fn from_methods<S: AsRef<str>>(methods: &[S]) -> Self {
        let has = |name: &str| methods.iter().any(|m| m.as_ref() == name);
        Self {
            new_payload_v2: has(ENGINE_NEW_PAYLOAD_V2),
            new_payload_v3: has(ENGINE_NEW_PAYLOAD_V3),
            forkchoice_updated_v2: has(ENGINE_FORKCHOICE_UPDATED_V2),
            forkchoice_updated_v3: has(ENGINE_FORKCHOICE_UPDATED_V3),
            get_payload_v2: has(ENGINE_GET_PAYLOAD_V2),
            get_payload_v3: has(ENGINE_GET_PAYLOAD_V3),
            get_client_version_v1: has(ENGINE_GET_CLIENT_VERSION_V1),
        }
    }

    /// Whether every method needed to drive `fork` is available.
    pub fn supports(&self, fork: ForkName) -> bool {
        match fork {
            ForkName::Capella => {
                self.new_payload_v2 && self.forkchoice_updated_v2 && self.get_payload_v2
            }
            ForkName::Deneb => {
                self.new_payload_v3 && self.forkchoice_updated_v3 && self.get_payload_v3
            }
            ForkName::Electra => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientCode {
    Besu,
    EthereumJS,
    Erigon,
    GoEthereum,
    Nethermind,
    Reth,
    Lighthouse,
    Lodestar,
    Nimbus,
    Teku,
    Prysm,
    Grandine,
    Unknown(String),
}

impl fmt::Display for ClientCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            ClientCode::Besu => "BU",
            ClientCode::EthereumJS => "EJ",
            ClientCode::Erigon => "EG",
            ClientCode::GoEthereum => "GE",
            ClientCode::Nethermind => "NM",
            ClientCode::Reth => "RH",
            ClientCode::Lighthouse => "LH",
            ClientCode::Lodestar => "LS",
            ClientCode::Nimbus => "NB",
            ClientCode::Teku => "TK",
            ClientCode::Prysm => "PM",
            ClientCode::Grandine => "GR",
            ClientCode::Unknown(code) => code,
        };
        f.write_str(code)
    }
}

impl TryFrom<String> for ClientCode {
    type Error = String;

    fn try_from(code: String) -> Result<Self, Self::Error> {
        match code.as_str() {
            "BU" => Ok(Self::Besu),
            "EJ" => Ok(Self::EthereumJS),
            "EG" => Ok(Self::Erigon),
            "GE" => Ok(Self::GoEthereum),
            "NM" => Ok(Self::Nethermind),
            "RH" => Ok(Self::Reth),
            "LH" => Ok(Self::Lighthouse),
            "LS" => Ok(Self::Lodestar),
            "NB" => Ok(Self::Nimbus),
            "TK" => Ok(Self::Teku),
            "PM" => Ok(Self::Prysm),
            "GR" => Ok(Self::Grandine),
            other if other.len() == 2 => Ok(Self::Unknown(code)),
            _ => Err(format!("Invalid client code: {}", code)),
        }
    }
}

/// First four bytes of a commit hash, stored as 8 lowercase hex characters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitPrefix(pub String);

impl TryFrom<String> for CommitPrefix {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let prefix = value.strip_prefix("0x").unwrap_or(&value);
        if prefix.len() != 8 {
            return Err(format!(
                "commit prefix must be 8 hex characters, got {:?}",
                value
            ));
        }
        if !prefix.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("commit prefix {:?} is not hex", value));
        }
        Ok(CommitPrefix(prefix.to_lowercase()))
    }
}

impl fmt::Display for CommitPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientVersionV1 {
    pub code: ClientCode,
    pub name: String,
    pub version: String,
    pub commit: CommitPrefix,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_codes_map_to_named_errors() {
        let cases = [
            (-32700, "ParseError"),
            (-32600, "InvalidRequest"),
            (-32601, "MethodNotFound"),
            (-32602, "InvalidParams"),
            (-32603, "InternalError"),
            (-32000, "ServerError"),
            (-38001, "UnknownPayload"),
            (-38002, "InvalidForkchoiceState"),
            (-38003, "InvalidPayloadAttributes"),
            (-38004, "RequestTooLarge"),
        ];
        for (code, name) in cases {
            let error = Error::from_rpc_error(code, "boom".into());
            assert!(format!("{:?}", error).starts_with(name), "{}", code);
            assert_eq!(error.rpc_code(), Some(code));
            assert!(error.is_json_rpc_error());
            assert!(!error.is_transport_error());
        }
    }

    #[test]
    fn unmapped_rpc_codes_share_one_kind() {
        for code in [-32099, -39999, 3] {
            let error = Error::from_rpc_error(code, "odd".into());
            assert!(matches!(
                error,
                Error::UnknownRpcError { code: c, ref message } if c == code && message == "odd"
            ));
            assert_eq!(error.rpc_code(), Some(code));
            assert!(error.is_json_rpc_error());
            assert!(!error.is_transport_error());
        }
    }

    #[test]
    fn payload_status_parsing() {
        assert_eq!(
            "INVALID_BLOCK_HASH".parse::<PayloadStatusV1Status>().unwrap(),
            PayloadStatusV1Status::InvalidBlockHash
        );
        assert!(matches!(
            "MAYBE".parse::<PayloadStatusV1Status>(),
            Err(Error::UnknownPayloadStatus(s)) if s == "MAYBE"
        ));
        let label: &'static str = PayloadStatusV1Status::InvalidBlockHash.into();
        assert_eq!(label, "invalid_block_hash");
    }

    #[test]
    fn attributes_follow_fork() {
        let attrs = PayloadAttributes::new(
            ForkName::Capella,
            5,
            Hash256::repeat_byte(1),
            Address::repeat_byte(2),
            vec![],
            Hash256::repeat_byte(3),
        )
        .unwrap();
        assert!(matches!(attrs, PayloadAttributes::V2(_)));
        assert!(attrs.parent_beacon_block_root().is_err());

        let attrs = PayloadAttributes::new(
            ForkName::Deneb,
            5,
            Hash256::zero(),
            Address::zero(),
            vec![],
            Hash256::repeat_byte(3),
        )
        .unwrap();
        assert_eq!(
            attrs.parent_beacon_block_root().unwrap(),
            Hash256::repeat_byte(3)
        );

        assert!(matches!(
            PayloadAttributes::new(
                ForkName::Electra,
                5,
                Hash256::zero(),
                Address::zero(),
                vec![],
                Hash256::zero()
            ),
            Err(Error::UnsupportedForkVariant(_))
        ));
    }

    #[test]
    fn client_code_and_commit_prefix() {
        assert_eq!(ClientCode::try_from("GE".to_string()), Ok(ClientCode::GoEthereum));
        assert_eq!(
            ClientCode::try_from("ZZ".to_string()),
            Ok(ClientCode::Unknown("ZZ".into()))
        );
        assert!(ClientCode::try_from("GETH".to_string()).is_err());

        assert_eq!(
            CommitPrefix::try_from("0xDEADBEEF".to_string()).unwrap().to_string(),
            "deadbeef"
        );
        assert!(CommitPrefix::try_from("deadbee".to_string()).is_err());
        assert!(CommitPrefix::try_from("deadbeeg".to_string()).is_err());
    }

    #[test]
    fn capabilities_cover_fork() {
        let caps = EngineCapabilities::from_methods(&[
            ENGINE_NEW_PAYLOAD_V3,
            ENGINE_FORKCHOICE_UPDATED_V3,
            ENGINE_GET_PAYLOAD_V3,
        ]);
        assert!(caps.supports(ForkName::Deneb));
        assert!(!caps.supports(ForkName::Capella));
        assert!(!caps.get_client_version_v1);
    }

    #[test]
    fn block_query_serialization() {
        assert_eq!(
            serde_json::to_value(BlockByNumberQuery::Number(255)).unwrap(),
            serde_json::json!("0xff")
        );
        assert_eq!(
            serde_json::to_value(BlockByNumberQuery::Tag(LATEST_TAG)).unwrap(),
            serde_json::json!("latest")
        );
    }
}
