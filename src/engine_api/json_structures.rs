use super::*;
use crate::serde_utils as eth2_serde_utils;
use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonRequestBody<'a> {
    pub jsonrpc: &'a str,
    pub method: &'a str,
    pub params: serde_json::Value,
    pub id: serde_json::Value,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct JsonError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonResponseBody {
    pub jsonrpc: String,
    #[serde(default)]
    pub error: Option<JsonError>,
    #[serde(default)]
    pub result: serde_json::Value,
    pub id: serde_json::Value,
}

/// Hash of an execution block. Kept distinct from beacon roots so the two cannot be mixed up.
#[derive(Default, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ExecutionBlockHash(pub Hash256);

impl ExecutionBlockHash {
    pub fn zero() -> Self {
        Self(Hash256::zero())
    }

    pub fn repeat_byte(b: u8) -> Self {
        Self(Hash256::repeat_byte(b))
    }

    pub fn from_root(root: Hash256) -> Self {
        Self(root)
    }

    pub fn into_root(self) -> Hash256 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl fmt::Debug for ExecutionBlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl fmt::Display for ExecutionBlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl FromStr for ExecutionBlockHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hash256::from_str(s.strip_prefix("0x").unwrap_or(s))
            .map(Self)
            .map_err(|e| format!("{:?}", e))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransparentJsonPayloadId(#[serde(with = "eth2_serde_utils::bytes_8_hex")] pub PayloadId);

impl From<PayloadId> for TransparentJsonPayloadId {
    fn from(id: PayloadId) -> Self {
        Self(id)
    }
}

impl From<TransparentJsonPayloadId> for PayloadId {
    fn from(wrapper: TransparentJsonPayloadId) -> Self {
        wrapper.0
    }
}

/// On the request, use a transparent wrapper.
pub type JsonPayloadIdRequest = TransparentJsonPayloadId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonForkchoiceStateV1 {
    pub head_block_hash: ExecutionBlockHash,
    pub safe_block_hash: ExecutionBlockHash,
    pub finalized_block_hash: ExecutionBlockHash,
}

impl From<ForkchoiceState> for JsonForkchoiceStateV1 {
    fn from(f: ForkchoiceState) -> Self {
        let ForkchoiceState {
            head_block_hash,
            safe_block_hash,
            finalized_block_hash,
        } = f;

        Self {
            head_block_hash,
            safe_block_hash,
            finalized_block_hash,
        }
    }
}

impl From<JsonForkchoiceStateV1> for ForkchoiceState {
    fn from(j: JsonForkchoiceStateV1) -> Self {
        let JsonForkchoiceStateV1 {
            head_block_hash,
            safe_block_hash,
            finalized_block_hash,
        } = j;

        Self {
            head_block_hash,
            safe_block_hash,
            finalized_block_hash,
        }
    }
}

#[superstruct(
    variants(V2, V3),
    variant_attributes(
        derive(Debug, Clone, PartialEq, Serialize, Deserialize),
        serde(rename_all = "camelCase")
    ),
    cast_error(ty = "Error", expr = "Error::IncorrectStateVariant"),
    partial_getter_error(ty = "Error", expr = "Error::IncorrectStateVariant")
)]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub struct JsonPayloadAttributes {
    #[serde(with = "eth2_serde_utils::u64_hex_be")]
    pub timestamp: u64,
    pub prev_randao: Hash256,
    pub suggested_fee_recipient: Address,
    pub withdrawals: Vec<Withdrawal>,
    #[superstruct(only(V3))]
    pub parent_beacon_block_root: Hash256,
}

impl From<PayloadAttributes> for JsonPayloadAttributes {
    fn from(attributes: PayloadAttributes) -> Self {
        match attributes {
            PayloadAttributes::V2(pa) => Self::V2(JsonPayloadAttributesV2 {
                timestamp: pa.timestamp,
                prev_randao: pa.prev_randao,
                suggested_fee_recipient: pa.suggested_fee_recipient,
                withdrawals: pa.withdrawals,
            }),
            PayloadAttributes::V3(pa) => Self::V3(JsonPayloadAttributesV3 {
                timestamp: pa.timestamp,
                prev_randao: pa.prev_randao,
                suggested_fee_recipient: pa.suggested_fee_recipient,
                withdrawals: pa.withdrawals,
                parent_beacon_block_root: pa.parent_beacon_block_root,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonPayloadStatusV1 {
    pub status: String,
    pub latest_valid_hash: Option<ExecutionBlockHash>,
    #[serde(default)]
    pub validation_error: Option<String>,
}

impl TryFrom<JsonPayloadStatusV1> for PayloadStatusV1 {
    type Error = Error;

    fn try_from(j: JsonPayloadStatusV1) -> Result<Self, Self::Error> {
        let JsonPayloadStatusV1 {
            status,
            latest_valid_hash,
            validation_error,
        } = j;

        Ok(Self {
            status: status.parse()?,
            latest_valid_hash,
            validation_error,
        })
    }
}

impl From<PayloadStatusV1> for JsonPayloadStatusV1 {
    fn from(p: PayloadStatusV1) -> Self {
        Self {
            status: p.status.as_wire_str().to_string(),
            latest_valid_hash: p.latest_valid_hash,
            validation_error: p.validation_error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonForkchoiceUpdatedV1Response {
    pub payload_status: JsonPayloadStatusV1,
    #[serde(default)]
    pub payload_id: Option<TransparentJsonPayloadId>,
}

impl TryFrom<JsonForkchoiceUpdatedV1Response> for ForkchoiceUpdatedResponse {
    type Error = Error;

    fn try_from(j: JsonForkchoiceUpdatedV1Response) -> Result<Self, Self::Error> {
        let JsonForkchoiceUpdatedV1Response {
            payload_status,
            payload_id,
        } = j;

        Ok(Self {
            payload_status: payload_status.try_into()?,
            payload_id: payload_id.map(Into::into),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "E: EthSpec", rename_all = "camelCase")]
pub struct JsonGetPayloadResponseV2<E: EthSpec> {
    pub execution_payload: ExecutionPayloadCapella<E>,
    pub block_value: Uint256,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "E: EthSpec", rename_all = "camelCase")]
pub struct JsonGetPayloadResponseV3<E: EthSpec> {
    pub execution_payload: ExecutionPayloadDeneb<E>,
    pub block_value: Uint256,
    pub blobs_bundle: BlobsBundle,
    #[serde(default)]
    pub should_override_builder: bool,
}

impl<E: EthSpec> From<JsonGetPayloadResponseV2<E>> for GetPayloadResponse<E> {
    fn from(j: JsonGetPayloadResponseV2<E>) -> Self {
        GetPayloadResponse::Capella(GetPayloadResponseCapella {
            execution_payload: j.execution_payload,
            block_value: j.block_value,
        })
    }
}

impl<E: EthSpec> From<JsonGetPayloadResponseV3<E>> for GetPayloadResponse<E> {
    fn from(j: JsonGetPayloadResponseV3<E>) -> Self {
        GetPayloadResponse::Deneb(GetPayloadResponseDeneb {
            execution_payload: j.execution_payload,
            block_value: j.block_value,
            blobs_bundle: j.blobs_bundle,
            should_override_builder: j.should_override_builder,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonClientVersionV1 {
    pub code: String,
    pub name: String,
    pub version: String,
    pub commit: String,
}

impl From<ClientVersionV1> for JsonClientVersionV1 {
    fn from(client_version: ClientVersionV1) -> Self {
        Self {
            code: client_version.code.to_string(),
            name: client_version.name,
            version: client_version.version,
            commit: client_version.commit.to_string(),
        }
    }
}

impl TryFrom<JsonClientVersionV1> for ClientVersionV1 {
    type Error = String;

    fn try_from(json: JsonClientVersionV1) -> Result<Self, Self::Error> {
        Ok(Self {
            code: json.code.try_into()?,
            name: json.name,
            version: json.version,
            commit: json.commit.try_into()?,
        })
    }
}
