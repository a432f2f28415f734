use crate::engine_api::ethspec::EthSpec;
use crate::engine_api::json_structures::ExecutionBlockHash;
use crate::engine_api::withdrawal::Withdrawal;
use crate::engine_api::{Error, ForkName};
use crate::serde_utils as eth2_serde_utils;
use derivative::Derivative;
use ethereum_types::Address;
pub use ethereum_types::H256 as Hash256;
pub use ethereum_types::U256 as Uint256;
use serde_derive::{Deserialize, Serialize};
use ssz_types::{FixedVector, VariableList};
use superstruct::superstruct;

pub type Transaction<N> = VariableList<u8, N>;
pub type Transactions<T> = VariableList<
    Transaction<<T as EthSpec>::MaxBytesPerTransaction>,
    <T as EthSpec>::MaxTransactionsPerPayload,
>;

pub type Withdrawals<T> = VariableList<Withdrawal, <T as EthSpec>::MaxWithdrawalsPerPayload>;

/// An execution payload in the Engine API JSON encoding.
///
/// `Capella` is exchanged through the V2 methods and `Deneb` through the V3 methods. A payload
/// whose block hash is zero is treated as empty.
#[superstruct(
    variants(Capella, Deneb),
    variant_attributes(
        derive(Default, Debug, Clone, Serialize, Deserialize, Derivative),
        derivative(PartialEq(bound = "T: EthSpec")),
        serde(bound = "T: EthSpec", rename_all = "camelCase"),
    ),
    cast_error(ty = "Error", expr = "Error::IncorrectStateVariant"),
    partial_getter_error(ty = "Error", expr = "Error::IncorrectStateVariant")
)]
#[derive(Debug, Clone, Serialize, Derivative)]
#[derivative(PartialEq(bound = "T: EthSpec"))]
#[serde(bound = "T: EthSpec", untagged)]
pub struct ExecutionPayload<T: EthSpec> {
    #[superstruct(getter(copy))]
    pub parent_hash: ExecutionBlockHash,
    #[superstruct(getter(copy))]
    pub fee_recipient: Address,
    #[superstruct(getter(copy))]
    pub state_root: Hash256,
    #[superstruct(getter(copy))]
    pub receipts_root: Hash256,
    #[serde(with = "ssz_types::serde_utils::hex_fixed_vec")]
    pub logs_bloom: FixedVector<u8, T::BytesPerLogsBloom>,
    #[superstruct(getter(copy))]
    pub prev_randao: Hash256,
    #[serde(with = "eth2_serde_utils::u64_hex_be")]
    #[superstruct(getter(copy))]
    pub block_number: u64,
    #[serde(with = "eth2_serde_utils::u64_hex_be")]
    #[superstruct(getter(copy))]
    pub gas_limit: u64,
    #[serde(with = "eth2_serde_utils::u64_hex_be")]
    #[superstruct(getter(copy))]
    pub gas_used: u64,
    #[serde(with = "eth2_serde_utils::u64_hex_be")]
    #[superstruct(getter(copy))]
    pub timestamp: u64,
    #[serde(with = "ssz_types::serde_utils::hex_var_list")]
    pub extra_data: VariableList<u8, T::MaxExtraDataBytes>,
    #[superstruct(getter(copy))]
    pub base_fee_per_gas: Uint256,
    #[superstruct(getter(copy))]
    pub block_hash: ExecutionBlockHash,
    #[serde(with = "ssz_types::serde_utils::list_of_hex_var_list")]
    pub transactions: Transactions<T>,
    pub withdrawals: Withdrawals<T>,
    #[superstruct(only(Deneb), partial_getter(copy))]
    #[serde(with = "eth2_serde_utils::u64_hex_be")]
    pub blob_gas_used: u64,
    #[superstruct(only(Deneb), partial_getter(copy))]
    #[serde(with = "eth2_serde_utils::u64_hex_be")]
    pub excess_blob_gas: u64,
}

impl<T: EthSpec> ExecutionPayload<T> {
    /// The zero-valued payload shape used for `fork`.
    pub fn empty(fork: ForkName) -> Result<Self, Error> {
        match fork {
            ForkName::Capella => Ok(ExecutionPayload::Capella(ExecutionPayloadCapella::default())),
            ForkName::Deneb => Ok(ExecutionPayload::Deneb(ExecutionPayloadDeneb::default())),
            ForkName::Electra => Err(Error::UnsupportedForkVariant(format!(
                "no execution payload shape for {}",
                fork
            ))),
        }
    }

    pub fn fork_name(&self) -> ForkName {
        match self {
            ExecutionPayload::Capella(_) => ForkName::Capella,
            ExecutionPayload::Deneb(_) => ForkName::Deneb,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_ref().is_empty()
    }
}

impl<'a, T: EthSpec> ExecutionPayloadRef<'a, T> {
    // this emulates clone on a normal reference type
    pub fn clone_from_ref(&self) -> ExecutionPayload<T> {
        match *self {
            ExecutionPayloadRef::Capella(payload) => ExecutionPayload::Capella(payload.clone()),
            ExecutionPayloadRef::Deneb(payload) => ExecutionPayload::Deneb(payload.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.block_hash().is_zero()
    }
}
