//! Local recomputation of an execution block hash from its payload.

use crate::engine_api::ethspec::EthSpec;
use crate::engine_api::{
    Address, ExecutionBlockHash, ExecutionPayloadRef, Hash256, Uint256, Withdrawal,
};
use crate::Error;
use ethereum_types::H64;
use ethers_core::utils::keccak256 as keccak256_bytes;
use ethers_core::utils::rlp::RlpStream;
use hash256_std_hasher::Hash256StdHasher;
use hash_db::Hasher;
use triehash::ordered_trie_root;

/// `keccak(rlp([]))`, the ommers hash of every post-merge block.
pub const KECCAK_EMPTY_LIST_RLP: [u8; 32] = [
    0x1d, 0xcc, 0x4d, 0xe8, 0xde, 0xc7, 0x5d, 0x7a, 0xab, 0x85, 0xb5, 0x67, 0xb6, 0xcc, 0xd4, 0x1a,
    0xd3, 0x12, 0x45, 0x1b, 0x94, 0x8a, 0x74, 0x13, 0xf0, 0xa1, 0x42, 0xfd, 0x40, 0xd4, 0x93, 0x47,
];

pub fn keccak256(bytes: &[u8]) -> Hash256 {
    Hash256::from(keccak256_bytes(bytes))
}

// Keccak hasher
//
// Based on:
// https://github.com/paritytech/trie/blob/b76c9db35c2bb1b00e60c74a25f386c32ea1933d/test-support/keccak-hasher/src/lib.rs#L24-L41
#[derive(Default, Debug, Clone, PartialEq)]
pub struct KeccakHasher;

impl Hasher for KeccakHasher {
    type Out = Hash256;
    type StdHasher = Hash256StdHasher;

    const LENGTH: usize = 32;

    fn hash(x: &[u8]) -> Self::Out {
        keccak256(x)
    }
}

/// Execution block header fields in RLP order. Optional fields are appended only when present,
/// which covers London through Cancun headers.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionBlockHeader {
    pub parent_hash: Hash256,
    pub ommers_hash: Hash256,
    pub beneficiary: Address,
    pub state_root: Hash256,
    pub transactions_root: Hash256,
    pub receipts_root: Hash256,
    pub logs_bloom: Vec<u8>,
    pub difficulty: Uint256,
    pub number: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub timestamp: u64,
    pub extra_data: Vec<u8>,
    pub mix_hash: Hash256,
    pub nonce: H64,
    pub base_fee_per_gas: Uint256,
    pub withdrawals_root: Option<Hash256>,
    pub blob_gas_used: Option<u64>,
    pub excess_blob_gas: Option<u64>,
    pub parent_beacon_block_root: Option<Hash256>,
}

impl ExecutionBlockHeader {
    pub fn from_payload<E: EthSpec>(
        payload: ExecutionPayloadRef<E>,
        transactions_root: Hash256,
        withdrawals_root: Hash256,
        parent_beacon_block_root: Option<Hash256>,
    ) -> Self {
        Self {
            parent_hash: payload.parent_hash().into_root(),
            ommers_hash: Hash256::from(KECCAK_EMPTY_LIST_RLP),
            beneficiary: payload.fee_recipient(),
            state_root: payload.state_root(),
            transactions_root,
            receipts_root: payload.receipts_root(),
            logs_bloom: payload.logs_bloom().to_vec(),
            difficulty: Uint256::zero(),
            number: payload.block_number(),
            gas_limit: payload.gas_limit(),
            gas_used: payload.gas_used(),
            timestamp: payload.timestamp(),
            extra_data: payload.extra_data().to_vec(),
            mix_hash: payload.prev_randao(),
            nonce: H64::zero(),
            base_fee_per_gas: payload.base_fee_per_gas(),
            withdrawals_root: Some(withdrawals_root),
            blob_gas_used: payload.blob_gas_used().ok(),
            excess_blob_gas: payload.excess_blob_gas().ok(),
            parent_beacon_block_root,
        }
    }

    pub fn rlp_encode(&self) -> Vec<u8> {
        let mut stream = RlpStream::new();
        stream.begin_unbounded_list();
        stream.append(&self.parent_hash);
        stream.append(&self.ommers_hash);
        stream.append(&self.beneficiary);
        stream.append(&self.state_root);
        stream.append(&self.transactions_root);
        stream.append(&self.receipts_root);
        stream.append(&self.logs_bloom);
        stream.append(&self.difficulty);
        stream.append(&self.number);
        stream.append(&self.gas_limit);
        stream.append(&self.gas_used);
        stream.append(&self.timestamp);
        stream.append(&self.extra_data);
        stream.append(&self.mix_hash);
        stream.append(&self.nonce);
        stream.append(&self.base_fee_per_gas);
        if let Some(withdrawals_root) = &self.withdrawals_root {
            stream.append(withdrawals_root);
        }
        if let Some(blob_gas_used) = &self.blob_gas_used {
            stream.append(blob_gas_used);
        }
        if let Some(excess_blob_gas) = &self.excess_blob_gas {
            stream.append(excess_blob_gas);
        }
        if let Some(root) = &self.parent_beacon_block_root {
            stream.append(root);
        }
        stream.finalize_unbounded_list();
        stream.out().to_vec()
    }

    pub fn hash(&self) -> ExecutionBlockHash {
        ExecutionBlockHash::from_root(keccak256(&self.rlp_encode()))
    }
}

fn rlp_encode_withdrawal(withdrawal: &Withdrawal) -> Vec<u8> {
    let mut stream = RlpStream::new_list(4);
    stream.append(&withdrawal.index);
    stream.append(&withdrawal.validator_index);
    stream.append(&withdrawal.address);
    stream.append(&withdrawal.amount);
    stream.out().to_vec()
}

pub fn transactions_root<E: EthSpec>(payload: ExecutionPayloadRef<E>) -> Hash256 {
    ordered_trie_root::<KeccakHasher, _>(payload.transactions().iter().map(|tx| {
        let bytes: &[u8] = tx;
        bytes
    }))
}

pub fn withdrawals_root<E: EthSpec>(payload: ExecutionPayloadRef<E>) -> Hash256 {
    ordered_trie_root::<KeccakHasher, _>(payload.withdrawals().iter().map(rlp_encode_withdrawal))
}

/// Compute the block hash implied by `payload`. `parent_beacon_block_root` is required for
/// Deneb payloads and must be `None` for Capella.
pub fn calculate_execution_block_hash<E: EthSpec>(
    payload: ExecutionPayloadRef<E>,
    parent_beacon_block_root: Option<Hash256>,
) -> ExecutionBlockHash {
    ExecutionBlockHeader::from_payload(
        payload,
        transactions_root(payload),
        withdrawals_root(payload),
        parent_beacon_block_root,
    )
    .hash()
}

pub fn verify_payload_block_hash<E: EthSpec>(
    payload: ExecutionPayloadRef<E>,
    parent_beacon_block_root: Option<Hash256>,
) -> Result<(), Error> {
    let computed = calculate_execution_block_hash(payload, parent_beacon_block_root);
    if computed != payload.block_hash() {
        return Err(Error::BlockHashMismatch {
            computed,
            payload: payload.block_hash(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine_api::ethspec::MainnetEthSpec;
    use crate::engine_api::{ExecutionPayload, ExecutionPayloadDeneb, ForkName};
    use std::str::FromStr;

    type E = MainnetEthSpec;

    #[test]
    fn empty_list_constant() {
        assert_eq!(keccak256(&[0xc0]), Hash256::from(KECCAK_EMPTY_LIST_RLP));
    }

    #[test]
    fn empty_trie_root() {
        let payload = ExecutionPayload::<E>::empty(ForkName::Capella).unwrap();
        assert_eq!(
            transactions_root(payload.to_ref()),
            Hash256::from_str("56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421")
                .unwrap()
        );
    }

    #[test]
    fn rlp_encode_merge_block() {
        let header = ExecutionBlockHeader {
            parent_hash: Hash256::from_str(
                "927ca537f06c783a3a2635b8805eef1c8c2124f7444ad4a3389898dd832f2dbe",
            )
            .unwrap(),
            ommers_hash: Hash256::from(KECCAK_EMPTY_LIST_RLP),
            beneficiary: Address::from_str("ba5e000000000000000000000000000000000000").unwrap(),
            state_root: Hash256::from_str(
                "e97859b065bd8dbbb4519c7cb935024de2484c2b7f881181b4360492f0b06b82",
            )
            .unwrap(),
            transactions_root: Hash256::from_str(
                "50f738580ed699f0469702c7ccc63ed2e51bc034be9479b7bff4e68dee84accf",
            )
            .unwrap(),
            receipts_root: Hash256::from_str(
                "29b0562f7140574dd0d50dee8a271b22e1a0a7b78fca58f7c60370d8317ba2a9",
            )
            .unwrap(),
            logs_bloom: vec![0; 256],
            difficulty: Uint256::zero(),
            number: 0x01,
            gas_limit: 0x016345785d8a0000,
            gas_used: 0x015534,
            timestamp: 0x079e,
            extra_data: vec![0x42],
            mix_hash: Hash256::from_str(
                "0000000000000000000000000000000000000000000000000000000000020000",
            )
            .unwrap(),
            nonce: H64::zero(),
            base_fee_per_gas: Uint256::from(0x036b_u64),
            withdrawals_root: None,
            blob_gas_used: None,
            excess_blob_gas: None,
            parent_beacon_block_root: None,
        };
        assert_eq!(
            header.hash().into_root(),
            Hash256::from_str("5b1f0f2efdaa19e996b4aea59eeb67620259f09732732a339a10dac311333684")
                .unwrap()
        );
    }

    #[test]
    fn verifies_self_consistent_payload() {
        let mut payload = ExecutionPayloadDeneb::<E> {
            block_number: 7,
            gas_limit: 30_000_000,
            timestamp: 1_700_000_000,
            ..Default::default()
        };
        payload
            .withdrawals
            .push(Withdrawal {
                index: 0,
                validator_index: 3,
                address: Address::repeat_byte(9),
                amount: 1_000,
            })
            .unwrap();
        let root = Some(Hash256::repeat_byte(4));
        payload.block_hash =
            calculate_execution_block_hash(ExecutionPayloadRef::Deneb(&payload), root);

        assert!(verify_payload_block_hash(ExecutionPayloadRef::Deneb(&payload), root).is_ok());

        // The beacon root is committed to by the header.
        assert!(matches!(
            verify_payload_block_hash(
                ExecutionPayloadRef::Deneb(&payload),
                Some(Hash256::repeat_byte(5))
            ),
            Err(Error::BlockHashMismatch { .. })
        ));

        payload.gas_used = 1;
        assert!(matches!(
            verify_payload_block_hash(ExecutionPayloadRef::Deneb(&payload), root),
            Err(Error::BlockHashMismatch { .. })
        ));
    }
}
