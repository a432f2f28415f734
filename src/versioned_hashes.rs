use crate::engine_api::ethspec::EthSpec;
use crate::engine_api::{ExecutionPayloadRef, Hash256, Transactions};
use ethers_core::utils::rlp::{DecoderError, Rlp};

/// EIP-2718 type byte of a blob-carrying transaction.
pub const BLOB_TX_TYPE: u8 = 0x03;
/// Position of `blob_versioned_hashes` in the RLP payload of a blob transaction.
const BLOB_VERSIONED_HASHES_INDEX: usize = 10;

#[derive(Debug)]
pub enum Error {
    DecodingTransaction(String),
    LengthMismatch { expected: usize, found: usize },
    HashMismatch { index: usize, expected: Hash256, found: Hash256 },
}

impl From<DecoderError> for Error {
    fn from(e: DecoderError) -> Self {
        Error::DecodingTransaction(format!("{:?}", e))
    }
}

/// Check that the blob versioned hashes committed to by the payload's transactions are exactly
/// `expected`, in the same order. Capella payloads carry no blobs.
pub fn verify_versioned_hashes<E: EthSpec>(
    execution_payload: ExecutionPayloadRef<E>,
    expected: &[Hash256],
) -> Result<(), Error> {
    let found = match execution_payload {
        ExecutionPayloadRef::Capella(_) => vec![],
        ExecutionPayloadRef::Deneb(payload) => get_versioned_hashes::<E>(&payload.transactions)?,
    };

    if found.len() != expected.len() {
        return Err(Error::LengthMismatch {
            expected: expected.len(),
            found: found.len(),
        });
    }

    for (index, (expected, found)) in expected.iter().zip(found.iter()).enumerate() {
        if expected != found {
            return Err(Error::HashMismatch {
                index,
                expected: *expected,
                found: *found,
            });
        }
    }
    Ok(())
}

/// Versioned hashes of every blob transaction, in transaction order.
pub fn get_versioned_hashes<E: EthSpec>(
    transactions: &Transactions<E>,
) -> Result<Vec<Hash256>, Error> {
    let mut hashes = vec![];
    for tx in transactions.iter() {
        if tx.first() != Some(&BLOB_TX_TYPE) {
            continue;
        }
        let rlp = Rlp::new(&tx[1..]);
        let list = rlp.at(BLOB_VERSIONED_HASHES_INDEX)?;
        for item in list.iter() {
            let data = item.data()?;
            if data.len() != 32 {
                return Err(Error::DecodingTransaction(format!(
                    "versioned hash has {} bytes",
                    data.len()
                )));
            }
            hashes.push(Hash256::from_slice(data));
        }
    }
    Ok(hashes)
}
