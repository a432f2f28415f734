use crate::block_hash::verify_payload_block_hash;
use crate::engine_api::ethspec::EthSpec;
use crate::engine_api::{
    Error as ApiError, ExecutionBlockHash, ExecutionPayload, ExecutionPayloadRef, ForkName,
    Hash256,
};
use crate::versioned_hashes::verify_versioned_hashes;
use crate::Error;

/// A candidate block submitted to the execution client through `engine_newPayload`.
#[derive(Clone, Debug, PartialEq)]
pub struct NewPayloadRequest<E: EthSpec> {
    pub execution_payload: ExecutionPayload<E>,
    /// Hashes of the blob commitments in the beacon block, in commitment order.
    pub versioned_hashes: Vec<Hash256>,
    /// Required from Deneb on.
    pub parent_beacon_block_root: Option<Hash256>,
    /// Skip the call when the execution client already knows the block.
    pub skip_if_exists: bool,
    /// Treat engine errors other than INVALID as "not yet validated" instead of failing.
    pub optimistic: bool,
}

impl<E: EthSpec> NewPayloadRequest<E> {
    pub fn new(
        execution_payload: ExecutionPayload<E>,
        versioned_hashes: Vec<Hash256>,
        parent_beacon_block_root: Option<Hash256>,
    ) -> Self {
        Self {
            execution_payload,
            versioned_hashes,
            parent_beacon_block_root,
            skip_if_exists: false,
            optimistic: false,
        }
    }

    pub fn with_skip_if_exists(mut self, skip_if_exists: bool) -> Self {
        self.skip_if_exists = skip_if_exists;
        self
    }

    pub fn with_optimistic(mut self, optimistic: bool) -> Self {
        self.optimistic = optimistic;
        self
    }

    pub fn execution_payload_ref(&self) -> ExecutionPayloadRef<'_, E> {
        self.execution_payload.to_ref()
    }

    pub fn fork_name(&self) -> ForkName {
        self.execution_payload.fork_name()
    }

    pub fn block_hash(&self) -> ExecutionBlockHash {
        self.execution_payload.block_hash()
    }

    pub fn parent_hash(&self) -> ExecutionBlockHash {
        self.execution_payload.parent_hash()
    }

    pub fn block_number(&self) -> u64 {
        self.execution_payload.block_number()
    }

    /// The parent beacon block root carried by the `engine_newPayloadV3` call.
    pub fn required_parent_beacon_block_root(&self) -> Result<Option<Hash256>, Error> {
        match (self.fork_name(), self.parent_beacon_block_root) {
            (ForkName::Capella, _) => Ok(None),
            (ForkName::Deneb, Some(root)) => Ok(Some(root)),
            (ForkName::Deneb, None) => Err(Error::ApiError(ApiError::IncorrectStateVariant)),
            (fork, _) => Err(Error::ApiError(ApiError::UnsupportedForkVariant(format!(
                "new payload for {}",
                fork
            )))),
        }
    }

    /// Checks that can be done without the execution client. A request failing these is never
    /// sent.
    pub fn perform_local_verifications(&self) -> Result<(), Error> {
        self.verify_payload_block_hash()?;
        self.verify_versioned_hashes()?;
        Ok(())
    }

    /// Recompute the header hash from the payload contents.
    pub fn verify_payload_block_hash(&self) -> Result<(), Error> {
        let parent_beacon_block_root = self.required_parent_beacon_block_root()?;
        verify_payload_block_hash(self.execution_payload_ref(), parent_beacon_block_root)
    }

    /// The blob transactions must commit to exactly `versioned_hashes`, in order.
    pub fn verify_versioned_hashes(&self) -> Result<(), Error> {
        verify_versioned_hashes(self.execution_payload_ref(), &self.versioned_hashes)
            .map_err(Error::VersionedHashes)
    }
}
