use std::convert::Infallible;

use revm::{
    DatabaseRef,
    bytecode::Bytecode,
    database::CacheDB,
    primitives::{Address, B256, U256},
    state::AccountInfo,
};

use crate::config::BlockHashFn;

/// Isolated in-memory state handed to the engine. Writes land in the cache
/// layer; the backing [`BlockHashDb`] is empty apart from block hashes.
pub type StateStore = CacheDB<BlockHashDb>;

/// Backing database with no accounts and no storage. Block hashes come from a
/// pure function so lookups never touch disk or network.
#[derive(Debug, Clone, Copy)]
pub struct BlockHashDb {
    block_hash: BlockHashFn,
}

impl BlockHashDb {
    pub fn new(block_hash: BlockHashFn) -> Self {
        Self { block_hash }
    }
}

impl DatabaseRef for BlockHashDb {
    type Error = Infallible;

    fn basic_ref(&self, _address: Address) -> Result<Option<AccountInfo>, Self::Error> {
        Ok(None)
    }

    fn code_by_hash_ref(&self, _code_hash: B256) -> Result<Bytecode, Self::Error> {
        Ok(Bytecode::default())
    }

    fn storage_ref(&self, _address: Address, _index: U256) -> Result<U256, Self::Error> {
        Ok(U256::ZERO)
    }

    fn block_hash_ref(&self, number: u64) -> Result<B256, Self::Error> {
        Ok((self.block_hash)(number))
    }
}

pub fn new_state_store(block_hash: BlockHashFn) -> StateStore {
    CacheDB::new(BlockHashDb::new(block_hash))
}
