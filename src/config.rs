//! Execution environment construction.
//!
//! [`Environment`] is a partial record: every field the caller leaves as `None`
//! is filled from a [`Defaults`] set, and values already present are never
//! touched. [`Environment::finalize`] turns a populated record into an
//! [`ExecutionConfig`] with a fresh, isolated [`StateStore`].

use std::time::{SystemTime, UNIX_EPOCH};

use alloy::primitives::{Address, B256, keccak256};
use revm::primitives::hardfork::SpecId;
use ruint::aliases::U256;
use thiserror::Error;

use crate::state::{StateStore, new_state_store};

/// Base fee of the first post-London block, in wei.
pub const INITIAL_BASE_FEE: u64 = 1_000_000_000;
pub const MAINNET_CHAIN_ID: u64 = 1;

/// Maps a block number to its hash for the `BLOCKHASH` opcode.
pub type BlockHashFn = fn(u64) -> B256;

/// `keccak256` of the decimal representation of `number`.
pub fn default_block_hash(number: u64) -> B256 {
    keccak256(number.to_string().as_bytes())
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("environment field `{0}` is not set")]
    Missing(&'static str),
}

/// Protocol parameters: chain identifier and the active hardfork.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainParams {
    pub chain_id: u64,
    pub spec: SpecId,
}

impl ChainParams {
    /// Chain id 1 with every fork up to Prague active from genesis.
    pub fn all_forks_from_genesis() -> Self {
        Self {
            chain_id: MAINNET_CHAIN_ID,
            spec: SpecId::PRAGUE,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Environment {
    pub chain: Option<ChainParams>,
    pub origin: Address,
    pub coinbase: Address,
    pub difficulty: Option<U256>,
    pub timestamp: Option<U256>,
    pub block_number: Option<U256>,
    pub gas_limit: Option<u64>,
    pub gas_price: Option<U256>,
    pub value: Option<U256>,
    pub base_fee: Option<U256>,
    pub block_hash: Option<BlockHashFn>,
    /// Per-call instrumentation in the engine.
    pub debug: bool,
}

/// Named values used to fill absent [`Environment`] fields.
#[derive(Debug, Clone, Copy)]
pub struct Defaults {
    pub chain: ChainParams,
    pub difficulty: U256,
    pub timestamp: U256,
    pub block_number: U256,
    pub gas_limit: u64,
    pub gas_price: U256,
    pub value: U256,
    pub base_fee: U256,
    pub block_hash: BlockHashFn,
}

/// Function pointers are compared by address with [`std::ptr::fn_addr_eq`].
fn same_block_hash(a: Option<BlockHashFn>, b: Option<BlockHashFn>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => std::ptr::fn_addr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

impl PartialEq for Environment {
    fn eq(&self, other: &Self) -> bool {
        self.chain == other.chain
            && self.origin == other.origin
            && self.coinbase == other.coinbase
            && self.difficulty == other.difficulty
            && self.timestamp == other.timestamp
            && self.block_number == other.block_number
            && self.gas_limit == other.gas_limit
            && self.gas_price == other.gas_price
            && self.value == other.value
            && self.base_fee == other.base_fee
            && same_block_hash(self.block_hash, other.block_hash)
            && self.debug == other.debug
    }
}

impl Eq for Environment {}

impl PartialEq for Defaults {
    fn eq(&self, other: &Self) -> bool {
        self.chain == other.chain
            && self.difficulty == other.difficulty
            && self.timestamp == other.timestamp
            && self.block_number == other.block_number
            && self.gas_limit == other.gas_limit
            && self.gas_price == other.gas_price
            && self.value == other.value
            && self.base_fee == other.base_fee
            && same_block_hash(Some(self.block_hash), Some(other.block_hash))
    }
}

impl Eq for Defaults {}

impl Defaults {
    pub fn standard() -> Self {
        Self::at_timestamp(unix_now())
    }

    /// Same as [`Self::standard`] but with a fixed block timestamp.
    pub fn at_timestamp(timestamp: u64) -> Self {
        Self {
            chain: ChainParams::all_forks_from_genesis(),
            difficulty: U256::ZERO,
            timestamp: U256::from(timestamp),
            block_number: U256::ZERO,
            gas_limit: u64::MAX,
            gas_price: U256::ZERO,
            value: U256::ZERO,
            base_fee: U256::from(INITIAL_BASE_FEE),
            block_hash: default_block_hash,
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Fills every absent field of `env` with the standard defaults.
pub fn set_defaults(env: &mut Environment) {
    env.fill_defaults(&Defaults::standard());
}

impl Environment {
    pub fn fill_defaults(&mut self, defaults: &Defaults) {
        self.chain.get_or_insert(defaults.chain);
        self.difficulty.get_or_insert(defaults.difficulty);
        self.timestamp.get_or_insert(defaults.timestamp);
        self.block_number.get_or_insert(defaults.block_number);
        self.gas_limit.get_or_insert(defaults.gas_limit);
        self.gas_price.get_or_insert(defaults.gas_price);
        self.value.get_or_insert(defaults.value);
        self.base_fee.get_or_insert(defaults.base_fee);
        self.block_hash.get_or_insert(defaults.block_hash);
    }

    pub fn with_defaults(mut self, defaults: &Defaults) -> Self {
        self.fill_defaults(defaults);
        self
    }

    pub fn with_chain(mut self, chain: ChainParams) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(U256::from(timestamp));
        self
    }

    pub fn with_block_number(mut self, number: u64) -> Self {
        self.block_number = Some(U256::from(number));
        self
    }

    pub fn with_gas_price(mut self, gas_price: U256) -> Self {
        self.gas_price = Some(gas_price);
        self
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_block_hash(mut self, block_hash: BlockHashFn) -> Self {
        self.block_hash = Some(block_hash);
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn is_complete(&self) -> bool {
        self.first_missing().is_none()
    }

    fn first_missing(&self) -> Option<&'static str> {
        let fields = [
            ("chain", self.chain.is_none()),
            ("difficulty", self.difficulty.is_none()),
            ("timestamp", self.timestamp.is_none()),
            ("block_number", self.block_number.is_none()),
            ("gas_limit", self.gas_limit.is_none()),
            ("gas_price", self.gas_price.is_none()),
            ("value", self.value.is_none()),
            ("base_fee", self.base_fee.is_none()),
            ("block_hash", self.block_hash.is_none()),
        ];
        fields
            .into_iter()
            .find_map(|(name, missing)| missing.then_some(name))
    }

    /// Builds an [`ExecutionConfig`] with a freshly created state store.
    pub fn finalize(&self) -> Result<ExecutionConfig, ConfigError> {
        let chain = self.chain.ok_or(ConfigError::Missing("chain"))?;
        let difficulty = self.difficulty.ok_or(ConfigError::Missing("difficulty"))?;
        let timestamp = self.timestamp.ok_or(ConfigError::Missing("timestamp"))?;
        let block_number = self
            .block_number
            .ok_or(ConfigError::Missing("block_number"))?;
        let gas_limit = self.gas_limit.ok_or(ConfigError::Missing("gas_limit"))?;
        let gas_price = self.gas_price.ok_or(ConfigError::Missing("gas_price"))?;
        let value = self.value.ok_or(ConfigError::Missing("value"))?;
        let base_fee = self.base_fee.ok_or(ConfigError::Missing("base_fee"))?;
        let block_hash = self.block_hash.ok_or(ConfigError::Missing("block_hash"))?;

        Ok(ExecutionConfig {
            chain,
            origin: self.origin,
            coinbase: self.coinbase,
            difficulty,
            timestamp,
            block_number,
            gas_limit,
            gas_price,
            value,
            base_fee,
            block_hash,
            debug: self.debug,
            state: new_state_store(block_hash),
        })
    }
}

/// Fully populated environment. Owns the state store of one measurement.
#[derive(Debug)]
pub struct ExecutionConfig {
    pub chain: ChainParams,
    pub origin: Address,
    pub coinbase: Address,
    pub difficulty: U256,
    pub timestamp: U256,
    pub block_number: U256,
    pub gas_limit: u64,
    pub gas_price: U256,
    pub value: U256,
    pub base_fee: U256,
    pub block_hash: BlockHashFn,
    pub debug: bool,
    pub state: StateStore,
}
