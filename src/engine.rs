//! The execution engine seam.
//!
//! The harness never interprets bytecode itself. It hands `(code, calldata,
//! config)` to an [`Engine`] and only looks at whether the call failed.

use alloy::primitives::{Address, Bytes, address};
use revm::{
    Context, ExecuteEvm, MainBuilder, MainContext,
    bytecode::Bytecode,
    context::TxEnv,
    context_interface::result::ExecutionResult,
    state::AccountInfo,
};
use thiserror::Error;
use tracing::trace;

use crate::config::ExecutionConfig;

/// Address the code under test is installed at.
pub const CONTRACT_ADDRESS: Address = address!("0x000000000000000000000000636f6e7472616374");

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("execution reverted: 0x{}", hex::encode(.0))]
    Reverted(Bytes),
    #[error("execution halted: {0}")]
    Halted(String),
    #[error("transaction rejected: {0}")]
    Transaction(String),
}

pub trait Engine {
    /// Runs `code` with `calldata` against `config`. Returns the call output.
    fn execute(
        &self,
        code: &Bytes,
        calldata: &Bytes,
        config: &mut ExecutionConfig,
    ) -> Result<Bytes, EngineError>;
}

/// [`Engine`] backed by `revm`'s mainnet handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct RevmEngine;

impl Engine for RevmEngine {
    fn execute(
        &self,
        code: &Bytes,
        calldata: &Bytes,
        config: &mut ExecutionConfig,
    ) -> Result<Bytes, EngineError> {
        config.state.insert_account_info(
            CONTRACT_ADDRESS,
            AccountInfo::from_bytecode(Bytecode::new_legacy(code.clone())),
        );

        let chain = config.chain;
        let difficulty = config.difficulty;
        let timestamp = config.timestamp;
        let block_number = config.block_number;
        let gas_limit = config.gas_limit;
        let base_fee = config.base_fee;
        let coinbase = config.coinbase;

        let tx = TxEnv::builder()
            .caller(config.origin)
            .to(CONTRACT_ADDRESS)
            .data(calldata.clone())
            .gas_limit(gas_limit)
            .gas_price(config.gas_price.saturating_to())
            .value(config.value)
            .chain_id(Some(chain.chain_id))
            .build()
            .map_err(|e| EngineError::Transaction(format!("{e:?}")))?;

        // The interpreter is called as if by a bare message call: fee, balance
        // and block gas checks of full transaction validation do not apply.
        let mut evm = Context::mainnet()
            .with_db(&mut config.state)
            .modify_cfg_chained(|cfg| {
                cfg.chain_id = chain.chain_id;
                cfg.spec = chain.spec;
                cfg.disable_base_fee = true;
                cfg.disable_balance_check = true;
            })
            .modify_block_chained(|block| {
                block.number = block_number.saturating_to();
                block.timestamp = timestamp.saturating_to();
                block.difficulty = difficulty;
                block.gas_limit = gas_limit;
                block.basefee = base_fee.saturating_to();
                block.beneficiary = coinbase;
            })
            .build_mainnet();

        let outcome = evm
            .transact(tx)
            .map_err(|e| EngineError::Transaction(format!("{e:?}")))?;

        let result = match outcome.result {
            ExecutionResult::Success { output, .. } => Ok(output.into_data()),
            ExecutionResult::Revert { output, .. } => Err(EngineError::Reverted(output)),
            ExecutionResult::Halt { reason, .. } => {
                Err(EngineError::Halted(format!("{reason:?}")))
            }
        };

        if config.debug {
            trace!(code_len = code.len(), ?result, "engine call finished");
        }
        result
    }
}
