// Path: crates/api/src/builtin.rs
//! Built-in function registry and token-transfer parsing.
//!
//! Built-in functions are protocol-level operations (token transfers, name
//! registration and the like) executed by the surrounding protocol rather
//! than by contract bytecode. The host only needs to recognize their names,
//! parse token-transfer argument lists, and merge the output fragments the
//! hook produces for them.

use crucible_types::address::Address;
use crucible_types::error::HostError;
use crucible_types::input::TokenTransfer;

/// A registry of built-in function names.
pub trait BuiltinFunctionContainer: Send + Sync {
    /// True when `name` denotes a built-in function.
    fn contains(&self, name: &str) -> bool;

    /// Every registered built-in function name.
    fn function_names(&self) -> Vec<String>;
}

/// The decoded form of a built-in token-transfer invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedTransfer {
    /// The account the tokens leave.
    pub sender: Address,
    /// The account the tokens arrive at.
    pub destination: Address,
    /// The individual token transfers.
    pub transfers: Vec<TokenTransfer>,
    /// A nested contract function to call after the transfer, or empty.
    pub call_function: String,
    /// Arguments for the nested call.
    pub call_args: Vec<Vec<u8>>,
}

/// Decodes built-in token-transfer argument lists.
pub trait TokenTransferParser: Send + Sync {
    /// Parses the arguments of a token-transfer built-in.
    ///
    /// Returns `Ok(None)` when `function` is not a transfer built-in.
    fn parse_token_transfers(
        &self,
        sender: &Address,
        recipient: &Address,
        function: &str,
        args: &[Vec<u8>],
    ) -> Result<Option<ParsedTransfer>, HostError>;
}

/// An always-empty container, for hosts running without built-ins.
#[derive(Debug, Default, Clone)]
pub struct EmptyBuiltinContainer;

impl BuiltinFunctionContainer for EmptyBuiltinContainer {
    fn contains(&self, _name: &str) -> bool {
        false
    }

    fn function_names(&self) -> Vec<String> {
        Vec::new()
    }
}

/// A parser that recognizes no transfer built-ins.
#[derive(Debug, Default, Clone)]
pub struct NoTokenTransfers;

impl TokenTransferParser for NoTokenTransfers {
    fn parse_token_transfers(
        &self,
        _sender: &Address,
        _recipient: &Address,
        _function: &str,
        _args: &[Vec<u8>],
    ) -> Result<Option<ParsedTransfer>, HostError> {
        Ok(None)
    }
}
