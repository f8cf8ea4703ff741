// Path: crates/types/src/output.rs
//! The structured receipt of an execution: `VMOutput` and its parts.

use num_bigint::{BigInt, BigUint};
use std::collections::BTreeMap;

use crate::address::Address;
use crate::input::CallType;

/// Wire-level result of an execution. The integer values are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ReturnCode {
    /// Execution completed successfully.
    #[default]
    Ok = 0,
    /// The named function does not exist in the contract.
    FunctionNotFound = 1,
    /// The function exists but its signature is not callable.
    FunctionWrongSignature = 2,
    /// The recipient account holds no contract code.
    ContractNotFound = 3,
    /// The contract signalled an error or violated a rule.
    UserError = 4,
    /// The gas provided was exhausted.
    OutOfGas = 5,
    /// A generated address collided with an existing account.
    AccountCollision = 6,
    /// A value transfer exceeded the available balance.
    OutOfFunds = 7,
    /// Nested execution exceeded the maximum depth.
    CallStackOverflow = 8,
    /// The contract code failed compilation or verification.
    ContractInvalid = 9,
    /// A trap, panic, timeout or other non-recoverable failure.
    ExecutionFailed = 10,
}

impl ReturnCode {
    /// The message conventionally paired with the code when no more specific
    /// message was recorded.
    pub fn message(&self) -> &'static str {
        match self {
            ReturnCode::Ok => "",
            ReturnCode::FunctionNotFound => "function not found",
            ReturnCode::FunctionWrongSignature => "wrong signature for function",
            ReturnCode::ContractNotFound => "contract not found",
            ReturnCode::UserError => "user error",
            ReturnCode::OutOfGas => "out of gas",
            ReturnCode::AccountCollision => "account collision",
            ReturnCode::OutOfFunds => "out of funds",
            ReturnCode::CallStackOverflow => "stack overflow",
            ReturnCode::ContractInvalid => "contract invalid",
            ReturnCode::ExecutionFailed => "execution failed",
        }
    }
}

/// The effect a storage write had on its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageStatus {
    /// The write left the stored value unchanged.
    Unchanged,
    /// The key existed and its value was replaced.
    Modified,
    /// The key did not exist before.
    Added,
    /// The key existed and was removed.
    Deleted,
}

/// One storage mutation, keyed by its storage key.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StorageUpdate {
    /// The storage key.
    pub key: Vec<u8>,
    /// The value observed before the call.
    pub old_value: Vec<u8>,
    /// The value after the call.
    pub new_value: Vec<u8>,
    /// Whether the entry was actually written (as opposed to read-tracked).
    pub written: bool,
}

/// An outgoing transfer recorded on an output account.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutputTransfer {
    /// The account the transfer originates from.
    pub sender: Address,
    /// Amount transferred.
    pub value: BigUint,
    /// Payload data attached to the transfer.
    pub data: Vec<u8>,
    /// Gas forwarded with the transfer.
    pub gas_limit: u64,
    /// Gas locked for the callback, when the transfer is asynchronous.
    pub gas_locked: u64,
    /// How the receiving side will interpret the transfer.
    pub call_type: CallType,
}

/// The accumulated effects of a call on one account.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutputAccount {
    /// The account address.
    pub address: Address,
    /// Net signed balance change produced by the call.
    pub balance_delta: BigInt,
    /// The balance observed when the account entered the output, if read.
    pub balance: Option<BigUint>,
    /// Non-negative nonce increment.
    pub nonce_delta: u64,
    /// Storage mutations keyed by storage key.
    pub storage_updates: BTreeMap<Vec<u8>, StorageUpdate>,
    /// Ordered outgoing transfers.
    pub output_transfers: Vec<OutputTransfer>,
    /// Deployed or upgraded code, when this call changed it.
    pub code: Option<Vec<u8>>,
    /// Code metadata accompanying a deploy or upgrade.
    pub code_metadata: Option<Vec<u8>>,
    /// The account that deployed the code.
    pub code_deployer: Option<Address>,
}

impl OutputAccount {
    /// An empty output entry for the given address.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            ..Self::default()
        }
    }

    /// Records a storage mutation, replacing any previous update of the key.
    pub fn set_storage_update(&mut self, update: StorageUpdate) {
        self.storage_updates.insert(update.key.clone(), update);
    }
}

/// One log entry produced during execution.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogEntry {
    /// The event identifier.
    pub identifier: Vec<u8>,
    /// The account the event is attributed to.
    pub address: Address,
    /// Ordered topics.
    pub topics: Vec<Vec<u8>>,
    /// Unindexed payload.
    pub data: Vec<u8>,
}

/// The structured receipt of one top-level execution.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VMOutput {
    /// Wire-level result.
    pub return_code: ReturnCode,
    /// Human-readable message accompanying a failure, or empty.
    pub return_message: String,
    /// Ordered return data produced by `finish`.
    pub return_data: Vec<Vec<u8>>,
    /// Gas left unconsumed by the call.
    pub gas_remaining: u64,
    /// Gas refunded by storage releases.
    pub gas_refund: u64,
    /// Per-account effects, keyed by address for deterministic enumeration.
    pub output_accounts: BTreeMap<Address, OutputAccount>,
    /// Ordered log entries.
    pub logs: Vec<LogEntry>,
}

impl VMOutput {
    /// A receipt describing a failure with no effects.
    pub fn from_failure(return_code: ReturnCode, message: &str) -> Self {
        VMOutput {
            return_code,
            return_message: message.to_string(),
            ..VMOutput::default()
        }
    }

    /// Returns the output account for `address`, creating it when absent.
    pub fn account_mut(&mut self, address: Address) -> &mut OutputAccount {
        self.output_accounts
            .entry(address)
            .or_insert_with(|| OutputAccount::new(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn return_code_integers_are_stable() {
        assert_eq!(ReturnCode::Ok as u8, 0);
        assert_eq!(ReturnCode::OutOfGas as u8, 5);
        assert_eq!(ReturnCode::ExecutionFailed as u8, 10);
    }

    #[test]
    fn account_mut_creates_once() {
        let mut output = VMOutput::default();
        let addr = Address::from_tag("acct");
        output.account_mut(addr).nonce_delta = 1;
        output.account_mut(addr).balance_delta = BigInt::from(-5);
        assert_eq!(output.output_accounts.len(), 1);
        let acct = &output.output_accounts[&addr];
        assert_eq!(acct.nonce_delta, 1);
        assert_eq!(acct.balance_delta, BigInt::from(-5));
    }
}
