// Path: crates/types/src/input.rs
//! Contract call and create inputs.

use num_bigint::BigUint;

use crate::address::Address;

/// How a contract invocation was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CallType {
    /// A direct, top-level invocation.
    #[default]
    Direct = 0,
    /// An asynchronous call dispatched by the protocol.
    Async = 1,
    /// The callback half of an asynchronous call.
    AsyncCallback = 2,
    /// A synchronous sub-call executed under the callee's context.
    ExecOnDestCtx = 3,
    /// A synchronous sub-call executed under the caller's context.
    ExecOnSameCtx = 4,
    /// Dispatch into a built-in function rather than bytecode.
    BuiltIn = 5,
}

/// A single token transfer accompanying a call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TokenTransfer {
    /// Token identifier bytes.
    pub token_identifier: Vec<u8>,
    /// Token nonce; zero for fungible tokens.
    pub token_nonce: u64,
    /// Amount transferred.
    pub value: BigUint,
}

/// Fields shared by call and create inputs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VMInput {
    /// The account that initiated this invocation.
    pub caller: Address,
    /// Ordered raw arguments.
    pub arguments: Vec<Vec<u8>>,
    /// Native value transferred with the call.
    pub call_value: BigUint,
    /// Token transfers accompanying the call.
    pub token_transfers: Vec<TokenTransfer>,
    /// Gas available to this invocation.
    pub gas_provided: u64,
    /// Gas reserved for an eventual async callback.
    pub gas_locked: u64,
    /// How the invocation was reached.
    pub call_type: CallType,
    /// Hash of the transaction currently executing.
    pub current_tx_hash: Vec<u8>,
    /// Hash of the transaction that originated the call chain.
    pub original_tx_hash: Vec<u8>,
    /// Hash of the previous transaction in the chain.
    pub prev_tx_hash: Vec<u8>,
    /// When set, the execution must not mutate state.
    pub read_only: bool,
}

/// Input for invoking a function on an existing contract.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContractCallInput {
    /// Shared invocation fields.
    pub vm_input: VMInput,
    /// The contract account being called.
    pub recipient: Address,
    /// The exported function to invoke.
    pub function: String,
}

/// Input for deploying a new contract.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContractCreateInput {
    /// Shared invocation fields.
    pub vm_input: VMInput,
    /// The WASM bytecode to deploy.
    pub contract_code: Vec<u8>,
    /// Code metadata bytes (upgradeable/payable flags and the like).
    pub contract_code_metadata: Vec<u8>,
}

impl ContractCallInput {
    /// Convenience constructor used pervasively in tests.
    pub fn new(caller: Address, recipient: Address, function: &str, gas_provided: u64) -> Self {
        Self {
            vm_input: VMInput {
                caller,
                gas_provided,
                ..VMInput::default()
            },
            recipient,
            function: function.to_string(),
        }
    }

    /// Sets the call value.
    pub fn with_value(mut self, value: BigUint) -> Self {
        self.vm_input.call_value = value;
        self
    }

    /// Appends an argument.
    pub fn with_argument(mut self, arg: Vec<u8>) -> Self {
        self.vm_input.arguments.push(arg);
        self
    }

    /// Sets the call type.
    pub fn with_call_type(mut self, call_type: CallType) -> Self {
        self.vm_input.call_type = call_type;
        self
    }
}

impl ContractCreateInput {
    /// Convenience constructor used pervasively in tests.
    pub fn new(caller: Address, contract_code: Vec<u8>, gas_provided: u64) -> Self {
        Self {
            vm_input: VMInput {
                caller,
                gas_provided,
                ..VMInput::default()
            },
            contract_code,
            contract_code_metadata: Vec::new(),
        }
    }
}
