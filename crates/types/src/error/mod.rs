// Path: crates/types/src/error/mod.rs
//! Core error types for the Crucible VM host.

use crate::output::ReturnCode;
use thiserror::Error;

/// A trait for assigning a stable, machine-readable string code to an error.
pub trait ErrorCode {
    /// Returns the unique, stable string identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// Errors raised while executing a contract or operating the host.
///
/// The first "hard" error recorded during a call determines the
/// [`ReturnCode`] of the resulting `VMOutput`; later errors are kept by the
/// runtime's aggregator for the `internalVMErrors` log entry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// The host is shutting down; no new executions are accepted.
    #[error("VM is closing")]
    VMIsClosing,
    /// The worker task panicked; the instance was destroyed.
    #[error("VM execution panicked")]
    ExecutionPanicked,
    /// The supervising timeout fired before the contract finished.
    #[error("execution failed with timeout")]
    ExecutionFailedWithTimeout,
    /// A required collaborator was not provided at construction.
    #[error("missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    /// The recipient account has no contract code.
    #[error("contract not found")]
    ContractNotFound,
    /// The contract code failed compilation or verification.
    #[error("contract invalid: {0}")]
    ContractInvalid(String),
    /// The named export does not exist in the contract.
    #[error("function not found")]
    FunctionNotFound,
    /// A reserved function name was called or exported.
    #[error("invalid function name")]
    InvalidFunctionName,
    /// The export exists but its signature does not match the calling convention.
    #[error("function has wrong signature")]
    FunctionWrongSignature,
    /// The `init` entry point was invoked through the call path.
    #[error("init function cannot be called directly")]
    InitFuncCalledInRun,
    /// An upgrade was attempted with malformed upgrade arguments.
    #[error("invalid upgrade arguments")]
    InvalidUpgradeArguments,
    /// The upgrade pipeline failed past the point of code validation.
    #[error("upgrade failed")]
    UpgradeFailed,

    /// The metering context ran out of gas.
    #[error("not enough gas")]
    NotEnoughGas,
    /// The gas provided exceeds the block gas limit.
    #[error("gas provided exceeds block gas limit")]
    BlockGasLimitExceeded,
    /// A value transfer exceeded the sender's balance.
    #[error("insufficient funds")]
    OutOfFunds,
    /// Account creation collided with an existing account.
    #[error("account collision")]
    AccountCollision,
    /// Nested execution exceeded the maximum depth.
    #[error("execution call stack overflow")]
    CallStackOverflow,
    /// The contract signalled an error through the EEI.
    #[error("user error: {0}")]
    SignalError(String),
    /// A WASM trap or other non-recoverable engine failure.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// A linear-memory access fell outside the instance's memory.
    #[error("bad bounds (offset {offset}, length {length})")]
    MemoryBadBounds {
        /// Requested offset into linear memory.
        offset: u64,
        /// Requested length of the access.
        length: u64,
    },
    /// An EEI argument could not be decoded.
    #[error("argument decode failed: {0}")]
    ArgumentDecode(String),
    /// An argument index was outside the call's argument list.
    #[error("argument index out of range")]
    ArgumentOutOfRange,
    /// A managed-type handle did not resolve to a live value.
    #[error("no value under the given handle")]
    NoValueUnderHandle,
    /// Big-integer division or modulo by zero.
    #[error("division by zero")]
    DivisionByZero,
    /// A big float operation produced an unrepresentable value.
    #[error("invalid big float operation")]
    BigFloatInvalid,

    /// Contract code attempted to write a key under the protected prefix.
    #[error("cannot write to protected key")]
    StoreReservedKey,
    /// Contract code attempted to write storage in read-only execution.
    #[error("cannot write storage under read-only execution")]
    StoreReadOnly,
    /// A value stored under a key exceeded the configured size limit.
    #[error("storage value out of range")]
    StorageValueOutOfRange,

    /// The async context identifier is unknown.
    #[error("async context does not exist")]
    AsyncContextDoesNotExist,
    /// The async call identifier is unknown within its context.
    #[error("async call does not exist")]
    AsyncCallNotFound,
    /// A built-in function was invoked that the container does not know.
    #[error("built-in function not found")]
    BuiltinFunctionNotFound,
    /// A cryptographic EEI operation failed.
    #[error("crypto operation failed: {0}")]
    Crypto(String),
}

impl ErrorCode for HostError {
    fn code(&self) -> &'static str {
        match self {
            Self::VMIsClosing => "HOST_VM_IS_CLOSING",
            Self::ExecutionPanicked => "HOST_EXECUTION_PANICKED",
            Self::ExecutionFailedWithTimeout => "HOST_EXECUTION_TIMEOUT",
            Self::MissingCollaborator(_) => "HOST_MISSING_COLLABORATOR",
            Self::ContractNotFound => "HOST_CONTRACT_NOT_FOUND",
            Self::ContractInvalid(_) => "HOST_CONTRACT_INVALID",
            Self::FunctionNotFound => "HOST_FUNCTION_NOT_FOUND",
            Self::InvalidFunctionName => "HOST_INVALID_FUNCTION_NAME",
            Self::FunctionWrongSignature => "HOST_FUNCTION_WRONG_SIGNATURE",
            Self::InitFuncCalledInRun => "HOST_INIT_CALLED_IN_RUN",
            Self::InvalidUpgradeArguments => "HOST_INVALID_UPGRADE_ARGS",
            Self::UpgradeFailed => "HOST_UPGRADE_FAILED",
            Self::NotEnoughGas => "HOST_NOT_ENOUGH_GAS",
            Self::BlockGasLimitExceeded => "HOST_BLOCK_GAS_LIMIT_EXCEEDED",
            Self::OutOfFunds => "HOST_OUT_OF_FUNDS",
            Self::AccountCollision => "HOST_ACCOUNT_COLLISION",
            Self::CallStackOverflow => "HOST_CALL_STACK_OVERFLOW",
            Self::SignalError(_) => "HOST_SIGNAL_ERROR",
            Self::ExecutionFailed(_) => "HOST_EXECUTION_FAILED",
            Self::MemoryBadBounds { .. } => "HOST_MEMORY_BAD_BOUNDS",
            Self::ArgumentDecode(_) => "HOST_ARGUMENT_DECODE",
            Self::ArgumentOutOfRange => "HOST_ARGUMENT_OUT_OF_RANGE",
            Self::NoValueUnderHandle => "HOST_NO_VALUE_UNDER_HANDLE",
            Self::DivisionByZero => "HOST_DIVISION_BY_ZERO",
            Self::BigFloatInvalid => "HOST_BIG_FLOAT_INVALID",
            Self::StoreReservedKey => "HOST_STORE_RESERVED_KEY",
            Self::StoreReadOnly => "HOST_STORE_READ_ONLY",
            Self::StorageValueOutOfRange => "HOST_STORAGE_VALUE_OUT_OF_RANGE",
            Self::AsyncContextDoesNotExist => "HOST_ASYNC_CONTEXT_UNKNOWN",
            Self::AsyncCallNotFound => "HOST_ASYNC_CALL_UNKNOWN",
            Self::BuiltinFunctionNotFound => "HOST_BUILTIN_NOT_FOUND",
            Self::Crypto(_) => "HOST_CRYPTO_ERROR",
        }
    }
}

impl HostError {
    /// Maps the error onto the wire-level return code.
    ///
    /// `fix_oog_return_code` selects the out-of-gas policy: when the epoch
    /// flag is enabled OOG surfaces as `OutOfGas`, otherwise as the legacy
    /// `ExecutionFailed`.
    pub fn return_code(&self, fix_oog_return_code: bool) -> ReturnCode {
        match self {
            Self::SignalError(_)
            | Self::InvalidFunctionName
            | Self::InitFuncCalledInRun
            | Self::StoreReservedKey
            | Self::StoreReadOnly
            | Self::ArgumentDecode(_)
            | Self::ArgumentOutOfRange
            | Self::NoValueUnderHandle
            | Self::DivisionByZero
            | Self::BigFloatInvalid => ReturnCode::UserError,
            Self::NotEnoughGas | Self::BlockGasLimitExceeded => {
                if fix_oog_return_code {
                    ReturnCode::OutOfGas
                } else {
                    ReturnCode::ExecutionFailed
                }
            }
            Self::FunctionNotFound | Self::BuiltinFunctionNotFound => ReturnCode::FunctionNotFound,
            Self::FunctionWrongSignature => ReturnCode::FunctionWrongSignature,
            Self::ContractNotFound => ReturnCode::ContractNotFound,
            Self::ContractInvalid(_) => ReturnCode::ContractInvalid,
            Self::OutOfFunds => ReturnCode::OutOfFunds,
            Self::AccountCollision => ReturnCode::AccountCollision,
            Self::CallStackOverflow => ReturnCode::CallStackOverflow,
            _ => ReturnCode::ExecutionFailed,
        }
    }
}

/// Errors produced by the WASM engine binding.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Module compilation failed.
    #[error("compilation failed: {0}")]
    Compile(String),
    /// A cached module could not be deserialized.
    #[error("module deserialization failed: {0}")]
    Deserialize(String),
    /// A compiled module could not be serialized for caching.
    #[error("module serialization failed: {0}")]
    Serialize(String),
    /// Instantiation of a compiled module failed.
    #[error("instantiation failed: {0}")]
    Instantiate(String),
    /// The module declares an import the EEI does not export.
    #[error("unknown import: {0}")]
    UnknownImport(String),
    /// The requested export does not exist on the instance.
    #[error("export not found: {0}")]
    ExportNotFound(String),
    /// The instance has no exported linear memory.
    #[error("instance exports no memory")]
    NoMemory,
    /// A linear-memory access was out of bounds.
    #[error("memory access out of bounds")]
    MemoryOutOfBounds,
    /// The engine trapped while running an exported function.
    #[error("execution trapped: {0}")]
    Trap(String),
}

impl ErrorCode for EngineError {
    fn code(&self) -> &'static str {
        match self {
            Self::Compile(_) => "ENGINE_COMPILE_FAILED",
            Self::Deserialize(_) => "ENGINE_DESERIALIZE_FAILED",
            Self::Serialize(_) => "ENGINE_SERIALIZE_FAILED",
            Self::Instantiate(_) => "ENGINE_INSTANTIATE_FAILED",
            Self::UnknownImport(_) => "ENGINE_UNKNOWN_IMPORT",
            Self::ExportNotFound(_) => "ENGINE_EXPORT_NOT_FOUND",
            Self::NoMemory => "ENGINE_NO_MEMORY",
            Self::MemoryOutOfBounds => "ENGINE_MEMORY_OUT_OF_BOUNDS",
            Self::Trap(_) => "ENGINE_TRAP",
        }
    }
}

/// Errors raised while compiling a gas schedule into cost tables.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GasScheduleError {
    /// A required category is missing from the schedule map.
    #[error("gas schedule is missing category {0}")]
    MissingCategory(&'static str),
    /// A named cost is missing from its category.
    #[error("gas schedule is missing cost {category}.{name}")]
    MissingCost {
        /// The category the cost was expected in.
        category: &'static str,
        /// The missing cost name.
        name: &'static str,
    },
    /// A cost value is outside its valid range.
    #[error("gas schedule cost {0} has an invalid value")]
    InvalidValue(String),
}

impl ErrorCode for GasScheduleError {
    fn code(&self) -> &'static str {
        match self {
            Self::MissingCategory(_) => "GAS_SCHEDULE_MISSING_CATEGORY",
            Self::MissingCost { .. } => "GAS_SCHEDULE_MISSING_COST",
            Self::InvalidValue(_) => "GAS_SCHEDULE_INVALID_VALUE",
        }
    }
}

/// Errors from cryptographic hook operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The signature failed cryptographic verification.
    #[error("signature verification failed")]
    VerificationFailed,
    /// The provided key material is malformed for the algorithm.
    #[error("invalid cryptographic key")]
    InvalidKey,
    /// The provided signature material is malformed for the algorithm.
    #[error("invalid signature format")]
    InvalidSignature,
    /// A point is not on the requested curve.
    #[error("point not on curve")]
    PointNotOnCurve,
    /// The operation is not supported by this crypto hook.
    #[error("unsupported crypto operation: {0}")]
    Unsupported(&'static str),
    /// A generic failure in an underlying cryptographic library.
    #[error("crypto operation failed: {0}")]
    OperationFailed(String),
}

impl ErrorCode for CryptoError {
    fn code(&self) -> &'static str {
        match self {
            Self::VerificationFailed => "CRYPTO_VERIFICATION_FAILED",
            Self::InvalidKey => "CRYPTO_INVALID_KEY",
            Self::InvalidSignature => "CRYPTO_INVALID_SIGNATURE",
            Self::PointNotOnCurve => "CRYPTO_POINT_NOT_ON_CURVE",
            Self::Unsupported(_) => "CRYPTO_UNSUPPORTED",
            Self::OperationFailed(_) => "CRYPTO_OPERATION_FAILED",
        }
    }
}

impl From<CryptoError> for HostError {
    fn from(e: CryptoError) -> Self {
        HostError::Crypto(e.to_string())
    }
}

impl From<EngineError> for HostError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Compile(m) | EngineError::Deserialize(m) => HostError::ContractInvalid(m),
            EngineError::UnknownImport(m) => HostError::ContractInvalid(m),
            EngineError::ExportNotFound(_) => HostError::FunctionNotFound,
            EngineError::MemoryOutOfBounds => HostError::MemoryBadBounds { offset: 0, length: 0 },
            other => HostError::ExecutionFailed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oog_return_code_follows_epoch_flag() {
        assert_eq!(HostError::NotEnoughGas.return_code(true), ReturnCode::OutOfGas);
        assert_eq!(
            HostError::NotEnoughGas.return_code(false),
            ReturnCode::ExecutionFailed
        );
    }

    #[test]
    fn user_errors_map_to_user_error() {
        let err = HostError::SignalError("boom".into());
        assert_eq!(err.return_code(true), ReturnCode::UserError);
        assert_eq!(err.code(), "HOST_SIGNAL_ERROR");
    }
}
