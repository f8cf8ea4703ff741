// Path: crates/types/src/lib.rs
#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! # Crucible Types
//!
//! This crate is the foundational library for the Crucible VM host, containing
//! all core data structures, error types, and configuration objects.
//!
//! ## Architectural Role
//!
//! As the base crate, `crucible-types` has minimal dependencies and is itself
//! a dependency for every other crate in the workspace. This structure
//! prevents circular dependencies and provides a stable, canonical definition
//! for shared types like `Address`, `VMOutput`, `GasSchedule`, and the error
//! enums.

/// The maximum number of nested contract executions within a single call.
pub const MAX_EXECUTION_DEPTH: usize = 10;

/// The function invoked when a contract is deployed.
pub const INIT_FUNCTION_NAME: &str = "init";
/// The function invoked when an asynchronous callback returns to the caller.
pub const CALLBACK_FUNCTION_NAME: &str = "callBack";
/// The function name that routes a call through the upgrade pipeline.
pub const UPGRADE_FUNCTION_NAME: &str = "upgradeContract";
/// The single reserved name that is not an EEI export.
pub const CLAIM_DEVELOPER_REWARDS: &str = "claimDeveloperRewards";
/// Identifier of the synthetic log entry carrying aggregated runtime errors.
pub const INTERNAL_VM_ERRORS_LOG_ID: &str = "internalVMErrors";

/// A top-level, crate-wide `Result` type alias with a default error type.
pub type Result<T, E = crate::error::HostError> = std::result::Result<T, E>;

/// Contract addresses and related helpers.
pub mod address;
/// Persisted records of in-flight asynchronous sub-calls.
pub mod async_call;
/// The breakpoint flag polled by the WASM engine.
pub mod breakpoint;
/// The canonical, deterministic binary codec for persisted host state.
pub mod codec;
/// Host construction parameters and feature-activation epochs.
pub mod config;
/// A unified set of all error types used across the workspace.
pub mod error;
/// The gas schedule and its compiled cost tables.
pub mod gas;
/// Contract call and create inputs.
pub mod input;
/// The structured receipt of an execution: `VMOutput` and its parts.
pub mod output;
