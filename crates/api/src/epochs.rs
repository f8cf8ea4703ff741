// Path: crates/api/src/epochs.rs
//! Feature-activation epoch queries and notifications.

use std::sync::Arc;

/// Queries for the feature flags that change host semantics.
///
/// Each flag activates at a chain epoch; implementations answer for the
/// epoch of the block currently being processed.
pub trait EnableEpochsHandler: Send + Sync {
    /// Out-of-gas surfaces as `OutOfGas` instead of legacy `ExecutionFailed`.
    fn fix_oog_return_code(&self) -> bool;
    /// The managed elliptic-curve crypto API is available.
    fn managed_crypto_api(&self) -> bool;
    /// Cheaper unchanged storage reads that skip dirty tracking.
    fn storage_api_cost_optimization(&self) -> bool;
    /// Refactored nested-context semantics.
    fn refactor_context(&self) -> bool;
    /// Execution on behalf of the caller is disabled.
    fn disable_exec_by_caller(&self) -> bool;
    /// The read-only flag is enforced across `executeReadOnly`.
    fn check_execute_on_read_only(&self) -> bool;
    /// Multi-token transfer fix applied on async callbacks.
    fn multi_transfer_fix_on_callback(&self) -> bool;
    /// NFT creation through exec-by-caller is allowed.
    fn create_nft_through_exec_by_caller(&self) -> bool;
    /// Storage updates whose final value equals the original are elided.
    fn remove_non_updated_storage(&self) -> bool;
    /// Every EEI argument error fails execution instead of only signalling.
    fn fail_execution_on_every_api_error(&self) -> bool;
}

/// A subscriber interested in epoch changes.
pub trait EpochSubscriber: Send + Sync {
    /// Called once whenever a new epoch is confirmed.
    fn epoch_confirmed(&self, epoch: u32, timestamp: u64);
}

/// Delivers epoch-confirmation events to registered subscribers.
pub trait EpochNotifier: Send + Sync {
    /// Registers a subscriber for future epoch confirmations.
    fn register_handler(&self, subscriber: Arc<dyn EpochSubscriber>);
}
