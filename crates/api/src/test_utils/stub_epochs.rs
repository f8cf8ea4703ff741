// Path: crates/api/src/test_utils/stub_epochs.rs
//! Stub epoch handlers for tests.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::epochs::{EnableEpochsHandler, EpochNotifier, EpochSubscriber};

/// An [`EnableEpochsHandler`] whose flags are plain fields.
#[derive(Debug, Clone, Default)]
pub struct StubEnableEpochs {
    /// `fix_oog_return_code` answer.
    pub fix_oog_return_code: bool,
    /// `managed_crypto_api` answer.
    pub managed_crypto_api: bool,
    /// `storage_api_cost_optimization` answer.
    pub storage_api_cost_optimization: bool,
    /// `refactor_context` answer.
    pub refactor_context: bool,
    /// `disable_exec_by_caller` answer.
    pub disable_exec_by_caller: bool,
    /// `check_execute_on_read_only` answer.
    pub check_execute_on_read_only: bool,
    /// `multi_transfer_fix_on_callback` answer.
    pub multi_transfer_fix_on_callback: bool,
    /// `create_nft_through_exec_by_caller` answer.
    pub create_nft_through_exec_by_caller: bool,
    /// `remove_non_updated_storage` answer.
    pub remove_non_updated_storage: bool,
    /// `fail_execution_on_every_api_error` answer.
    pub fail_execution_on_every_api_error: bool,
}

impl StubEnableEpochs {
    /// A stub with every flag enabled, matching current-protocol behavior.
    pub fn all_enabled() -> Self {
        Self {
            fix_oog_return_code: true,
            managed_crypto_api: true,
            storage_api_cost_optimization: true,
            refactor_context: true,
            disable_exec_by_caller: true,
            check_execute_on_read_only: true,
            multi_transfer_fix_on_callback: true,
            create_nft_through_exec_by_caller: true,
            remove_non_updated_storage: true,
            fail_execution_on_every_api_error: true,
        }
    }
}

impl EnableEpochsHandler for StubEnableEpochs {
    fn fix_oog_return_code(&self) -> bool {
        self.fix_oog_return_code
    }
    fn managed_crypto_api(&self) -> bool {
        self.managed_crypto_api
    }
    fn storage_api_cost_optimization(&self) -> bool {
        self.storage_api_cost_optimization
    }
    fn refactor_context(&self) -> bool {
        self.refactor_context
    }
    fn disable_exec_by_caller(&self) -> bool {
        self.disable_exec_by_caller
    }
    fn check_execute_on_read_only(&self) -> bool {
        self.check_execute_on_read_only
    }
    fn multi_transfer_fix_on_callback(&self) -> bool {
        self.multi_transfer_fix_on_callback
    }
    fn create_nft_through_exec_by_caller(&self) -> bool {
        self.create_nft_through_exec_by_caller
    }
    fn remove_non_updated_storage(&self) -> bool {
        self.remove_non_updated_storage
    }
    fn fail_execution_on_every_api_error(&self) -> bool {
        self.fail_execution_on_every_api_error
    }
}

/// An [`EpochNotifier`] that records subscribers and lets tests fire epochs.
#[derive(Default)]
pub struct StubEpochNotifier {
    subscribers: RwLock<Vec<Arc<dyn EpochSubscriber>>>,
}

impl StubEpochNotifier {
    /// An empty notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers an epoch confirmation to every registered subscriber.
    pub fn confirm_epoch(&self, epoch: u32, timestamp: u64) {
        for subscriber in self.subscribers.read().iter() {
            subscriber.epoch_confirmed(epoch, timestamp);
        }
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl EpochNotifier for StubEpochNotifier {
    fn register_handler(&self, subscriber: Arc<dyn EpochSubscriber>) {
        self.subscribers.write().push(subscriber);
    }
}
