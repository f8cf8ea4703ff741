// Path: crates/host/src/contexts/storage.rs
//! The storage context: read-through/write-through account storage with
//! dirty tracking and protected-key enforcement.
//!
//! Dirty state lives on the output accounts, resolved through every open
//! frame so a nested execution observes its caller's pending writes. What
//! this context adds is policy: who may write where, what each access
//! costs, and how reads fall through to the blockchain hook.

use crucible_api::blockchain::BlockchainHook;
use crucible_types::address::Address;
use crucible_types::error::HostError;
use crucible_types::output::{StorageStatus, StorageUpdate};

use super::metering::MeteringContext;
use super::output::OutputContext;

/// Per-call storage policy and the address currently under modification.
#[derive(Debug, Clone)]
pub struct StorageContext {
    protected_prefix: Vec<u8>,
    current_address: Address,
    state_stack: Vec<Address>,
}

impl StorageContext {
    /// A storage context with the host's immutable protected prefix.
    pub fn new(protected_prefix: Vec<u8>) -> Self {
        Self {
            protected_prefix,
            current_address: Address::ZERO,
            state_stack: Vec::new(),
        }
    }

    /// Resets per-call state.
    pub fn init_state(&mut self) {
        self.current_address = Address::ZERO;
        self.state_stack.clear();
    }

    /// Snapshots the current address for a nested execution.
    pub fn push_state(&mut self) {
        self.state_stack.push(self.current_address);
    }

    /// Restores the parent's address, committing nothing here — dirty state
    /// lives on the output accounts.
    pub fn pop_set_active(&mut self) {
        if let Some(address) = self.state_stack.pop() {
            self.current_address = address;
        }
    }

    /// Restores the parent's address after a failed nested execution.
    pub fn pop_discard(&mut self) {
        self.pop_set_active();
    }

    /// Drops every stacked entry.
    pub fn clear_state_stack(&mut self) {
        self.state_stack.clear();
    }

    /// Current state-stack depth.
    pub fn stack_depth(&self) -> usize {
        self.state_stack.len()
    }

    /// Sets the account whose storage subsequent operations address.
    pub fn set_address(&mut self, address: Address) {
        self.current_address = address;
    }

    /// The account whose storage is being addressed.
    pub fn address(&self) -> Address {
        self.current_address
    }

    /// True when `key` lies in the protected region of the key space.
    pub fn is_protected_key(&self, key: &[u8]) -> bool {
        !self.protected_prefix.is_empty() && key.starts_with(&self.protected_prefix)
    }

    /// Reads a storage value of the current account: dirty frames first,
    /// then the blockchain hook. Charges the base load cost plus data copy.
    pub fn get_storage(
        &self,
        key: &[u8],
        output: &OutputContext,
        hook: &dyn BlockchainHook,
        metering: &mut MeteringContext,
        cost_optimized: bool,
    ) -> Result<Vec<u8>, HostError> {
        metering.use_gas_traced(metering.gas_config().host_api.storage_load, "storageLoad")?;
        let value = self.peek_storage(key, &self.current_address, output, hook)?;
        if !cost_optimized {
            metering.use_gas_for_data_copy(value.len() as u64)?;
        }
        Ok(value)
    }

    /// Reads a storage value of an arbitrary account (`storageLoadFromAddress`).
    pub fn get_storage_from_address(
        &self,
        address: &Address,
        key: &[u8],
        output: &OutputContext,
        hook: &dyn BlockchainHook,
        metering: &mut MeteringContext,
    ) -> Result<Vec<u8>, HostError> {
        metering.use_gas_traced(
            metering.gas_config().host_api.storage_load,
            "storageLoadFromAddress",
        )?;
        let value = self.peek_storage(key, address, output, hook)?;
        metering.use_gas_for_data_copy(value.len() as u64)?;
        Ok(value)
    }

    fn peek_storage(
        &self,
        key: &[u8],
        address: &Address,
        output: &OutputContext,
        hook: &dyn BlockchainHook,
    ) -> Result<Vec<u8>, HostError> {
        if let Some(value) = output.pending_storage_value(address, key) {
            return Ok(value);
        }
        hook.get_storage_data(address, key)
    }

    /// Writes a storage value of the current account, returning what the
    /// write amounted to. Cost depends on the outcome; deletions refund.
    #[allow(clippy::too_many_arguments)]
    pub fn set_storage(
        &self,
        key: &[u8],
        value: &[u8],
        output: &mut OutputContext,
        hook: &dyn BlockchainHook,
        metering: &mut MeteringContext,
        read_only: bool,
        is_builtin_caller: bool,
        cost_optimized: bool,
    ) -> Result<StorageStatus, HostError> {
        if read_only {
            return Err(HostError::StoreReadOnly);
        }
        if self.is_protected_key(key) && !is_builtin_caller {
            return Err(HostError::StoreReservedKey);
        }

        metering.use_gas_traced(
            metering.gas_config().host_api.storage_store,
            "storageStore",
        )?;

        let address = self.current_address;
        let old_value = self.peek_storage(key, &address, output, hook)?;
        // The recorded pre-image stays pinned to the first write of the key
        // in this frame.
        let original = match output
            .account(&address)
            .and_then(|account| account.storage_updates.get(key))
        {
            Some(update) => update.old_value.clone(),
            None => old_value.clone(),
        };

        let base_ops = metering.gas_config().base_ops.clone();
        let status = if value == old_value.as_slice() {
            // Unchanged writes are cheap and, under the cost-optimization
            // policy, leave the dirty set untouched.
            metering.use_gas_for_data_copy(value.len() as u64)?;
            if !cost_optimized {
                self.record_write(output, &address, key, original, value);
            }
            StorageStatus::Unchanged
        } else if old_value.is_empty() {
            metering.use_gas(base_ops.store_per_byte.saturating_mul(value.len() as u64))?;
            self.record_write(output, &address, key, original, value);
            StorageStatus::Added
        } else if value.is_empty() {
            metering.free_gas(base_ops.release_per_byte.saturating_mul(old_value.len() as u64));
            self.record_write(output, &address, key, original, value);
            StorageStatus::Deleted
        } else {
            metering.use_gas(base_ops.store_per_byte.saturating_mul(value.len() as u64))?;
            self.record_write(output, &address, key, original, value);
            StorageStatus::Modified
        };

        Ok(status)
    }

    /// Writes into the protected region on the host's own behalf (async
    /// context persistence). Not reachable from contract code.
    pub fn set_protected_storage(
        &self,
        key: &[u8],
        value: &[u8],
        output: &mut OutputContext,
        hook: &dyn BlockchainHook,
    ) -> Result<(), HostError> {
        let address = self.current_address;
        let original = match output
            .account(&address)
            .and_then(|account| account.storage_updates.get(key))
        {
            Some(update) => update.old_value.clone(),
            None => hook.get_storage_data(&address, key)?,
        };
        self.record_write(output, &address, key, original, value);
        Ok(())
    }

    fn record_write(
        &self,
        output: &mut OutputContext,
        address: &Address,
        key: &[u8],
        original: Vec<u8>,
        value: &[u8],
    ) {
        output.account_mut(*address).set_storage_update(StorageUpdate {
            key: key.to_vec(),
            old_value: original,
            new_value: value.to_vec(),
            written: true,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_api::test_utils::{MockAccount, MockWorld};
    use crucible_types::gas::{GasCostConfig, GasSchedule};
    use std::sync::Arc;

    fn setup() -> (StorageContext, OutputContext, MockWorld, MeteringContext) {
        let address = Address::from_tag("contract");
        let world = MockWorld::new();
        world.put_account(
            MockAccount::with_code(address, b"code".to_vec()).storing(b"existing", b"value"),
        );
        let mut storage = StorageContext::new(b"PROTECTED".to_vec());
        storage.set_address(address);
        let config = GasCostConfig::from_schedule(&GasSchedule::default()).unwrap();
        let mut metering = MeteringContext::new(Arc::new(config), u64::MAX);
        metering.set_up_for_call(1_000_000, 0, false).unwrap();
        (storage, OutputContext::new(), world, metering)
    }

    #[test]
    fn set_storage_classifies_outcomes() {
        let (storage, mut output, world, mut metering) = setup();
        let mut set = |key: &[u8], value: &[u8], output: &mut OutputContext| {
            storage
                .set_storage(key, value, output, &world, &mut metering, false, false, false)
                .unwrap()
        };

        assert_eq!(set(b"new", b"v", &mut output), StorageStatus::Added);
        assert_eq!(set(b"new", b"v2", &mut output), StorageStatus::Modified);
        assert_eq!(set(b"new", b"v2", &mut output), StorageStatus::Unchanged);
        assert_eq!(set(b"new", b"", &mut output), StorageStatus::Deleted);
        assert_eq!(set(b"existing", b"", &mut output), StorageStatus::Deleted);
    }

    #[test]
    fn deletion_accrues_refund() {
        let (storage, mut output, world, mut metering) = setup();
        storage
            .set_storage(b"existing", b"", &mut output, &world, &mut metering, false, false, false)
            .unwrap();
        assert!(metering.gas_refund() > 0);
    }

    #[test]
    fn protected_key_rejected_for_contract_code() {
        let (storage, mut output, world, mut metering) = setup();
        let result = storage.set_storage(
            b"PROTECTEDkey",
            b"v",
            &mut output,
            &world,
            &mut metering,
            false,
            false,
            false,
        );
        assert!(matches!(result, Err(HostError::StoreReservedKey)));

        // The built-in path is allowed through.
        let result = storage.set_storage(
            b"PROTECTEDkey",
            b"v",
            &mut output,
            &world,
            &mut metering,
            false,
            true,
            false,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn read_only_execution_cannot_write() {
        let (storage, mut output, world, mut metering) = setup();
        let result = storage.set_storage(
            b"k",
            b"v",
            &mut output,
            &world,
            &mut metering,
            true,
            false,
            false,
        );
        assert!(matches!(result, Err(HostError::StoreReadOnly)));
    }

    #[test]
    fn get_storage_prefers_dirty_values() {
        let (storage, mut output, world, mut metering) = setup();
        storage
            .set_storage(b"existing", b"fresh", &mut output, &world, &mut metering, false, false, false)
            .unwrap();
        let value = storage
            .get_storage(b"existing", &output, &world, &mut metering, false)
            .unwrap();
        assert_eq!(value, b"fresh");
    }

    #[test]
    fn nested_frames_see_outer_writes() {
        let (storage, mut output, world, mut metering) = setup();
        storage
            .set_storage(b"existing", b"outer", &mut output, &world, &mut metering, false, false, false)
            .unwrap();

        output.push_state();
        let value = storage
            .get_storage(b"existing", &output, &world, &mut metering, false)
            .unwrap();
        assert_eq!(value, b"outer");

        // A discarded inner write falls back to the outer frame's value.
        storage
            .set_storage(b"existing", b"inner", &mut output, &world, &mut metering, false, false, false)
            .unwrap();
        output.pop_discard();
        let value = storage
            .get_storage(b"existing", &output, &world, &mut metering, false)
            .unwrap();
        assert_eq!(value, b"outer");
    }

    #[test]
    fn unchanged_write_skips_dirty_set_when_optimized() {
        let (storage, mut output, world, mut metering) = setup();
        let status = storage
            .set_storage(b"existing", b"value", &mut output, &world, &mut metering, false, false, true)
            .unwrap();
        assert_eq!(status, StorageStatus::Unchanged);
        assert!(output
            .account(&Address::from_tag("contract"))
            .map(|account| account.storage_updates.is_empty())
            .unwrap_or(true));
    }
}
