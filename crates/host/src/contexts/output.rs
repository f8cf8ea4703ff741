// Path: crates/host/src/contexts/output.rs
//! The output context: the accumulating `VMOutput` of the current call.
//!
//! Nested executions run against a fresh frame pushed on the state stack; a
//! successful child is merged back into the parent (`pop_merge_active`), a
//! failed child is dropped wholesale (`pop_discard`), which is what makes
//! sub-calls transactional.

use num_bigint::{BigInt, BigUint, Sign};

use crucible_api::blockchain::BlockchainHook;
use crucible_types::address::Address;
use crucible_types::error::HostError;
use crucible_types::input::CallType;
use crucible_types::output::{
    LogEntry, OutputAccount, OutputTransfer, ReturnCode, StorageUpdate, VMOutput,
};

#[derive(Debug, Clone, Default)]
struct OutputFrame {
    accounts: std::collections::BTreeMap<Address, OutputAccount>,
    logs: Vec<LogEntry>,
    return_data: Vec<Vec<u8>>,
    return_code: ReturnCode,
    return_message: String,
}

/// The accumulating output of the current call.
#[derive(Debug, Default)]
pub struct OutputContext {
    frame: OutputFrame,
    state_stack: Vec<OutputFrame>,
}

impl OutputContext {
    /// An empty output context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets per-call state.
    pub fn init_state(&mut self) {
        self.frame = OutputFrame::default();
        self.state_stack.clear();
    }

    /// Opens a fresh frame for a nested execution.
    pub fn push_state(&mut self) {
        self.state_stack.push(std::mem::take(&mut self.frame));
    }

    /// Merges the finished child frame into its parent: balance deltas add,
    /// storage updates and transfers accumulate, logs and return data append.
    pub fn pop_merge_active(&mut self) {
        let child = std::mem::take(&mut self.frame);
        let mut parent = self.state_stack.pop().unwrap_or_default();

        for (address, child_account) in child.accounts {
            let parent_account = parent
                .accounts
                .entry(address)
                .or_insert_with(|| OutputAccount::new(address));
            parent_account.balance_delta += &child_account.balance_delta;
            parent_account.nonce_delta += child_account.nonce_delta;
            if parent_account.balance.is_none() {
                parent_account.balance = child_account.balance;
            }
            for (key, update) in child_account.storage_updates {
                match parent_account.storage_updates.get_mut(&key) {
                    // The parent saw the key first; its old_value stays.
                    Some(existing) => {
                        existing.new_value = update.new_value;
                        existing.written |= update.written;
                    }
                    None => {
                        parent_account.storage_updates.insert(key, update);
                    }
                }
            }
            parent_account
                .output_transfers
                .extend(child_account.output_transfers);
            if child_account.code.is_some() {
                parent_account.code = child_account.code;
                parent_account.code_metadata = child_account.code_metadata;
                parent_account.code_deployer = child_account.code_deployer;
            }
        }

        parent.logs.extend(child.logs);
        parent.return_data.extend(child.return_data);
        self.frame = parent;
    }

    /// Drops the child frame and restores the parent untouched.
    pub fn pop_discard(&mut self) {
        if let Some(parent) = self.state_stack.pop() {
            self.frame = parent;
        }
    }

    /// Drops every stacked frame.
    pub fn clear_state_stack(&mut self) {
        self.state_stack.clear();
    }

    /// Current state-stack depth.
    pub fn stack_depth(&self) -> usize {
        self.state_stack.len()
    }

    /// The output entry for `address`, created on first touch.
    pub fn account_mut(&mut self, address: Address) -> &mut OutputAccount {
        self.frame
            .accounts
            .entry(address)
            .or_insert_with(|| OutputAccount::new(address))
    }

    /// Read access to an output entry.
    pub fn account(&self, address: &Address) -> Option<&OutputAccount> {
        self.frame.accounts.get(address)
    }

    /// The net balance delta an address has accumulated across every open
    /// frame. A nested execution sees value credited to it by its caller.
    pub fn pending_delta(&self, address: &Address) -> BigInt {
        let mut delta = BigInt::default();
        for frame in &self.state_stack {
            if let Some(account) = frame.accounts.get(address) {
                delta += &account.balance_delta;
            }
        }
        if let Some(account) = self.frame.accounts.get(address) {
            delta += &account.balance_delta;
        }
        delta
    }

    /// The most recent dirty value written for `(address, key)` in any open
    /// frame, innermost first. `None` means no frame has written the key and
    /// the read falls through to the chain.
    pub fn pending_storage_value(&self, address: &Address, key: &[u8]) -> Option<Vec<u8>> {
        if let Some(update) = self
            .frame
            .accounts
            .get(address)
            .and_then(|account| account.storage_updates.get(key))
        {
            if update.written {
                return Some(update.new_value.clone());
            }
        }
        for frame in self.state_stack.iter().rev() {
            if let Some(update) = frame
                .accounts
                .get(address)
                .and_then(|account| account.storage_updates.get(key))
            {
                if update.written {
                    return Some(update.new_value.clone());
                }
            }
        }
        None
    }

    /// Moves `value` from `sender` to `receiver`, checking the sender's
    /// funds against its chain balance plus the deltas of every open frame.
    pub fn transfer_value(
        &mut self,
        sender: Address,
        receiver: Address,
        value: &BigUint,
        hook: &dyn BlockchainHook,
    ) -> Result<(), HostError> {
        if value == &BigUint::default() {
            // Zero transfers are no-ops; accounts enter the output only
            // once something observable happens to them.
            return Ok(());
        }

        let chain_balance = hook
            .get_account(&sender)?
            .map(|info| info.balance)
            .unwrap_or_default();
        let available = BigInt::from_biguint(Sign::Plus, chain_balance.clone())
            + self.pending_delta(&sender);
        if available < BigInt::from_biguint(Sign::Plus, value.clone()) {
            return Err(HostError::OutOfFunds);
        }

        let sender_account = self.account_mut(sender);
        if sender_account.balance.is_none() {
            sender_account.balance = Some(chain_balance);
        }
        sender_account.balance_delta -= BigInt::from_biguint(Sign::Plus, value.clone());
        let receiver_account = self.account_mut(receiver);
        receiver_account.balance_delta += BigInt::from_biguint(Sign::Plus, value.clone());
        Ok(())
    }

    /// Transfers value and records the outgoing [`OutputTransfer`] on the
    /// receiver, the way cross-shard and async transfers are materialized.
    #[allow(clippy::too_many_arguments)]
    pub fn transfer(
        &mut self,
        receiver: Address,
        sender: Address,
        gas_limit: u64,
        gas_locked: u64,
        value: &BigUint,
        data: &[u8],
        call_type: CallType,
        hook: &dyn BlockchainHook,
    ) -> Result<(), HostError> {
        self.transfer_value(sender, receiver, value, hook)?;
        self.account_mut(receiver)
            .output_transfers
            .push(OutputTransfer {
                sender,
                value: value.clone(),
                data: data.to_vec(),
                gas_limit,
                gas_locked,
                call_type,
            });
        Ok(())
    }

    /// Appends a log entry.
    pub fn write_log(
        &mut self,
        address: Address,
        identifier: &[u8],
        topics: Vec<Vec<u8>>,
        data: &[u8],
    ) {
        self.frame.logs.push(LogEntry {
            identifier: identifier.to_vec(),
            address,
            topics,
            data: data.to_vec(),
        });
    }

    /// Appends a value to the return data.
    pub fn finish(&mut self, data: Vec<u8>) {
        self.frame.return_data.push(data);
    }

    /// The return data accumulated so far.
    pub fn return_data(&self) -> &[Vec<u8>] {
        &self.frame.return_data
    }

    /// Sets the return code.
    pub fn set_return_code(&mut self, code: ReturnCode) {
        self.frame.return_code = code;
    }

    /// The current return code.
    pub fn return_code(&self) -> ReturnCode {
        self.frame.return_code
    }

    /// Sets the return message.
    pub fn set_return_message(&mut self, message: &str) {
        self.frame.return_message = message.to_string();
    }

    /// Records a deployment on the contract's output account.
    pub fn deploy_code(
        &mut self,
        address: Address,
        code: Vec<u8>,
        code_metadata: Vec<u8>,
        deployer: Address,
    ) {
        let account = self.account_mut(address);
        account.code = Some(code);
        account.code_metadata = Some(code_metadata);
        account.code_deployer = Some(deployer);
    }

    /// Records the outcome of a failed execution: effects are dropped, the
    /// return code and message are set, and nothing else survives.
    pub fn set_from_failure(&mut self, code: ReturnCode, message: &str) {
        self.frame = OutputFrame {
            return_code: code,
            return_message: message.to_string(),
            ..OutputFrame::default()
        };
    }

    /// Folds an externally produced output fragment (a built-in function's
    /// result) into the current frame.
    pub fn merge_vm_output(&mut self, fragment: &VMOutput) {
        for (address, account) in &fragment.output_accounts {
            let target = self.account_mut(*address);
            target.balance_delta += &account.balance_delta;
            target.nonce_delta += account.nonce_delta;
            for (key, update) in &account.storage_updates {
                target.storage_updates.insert(key.clone(), update.clone());
            }
            target
                .output_transfers
                .extend(account.output_transfers.iter().cloned());
            if account.code.is_some() {
                target.code = account.code.clone();
                target.code_metadata = account.code_metadata.clone();
                target.code_deployer = account.code_deployer;
            }
        }
        self.frame.logs.extend(fragment.logs.iter().cloned());
        self.frame
            .return_data
            .extend(fragment.return_data.iter().cloned());
    }

    /// Materializes the frame into a [`VMOutput`].
    ///
    /// When `remove_non_updated_storage` is set, updates whose final value
    /// equals the original pre-call value are elided; otherwise they are
    /// emitted as unwritten no-ops.
    pub fn get_vm_output(
        &self,
        gas_remaining: u64,
        gas_refund: u64,
        remove_non_updated_storage: bool,
    ) -> VMOutput {
        let mut output = VMOutput {
            return_code: self.frame.return_code,
            return_message: self.frame.return_message.clone(),
            return_data: self.frame.return_data.clone(),
            gas_remaining,
            gas_refund,
            logs: self.frame.logs.clone(),
            ..VMOutput::default()
        };

        for (address, account) in &self.frame.accounts {
            let mut out_account = account.clone();
            out_account.storage_updates = account
                .storage_updates
                .iter()
                .filter(|(_, update)| {
                    if remove_non_updated_storage {
                        update.written && update.new_value != update.old_value
                    } else {
                        update.written
                    }
                })
                .map(|(key, update)| (key.clone(), update.clone()))
                .collect();
            output.output_accounts.insert(*address, out_account);
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_api::test_utils::{MockAccount, MockWorld};

    fn world_with_balance(address: Address, balance: u64) -> MockWorld {
        let world = MockWorld::new();
        world.put_account(MockAccount::with_balance(address, balance));
        world
    }

    #[test]
    fn transfer_value_moves_delta() {
        let sender = Address::from_tag("sender");
        let receiver = Address::from_tag("receiver");
        let world = world_with_balance(sender, 1000);
        let mut output = OutputContext::new();

        output
            .transfer_value(sender, receiver, &BigUint::from(42u32), &world)
            .unwrap();

        assert_eq!(
            output.account(&sender).unwrap().balance_delta,
            BigInt::from(-42)
        );
        assert_eq!(
            output.account(&receiver).unwrap().balance_delta,
            BigInt::from(42)
        );
    }

    #[test]
    fn transfer_value_rejects_overdraft() {
        let sender = Address::from_tag("sender");
        let receiver = Address::from_tag("receiver");
        let world = world_with_balance(sender, 10);
        let mut output = OutputContext::new();

        let result = output.transfer_value(sender, receiver, &BigUint::from(42u32), &world);
        assert!(matches!(result, Err(HostError::OutOfFunds)));
    }

    #[test]
    fn pop_merge_accumulates_child_effects() {
        let addr = Address::from_tag("acct");
        let mut output = OutputContext::new();
        output.finish(b"parent".to_vec());
        output.account_mut(addr).balance_delta = BigInt::from(-5);

        output.push_state();
        output.finish(b"child".to_vec());
        output.account_mut(addr).balance_delta = BigInt::from(2);
        output.pop_merge_active();

        assert_eq!(output.return_data(), &[b"parent".to_vec(), b"child".to_vec()]);
        assert_eq!(output.account(&addr).unwrap().balance_delta, BigInt::from(-3));
    }

    #[test]
    fn pop_discard_drops_child_effects() {
        let mut output = OutputContext::new();
        output.finish(b"parent".to_vec());

        output.push_state();
        output.finish(b"child".to_vec());
        output.set_return_code(ReturnCode::UserError);
        output.pop_discard();

        assert_eq!(output.return_data(), &[b"parent".to_vec()]);
        assert_eq!(output.return_code(), ReturnCode::Ok);
    }

    #[test]
    fn non_updated_storage_is_elided_when_flag_set() {
        let addr = Address::from_tag("acct");
        let mut output = OutputContext::new();
        output.account_mut(addr).set_storage_update(StorageUpdate {
            key: b"k1".to_vec(),
            old_value: b"same".to_vec(),
            new_value: b"same".to_vec(),
            written: true,
        });
        output.account_mut(addr).set_storage_update(StorageUpdate {
            key: b"k2".to_vec(),
            old_value: b"old".to_vec(),
            new_value: b"new".to_vec(),
            written: true,
        });

        let trimmed = output.get_vm_output(0, 0, true);
        assert_eq!(trimmed.output_accounts[&addr].storage_updates.len(), 1);

        let full = output.get_vm_output(0, 0, false);
        assert_eq!(full.output_accounts[&addr].storage_updates.len(), 2);
    }
}
