// Path: crates/host/src/contexts/blockchain.rs
//! The blockchain context: the call's window onto chain state.
//!
//! A thin layer over the [`BlockchainHook`] that resolves code, balances and
//! nonces against the effects already accumulated in the output context, so
//! a call observes its own pending writes.

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::Zero;
use std::sync::Arc;

use crucible_api::blockchain::{BlockchainHook, BlockInfo};
use crucible_types::address::Address;
use crucible_types::error::HostError;

use super::output::OutputContext;

/// The call's read view of chain state.
#[derive(Clone)]
pub struct BlockchainContext {
    hook: Arc<dyn BlockchainHook>,
    vm_type: [u8; 2],
}

impl BlockchainContext {
    /// A context over the given hook.
    pub fn new(hook: Arc<dyn BlockchainHook>, vm_type: [u8; 2]) -> Self {
        Self { hook, vm_type }
    }

    /// The raw hook, for operations with no output-side overlay.
    pub fn hook(&self) -> &dyn BlockchainHook {
        self.hook.as_ref()
    }

    /// The contract code of an account, failing when the account holds none.
    pub fn get_code(&self, address: &Address) -> Result<Vec<u8>, HostError> {
        let account = self
            .hook
            .get_account(address)?
            .ok_or(HostError::ContractNotFound)?;
        if account.code.is_empty() {
            return Err(HostError::ContractNotFound);
        }
        Ok(account.code)
    }

    /// The effective balance of an account: chain balance plus the delta
    /// accumulated so far in the output.
    pub fn get_balance(
        &self,
        address: &Address,
        output: &OutputContext,
    ) -> Result<BigUint, HostError> {
        let chain_balance = self
            .hook
            .get_account(address)?
            .map(|info| info.balance)
            .unwrap_or_default();
        let effective =
            BigInt::from_biguint(Sign::Plus, chain_balance) + output.pending_delta(address);
        let (sign, magnitude) = effective.into_parts();
        if sign == Sign::Minus {
            return Ok(BigUint::zero());
        }
        Ok(magnitude)
    }

    /// The effective nonce of an account.
    pub fn get_nonce(
        &self,
        address: &Address,
        output: &OutputContext,
    ) -> Result<u64, HostError> {
        let chain_nonce = self
            .hook
            .get_account(address)?
            .map(|info| info.nonce)
            .unwrap_or_default();
        let delta = output
            .account(address)
            .map(|acct| acct.nonce_delta)
            .unwrap_or_default();
        Ok(chain_nonce + delta)
    }

    /// The owner recorded for a contract account.
    pub fn get_owner(&self, address: &Address) -> Result<Address, HostError> {
        Ok(self
            .hook
            .get_account(address)?
            .map(|info| info.owner_address)
            .unwrap_or_default())
    }

    /// Derives the address of a contract the given creator is about to
    /// deploy, using the creator's effective nonce.
    pub fn new_address(
        &self,
        creator: &Address,
        output: &OutputContext,
    ) -> Result<Address, HostError> {
        let nonce = self.get_nonce(creator, output)?;
        // The creator's nonce was consumed by the deploying transaction.
        let creation_nonce = nonce.saturating_sub(1);
        self.hook.new_address(creator, creation_nonce, &self.vm_type)
    }

    /// Shard of an address.
    pub fn shard_of_address(&self, address: &Address) -> u32 {
        self.hook.shard_of_address(address)
    }

    /// True when both addresses map to the same shard.
    pub fn in_same_shard(&self, left: &Address, right: &Address) -> bool {
        self.shard_of_address(left) == self.shard_of_address(right)
    }

    /// True when the address denotes a deployed contract.
    pub fn is_smart_contract(&self, address: &Address) -> bool {
        self.hook.is_smart_contract(address)
    }

    /// The block currently being built.
    pub fn current_block(&self) -> BlockInfo {
        self.hook.current_block()
    }

    /// The last committed block.
    pub fn last_block(&self) -> BlockInfo {
        self.hook.last_block()
    }

    /// The hash of a block by nonce.
    pub fn block_hash(&self, nonce: u64) -> Vec<u8> {
        self.hook.block_hash(nonce)
    }

    /// The epoch of the block being built.
    pub fn current_epoch(&self) -> u32 {
        self.hook.current_block().epoch
    }
}
