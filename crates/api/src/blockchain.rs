// Path: crates/api/src/blockchain.rs
//! The blockchain hook: account state, block info and compiled-code caches.

use num_bigint::BigUint;

use crucible_types::address::Address;
use crucible_types::error::HostError;
use crucible_types::input::ContractCallInput;
use crucible_types::output::VMOutput;

/// A snapshot of one account as seen by the hook.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountInfo {
    /// The account address.
    pub address: Address,
    /// Current nonce.
    pub nonce: u64,
    /// Current native balance.
    pub balance: BigUint,
    /// Contract code; empty for non-contract accounts.
    pub code: Vec<u8>,
    /// Code metadata bytes.
    pub code_metadata: Vec<u8>,
    /// Hash of the contract code; empty for non-contract accounts.
    pub code_hash: Vec<u8>,
    /// Accumulated developer reward.
    pub developer_reward: BigUint,
    /// The account that deployed the code, when known.
    pub owner_address: Address,
}

/// Header-level information about one block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockInfo {
    /// Block nonce (height).
    pub nonce: u64,
    /// Consensus round.
    pub round: u64,
    /// Unix timestamp of the block.
    pub timestamp: u64,
    /// Chain epoch the block belongs to.
    pub epoch: u32,
    /// The block's random seed.
    pub random_seed: Vec<u8>,
}

/// The interface through which the host observes chain state.
///
/// Implementations are provided by the surrounding protocol; the host never
/// mutates chain state directly — all effects travel through the `VMOutput`.
pub trait BlockchainHook: Send + Sync {
    /// Fetches an account snapshot, or `None` when the account does not exist.
    fn get_account(&self, address: &Address) -> Result<Option<AccountInfo>, HostError>;

    /// Reads one storage value of an account. Missing keys read as empty.
    fn get_storage_data(&self, address: &Address, key: &[u8]) -> Result<Vec<u8>, HostError>;

    /// Maps an address onto its shard.
    fn shard_of_address(&self, address: &Address) -> u32;

    /// True when the address denotes a deployed contract.
    fn is_smart_contract(&self, address: &Address) -> bool;

    /// True when the address could be the result of address generation but
    /// carries no account yet.
    fn is_payable(&self, address: &Address) -> Result<bool, HostError>;

    /// Information about the block currently being built.
    fn current_block(&self) -> BlockInfo;

    /// Information about the last committed block.
    fn last_block(&self) -> BlockInfo;

    /// The hash of the block with the given nonce, or empty when unknown.
    fn block_hash(&self, nonce: u64) -> Vec<u8>;

    /// Derives the address for a new contract deployed by `creator`.
    fn new_address(
        &self,
        creator: &Address,
        creator_nonce: u64,
        vm_type: &[u8; 2],
    ) -> Result<Address, HostError>;

    /// Looks up previously saved compiled code by code hash.
    fn get_compiled_code(&self, code_hash: &[u8]) -> Option<Vec<u8>>;

    /// Persists compiled code under its code hash.
    fn save_compiled_code(&self, code_hash: &[u8], compiled: &[u8]);

    /// Drops every saved compiled-code entry.
    fn clear_compiled_codes(&self);

    /// Executes a built-in function and returns its output fragment.
    fn process_built_in_function(
        &self,
        input: &ContractCallInput,
    ) -> Result<VMOutput, HostError>;
}
