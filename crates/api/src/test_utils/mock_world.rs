// Path: crates/api/src/test_utils/mock_world.rs
//! An in-memory blockchain hook for tests.

use num_bigint::BigUint;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

use crucible_types::address::Address;
use crucible_types::error::HostError;
use crucible_types::input::ContractCallInput;
use crucible_types::output::VMOutput;

use crate::blockchain::{AccountInfo, BlockchainHook, BlockInfo};

/// One account held by the mock world.
#[derive(Debug, Clone, Default)]
pub struct MockAccount {
    /// The account address.
    pub address: Address,
    /// Current nonce.
    pub nonce: u64,
    /// Current native balance.
    pub balance: BigUint,
    /// Contract code, empty for plain accounts.
    pub code: Vec<u8>,
    /// Code metadata bytes.
    pub code_metadata: Vec<u8>,
    /// The deploying account.
    pub owner: Address,
    /// Storage entries.
    pub storage: BTreeMap<Vec<u8>, Vec<u8>>,
    /// The shard this account lives in.
    pub shard: u32,
}

impl MockAccount {
    /// A plain account with a balance.
    pub fn with_balance(address: Address, balance: u64) -> Self {
        Self {
            address,
            balance: BigUint::from(balance),
            ..Self::default()
        }
    }

    /// A contract account with code.
    pub fn with_code(address: Address, code: Vec<u8>) -> Self {
        Self {
            address,
            code,
            ..Self::default()
        }
    }

    /// Sets a storage entry, builder-style.
    pub fn storing(mut self, key: &[u8], value: &[u8]) -> Self {
        self.storage.insert(key.to_vec(), value.to_vec());
        self
    }

    /// Places the account in a shard, builder-style.
    pub fn in_shard(mut self, shard: u32) -> Self {
        self.shard = shard;
        self
    }
}

/// An in-memory world state implementing [`BlockchainHook`].
#[derive(Default)]
pub struct MockWorld {
    accounts: RwLock<BTreeMap<Address, MockAccount>>,
    current_block: RwLock<BlockInfo>,
    last_block: RwLock<BlockInfo>,
    compiled_codes: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
    builtin_outputs: RwLock<HashMap<String, VMOutput>>,
}

impl MockWorld {
    /// An empty world.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an account.
    pub fn put_account(&self, account: MockAccount) {
        self.accounts.write().insert(account.address, account);
    }

    /// Reads a copy of an account, if present.
    pub fn account(&self, address: &Address) -> Option<MockAccount> {
        self.accounts.read().get(address).cloned()
    }

    /// Sets the block info returned for the current block.
    pub fn set_current_block(&self, info: BlockInfo) {
        *self.current_block.write() = info;
    }

    /// Sets the block info returned for the last committed block.
    pub fn set_last_block(&self, info: BlockInfo) {
        *self.last_block.write() = info;
    }

    /// Registers a canned output for a built-in function name.
    pub fn put_builtin_output(&self, function: &str, output: VMOutput) {
        self.builtin_outputs
            .write()
            .insert(function.to_string(), output);
    }

    /// Number of compiled-code entries currently saved.
    pub fn compiled_code_count(&self) -> usize {
        self.compiled_codes.read().len()
    }
}

impl BlockchainHook for MockWorld {
    fn get_account(&self, address: &Address) -> Result<Option<AccountInfo>, HostError> {
        let accounts = self.accounts.read();
        Ok(accounts.get(address).map(|acct| AccountInfo {
            address: acct.address,
            nonce: acct.nonce,
            balance: acct.balance.clone(),
            code: acct.code.clone(),
            code_metadata: acct.code_metadata.clone(),
            code_hash: if acct.code.is_empty() {
                Vec::new()
            } else {
                Sha256::digest(&acct.code).to_vec()
            },
            developer_reward: BigUint::default(),
            owner_address: acct.owner,
        }))
    }

    fn get_storage_data(&self, address: &Address, key: &[u8]) -> Result<Vec<u8>, HostError> {
        let accounts = self.accounts.read();
        Ok(accounts
            .get(address)
            .and_then(|acct| acct.storage.get(key).cloned())
            .unwrap_or_default())
    }

    fn shard_of_address(&self, address: &Address) -> u32 {
        self.accounts
            .read()
            .get(address)
            .map(|acct| acct.shard)
            .unwrap_or(0)
    }

    fn is_smart_contract(&self, address: &Address) -> bool {
        self.accounts
            .read()
            .get(address)
            .map(|acct| !acct.code.is_empty())
            .unwrap_or(false)
    }

    fn is_payable(&self, _address: &Address) -> Result<bool, HostError> {
        Ok(true)
    }

    fn current_block(&self) -> BlockInfo {
        self.current_block.read().clone()
    }

    fn last_block(&self) -> BlockInfo {
        self.last_block.read().clone()
    }

    fn block_hash(&self, nonce: u64) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(b"block");
        hasher.update(nonce.to_be_bytes());
        hasher.finalize().to_vec()
    }

    fn new_address(
        &self,
        creator: &Address,
        creator_nonce: u64,
        vm_type: &[u8; 2],
    ) -> Result<Address, HostError> {
        let mut hasher = Sha256::new();
        hasher.update(creator.as_bytes());
        hasher.update(creator_nonce.to_be_bytes());
        hasher.update(vm_type);
        let digest: [u8; 32] = hasher.finalize().into();
        Ok(Address(digest))
    }

    fn get_compiled_code(&self, code_hash: &[u8]) -> Option<Vec<u8>> {
        self.compiled_codes.read().get(code_hash).cloned()
    }

    fn save_compiled_code(&self, code_hash: &[u8], compiled: &[u8]) {
        self.compiled_codes
            .write()
            .insert(code_hash.to_vec(), compiled.to_vec());
    }

    fn clear_compiled_codes(&self) {
        self.compiled_codes.write().clear();
    }

    fn process_built_in_function(
        &self,
        input: &ContractCallInput,
    ) -> Result<VMOutput, HostError> {
        self.builtin_outputs
            .read()
            .get(&input.function)
            .cloned()
            .ok_or(HostError::BuiltinFunctionNotFound)
    }
}
