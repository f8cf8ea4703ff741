// Path: crates/types/src/config/mod.rs
//! Host construction parameters and feature-activation epochs.

use serde::{Deserialize, Serialize};

/// The minimum execution timeout; shorter configured values are clamped up.
pub const MIN_EXECUTION_TIMEOUT_MS: u64 = 1000;

/// The default bound on live warm instances.
pub const DEFAULT_MAX_WARM_INSTANCES: usize = 10;

fn default_timeout_ms() -> u64 {
    MIN_EXECUTION_TIMEOUT_MS
}
fn default_max_warm_instances() -> usize {
    DEFAULT_MAX_WARM_INSTANCES
}
fn default_block_gas_limit() -> u64 {
    1_500_000_000
}
fn default_max_memory_pages() -> u32 {
    1024
}

/// Parameters fixed at host construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// 2-byte tag mixed into generated contract addresses.
    pub vm_type: [u8; 2],
    /// Upper bound on any single call's `gas_provided`.
    #[serde(default = "default_block_gas_limit")]
    pub block_gas_limit: u64,
    /// Byte prefix reserving a region of the storage key space for built-in
    /// functions. Immutable for the host's lifetime.
    pub protected_key_prefix: Vec<u8>,
    /// Supervision timeout for a single execution, in milliseconds.
    /// Clamped to at least [`MIN_EXECUTION_TIMEOUT_MS`].
    #[serde(default = "default_timeout_ms")]
    pub execution_timeout_ms: u64,
    /// Bound on live instances kept in the warm cache.
    #[serde(default = "default_max_warm_instances")]
    pub max_warm_instances: usize,
    /// Maximum linear-memory pages a contract may declare.
    #[serde(default = "default_max_memory_pages")]
    pub max_memory_pages: u32,
    /// Whether the engine should skip installing its SIGSEGV trap handler.
    #[serde(default)]
    pub sigsegv_passthrough: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            vm_type: [5, 0],
            block_gas_limit: default_block_gas_limit(),
            protected_key_prefix: b"CRUCIBLE".to_vec(),
            execution_timeout_ms: default_timeout_ms(),
            max_warm_instances: default_max_warm_instances(),
            max_memory_pages: default_max_memory_pages(),
            sigsegv_passthrough: false,
        }
    }
}

impl HostConfig {
    /// The effective execution timeout after clamping.
    pub fn execution_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.execution_timeout_ms.max(MIN_EXECUTION_TIMEOUT_MS))
    }
}

/// Activation epochs of the feature flags that change host semantics.
///
/// A flag is active once the current chain epoch reaches its activation
/// epoch. Crossing any of these epochs invalidates the warm instance cache
/// and compiled-code caches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnableEpochs {
    /// Out-of-gas surfaces as `OutOfGas` instead of legacy `ExecutionFailed`.
    #[serde(default)]
    pub fix_oog_return_code_epoch: u32,
    /// The managed elliptic-curve crypto API becomes available.
    #[serde(default)]
    pub managed_crypto_api_epoch: u32,
    /// Cheaper unchanged storage reads that skip dirty tracking.
    #[serde(default)]
    pub storage_api_cost_optimization_epoch: u32,
    /// Refactored nested-context semantics.
    #[serde(default)]
    pub refactor_context_epoch: u32,
    /// Disables execution on behalf of the caller.
    #[serde(default)]
    pub disable_exec_by_caller_epoch: u32,
    /// Enforces the read-only flag across `executeReadOnly`.
    #[serde(default)]
    pub check_execute_on_read_only_epoch: u32,
    /// Multi-token transfer fix applied on async callbacks.
    #[serde(default)]
    pub multi_transfer_fix_on_callback_epoch: u32,
    /// Allows NFT creation through exec-by-caller.
    #[serde(default)]
    pub create_nft_through_exec_by_caller_epoch: u32,
    /// Elides storage updates whose final value equals the original.
    #[serde(default)]
    pub remove_non_updated_storage_epoch: u32,
    /// Every EEI argument error fails execution instead of only signalling.
    #[serde(default)]
    pub fail_execution_on_every_api_error_epoch: u32,
}

impl EnableEpochs {
    /// All activation epochs, for registering cache purges.
    pub fn activation_epochs(&self) -> Vec<u32> {
        vec![
            self.fix_oog_return_code_epoch,
            self.managed_crypto_api_epoch,
            self.storage_api_cost_optimization_epoch,
            self.refactor_context_epoch,
            self.disable_exec_by_caller_epoch,
            self.check_execute_on_read_only_epoch,
            self.multi_transfer_fix_on_callback_epoch,
            self.create_nft_through_exec_by_caller_epoch,
            self.remove_non_updated_storage_epoch,
            self.fail_execution_on_every_api_error_epoch,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_clamped_to_minimum() {
        let cfg = HostConfig {
            execution_timeout_ms: 10,
            ..HostConfig::default()
        };
        assert_eq!(cfg.execution_timeout().as_millis(), 1000);
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let cfg: HostConfig =
            serde_json::from_str(r#"{"vm_type": [5, 0], "protected_key_prefix": [69]}"#).unwrap();
        assert_eq!(cfg.max_warm_instances, DEFAULT_MAX_WARM_INSTANCES);
        assert_eq!(cfg.block_gas_limit, default_block_gas_limit());
    }
}
