// Path: crates/types/src/gas.rs
//! The gas schedule and its compiled cost tables.
//!
//! A [`GasSchedule`] is the raw, named map handed to the host at construction
//! or on a gas-schedule change. It is compiled once into a [`GasCostConfig`]:
//! a flat opcode-cost vector for the engine, plus named cost tables consulted
//! at every EEI boundary. Compiling up front keeps the per-call hot path free
//! of string lookups.

use parity_scale_codec::Encode;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::error::GasScheduleError;

/// Category name for byte-granular storage and compilation costs.
pub const BASE_OPERATION_COST: &str = "BaseOperationCost";
/// Category name for per-EEI-function costs.
pub const HOST_API_COST: &str = "HostAPICost";
/// Category name for big-integer API costs.
pub const BIG_INT_API_COST: &str = "BigIntAPICost";
/// Category name for big-float API costs.
pub const BIG_FLOAT_API_COST: &str = "BigFloatAPICost";
/// Category name for managed-buffer API costs.
pub const MANAGED_BUFFER_API_COST: &str = "ManagedBufferAPICost";
/// Category name for cryptographic API costs.
pub const CRYPTO_API_COST: &str = "CryptoAPICost";
/// Category name for per-opcode WASM costs.
pub const WASM_OPCODE_COST: &str = "WASMOpcodeCost";

/// The raw gas schedule: category → named cost → value.
///
/// `BTreeMap` keeps iteration deterministic, which makes the schedule hash
/// stable across hosts.
pub type GasScheduleMap = BTreeMap<String, BTreeMap<String, u64>>;

/// A raw gas schedule plus its identity hash.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GasSchedule {
    map: GasScheduleMap,
}

impl GasSchedule {
    /// Wraps a raw schedule map.
    pub fn new(map: GasScheduleMap) -> Self {
        Self { map }
    }

    /// Returns the named cost, if present.
    pub fn get(&self, category: &str, name: &str) -> Option<u64> {
        self.map.get(category)?.get(name).copied()
    }

    /// Returns the named cost or the provided default.
    pub fn get_or(&self, category: &str, name: &str, default: u64) -> u64 {
        self.get(category, name).unwrap_or(default)
    }

    /// Inserts or replaces a named cost. Used by tests and schedule tooling.
    pub fn set(&mut self, category: &str, name: &str, value: u64) {
        self.map
            .entry(category.to_string())
            .or_default()
            .insert(name.to_string(), value);
    }

    /// A deterministic identity for this schedule, used in the warm-instance
    /// cache key so instances compiled under different schedules never mix.
    pub fn schedule_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        for (category, costs) in &self.map {
            hasher.update(category.as_bytes());
            for (name, value) in costs {
                hasher.update(name.as_bytes());
                hasher.update(value.encode());
            }
        }
        hasher.finalize().into()
    }

    /// Access to the underlying map.
    pub fn as_map(&self) -> &GasScheduleMap {
        &self.map
    }
}

/// Byte-granular storage and compilation costs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseOperationCost {
    /// Cost per byte written to storage.
    pub store_per_byte: u64,
    /// Refund per byte released by deleting a storage entry.
    pub release_per_byte: u64,
    /// Cost per byte copied between the host and linear memory.
    pub data_copy_per_byte: u64,
    /// Cost per byte persisted into the output.
    pub persist_per_byte: u64,
    /// Cost per byte of code compiled cold.
    pub compile_per_byte: u64,
    /// Cost per byte of code instantiated from the warm cache.
    pub aot_prepare_per_byte: u64,
}

/// Per-EEI-function base costs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostApiCost {
    /// Flat cost charged by introspection functions (caller, addresses, value).
    pub get_context: u64,
    /// Cost of fetching one call argument.
    pub get_argument: u64,
    /// Cost of appending a finish value.
    pub finish: u64,
    /// Cost of `signalError`.
    pub signal_error: u64,
    /// Base cost of writing a log entry.
    pub log: u64,
    /// Cost of reading block info (nonce, timestamp, round, epoch, seed).
    pub get_block_info: u64,
    /// Base cost of a storage read.
    pub storage_load: u64,
    /// Base cost of a storage write.
    pub storage_store: u64,
    /// Cost of an in-shard value transfer.
    pub transfer_value: u64,
    /// Base cost of deploying a contract.
    pub create_contract: u64,
    /// Base cost of `executeOnSameContext` / `executeOnDestContext`.
    pub execute_on_context: u64,
    /// Gas consumed by each asynchronous call step.
    pub async_call_step: u64,
    /// Minimum gas locked for an async callback invocation.
    pub async_callback_gas_lock: u64,
    /// Cost of registering an async call in the async context tree.
    pub create_async_call: u64,
}

/// Big-integer API costs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BigIntApiCost {
    /// Cost of allocating a new big integer.
    pub new: u64,
    /// Flat cost of an arithmetic operation.
    pub arith: u64,
    /// Additional cost per operand byte for arithmetic.
    pub arith_per_byte: u64,
    /// Cost of a comparison.
    pub cmp: u64,
    /// Cost of materializing the bytes of a big integer.
    pub get_bytes: u64,
    /// Cost of setting a big integer from bytes.
    pub set_bytes: u64,
    /// Cost of finishing a big integer into return data.
    pub finish: u64,
}

/// Big-float API costs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BigFloatApiCost {
    /// Cost of allocating a new big float.
    pub new: u64,
    /// Cost of an arithmetic operation.
    pub arith: u64,
    /// Cost of a square root.
    pub sqrt: u64,
    /// Cost of a comparison.
    pub cmp: u64,
}

/// Managed-buffer API costs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedBufferApiCost {
    /// Cost of allocating a new buffer.
    pub new: u64,
    /// Cost per byte copied into or out of a buffer.
    pub per_byte: u64,
    /// Flat cost of reading buffer bytes.
    pub get_bytes: u64,
    /// Flat cost of overwriting buffer bytes.
    pub set_bytes: u64,
    /// Flat cost of appending to a buffer.
    pub append: u64,
    /// Cost of finishing a buffer into return data.
    pub finish: u64,
}

/// Cryptographic API costs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoApiCost {
    /// Cost of a SHA-256 digest.
    pub sha256: u64,
    /// Cost of a Keccak-256 digest.
    pub keccak256: u64,
    /// Cost of a RIPEMD-160 digest.
    pub ripemd160: u64,
    /// Cost of a BLS signature verification.
    pub verify_bls: u64,
    /// Cost of an Ed25519 signature verification.
    pub verify_ed25519: u64,
    /// Cost of a secp256k1 signature verification.
    pub verify_secp256k1: u64,
    /// Cost of an elliptic-curve point addition.
    pub ec_add: u64,
    /// Cost of an elliptic-curve point doubling.
    pub ec_double: u64,
    /// Cost of an elliptic-curve scalar multiplication.
    pub ec_mult: u64,
    /// Cost of marshalling a curve point.
    pub ec_marshal: u64,
    /// Cost of unmarshalling a curve point.
    pub ec_unmarshal: u64,
}

/// The flat per-opcode cost vector handed to the engine.
#[derive(Clone, PartialEq, Eq)]
pub struct OpcodeCosts(
    /// Cost per opcode, indexed by opcode byte.
    pub Box<[u64; 256]>,
);

impl OpcodeCosts {
    /// A vector with every opcode at the given uniform cost.
    pub fn uniform(cost: u64) -> Self {
        OpcodeCosts(Box::new([cost; 256]))
    }
}

impl std::fmt::Debug for OpcodeCosts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OpcodeCosts([..; 256])")
    }
}

/// All compiled cost tables, derived from one [`GasSchedule`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GasCostConfig {
    /// Byte-granular storage and compilation costs.
    pub base_ops: BaseOperationCost,
    /// Per-EEI-function base costs.
    pub host_api: HostApiCost,
    /// Big-integer API costs.
    pub big_int_api: BigIntApiCost,
    /// Big-float API costs.
    pub big_float_api: BigFloatApiCost,
    /// Managed-buffer API costs.
    pub buffer_api: ManagedBufferApiCost,
    /// Cryptographic API costs.
    pub crypto_api: CryptoApiCost,
    /// The flat per-opcode cost vector.
    pub opcodes: OpcodeCosts,
    /// Identity of the schedule this config was compiled from.
    pub schedule_hash: [u8; 32],
}

impl GasCostConfig {
    /// Compiles a raw schedule into cost tables.
    ///
    /// Missing entries fall back to defaults; a zero compile cost is rejected
    /// because it would make code deployment free.
    pub fn from_schedule(schedule: &GasSchedule) -> Result<Self, GasScheduleError> {
        let base_ops = BaseOperationCost {
            store_per_byte: schedule.get_or(BASE_OPERATION_COST, "StorePerByte", 50),
            release_per_byte: schedule.get_or(BASE_OPERATION_COST, "ReleasePerByte", 25),
            data_copy_per_byte: schedule.get_or(BASE_OPERATION_COST, "DataCopyPerByte", 1),
            persist_per_byte: schedule.get_or(BASE_OPERATION_COST, "PersistPerByte", 10),
            compile_per_byte: schedule.get_or(BASE_OPERATION_COST, "CompilePerByte", 1),
            aot_prepare_per_byte: schedule.get_or(BASE_OPERATION_COST, "AoTPreparePerByte", 1),
        };
        if base_ops.compile_per_byte == 0 {
            return Err(GasScheduleError::InvalidValue(
                "BaseOperationCost.CompilePerByte".to_string(),
            ));
        }

        let host_api = HostApiCost {
            get_context: schedule.get_or(HOST_API_COST, "GetContext", 10),
            get_argument: schedule.get_or(HOST_API_COST, "GetArgument", 10),
            finish: schedule.get_or(HOST_API_COST, "Finish", 10),
            signal_error: schedule.get_or(HOST_API_COST, "SignalError", 10),
            log: schedule.get_or(HOST_API_COST, "Log", 50),
            get_block_info: schedule.get_or(HOST_API_COST, "GetBlockInfo", 10),
            storage_load: schedule.get_or(HOST_API_COST, "StorageLoad", 50),
            storage_store: schedule.get_or(HOST_API_COST, "StorageStore", 75),
            transfer_value: schedule.get_or(HOST_API_COST, "TransferValue", 50),
            create_contract: schedule.get_or(HOST_API_COST, "CreateContract", 100),
            execute_on_context: schedule.get_or(HOST_API_COST, "ExecuteOnContext", 39),
            async_call_step: schedule.get_or(HOST_API_COST, "AsyncCallStep", 100),
            async_callback_gas_lock: schedule.get_or(HOST_API_COST, "AsyncCallbackGasLock", 4000),
            create_async_call: schedule.get_or(HOST_API_COST, "CreateAsyncCall", 100),
        };

        let big_int_api = BigIntApiCost {
            new: schedule.get_or(BIG_INT_API_COST, "BigIntNew", 10),
            arith: schedule.get_or(BIG_INT_API_COST, "BigIntArith", 10),
            arith_per_byte: schedule.get_or(BIG_INT_API_COST, "BigIntArithPerByte", 1),
            cmp: schedule.get_or(BIG_INT_API_COST, "BigIntCmp", 10),
            get_bytes: schedule.get_or(BIG_INT_API_COST, "BigIntGetBytes", 10),
            set_bytes: schedule.get_or(BIG_INT_API_COST, "BigIntSetBytes", 10),
            finish: schedule.get_or(BIG_INT_API_COST, "BigIntFinish", 10),
        };

        let big_float_api = BigFloatApiCost {
            new: schedule.get_or(BIG_FLOAT_API_COST, "BigFloatNew", 10),
            arith: schedule.get_or(BIG_FLOAT_API_COST, "BigFloatArith", 20),
            sqrt: schedule.get_or(BIG_FLOAT_API_COST, "BigFloatSqrt", 50),
            cmp: schedule.get_or(BIG_FLOAT_API_COST, "BigFloatCmp", 10),
        };

        let buffer_api = ManagedBufferApiCost {
            new: schedule.get_or(MANAGED_BUFFER_API_COST, "MBufferNew", 10),
            per_byte: schedule.get_or(MANAGED_BUFFER_API_COST, "MBufferPerByte", 1),
            get_bytes: schedule.get_or(MANAGED_BUFFER_API_COST, "MBufferGetBytes", 10),
            set_bytes: schedule.get_or(MANAGED_BUFFER_API_COST, "MBufferSetBytes", 10),
            append: schedule.get_or(MANAGED_BUFFER_API_COST, "MBufferAppend", 10),
            finish: schedule.get_or(MANAGED_BUFFER_API_COST, "MBufferFinish", 10),
        };

        let crypto_api = CryptoApiCost {
            sha256: schedule.get_or(CRYPTO_API_COST, "SHA256", 100),
            keccak256: schedule.get_or(CRYPTO_API_COST, "Keccak256", 100),
            ripemd160: schedule.get_or(CRYPTO_API_COST, "Ripemd160", 100),
            verify_bls: schedule.get_or(CRYPTO_API_COST, "VerifyBLS", 5000),
            verify_ed25519: schedule.get_or(CRYPTO_API_COST, "VerifyEd25519", 2000),
            verify_secp256k1: schedule.get_or(CRYPTO_API_COST, "VerifySecp256k1", 2000),
            ec_add: schedule.get_or(CRYPTO_API_COST, "AddECC", 500),
            ec_double: schedule.get_or(CRYPTO_API_COST, "DoubleECC", 500),
            ec_mult: schedule.get_or(CRYPTO_API_COST, "ScalarMultECC", 1000),
            ec_marshal: schedule.get_or(CRYPTO_API_COST, "MarshalECC", 100),
            ec_unmarshal: schedule.get_or(CRYPTO_API_COST, "UnmarshalECC", 100),
        };

        let mut opcodes = OpcodeCosts::uniform(1);
        if let Some(table) = schedule.as_map().get(WASM_OPCODE_COST) {
            for (name, value) in table {
                if let Ok(index) = name.parse::<usize>() {
                    if index < 256 {
                        opcodes.0[index] = *value;
                    }
                }
            }
        }

        Ok(Self {
            base_ops,
            host_api,
            big_int_api,
            big_float_api,
            buffer_api,
            crypto_api,
            opcodes,
            schedule_hash: schedule.schedule_hash(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_entries() {
        let schedule = GasSchedule::default();
        let config = GasCostConfig::from_schedule(&schedule).unwrap();
        assert_eq!(config.base_ops.compile_per_byte, 1);
        assert_eq!(config.host_api.async_callback_gas_lock, 4000);
    }

    #[test]
    fn zero_compile_cost_is_rejected() {
        let mut schedule = GasSchedule::default();
        schedule.set(BASE_OPERATION_COST, "CompilePerByte", 0);
        assert!(matches!(
            GasCostConfig::from_schedule(&schedule),
            Err(GasScheduleError::InvalidValue(_))
        ));
    }

    #[test]
    fn schedule_hash_tracks_contents() {
        let mut a = GasSchedule::default();
        let b = GasSchedule::default();
        assert_eq!(a.schedule_hash(), b.schedule_hash());
        a.set(HOST_API_COST, "Finish", 11);
        assert_ne!(a.schedule_hash(), b.schedule_hash());
    }

    #[test]
    fn opcode_vector_reads_indexed_entries() {
        let mut schedule = GasSchedule::default();
        schedule.set(WASM_OPCODE_COST, "32", 7);
        let config = GasCostConfig::from_schedule(&schedule).unwrap();
        assert_eq!(config.opcodes.0[32], 7);
        assert_eq!(config.opcodes.0[33], 1);
    }
}
