// Path: crates/host/src/eei/mod.rs
//! The environment interface exposed to contracts.
//!
//! Every import a contract may declare is routed through [`Eei::dispatch`].
//! Handlers follow one envelope: charge gas before any side effect, decode
//! and validate arguments, perform the effect through the contexts, and
//! surface errors through the breakpoint policy in
//! [`CallHost::on_eei_error`]. A non-`None` breakpoint after a handler —
//! error or not — aborts the instance via an engine trap.

use crucible_api::engine::{EeiDispatcher, MemoryView, WasmValue};
use crucible_types::breakpoint::Breakpoint;
use crucible_types::error::HostError;

use crate::host::CallHost;

mod baseops;
mod bigfloat_api;
mod bigint_api;
mod buffer_api;
mod crypto_api;
mod exec_api;
mod storage_api;

/// Every import name the EEI exports to contracts. This list seeds the
/// reserved-function set and contract verification.
pub const EEI_FUNCTION_NAMES: &[&str] = &[
    // baseops
    "getCaller",
    "getSCAddress",
    "getOwnerAddress",
    "getCallValue",
    "getNumArguments",
    "getArgumentLength",
    "getArgument",
    "finish",
    "signalError",
    "writeLog",
    "getGasLeft",
    "getBlockNonce",
    "getBlockRound",
    "getBlockTimestamp",
    "getBlockEpoch",
    "getBlockRandomSeed",
    "getPrevBlockNonce",
    "getPrevBlockRound",
    "getPrevBlockTimestamp",
    "getPrevBlockEpoch",
    "getPrevBlockRandomSeed",
    "getBlockHash",
    "transferValue",
    "getShardOfAddress",
    "isSmartContract",
    "getOriginalTxHash",
    "getCurrentTxHash",
    "getPrevTxHash",
    // storage
    "storageStore",
    "storageLoadLength",
    "storageLoad",
    "storageLoadFromAddress",
    // execution
    "executeOnSameContext",
    "executeOnDestContext",
    "executeReadOnly",
    "asyncCall",
    "createAsyncCall",
    "setAsyncContextCallback",
    "upgradeContract",
    "deployFromSourceContract",
    "getNumReturnData",
    "getReturnDataSize",
    "getReturnData",
    // crypto
    "sha256",
    "keccak256",
    "ripemd160",
    "verifyBLS",
    "verifyEd25519",
    "verifySecp256k1",
    "createEC",
    "addEC",
    "doubleEC",
    "scalarMultEC",
    "marshalEC",
    "unmarshalEC",
    // big integers
    "bigIntNew",
    "bigIntSetInt64",
    "bigIntAdd",
    "bigIntSub",
    "bigIntMul",
    "bigIntTDiv",
    "bigIntTMod",
    "bigIntShl",
    "bigIntShr",
    "bigIntCmp",
    "bigIntSign",
    "bigIntAbs",
    "bigIntNeg",
    "bigIntUnsignedByteLength",
    "bigIntGetUnsignedBytes",
    "bigIntSetUnsignedBytes",
    "bigIntFinishUnsigned",
    "bigIntGetUnsignedArgument",
    "bigIntGetCallValue",
    "bigIntStorageStoreUnsigned",
    "bigIntStorageLoadUnsigned",
    // big floats
    "bigFloatNewFromParts",
    "bigFloatAdd",
    "bigFloatSub",
    "bigFloatMul",
    "bigFloatDiv",
    "bigFloatSqrt",
    "bigFloatCmp",
    "bigFloatFinish",
    // managed buffers
    "mBufferNew",
    "mBufferNewFromBytes",
    "mBufferGetLength",
    "mBufferGetBytes",
    "mBufferSetBytes",
    "mBufferAppend",
    "mBufferCopyByteSlice",
    "mBufferEq",
    "mBufferFinish",
    "mBufferStorageStore",
    "mBufferStorageLoad",
    "mBufferGetArgument",
];

/// The dispatcher handed to the engine for the duration of one export call.
pub struct Eei<'a> {
    host: &'a mut CallHost,
}

impl<'a> Eei<'a> {
    /// Wraps the call host for one export invocation.
    pub fn new(host: &'a mut CallHost) -> Self {
        Self { host }
    }
}

impl EeiDispatcher for Eei<'_> {
    fn dispatch(
        &mut self,
        name: &str,
        args: &[WasmValue],
        memory: &mut dyn MemoryView,
    ) -> Result<Vec<WasmValue>, String> {
        match route(self.host, name, args, memory) {
            Ok(values) => {
                // Handlers arm breakpoints for contract-visible aborts
                // (signalError, asyncCall); the trap carries them out.
                let breakpoint = self.host.runtime.breakpoint();
                if breakpoint != Breakpoint::None {
                    return Err(format!("breakpoint {breakpoint:?}"));
                }
                Ok(values)
            }
            Err(error) => {
                self.host.on_eei_error(name, &error);
                Err(error.to_string())
            }
        }
    }

    fn import_names(&self) -> &[&'static str] {
        EEI_FUNCTION_NAMES
    }
}

fn route(
    host: &mut CallHost,
    name: &str,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    match name {
        "getCaller" => baseops::get_caller(host, args, memory),
        "getSCAddress" => baseops::get_sc_address(host, args, memory),
        "getOwnerAddress" => baseops::get_owner_address(host, args, memory),
        "getCallValue" => baseops::get_call_value(host, args, memory),
        "getNumArguments" => baseops::get_num_arguments(host, args, memory),
        "getArgumentLength" => baseops::get_argument_length(host, args, memory),
        "getArgument" => baseops::get_argument(host, args, memory),
        "finish" => baseops::finish(host, args, memory),
        "signalError" => baseops::signal_error(host, args, memory),
        "writeLog" => baseops::write_log(host, args, memory),
        "getGasLeft" => baseops::get_gas_left(host, args, memory),
        "getBlockNonce" => baseops::get_block_nonce(host, args, memory),
        "getBlockRound" => baseops::get_block_round(host, args, memory),
        "getBlockTimestamp" => baseops::get_block_timestamp(host, args, memory),
        "getBlockEpoch" => baseops::get_block_epoch(host, args, memory),
        "getBlockRandomSeed" => baseops::get_block_random_seed(host, args, memory),
        "getPrevBlockNonce" => baseops::get_prev_block_nonce(host, args, memory),
        "getPrevBlockRound" => baseops::get_prev_block_round(host, args, memory),
        "getPrevBlockTimestamp" => baseops::get_prev_block_timestamp(host, args, memory),
        "getPrevBlockEpoch" => baseops::get_prev_block_epoch(host, args, memory),
        "getPrevBlockRandomSeed" => baseops::get_prev_block_random_seed(host, args, memory),
        "getBlockHash" => baseops::get_block_hash(host, args, memory),
        "transferValue" => baseops::transfer_value(host, args, memory),
        "getShardOfAddress" => baseops::get_shard_of_address(host, args, memory),
        "isSmartContract" => baseops::is_smart_contract(host, args, memory),
        "getOriginalTxHash" => baseops::get_original_tx_hash(host, args, memory),
        "getCurrentTxHash" => baseops::get_current_tx_hash(host, args, memory),
        "getPrevTxHash" => baseops::get_prev_tx_hash(host, args, memory),

        "storageStore" => storage_api::storage_store(host, args, memory),
        "storageLoadLength" => storage_api::storage_load_length(host, args, memory),
        "storageLoad" => storage_api::storage_load(host, args, memory),
        "storageLoadFromAddress" => storage_api::storage_load_from_address(host, args, memory),

        "executeOnSameContext" => exec_api::execute_on_same_context(host, args, memory),
        "executeOnDestContext" => exec_api::execute_on_dest_context(host, args, memory),
        "executeReadOnly" => exec_api::execute_read_only(host, args, memory),
        "asyncCall" => exec_api::async_call(host, args, memory),
        "createAsyncCall" => exec_api::create_async_call(host, args, memory),
        "setAsyncContextCallback" => exec_api::set_async_context_callback(host, args, memory),
        "upgradeContract" => exec_api::upgrade_contract(host, args, memory),
        "deployFromSourceContract" => exec_api::deploy_from_source_contract(host, args, memory),
        "getNumReturnData" => exec_api::get_num_return_data(host, args, memory),
        "getReturnDataSize" => exec_api::get_return_data_size(host, args, memory),
        "getReturnData" => exec_api::get_return_data(host, args, memory),

        "sha256" => crypto_api::sha256(host, args, memory),
        "keccak256" => crypto_api::keccak256(host, args, memory),
        "ripemd160" => crypto_api::ripemd160(host, args, memory),
        "verifyBLS" => crypto_api::verify_bls(host, args, memory),
        "verifyEd25519" => crypto_api::verify_ed25519(host, args, memory),
        "verifySecp256k1" => crypto_api::verify_secp256k1(host, args, memory),
        "createEC" => crypto_api::create_ec(host, args, memory),
        "addEC" => crypto_api::add_ec(host, args, memory),
        "doubleEC" => crypto_api::double_ec(host, args, memory),
        "scalarMultEC" => crypto_api::scalar_mult_ec(host, args, memory),
        "marshalEC" => crypto_api::marshal_ec(host, args, memory),
        "unmarshalEC" => crypto_api::unmarshal_ec(host, args, memory),

        "bigIntNew" => bigint_api::big_int_new(host, args, memory),
        "bigIntSetInt64" => bigint_api::big_int_set_int64(host, args, memory),
        "bigIntAdd" => bigint_api::big_int_add(host, args, memory),
        "bigIntSub" => bigint_api::big_int_sub(host, args, memory),
        "bigIntMul" => bigint_api::big_int_mul(host, args, memory),
        "bigIntTDiv" => bigint_api::big_int_tdiv(host, args, memory),
        "bigIntTMod" => bigint_api::big_int_tmod(host, args, memory),
        "bigIntShl" => bigint_api::big_int_shl(host, args, memory),
        "bigIntShr" => bigint_api::big_int_shr(host, args, memory),
        "bigIntCmp" => bigint_api::big_int_cmp(host, args, memory),
        "bigIntSign" => bigint_api::big_int_sign(host, args, memory),
        "bigIntAbs" => bigint_api::big_int_abs(host, args, memory),
        "bigIntNeg" => bigint_api::big_int_neg(host, args, memory),
        "bigIntUnsignedByteLength" => bigint_api::big_int_unsigned_byte_length(host, args, memory),
        "bigIntGetUnsignedBytes" => bigint_api::big_int_get_unsigned_bytes(host, args, memory),
        "bigIntSetUnsignedBytes" => bigint_api::big_int_set_unsigned_bytes(host, args, memory),
        "bigIntFinishUnsigned" => bigint_api::big_int_finish_unsigned(host, args, memory),
        "bigIntGetUnsignedArgument" => bigint_api::big_int_get_unsigned_argument(host, args, memory),
        "bigIntGetCallValue" => bigint_api::big_int_get_call_value(host, args, memory),
        "bigIntStorageStoreUnsigned" => bigint_api::big_int_storage_store_unsigned(host, args, memory),
        "bigIntStorageLoadUnsigned" => bigint_api::big_int_storage_load_unsigned(host, args, memory),

        "bigFloatNewFromParts" => bigfloat_api::big_float_new_from_parts(host, args, memory),
        "bigFloatAdd" => bigfloat_api::big_float_add(host, args, memory),
        "bigFloatSub" => bigfloat_api::big_float_sub(host, args, memory),
        "bigFloatMul" => bigfloat_api::big_float_mul(host, args, memory),
        "bigFloatDiv" => bigfloat_api::big_float_div(host, args, memory),
        "bigFloatSqrt" => bigfloat_api::big_float_sqrt(host, args, memory),
        "bigFloatCmp" => bigfloat_api::big_float_cmp(host, args, memory),
        "bigFloatFinish" => bigfloat_api::big_float_finish(host, args, memory),

        "mBufferNew" => buffer_api::mbuffer_new(host, args, memory),
        "mBufferNewFromBytes" => buffer_api::mbuffer_new_from_bytes(host, args, memory),
        "mBufferGetLength" => buffer_api::mbuffer_get_length(host, args, memory),
        "mBufferGetBytes" => buffer_api::mbuffer_get_bytes(host, args, memory),
        "mBufferSetBytes" => buffer_api::mbuffer_set_bytes(host, args, memory),
        "mBufferAppend" => buffer_api::mbuffer_append(host, args, memory),
        "mBufferCopyByteSlice" => buffer_api::mbuffer_copy_byte_slice(host, args, memory),
        "mBufferEq" => buffer_api::mbuffer_eq(host, args, memory),
        "mBufferFinish" => buffer_api::mbuffer_finish(host, args, memory),
        "mBufferStorageStore" => buffer_api::mbuffer_storage_store(host, args, memory),
        "mBufferStorageLoad" => buffer_api::mbuffer_storage_load(host, args, memory),
        "mBufferGetArgument" => buffer_api::mbuffer_get_argument(host, args, memory),

        _ => Err(HostError::FunctionNotFound),
    }
}

// --- shared argument helpers ---

/// Reads the `index`-th raw argument, or fails decoding.
pub(crate) fn arg(args: &[WasmValue], index: usize) -> Result<i64, HostError> {
    args.get(index)
        .map(WasmValue::as_i64)
        .ok_or_else(|| HostError::ArgumentDecode(format!("missing argument {index}")))
}

/// Reads the `index`-th raw argument as a handle or offset.
pub(crate) fn arg_i32(args: &[WasmValue], index: usize) -> Result<i32, HostError> {
    Ok(arg(args, index)? as i32)
}

/// The single-value `i32` result.
pub(crate) fn ret_i32(value: i32) -> Result<Vec<WasmValue>, HostError> {
    Ok(vec![WasmValue::I32(value)])
}

/// The single-value `i64` result.
pub(crate) fn ret_i64(value: i64) -> Result<Vec<WasmValue>, HostError> {
    Ok(vec![WasmValue::I64(value)])
}

/// The empty result.
pub(crate) fn ret_void() -> Result<Vec<WasmValue>, HostError> {
    Ok(Vec::new())
}
