// Path: crates/host/src/eei/baseops.rs
//! Blockchain introspection, arguments, finish/return and logging.

use crucible_api::engine::{MemoryView, WasmValue};
use crucible_types::address::{Address, ADDRESS_LEN};
use crucible_types::error::HostError;
use crucible_types::input::CallType;

use crate::host::CallHost;
use super::{arg, arg_i32, ret_i32, ret_i64, ret_void};

fn charge(host: &mut CallHost, cost: u64, api: &str) -> Result<(), HostError> {
    host.metering.use_gas_traced(cost, api)
}

fn load_address(
    host: &CallHost,
    memory: &dyn MemoryView,
    offset: i64,
) -> Result<Address, HostError> {
    let bytes = host.runtime.mem_load(memory, offset, ADDRESS_LEN as i64)?;
    Address::from_slice(&bytes).ok_or_else(|| HostError::ArgumentDecode("address".to_string()))
}

pub(super) fn get_caller(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    charge(host, host.shared.gas_config.host_api.get_context, "getCaller")?;
    let offset = arg(args, 0)?;
    let caller = host.runtime.vm_input().caller;
    host.runtime.mem_store(memory, offset, caller.as_bytes())?;
    ret_void()
}

pub(super) fn get_sc_address(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    charge(host, host.shared.gas_config.host_api.get_context, "getSCAddress")?;
    let offset = arg(args, 0)?;
    let address = host.runtime.sc_address();
    host.runtime.mem_store(memory, offset, address.as_bytes())?;
    ret_void()
}

pub(super) fn get_owner_address(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    charge(host, host.shared.gas_config.host_api.get_context, "getOwnerAddress")?;
    let offset = arg(args, 0)?;
    let owner = host.blockchain.get_owner(&host.runtime.sc_address())?;
    host.runtime.mem_store(memory, offset, owner.as_bytes())?;
    ret_void()
}

pub(super) fn get_call_value(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    charge(host, host.shared.gas_config.host_api.get_context, "getCallValue")?;
    let offset = arg(args, 0)?;
    let value = host.runtime.vm_input().call_value.to_bytes_be();
    host.runtime.mem_store(memory, offset, &value)?;
    ret_i32(value.len() as i32)
}

pub(super) fn get_num_arguments(
    host: &mut CallHost,
    _args: &[WasmValue],
    _memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    charge(host, host.shared.gas_config.host_api.get_argument, "getNumArguments")?;
    ret_i32(host.runtime.vm_input().arguments.len() as i32)
}

fn argument_at(host: &CallHost, index: i32) -> Result<Vec<u8>, HostError> {
    host.runtime
        .vm_input()
        .arguments
        .get(index.max(0) as usize)
        .cloned()
        .ok_or(HostError::ArgumentOutOfRange)
}

pub(super) fn get_argument_length(
    host: &mut CallHost,
    args: &[WasmValue],
    _memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    charge(host, host.shared.gas_config.host_api.get_argument, "getArgumentLength")?;
    let index = arg_i32(args, 0)?;
    ret_i32(argument_at(host, index)?.len() as i32)
}

pub(super) fn get_argument(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    charge(host, host.shared.gas_config.host_api.get_argument, "getArgument")?;
    let index = arg_i32(args, 0)?;
    let offset = arg(args, 1)?;
    let value = argument_at(host, index)?;
    host.metering.use_gas_for_data_copy(value.len() as u64)?;
    host.runtime.mem_store(memory, offset, &value)?;
    ret_i32(value.len() as i32)
}

pub(super) fn finish(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    charge(host, host.shared.gas_config.host_api.finish, "finish")?;
    let offset = arg(args, 0)?;
    let length = arg(args, 1)?;
    let data = host.runtime.mem_load(memory, offset, length)?;
    host.metering
        .use_gas(host.shared.gas_config.base_ops.persist_per_byte.saturating_mul(data.len() as u64))?;
    host.output.finish(data);
    ret_void()
}

pub(super) fn signal_error(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    charge(host, host.shared.gas_config.host_api.signal_error, "signalError")?;
    let offset = arg(args, 0)?;
    let length = arg(args, 1)?;
    let message_bytes = host.runtime.mem_load(memory, offset, length)?;
    let message = String::from_utf8_lossy(&message_bytes).into_owned();
    host.output.set_return_message(&message);
    host.runtime.signal_user_error(&message);
    ret_void()
}

pub(super) fn write_log(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    charge(host, host.shared.gas_config.host_api.log, "writeLog")?;
    let num_topics = arg_i32(args, 0)?;
    let topic_lengths_offset = arg(args, 1)?;
    let topics_offset = arg(args, 2)?;
    let data_offset = arg(args, 3)?;
    let data_length = arg(args, 4)?;

    if !(0..=16).contains(&num_topics) {
        return Err(HostError::ArgumentDecode("topic count".to_string()));
    }
    let lengths_raw = host
        .runtime
        .mem_load(memory, topic_lengths_offset, num_topics as i64 * 4)?;
    let mut topics = Vec::with_capacity(num_topics as usize);
    let mut cursor = topics_offset;
    for chunk in lengths_raw.chunks_exact(4) {
        let length = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as i64;
        topics.push(host.runtime.mem_load(memory, cursor, length)?);
        cursor += length;
    }
    let data = host.runtime.mem_load(memory, data_offset, data_length)?;

    let total: u64 = topics.iter().map(|t| t.len() as u64).sum::<u64>() + data.len() as u64;
    host.metering.use_gas_for_data_copy(total)?;

    let address = host.runtime.sc_address();
    // The first topic doubles as the event identifier.
    let identifier = topics.first().cloned().unwrap_or_default();
    host.output.write_log(address, &identifier, topics, &data);
    ret_void()
}

pub(super) fn get_gas_left(
    host: &mut CallHost,
    _args: &[WasmValue],
    _memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    charge(host, host.shared.gas_config.host_api.get_context, "getGasLeft")?;
    ret_i64(host.metering.gas_left() as i64)
}

macro_rules! block_info_getter {
    ($name:ident, $which:ident, $field:ident, $api:literal) => {
        pub(super) fn $name(
            host: &mut CallHost,
            _args: &[WasmValue],
            _memory: &mut dyn MemoryView,
        ) -> Result<Vec<WasmValue>, HostError> {
            charge(host, host.shared.gas_config.host_api.get_block_info, $api)?;
            ret_i64(host.blockchain.$which().$field as i64)
        }
    };
}

block_info_getter!(get_block_nonce, current_block, nonce, "getBlockNonce");
block_info_getter!(get_block_round, current_block, round, "getBlockRound");
block_info_getter!(get_block_timestamp, current_block, timestamp, "getBlockTimestamp");
block_info_getter!(get_block_epoch, current_block, epoch, "getBlockEpoch");
block_info_getter!(get_prev_block_nonce, last_block, nonce, "getPrevBlockNonce");
block_info_getter!(get_prev_block_round, last_block, round, "getPrevBlockRound");
block_info_getter!(get_prev_block_timestamp, last_block, timestamp, "getPrevBlockTimestamp");
block_info_getter!(get_prev_block_epoch, last_block, epoch, "getPrevBlockEpoch");

pub(super) fn get_block_random_seed(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    charge(host, host.shared.gas_config.host_api.get_block_info, "getBlockRandomSeed")?;
    let offset = arg(args, 0)?;
    let seed = host.blockchain.current_block().random_seed;
    host.runtime.mem_store(memory, offset, &seed)?;
    ret_void()
}

pub(super) fn get_prev_block_random_seed(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    charge(host, host.shared.gas_config.host_api.get_block_info, "getPrevBlockRandomSeed")?;
    let offset = arg(args, 0)?;
    let seed = host.blockchain.last_block().random_seed;
    host.runtime.mem_store(memory, offset, &seed)?;
    ret_void()
}

pub(super) fn get_block_hash(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    charge(host, host.shared.gas_config.host_api.get_block_info, "getBlockHash")?;
    let nonce = arg(args, 0)?;
    let offset = arg(args, 1)?;
    let hash = host.blockchain.block_hash(nonce as u64);
    if hash.is_empty() {
        return ret_i32(1);
    }
    host.runtime.mem_store(memory, offset, &hash)?;
    ret_i32(0)
}

pub(super) fn transfer_value(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    charge(host, host.shared.gas_config.host_api.transfer_value, "transferValue")?;
    let dest_offset = arg(args, 0)?;
    let value_offset = arg(args, 1)?;
    let data_offset = arg(args, 2)?;
    let data_length = arg(args, 3)?;

    if host.runtime.read_only() {
        return Err(HostError::StoreReadOnly);
    }

    let destination = load_address(host, memory, dest_offset)?;
    let value_bytes = host.runtime.mem_load(memory, value_offset, 32)?;
    let value = num_bigint::BigUint::from_bytes_be(&value_bytes);
    let data = host.runtime.mem_load(memory, data_offset, data_length)?;
    host.metering.use_gas_for_data_copy(data.len() as u64)?;

    let sender = host.runtime.sc_address();
    host.output.transfer(
        destination,
        sender,
        0,
        0,
        &value,
        &data,
        CallType::Direct,
        host.shared.hook.as_ref(),
    )?;
    ret_i32(0)
}

pub(super) fn get_shard_of_address(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    charge(host, host.shared.gas_config.host_api.get_context, "getShardOfAddress")?;
    let offset = arg(args, 0)?;
    let address = load_address(host, memory, offset)?;
    ret_i32(host.blockchain.shard_of_address(&address) as i32)
}

pub(super) fn is_smart_contract(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    charge(host, host.shared.gas_config.host_api.get_context, "isSmartContract")?;
    let offset = arg(args, 0)?;
    let address = load_address(host, memory, offset)?;
    ret_i32(host.blockchain.is_smart_contract(&address) as i32)
}

macro_rules! tx_hash_getter {
    ($name:ident, $field:ident, $api:literal) => {
        pub(super) fn $name(
            host: &mut CallHost,
            args: &[WasmValue],
            memory: &mut dyn MemoryView,
        ) -> Result<Vec<WasmValue>, HostError> {
            charge(host, host.shared.gas_config.host_api.get_context, $api)?;
            let offset = arg(args, 0)?;
            let hash = host.runtime.vm_input().$field.clone();
            host.runtime.mem_store(memory, offset, &hash)?;
            ret_void()
        }
    };
}

tx_hash_getter!(get_original_tx_hash, original_tx_hash, "getOriginalTxHash");
tx_hash_getter!(get_current_tx_hash, current_tx_hash, "getCurrentTxHash");
tx_hash_getter!(get_prev_tx_hash, prev_tx_hash, "getPrevTxHash");
