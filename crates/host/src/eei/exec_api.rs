// Path: crates/host/src/eei/exec_api.rs
//! Synchronous and asynchronous call dispatch from inside a contract.

use num_bigint::BigUint;

use crucible_api::engine::{MemoryView, WasmValue};
use crucible_types::address::{Address, ADDRESS_LEN};
use crucible_types::async_call::{AsyncCall, AsyncCallStatus};
use crucible_types::breakpoint::Breakpoint;
use crucible_types::error::HostError;
use crucible_types::input::{CallType, ContractCallInput, ContractCreateInput, VMInput};
use crucible_types::UPGRADE_FUNCTION_NAME;

use crate::host::{CallHost, NestedMode};
use super::{arg, arg_i32, ret_i32, ret_void};

fn load_address(
    host: &CallHost,
    memory: &dyn MemoryView,
    offset: i64,
) -> Result<Address, HostError> {
    let bytes = host.runtime.mem_load(memory, offset, ADDRESS_LEN as i64)?;
    Address::from_slice(&bytes).ok_or_else(|| HostError::ArgumentDecode("address".to_string()))
}

fn load_value(
    host: &CallHost,
    memory: &dyn MemoryView,
    offset: i64,
) -> Result<BigUint, HostError> {
    let bytes = host.runtime.mem_load(memory, offset, 32)?;
    Ok(BigUint::from_bytes_be(&bytes))
}

fn load_string(
    host: &CallHost,
    memory: &dyn MemoryView,
    offset: i64,
    length: i64,
) -> Result<String, HostError> {
    let bytes = host.runtime.mem_load(memory, offset, length)?;
    String::from_utf8(bytes).map_err(|_| HostError::ArgumentDecode("utf-8 string".to_string()))
}

/// Reads `count` length-prefixed arguments laid out the way the VM ABI packs
/// them: little-endian `u32` lengths at one offset, concatenated payloads at
/// another.
fn load_arguments(
    host: &mut CallHost,
    memory: &dyn MemoryView,
    count: i32,
    lengths_offset: i64,
    data_offset: i64,
) -> Result<Vec<Vec<u8>>, HostError> {
    if !(0..=1024).contains(&count) {
        return Err(HostError::ArgumentDecode("argument count".to_string()));
    }
    let lengths_raw = host
        .runtime
        .mem_load(memory, lengths_offset, count as i64 * 4)?;
    let mut arguments = Vec::with_capacity(count as usize);
    let mut cursor = data_offset;
    let mut total = 0u64;
    for chunk in lengths_raw.chunks_exact(4) {
        let length = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as i64;
        arguments.push(host.runtime.mem_load(memory, cursor, length)?);
        cursor += length;
        total += length as u64;
    }
    host.metering.use_gas_for_data_copy(total)?;
    Ok(arguments)
}

fn nested_call_input(
    host: &CallHost,
    recipient: Address,
    function: String,
    arguments: Vec<Vec<u8>>,
    call_value: BigUint,
    gas_provided: u64,
    call_type: CallType,
) -> ContractCallInput {
    let parent = host.runtime.vm_input();
    ContractCallInput {
        vm_input: VMInput {
            caller: host.runtime.sc_address(),
            arguments,
            call_value,
            gas_provided,
            call_type,
            current_tx_hash: parent.current_tx_hash.clone(),
            original_tx_hash: parent.original_tx_hash.clone(),
            prev_tx_hash: parent.prev_tx_hash.clone(),
            ..VMInput::default()
        },
        recipient,
        function,
    }
}

fn execute_with_mode(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
    mode: NestedMode,
    api: &str,
) -> Result<Vec<WasmValue>, HostError> {
    host.metering
        .use_gas_traced(host.shared.gas_config.host_api.execute_on_context, api)?;

    let gas_limit = arg(args, 0)? as u64;
    let dest_offset = arg(args, 1)?;
    let (value, mut index) = if mode == NestedMode::ReadOnly {
        (BigUint::default(), 2)
    } else {
        (load_value(host, memory, arg(args, 2)?)?, 3)
    };
    let destination = load_address(host, memory, dest_offset)?;
    let function_offset = arg(args, index)?;
    let function_length = arg(args, index + 1)?;
    index += 2;
    let num_arguments = arg_i32(args, index)?;
    let lengths_offset = arg(args, index + 1)?;
    let data_offset = arg(args, index + 2)?;

    let function = load_string(host, memory, function_offset, function_length)?;
    let arguments = load_arguments(host, memory, num_arguments, lengths_offset, data_offset)?;

    let call_type = match mode {
        NestedMode::SameContext => CallType::ExecOnSameCtx,
        NestedMode::DestContext | NestedMode::ReadOnly => CallType::ExecOnDestCtx,
    };
    let input = nested_call_input(host, destination, function, arguments, value, gas_limit, call_type);
    let code = host.execute_nested(&input, mode);
    ret_i32(if code == crucible_types::output::ReturnCode::Ok {
        0
    } else {
        1
    })
}

pub(super) fn execute_on_same_context(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    execute_with_mode(host, args, memory, NestedMode::SameContext, "executeOnSameContext")
}

pub(super) fn execute_on_dest_context(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    execute_with_mode(host, args, memory, NestedMode::DestContext, "executeOnDestContext")
}

pub(super) fn execute_read_only(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    execute_with_mode(host, args, memory, NestedMode::ReadOnly, "executeReadOnly")
}

pub(super) fn async_call(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    host.metering
        .use_gas_traced(host.shared.gas_config.host_api.async_call_step, "asyncCall")?;

    let dest_offset = arg(args, 0)?;
    let value_offset = arg(args, 1)?;
    let data_offset = arg(args, 2)?;
    let data_length = arg(args, 3)?;

    let destination = load_address(host, memory, dest_offset)?;
    let value = load_value(host, memory, value_offset)?;
    let data = host.runtime.mem_load(memory, data_offset, data_length)?;
    host.metering.use_gas_for_data_copy(data.len() as u64)?;

    // The async call carries all remaining gas except the locked reserve.
    let gas_locked = host.metering.gas_to_lock_for_callback();
    let gas_left = host.metering.gas_left();
    if gas_left <= gas_locked {
        return Err(HostError::NotEnoughGas);
    }
    let gas_limit = gas_left - gas_locked;

    host.runtime.set_async_call_info(AsyncCall {
        status: AsyncCallStatus::Pending,
        destination,
        data,
        gas_limit,
        gas_locked,
        value_bytes: value.to_bytes_be(),
        success_callback: Vec::new(),
        error_callback: Vec::new(),
    });
    host.runtime.set_breakpoint(Breakpoint::AsyncCall);
    ret_void()
}

pub(super) fn create_async_call(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    host.metering.use_gas_traced(
        host.shared.gas_config.host_api.create_async_call,
        "createAsyncCall",
    )?;

    let group_offset = arg(args, 0)?;
    let group_length = arg(args, 1)?;
    let dest_offset = arg(args, 2)?;
    let value_offset = arg(args, 3)?;
    let data_offset = arg(args, 4)?;
    let data_length = arg(args, 5)?;
    let success_offset = arg(args, 6)?;
    let success_length = arg(args, 7)?;
    let error_offset = arg(args, 8)?;
    let error_length = arg(args, 9)?;
    let gas_limit = arg(args, 10)? as u64;
    let extra_gas_for_callback = arg(args, 11)? as u64;

    let group = host.runtime.mem_load(memory, group_offset, group_length)?;
    let destination = load_address(host, memory, dest_offset)?;
    let value = load_value(host, memory, value_offset)?;
    let data = host.runtime.mem_load(memory, data_offset, data_length)?;
    let success_callback = host.runtime.mem_load(memory, success_offset, success_length)?;
    let error_callback = host.runtime.mem_load(memory, error_offset, error_length)?;
    host.metering.use_gas_for_data_copy(data.len() as u64)?;

    let gas_locked = host
        .metering
        .gas_to_lock_for_callback()
        .saturating_add(extra_gas_for_callback);

    host.runtime.add_async_context_call(
        &group,
        AsyncCall {
            status: AsyncCallStatus::Pending,
            destination,
            data,
            gas_limit,
            gas_locked,
            value_bytes: value.to_bytes_be(),
            success_callback,
            error_callback,
        },
    );
    ret_i32(0)
}

pub(super) fn set_async_context_callback(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    host.metering.use_gas_traced(
        host.shared.gas_config.host_api.create_async_call,
        "setAsyncContextCallback",
    )?;

    let group_offset = arg(args, 0)?;
    let group_length = arg(args, 1)?;
    let callback_offset = arg(args, 2)?;
    let callback_length = arg(args, 3)?;

    let group = host.runtime.mem_load(memory, group_offset, group_length)?;
    let callback = host
        .runtime
        .mem_load(memory, callback_offset, callback_length)?;

    let context = host.runtime.async_context_mut();
    let group = context
        .call_groups
        .iter_mut()
        .find(|g| g.identifier == group)
        .ok_or(HostError::AsyncContextDoesNotExist)?;
    for call in &mut group.calls {
        if call.success_callback.is_empty() {
            call.success_callback = callback.clone();
        }
        if call.error_callback.is_empty() {
            call.error_callback = callback.clone();
        }
    }
    ret_i32(0)
}

pub(super) fn upgrade_contract(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    host.metering.use_gas_traced(
        host.shared.gas_config.host_api.create_contract,
        "upgradeContract",
    )?;

    let dest_offset = arg(args, 0)?;
    let gas_limit = arg(args, 1)? as u64;
    let value_offset = arg(args, 2)?;
    let code_offset = arg(args, 3)?;
    let code_length = arg(args, 4)?;
    let metadata_offset = arg(args, 5)?;
    let metadata_length = arg(args, 6)?;

    let destination = load_address(host, memory, dest_offset)?;
    let value = load_value(host, memory, value_offset)?;
    let code = host.runtime.mem_load(memory, code_offset, code_length)?;
    let metadata = host.runtime.mem_load(memory, metadata_offset, metadata_length)?;
    host.metering.use_gas_for_data_copy(code.len() as u64)?;

    // Upgrades travel as asynchronous calls to the destination; the upgrade
    // itself runs when the call is dispatched.
    let mut data = UPGRADE_FUNCTION_NAME.as_bytes().to_vec();
    data.push(b'@');
    data.extend_from_slice(hex::encode(&code).as_bytes());
    data.push(b'@');
    data.extend_from_slice(hex::encode(&metadata).as_bytes());

    let gas_locked = host.metering.gas_to_lock_for_callback();
    host.runtime.set_async_call_info(AsyncCall {
        status: AsyncCallStatus::Pending,
        destination,
        data,
        gas_limit,
        gas_locked,
        value_bytes: value.to_bytes_be(),
        success_callback: Vec::new(),
        error_callback: Vec::new(),
    });
    host.runtime.set_breakpoint(Breakpoint::AsyncCall);
    ret_void()
}

pub(super) fn deploy_from_source_contract(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    host.metering.use_gas_traced(
        host.shared.gas_config.host_api.create_contract,
        "deployFromSourceContract",
    )?;

    let gas_limit = arg(args, 0)? as u64;
    let value_offset = arg(args, 1)?;
    let source_offset = arg(args, 2)?;
    let metadata_offset = arg(args, 3)?;
    let metadata_length = arg(args, 4)?;
    let result_offset = arg(args, 5)?;
    let num_arguments = arg_i32(args, 6)?;
    let lengths_offset = arg(args, 7)?;
    let data_offset = arg(args, 8)?;

    let value = load_value(host, memory, value_offset)?;
    let source = load_address(host, memory, source_offset)?;
    let metadata = host.runtime.mem_load(memory, metadata_offset, metadata_length)?;
    let arguments = load_arguments(host, memory, num_arguments, lengths_offset, data_offset)?;

    let code = host.blockchain.get_code(&source)?;
    let input = ContractCreateInput {
        vm_input: VMInput {
            caller: host.runtime.sc_address(),
            arguments,
            call_value: value,
            gas_provided: gas_limit,
            call_type: CallType::Direct,
            current_tx_hash: host.runtime.vm_input().current_tx_hash.clone(),
            original_tx_hash: host.runtime.vm_input().original_tx_hash.clone(),
            prev_tx_hash: host.runtime.vm_input().prev_tx_hash.clone(),
            ..VMInput::default()
        },
        contract_code: code,
        contract_code_metadata: metadata,
    };
    let address = host.execute_nested_create(&input)?;
    host.runtime.mem_store(memory, result_offset, address.as_bytes())?;
    ret_i32(0)
}

pub(super) fn get_num_return_data(
    host: &mut CallHost,
    _args: &[WasmValue],
    _memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    host.metering.use_gas_traced(
        host.shared.gas_config.host_api.get_context,
        "getNumReturnData",
    )?;
    ret_i32(host.output.return_data().len() as i32)
}

pub(super) fn get_return_data_size(
    host: &mut CallHost,
    args: &[WasmValue],
    _memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    host.metering.use_gas_traced(
        host.shared.gas_config.host_api.get_context,
        "getReturnDataSize",
    )?;
    let index = arg_i32(args, 0)?;
    let data = host
        .output
        .return_data()
        .get(index.max(0) as usize)
        .ok_or(HostError::ArgumentOutOfRange)?;
    ret_i32(data.len() as i32)
}

pub(super) fn get_return_data(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    host.metering
        .use_gas_traced(host.shared.gas_config.host_api.get_context, "getReturnData")?;
    let index = arg_i32(args, 0)?;
    let offset = arg(args, 1)?;
    let data = host
        .output
        .return_data()
        .get(index.max(0) as usize)
        .cloned()
        .ok_or(HostError::ArgumentOutOfRange)?;
    host.metering.use_gas_for_data_copy(data.len() as u64)?;
    host.runtime.mem_store(memory, offset, &data)?;
    ret_i32(data.len() as i32)
}
