// Path: crates/host/src/eei/buffer_api.rs
//! Managed-buffer operations over the managed-types arena.

use crucible_api::engine::{MemoryView, WasmValue};
use crucible_types::error::HostError;

use crate::host::CallHost;
use super::{arg, arg_i32, ret_i32};

fn charge(host: &mut CallHost, cost: u64, api: &str) -> Result<(), HostError> {
    host.metering.use_gas_traced(cost, api)
}

fn charge_per_byte(host: &mut CallHost, length: u64) -> Result<(), HostError> {
    host.metering
        .use_gas(host.shared.gas_config.buffer_api.per_byte.saturating_mul(length))
}

pub(super) fn mbuffer_new(
    host: &mut CallHost,
    _args: &[WasmValue],
    _memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    charge(host, host.shared.gas_config.buffer_api.new, "mBufferNew")?;
    ret_i32(host.managed.new_buffer(Vec::new()))
}

pub(super) fn mbuffer_new_from_bytes(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    charge(host, host.shared.gas_config.buffer_api.new, "mBufferNewFromBytes")?;
    let offset = arg(args, 0)?;
    let length = arg(args, 1)?;
    let bytes = host.runtime.mem_load(memory, offset, length)?;
    charge_per_byte(host, bytes.len() as u64)?;
    ret_i32(host.managed.new_buffer(bytes))
}

pub(super) fn mbuffer_get_length(
    host: &mut CallHost,
    args: &[WasmValue],
    _memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    charge(host, host.shared.gas_config.buffer_api.get_bytes, "mBufferGetLength")?;
    let handle = arg_i32(args, 0)?;
    ret_i32(host.managed.buffer(handle)?.len() as i32)
}

pub(super) fn mbuffer_get_bytes(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    charge(host, host.shared.gas_config.buffer_api.get_bytes, "mBufferGetBytes")?;
    let handle = arg_i32(args, 0)?;
    let offset = arg(args, 1)?;
    let bytes = host.managed.buffer(handle)?.clone();
    charge_per_byte(host, bytes.len() as u64)?;
    host.runtime.mem_store(memory, offset, &bytes)?;
    ret_i32(bytes.len() as i32)
}

pub(super) fn mbuffer_set_bytes(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    charge(host, host.shared.gas_config.buffer_api.set_bytes, "mBufferSetBytes")?;
    let handle = arg_i32(args, 0)?;
    let offset = arg(args, 1)?;
    let length = arg(args, 2)?;
    let bytes = host.runtime.mem_load(memory, offset, length)?;
    charge_per_byte(host, bytes.len() as u64)?;
    // Setting through an unknown handle must fail, unlike allocation.
    host.managed.buffer(handle)?;
    host.managed.set_buffer(handle, bytes);
    ret_i32(0)
}

pub(super) fn mbuffer_append(
    host: &mut CallHost,
    args: &[WasmValue],
    _memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    charge(host, host.shared.gas_config.buffer_api.append, "mBufferAppend")?;
    let accumulator = arg_i32(args, 0)?;
    let data = arg_i32(args, 1)?;
    let suffix = host.managed.buffer(data)?.clone();
    charge_per_byte(host, suffix.len() as u64)?;
    host.managed.buffer_mut(accumulator)?.extend_from_slice(&suffix);
    ret_i32(0)
}

pub(super) fn mbuffer_copy_byte_slice(
    host: &mut CallHost,
    args: &[WasmValue],
    _memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    charge(host, host.shared.gas_config.buffer_api.append, "mBufferCopyByteSlice")?;
    let source = arg_i32(args, 0)?;
    let start = arg_i32(args, 1)?;
    let length = arg_i32(args, 2)?;
    let destination = arg_i32(args, 3)?;

    let bytes = host.managed.buffer(source)?;
    if start < 0 || length < 0 || (start as usize + length as usize) > bytes.len() {
        return Err(HostError::ArgumentDecode("slice out of bounds".to_string()));
    }
    let slice = bytes[start as usize..(start + length) as usize].to_vec();
    charge_per_byte(host, slice.len() as u64)?;
    host.managed.buffer(destination)?;
    host.managed.set_buffer(destination, slice);
    ret_i32(0)
}

pub(super) fn mbuffer_eq(
    host: &mut CallHost,
    args: &[WasmValue],
    _memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    charge(host, host.shared.gas_config.buffer_api.get_bytes, "mBufferEq")?;
    let a = arg_i32(args, 0)?;
    let b = arg_i32(args, 1)?;
    let equal = host.managed.buffer(a)? == host.managed.buffer(b)?;
    ret_i32(equal as i32)
}

pub(super) fn mbuffer_finish(
    host: &mut CallHost,
    args: &[WasmValue],
    _memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    charge(host, host.shared.gas_config.buffer_api.finish, "mBufferFinish")?;
    let handle = arg_i32(args, 0)?;
    let bytes = host.managed.buffer(handle)?.clone();
    host.metering
        .use_gas(host.shared.gas_config.base_ops.persist_per_byte.saturating_mul(bytes.len() as u64))?;
    host.output.finish(bytes);
    ret_i32(0)
}

pub(super) fn mbuffer_storage_store(
    host: &mut CallHost,
    args: &[WasmValue],
    _memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    let key_handle = arg_i32(args, 0)?;
    let source_handle = arg_i32(args, 1)?;
    let key = host.managed.buffer(key_handle)?.clone();
    let value = host.managed.buffer(source_handle)?.clone();

    let read_only = host.runtime.read_only();
    let cost_optimized = host.shared.epochs.storage_api_cost_optimization();
    let status = host.storage.set_storage(
        &key,
        &value,
        &mut host.output,
        host.shared.hook.as_ref(),
        &mut host.metering,
        read_only,
        false,
        cost_optimized,
    )?;
    ret_i32(super::storage_api::storage_status_code(status))
}

pub(super) fn mbuffer_storage_load(
    host: &mut CallHost,
    args: &[WasmValue],
    _memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    let key_handle = arg_i32(args, 0)?;
    let dest_handle = arg_i32(args, 1)?;
    let key = host.managed.buffer(key_handle)?.clone();

    let cost_optimized = host.shared.epochs.storage_api_cost_optimization();
    let value = host.storage.get_storage(
        &key,
        &host.output,
        host.shared.hook.as_ref(),
        &mut host.metering,
        cost_optimized,
    )?;
    host.managed.buffer(dest_handle)?;
    host.managed.set_buffer(dest_handle, value);
    ret_i32(0)
}

pub(super) fn mbuffer_get_argument(
    host: &mut CallHost,
    args: &[WasmValue],
    _memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    charge(host, host.shared.gas_config.host_api.get_argument, "mBufferGetArgument")?;
    let index = arg_i32(args, 0)?;
    let dest_handle = arg_i32(args, 1)?;
    let argument = host
        .runtime
        .vm_input()
        .arguments
        .get(index.max(0) as usize)
        .cloned()
        .ok_or(HostError::ArgumentOutOfRange)?;
    charge_per_byte(host, argument.len() as u64)?;
    host.managed.buffer(dest_handle)?;
    host.managed.set_buffer(dest_handle, argument);
    ret_i32(0)
}
