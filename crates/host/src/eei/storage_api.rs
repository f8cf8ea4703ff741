// Path: crates/host/src/eei/storage_api.rs
//! Contract storage access.

use crucible_api::engine::{MemoryView, WasmValue};
use crucible_types::address::ADDRESS_LEN;
use crucible_types::error::HostError;
use crucible_types::output::StorageStatus;

use crate::host::CallHost;
use super::{arg, ret_i32};

pub(super) fn storage_status_code(status: StorageStatus) -> i32 {
    match status {
        StorageStatus::Unchanged => 0,
        StorageStatus::Modified => 1,
        StorageStatus::Added => 2,
        StorageStatus::Deleted => 3,
    }
}

pub(super) fn storage_store(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    let key_offset = arg(args, 0)?;
    let key_length = arg(args, 1)?;
    let data_offset = arg(args, 2)?;
    let data_length = arg(args, 3)?;

    let key = host.runtime.mem_load(memory, key_offset, key_length)?;
    let value = host.runtime.mem_load(memory, data_offset, data_length)?;

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
    ret_i32(storage_status_code(status))
}

pub(super) fn storage_load_length(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    let key_offset = arg(args, 0)?;
    let key_length = arg(args, 1)?;
    let key = host.runtime.mem_load(memory, key_offset, key_length)?;

    let cost_optimized = host.shared.epochs.storage_api_cost_optimization();
    let value = host.storage.get_storage(
        &key,
        &host.output,
        host.shared.hook.as_ref(),
        &mut host.metering,
        cost_optimized,
    )?;
    ret_i32(value.len() as i32)
}

pub(super) fn storage_load(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    let key_offset = arg(args, 0)?;
    let key_length = arg(args, 1)?;
    let data_offset = arg(args, 2)?;
    let key = host.runtime.mem_load(memory, key_offset, key_length)?;

    let cost_optimized = host.shared.epochs.storage_api_cost_optimization();
    let value = host.storage.get_storage(
        &key,
        &host.output,
        host.shared.hook.as_ref(),
        &mut host.metering,
        cost_optimized,
    )?;
    host.runtime.mem_store(memory, data_offset, &value)?;
    ret_i32(value.len() as i32)
}

pub(super) fn storage_load_from_address(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    let address_offset = arg(args, 0)?;
    let key_offset = arg(args, 1)?;
    let key_length = arg(args, 2)?;
    let data_offset = arg(args, 3)?;

    let address_bytes = host
        .runtime
        .mem_load(memory, address_offset, ADDRESS_LEN as i64)?;
    let address = crucible_types::address::Address::from_slice(&address_bytes)
        .ok_or_else(|| HostError::ArgumentDecode("address".to_string()))?;
    let key = host.runtime.mem_load(memory, key_offset, key_length)?;

    let value = host.storage.get_storage_from_address(
        &address,
        &key,
        &host.output,
        host.shared.hook.as_ref(),
        &mut host.metering,
    )?;
    host.runtime.mem_store(memory, data_offset, &value)?;
    ret_i32(value.len() as i32)
}
