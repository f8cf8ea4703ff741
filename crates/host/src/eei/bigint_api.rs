// Path: crates/host/src/eei/bigint_api.rs
//! Big-integer operations over the managed-types arena.

use num_bigint::{BigInt, Sign};
use num_traits::{Signed, Zero};

use crucible_api::engine::{MemoryView, WasmValue};
use crucible_types::error::HostError;

use crate::host::CallHost;
use super::{arg, arg_i32, ret_i32, ret_i64, ret_void};

fn charge_arith(host: &mut CallHost, a: i32, b: i32, api: &str) -> Result<(), HostError> {
    let config = &host.shared.gas_config.big_int_api;
    let operand_len = host.managed.big_int_operand_len(a, b)?;
    let cost = config
        .arith
        .saturating_add(config.arith_per_byte.saturating_mul(operand_len));
    host.metering.use_gas_traced(cost, api)
}

pub(super) fn big_int_new(
    host: &mut CallHost,
    args: &[WasmValue],
    _memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    host.metering
        .use_gas_traced(host.shared.gas_config.big_int_api.new, "bigIntNew")?;
    let small = arg(args, 0)?;
    ret_i32(host.managed.new_big_int(BigInt::from(small)))
}

pub(super) fn big_int_set_int64(
    host: &mut CallHost,
    args: &[WasmValue],
    _memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    host.metering
        .use_gas_traced(host.shared.gas_config.big_int_api.set_bytes, "bigIntSetInt64")?;
    let handle = arg_i32(args, 0)?;
    let value = arg(args, 1)?;
    host.managed.set_big_int(handle, BigInt::from(value));
    ret_void()
}

macro_rules! bigint_binop {
    ($name:ident, $api:literal, $op:expr) => {
        pub(super) fn $name(
            host: &mut CallHost,
            args: &[WasmValue],
            _memory: &mut dyn MemoryView,
        ) -> Result<Vec<WasmValue>, HostError> {
            let dest = arg_i32(args, 0)?;
            let a = arg_i32(args, 1)?;
            let b = arg_i32(args, 2)?;
            charge_arith(host, a, b, $api)?;
            let lhs = host.managed.big_int(a)?.clone();
            let rhs = host.managed.big_int(b)?.clone();
            #[allow(clippy::redundant_closure_call)]
            let result = ($op)(lhs, rhs)?;
            host.managed.set_big_int(dest, result);
            ret_void()
        }
    };
}

bigint_binop!(big_int_add, "bigIntAdd", |a: BigInt, b: BigInt| -> Result<BigInt, HostError> {
    Ok(a + b)
});
bigint_binop!(big_int_sub, "bigIntSub", |a: BigInt, b: BigInt| -> Result<BigInt, HostError> {
    Ok(a - b)
});
bigint_binop!(big_int_mul, "bigIntMul", |a: BigInt, b: BigInt| -> Result<BigInt, HostError> {
    Ok(a * b)
});
bigint_binop!(big_int_tdiv, "bigIntTDiv", |a: BigInt, b: BigInt| -> Result<BigInt, HostError> {
    if b.is_zero() {
        return Err(HostError::DivisionByZero);
    }
    Ok(a / b)
});
bigint_binop!(big_int_tmod, "bigIntTMod", |a: BigInt, b: BigInt| -> Result<BigInt, HostError> {
    if b.is_zero() {
        return Err(HostError::DivisionByZero);
    }
    Ok(a % b)
});

fn shift_bits(host: &CallHost, bits_handle: i32) -> Result<u64, HostError> {
    let bits = host.managed.big_int(bits_handle)?;
    if bits.sign() == Sign::Minus || bits.bits() > 32 {
        return Err(HostError::ArgumentDecode("shift amount".to_string()));
    }
    let (_, digits) = bits.to_u64_digits();
    Ok(digits.first().copied().unwrap_or(0))
}

pub(super) fn big_int_shl(
    host: &mut CallHost,
    args: &[WasmValue],
    _memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    let dest = arg_i32(args, 0)?;
    let a = arg_i32(args, 1)?;
    let bits_handle = arg_i32(args, 2)?;
    charge_arith(host, a, bits_handle, "bigIntShl")?;
    let bits = shift_bits(host, bits_handle)?;
    let value = host.managed.big_int(a)?.clone();
    host.managed.set_big_int(dest, value << bits);
    ret_void()
}

pub(super) fn big_int_shr(
    host: &mut CallHost,
    args: &[WasmValue],
    _memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    let dest = arg_i32(args, 0)?;
    let a = arg_i32(args, 1)?;
    let bits_handle = arg_i32(args, 2)?;
    charge_arith(host, a, bits_handle, "bigIntShr")?;
    let bits = shift_bits(host, bits_handle)?;
    let value = host.managed.big_int(a)?.clone();
    host.managed.set_big_int(dest, value >> bits);
    ret_void()
}

pub(super) fn big_int_cmp(
    host: &mut CallHost,
    args: &[WasmValue],
    _memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    host.metering
        .use_gas_traced(host.shared.gas_config.big_int_api.cmp, "bigIntCmp")?;
    let a = arg_i32(args, 0)?;
    let b = arg_i32(args, 1)?;
    let lhs = host.managed.big_int(a)?;
    let rhs = host.managed.big_int(b)?;
    ret_i32(match lhs.cmp(rhs) {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Equal => 0,
        std::cmp::Ordering::Greater => 1,
    })
}

pub(super) fn big_int_sign(
    host: &mut CallHost,
    args: &[WasmValue],
    _memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    host.metering
        .use_gas_traced(host.shared.gas_config.big_int_api.cmp, "bigIntSign")?;
    let handle = arg_i32(args, 0)?;
    let value = host.managed.big_int(handle)?;
    ret_i32(match value.sign() {
        Sign::Minus => -1,
        Sign::NoSign => 0,
        Sign::Plus => 1,
    })
}

pub(super) fn big_int_abs(
    host: &mut CallHost,
    args: &[WasmValue],
    _memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    let dest = arg_i32(args, 0)?;
    let a = arg_i32(args, 1)?;
    charge_arith(host, a, a, "bigIntAbs")?;
    let value = host.managed.big_int(a)?.abs();
    host.managed.set_big_int(dest, value);
    ret_void()
}

pub(super) fn big_int_neg(
    host: &mut CallHost,
    args: &[WasmValue],
    _memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    let dest = arg_i32(args, 0)?;
    let a = arg_i32(args, 1)?;
    charge_arith(host, a, a, "bigIntNeg")?;
    let value = -host.managed.big_int(a)?.clone();
    host.managed.set_big_int(dest, value);
    ret_void()
}

pub(super) fn big_int_unsigned_byte_length(
    host: &mut CallHost,
    args: &[WasmValue],
    _memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    host.metering.use_gas_traced(
        host.shared.gas_config.big_int_api.get_bytes,
        "bigIntUnsignedByteLength",
    )?;
    let handle = arg_i32(args, 0)?;
    let value = host.managed.big_int(handle)?;
    ret_i32(value.magnitude().to_bytes_be().len() as i32)
}

pub(super) fn big_int_get_unsigned_bytes(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    host.metering.use_gas_traced(
        host.shared.gas_config.big_int_api.get_bytes,
        "bigIntGetUnsignedBytes",
    )?;
    let handle = arg_i32(args, 0)?;
    let offset = arg(args, 1)?;
    let value = host.managed.big_int(handle)?;
    if value.sign() == Sign::Minus {
        return Err(HostError::ArgumentDecode("negative big int".to_string()));
    }
    let bytes = value.magnitude().to_bytes_be();
    host.metering.use_gas_for_data_copy(bytes.len() as u64)?;
    host.runtime.mem_store(memory, offset, &bytes)?;
    ret_i32(bytes.len() as i32)
}

pub(super) fn big_int_set_unsigned_bytes(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    host.metering.use_gas_traced(
        host.shared.gas_config.big_int_api.set_bytes,
        "bigIntSetUnsignedBytes",
    )?;
    let handle = arg_i32(args, 0)?;
    let offset = arg(args, 1)?;
    let length = arg(args, 2)?;
    let bytes = host.runtime.mem_load(memory, offset, length)?;
    host.metering.use_gas_for_data_copy(bytes.len() as u64)?;
    host.managed
        .set_big_int(handle, BigInt::from_bytes_be(Sign::Plus, &bytes));
    ret_void()
}

pub(super) fn big_int_finish_unsigned(
    host: &mut CallHost,
    args: &[WasmValue],
    _memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    host.metering
        .use_gas_traced(host.shared.gas_config.big_int_api.finish, "bigIntFinishUnsigned")?;
    let handle = arg_i32(args, 0)?;
    let value = host.managed.big_int(handle)?;
    if value.sign() == Sign::Minus {
        return Err(HostError::ArgumentDecode("negative big int".to_string()));
    }
    let bytes = value.magnitude().to_bytes_be();
    host.metering
        .use_gas(host.shared.gas_config.base_ops.persist_per_byte.saturating_mul(bytes.len() as u64))?;
    host.output.finish(bytes);
    ret_void()
}

pub(super) fn big_int_get_unsigned_argument(
    host: &mut CallHost,
    args: &[WasmValue],
    _memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    host.metering.use_gas_traced(
        host.shared.gas_config.host_api.get_argument,
        "bigIntGetUnsignedArgument",
    )?;
    let index = arg_i32(args, 0)?;
    let dest = arg_i32(args, 1)?;
    let argument = host
        .runtime
        .vm_input()
        .arguments
        .get(index.max(0) as usize)
        .cloned()
        .ok_or(HostError::ArgumentOutOfRange)?;
    host.managed
        .set_big_int(dest, BigInt::from_bytes_be(Sign::Plus, &argument));
    ret_void()
}

pub(super) fn big_int_get_call_value(
    host: &mut CallHost,
    args: &[WasmValue],
    _memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    host.metering
        .use_gas_traced(host.shared.gas_config.host_api.get_context, "bigIntGetCallValue")?;
    let dest = arg_i32(args, 0)?;
    let value = host.runtime.vm_input().call_value.clone();
    host.managed
        .set_big_int(dest, BigInt::from_biguint(Sign::Plus, value));
    ret_void()
}

pub(super) fn big_int_storage_store_unsigned(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    let key_offset = arg(args, 0)?;
    let key_length = arg(args, 1)?;
    let source = arg_i32(args, 2)?;
    let key = host.runtime.mem_load(memory, key_offset, key_length)?;
    let value = host.managed.big_int(source)?;
    if value.sign() == Sign::Minus {
        return Err(HostError::ArgumentDecode("negative big int".to_string()));
    }
    let bytes = value.magnitude().to_bytes_be();

    let read_only = host.runtime.read_only();
    let cost_optimized = host.shared.epochs.storage_api_cost_optimization();
    let status = host.storage.set_storage(
        &key,
        &bytes,
        &mut host.output,
        host.shared.hook.as_ref(),
        &mut host.metering,
        read_only,
        false,
        cost_optimized,
    )?;
    ret_i32(super::storage_api::storage_status_code(status))
}

pub(super) fn big_int_storage_load_unsigned(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    let key_offset = arg(args, 0)?;
    let key_length = arg(args, 1)?;
    let dest = arg_i32(args, 2)?;
    let key = host.runtime.mem_load(memory, key_offset, key_length)?;

    let cost_optimized = host.shared.epochs.storage_api_cost_optimization();
    let value = host.storage.get_storage(
        &key,
        &host.output,
        host.shared.hook.as_ref(),
        &mut host.metering,
        cost_optimized,
    )?;
    host.managed
        .set_big_int(dest, BigInt::from_bytes_be(Sign::Plus, &value));
    ret_i64(value.len() as i64)
}
