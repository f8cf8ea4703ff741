// Path: crates/host/src/eei/bigfloat_api.rs
//! Big-float operations over the managed-types arena.
//!
//! Precision is fixed by the host: values are IEEE-754 doubles, non-finite
//! results fail the call, so results are bit-identical across hosts.

use crucible_api::engine::{MemoryView, WasmValue};
use crucible_types::error::HostError;

use crate::host::CallHost;
use super::{arg, arg_i32, ret_i32, ret_void};

pub(super) fn big_float_new_from_parts(
    host: &mut CallHost,
    args: &[WasmValue],
    _memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    host.metering
        .use_gas_traced(host.shared.gas_config.big_float_api.new, "bigFloatNewFromParts")?;
    let integral = arg_i32(args, 0)?;
    let fractional = arg_i32(args, 1)?;
    let exponent = arg_i32(args, 2)?;

    if !(-18..=0).contains(&exponent) {
        return Err(HostError::BigFloatInvalid);
    }
    let value = integral as f64
        + (fractional as f64) * 10f64.powi(exponent);
    ret_i32(host.managed.new_big_float(value)?)
}

macro_rules! bigfloat_binop {
    ($name:ident, $api:literal, $op:tt) => {
        pub(super) fn $name(
            host: &mut CallHost,
            args: &[WasmValue],
            _memory: &mut dyn MemoryView,
        ) -> Result<Vec<WasmValue>, HostError> {
            host.metering
                .use_gas_traced(host.shared.gas_config.big_float_api.arith, $api)?;
            let dest = arg_i32(args, 0)?;
            let a = arg_i32(args, 1)?;
            let b = arg_i32(args, 2)?;
            let lhs = host.managed.big_float(a)?;
            let rhs = host.managed.big_float(b)?;
            host.managed.set_big_float(dest, lhs $op rhs)?;
            ret_void()
        }
    };
}

bigfloat_binop!(big_float_add, "bigFloatAdd", +);
bigfloat_binop!(big_float_sub, "bigFloatSub", -);
bigfloat_binop!(big_float_mul, "bigFloatMul", *);
bigfloat_binop!(big_float_div, "bigFloatDiv", /);

pub(super) fn big_float_sqrt(
    host: &mut CallHost,
    args: &[WasmValue],
    _memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    host.metering
        .use_gas_traced(host.shared.gas_config.big_float_api.sqrt, "bigFloatSqrt")?;
    let dest = arg_i32(args, 0)?;
    let op = arg_i32(args, 1)?;
    let value = host.managed.big_float(op)?;
    if value < 0.0 {
        return Err(HostError::BigFloatInvalid);
    }
    host.managed.set_big_float(dest, value.sqrt())?;
    ret_void()
}

pub(super) fn big_float_cmp(
    host: &mut CallHost,
    args: &[WasmValue],
    _memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    host.metering
        .use_gas_traced(host.shared.gas_config.big_float_api.cmp, "bigFloatCmp")?;
    let a = arg_i32(args, 0)?;
    let b = arg_i32(args, 1)?;
    let lhs = host.managed.big_float(a)?;
    let rhs = host.managed.big_float(b)?;
    ret_i32(if lhs < rhs {
        -1
    } else if lhs > rhs {
        1
    } else {
        0
    })
}

pub(super) fn big_float_finish(
    host: &mut CallHost,
    args: &[WasmValue],
    _memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    host.metering
        .use_gas_traced(host.shared.gas_config.big_float_api.arith, "bigFloatFinish")?;
    let handle = arg_i32(args, 0)?;
    let value = host.managed.big_float(handle)?;
    host.output.finish(value.to_be_bytes().to_vec());
    ret_void()
}
