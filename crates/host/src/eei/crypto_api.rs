// Path: crates/host/src/eei/crypto_api.rs
//! Hashing, signature verification and elliptic-curve operations.

use k256::elliptic_curve::group::Group;
use k256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use k256::elliptic_curve::PrimeField;
use k256::{AffinePoint, EncodedPoint, ProjectivePoint, Scalar};
use num_bigint::BigInt;
use num_bigint::Sign;

use crucible_api::engine::{MemoryView, WasmValue};
use crucible_types::error::HostError;

use crate::contexts::EcCurve;
use crate::host::CallHost;
use super::{arg, arg_i32, ret_i32, ret_void};

fn digest_op(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
    cost: u64,
    api: &str,
    hash: impl Fn(&CallHost, &[u8]) -> Result<Vec<u8>, HostError>,
) -> Result<Vec<WasmValue>, HostError> {
    host.metering.use_gas_traced(cost, api)?;
    let data_offset = arg(args, 0)?;
    let length = arg(args, 1)?;
    let result_offset = arg(args, 2)?;
    let data = host.runtime.mem_load(memory, data_offset, length)?;
    host.metering.use_gas_for_data_copy(data.len() as u64)?;
    let digest = hash(host, &data)?;
    host.runtime.mem_store(memory, result_offset, &digest)?;
    ret_i32(0)
}

pub(super) fn sha256(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    let cost = host.shared.gas_config.crypto_api.sha256;
    digest_op(host, args, memory, cost, "sha256", |h, d| {
        h.shared.crypto.sha256(d).map_err(Into::into)
    })
}

pub(super) fn keccak256(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    let cost = host.shared.gas_config.crypto_api.keccak256;
    digest_op(host, args, memory, cost, "keccak256", |h, d| {
        h.shared.crypto.keccak256(d).map_err(Into::into)
    })
}

pub(super) fn ripemd160(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    let cost = host.shared.gas_config.crypto_api.ripemd160;
    digest_op(host, args, memory, cost, "ripemd160", |h, d| {
        h.shared.crypto.ripemd160(d).map_err(Into::into)
    })
}

fn verify_op(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
    cost: u64,
    api: &str,
    key_len: i64,
    sig_len: i64,
    verify: impl Fn(&CallHost, &[u8], &[u8], &[u8]) -> Result<(), crucible_types::error::CryptoError>,
) -> Result<Vec<WasmValue>, HostError> {
    host.metering.use_gas_traced(cost, api)?;
    let key_offset = arg(args, 0)?;
    let message_offset = arg(args, 1)?;
    let message_length = arg(args, 2)?;
    let sig_offset = arg(args, 3)?;

    let key = host.runtime.mem_load(memory, key_offset, key_len)?;
    let message = host.runtime.mem_load(memory, message_offset, message_length)?;
    let sig = host.runtime.mem_load(memory, sig_offset, sig_len)?;
    host.metering.use_gas_for_data_copy(message.len() as u64)?;

    match verify(host, &key, &message, &sig) {
        Ok(()) => ret_i32(0),
        Err(_) => ret_i32(1),
    }
}

pub(super) fn verify_bls(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    let cost = host.shared.gas_config.crypto_api.verify_bls;
    verify_op(host, args, memory, cost, "verifyBLS", 96, 48, |h, k, m, s| {
        h.shared.crypto.verify_bls(k, m, s)
    })
}

pub(super) fn verify_ed25519(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    let cost = host.shared.gas_config.crypto_api.verify_ed25519;
    verify_op(host, args, memory, cost, "verifyEd25519", 32, 64, |h, k, m, s| {
        h.shared.crypto.verify_ed25519(k, m, s)
    })
}

pub(super) fn verify_secp256k1(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    let cost = host.shared.gas_config.crypto_api.verify_secp256k1;
    verify_op(host, args, memory, cost, "verifySecp256k1", 33, 64, |h, k, m, s| {
        h.shared.crypto.verify_secp256k1(k, m, s)
    })
}

// --- elliptic-curve operations (gated by the managed-crypto epoch) ---

fn require_managed_crypto(host: &CallHost) -> Result<(), HostError> {
    if !host.shared.epochs.managed_crypto_api() {
        return Err(HostError::FunctionNotFound);
    }
    Ok(())
}

fn point_from_handles(
    host: &CallHost,
    curve: EcCurve,
    x_handle: i32,
    y_handle: i32,
) -> Result<ProjectivePoint, HostError> {
    if curve != EcCurve::Secp256k1 {
        return Err(HostError::Crypto("unsupported curve".to_string()));
    }
    let x = host.managed.big_int(x_handle)?;
    let y = host.managed.big_int(y_handle)?;
    let field_len = curve.field_len();
    let mut x_bytes = vec![0u8; field_len];
    let mut y_bytes = vec![0u8; field_len];
    let (_, x_raw) = x.to_bytes_be();
    let (_, y_raw) = y.to_bytes_be();
    if x_raw.len() > field_len || y_raw.len() > field_len {
        return Err(HostError::Crypto("coordinate out of field".to_string()));
    }
    x_bytes[field_len - x_raw.len()..].copy_from_slice(&x_raw);
    y_bytes[field_len - y_raw.len()..].copy_from_slice(&y_raw);

    let encoded = EncodedPoint::from_affine_coordinates(
        k256::FieldBytes::from_slice(&x_bytes),
        k256::FieldBytes::from_slice(&y_bytes),
        false,
    );
    let affine: Option<AffinePoint> = AffinePoint::from_encoded_point(&encoded).into();
    affine
        .map(ProjectivePoint::from)
        .ok_or_else(|| HostError::Crypto("point not on curve".to_string()))
}

fn store_point(host: &mut CallHost, point: &ProjectivePoint, x_handle: i32, y_handle: i32) {
    let encoded = point.to_affine().to_encoded_point(false);
    let x = encoded.x().map(|x| x.to_vec()).unwrap_or_default();
    let y = encoded.y().map(|y| y.to_vec()).unwrap_or_default();
    host.managed
        .set_big_int(x_handle, BigInt::from_bytes_be(Sign::Plus, &x));
    host.managed
        .set_big_int(y_handle, BigInt::from_bytes_be(Sign::Plus, &y));
}

pub(super) fn create_ec(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    require_managed_crypto(host)?;
    host.metering
        .use_gas_traced(host.shared.gas_config.crypto_api.ec_marshal, "createEC")?;
    let name_offset = arg(args, 0)?;
    let name_length = arg(args, 1)?;
    let name = host.runtime.mem_load(memory, name_offset, name_length)?;
    let curve = match name.as_slice() {
        b"secp256k1" => EcCurve::Secp256k1,
        b"p256" => EcCurve::P256,
        _ => return Err(HostError::Crypto("unknown curve".to_string())),
    };
    ret_i32(host.managed.new_curve(curve))
}

pub(super) fn add_ec(
    host: &mut CallHost,
    args: &[WasmValue],
    _memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    require_managed_crypto(host)?;
    host.metering
        .use_gas_traced(host.shared.gas_config.crypto_api.ec_add, "addEC")?;
    let x_result = arg_i32(args, 0)?;
    let y_result = arg_i32(args, 1)?;
    let ec_handle = arg_i32(args, 2)?;
    let first_x = arg_i32(args, 3)?;
    let first_y = arg_i32(args, 4)?;
    let second_x = arg_i32(args, 5)?;
    let second_y = arg_i32(args, 6)?;

    let curve = host.managed.curve(ec_handle)?;
    let first = point_from_handles(host, curve, first_x, first_y)?;
    let second = point_from_handles(host, curve, second_x, second_y)?;
    let sum = first + second;
    store_point(host, &sum, x_result, y_result);
    ret_void()
}

pub(super) fn double_ec(
    host: &mut CallHost,
    args: &[WasmValue],
    _memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    require_managed_crypto(host)?;
    host.metering
        .use_gas_traced(host.shared.gas_config.crypto_api.ec_double, "doubleEC")?;
    let x_result = arg_i32(args, 0)?;
    let y_result = arg_i32(args, 1)?;
    let ec_handle = arg_i32(args, 2)?;
    let point_x = arg_i32(args, 3)?;
    let point_y = arg_i32(args, 4)?;

    let curve = host.managed.curve(ec_handle)?;
    let point = point_from_handles(host, curve, point_x, point_y)?;
    let doubled = point.double();
    store_point(host, &doubled, x_result, y_result);
    ret_void()
}

pub(super) fn scalar_mult_ec(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    require_managed_crypto(host)?;
    host.metering
        .use_gas_traced(host.shared.gas_config.crypto_api.ec_mult, "scalarMultEC")?;
    let x_result = arg_i32(args, 0)?;
    let y_result = arg_i32(args, 1)?;
    let ec_handle = arg_i32(args, 2)?;
    let point_x = arg_i32(args, 3)?;
    let point_y = arg_i32(args, 4)?;
    let data_offset = arg(args, 5)?;
    let data_length = arg(args, 6)?;

    let curve = host.managed.curve(ec_handle)?;
    let point = point_from_handles(host, curve, point_x, point_y)?;
    let scalar_bytes = host.runtime.mem_load(memory, data_offset, data_length)?;
    if scalar_bytes.len() > 32 {
        return Err(HostError::Crypto("scalar too large".to_string()));
    }
    let mut padded = [0u8; 32];
    padded[32 - scalar_bytes.len()..].copy_from_slice(&scalar_bytes);
    let scalar: Option<Scalar> = Scalar::from_repr(padded.into()).into();
    let scalar = scalar.ok_or_else(|| HostError::Crypto("scalar out of range".to_string()))?;
    let product = point * scalar;
    store_point(host, &product, x_result, y_result);
    ret_void()
}

pub(super) fn marshal_ec(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    require_managed_crypto(host)?;
    host.metering
        .use_gas_traced(host.shared.gas_config.crypto_api.ec_marshal, "marshalEC")?;
    let point_x = arg_i32(args, 0)?;
    let point_y = arg_i32(args, 1)?;
    let ec_handle = arg_i32(args, 2)?;
    let result_offset = arg(args, 3)?;

    let curve = host.managed.curve(ec_handle)?;
    let point = point_from_handles(host, curve, point_x, point_y)?;
    let encoded = point.to_affine().to_encoded_point(false);
    host.runtime.mem_store(memory, result_offset, encoded.as_bytes())?;
    ret_i32(encoded.as_bytes().len() as i32)
}

pub(super) fn unmarshal_ec(
    host: &mut CallHost,
    args: &[WasmValue],
    memory: &mut dyn MemoryView,
) -> Result<Vec<WasmValue>, HostError> {
    require_managed_crypto(host)?;
    host.metering
        .use_gas_traced(host.shared.gas_config.crypto_api.ec_unmarshal, "unmarshalEC")?;
    let x_result = arg_i32(args, 0)?;
    let y_result = arg_i32(args, 1)?;
    let ec_handle = arg_i32(args, 2)?;
    let data_offset = arg(args, 3)?;
    let data_length = arg(args, 4)?;

    let curve = host.managed.curve(ec_handle)?;
    if curve != EcCurve::Secp256k1 {
        return Err(HostError::Crypto("unsupported curve".to_string()));
    }
    let data = host.runtime.mem_load(memory, data_offset, data_length)?;
    let encoded = EncodedPoint::from_bytes(&data)
        .map_err(|_| HostError::Crypto("malformed point encoding".to_string()))?;
    let affine: Option<AffinePoint> = AffinePoint::from_encoded_point(&encoded).into();
    let point = affine
        .map(ProjectivePoint::from)
        .ok_or_else(|| HostError::Crypto("point not on curve".to_string()))?;
    store_point(host, &point, x_result, y_result);
    ret_i32(0)
}
