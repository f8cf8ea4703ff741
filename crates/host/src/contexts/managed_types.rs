// Path: crates/host/src/contexts/managed_types.rs
//! The managed-types context: the per-call arena for big integers, big
//! floats, managed buffers, elliptic-curve parameters and managed maps.
//!
//! Values are owned by the arena and referenced from WASM by `i32` handles,
//! which makes cyclic references impossible by construction. Handles are
//! stable for the duration of one top-level execution; nested calls snapshot
//! the maps and restore them on unwind.

use num_bigint::{BigInt, Sign};
use std::collections::{BTreeMap, HashMap};

use crucible_types::error::HostError;

/// Curves addressable through the EEI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcCurve {
    /// secp256k1, the only curve with point arithmetic in the default build.
    Secp256k1,
    /// NIST P-256; parameters are held but point arithmetic is delegated.
    P256,
}

impl EcCurve {
    /// Byte length of a field element on this curve.
    pub fn field_len(&self) -> usize {
        32
    }
}

#[derive(Debug, Clone, Default)]
struct Arena {
    big_ints: HashMap<i32, BigInt>,
    big_floats: HashMap<i32, f64>,
    buffers: HashMap<i32, Vec<u8>>,
    curves: HashMap<i32, EcCurve>,
    maps: HashMap<i32, BTreeMap<Vec<u8>, Vec<u8>>>,
    next_handle: i32,
}

/// The per-call arena, with snapshots for nested frames.
#[derive(Debug, Default)]
pub struct ManagedTypesContext {
    arena: Arena,
    state_stack: Vec<Arena>,
}

impl ManagedTypesContext {
    /// An empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets per-call state.
    pub fn init_state(&mut self) {
        self.arena = Arena::default();
        self.state_stack.clear();
    }

    /// Snapshots the arena (shallow clone of every handle map plus the
    /// handle counter).
    pub fn push_state(&mut self) {
        self.state_stack.push(self.arena.clone());
    }

    /// Keeps the child's arena; handles created by the child stay valid.
    pub fn pop_set_active(&mut self) {
        self.state_stack.pop();
    }

    /// Restores the snapshot taken at push time.
    pub fn pop_discard(&mut self) {
        if let Some(arena) = self.state_stack.pop() {
            self.arena = arena;
        }
    }

    /// Drops every snapshot.
    pub fn clear_state_stack(&mut self) {
        self.state_stack.clear();
    }

    /// Current state-stack depth.
    pub fn stack_depth(&self) -> usize {
        self.state_stack.len()
    }

    fn next_handle(&mut self) -> i32 {
        let handle = self.arena.next_handle;
        self.arena.next_handle += 1;
        handle
    }

    // --- big integers ---

    /// Allocates a big integer.
    pub fn new_big_int(&mut self, value: BigInt) -> i32 {
        let handle = self.next_handle();
        self.arena.big_ints.insert(handle, value);
        handle
    }

    /// Allocates a big integer from unsigned big-endian bytes.
    pub fn new_big_int_from_bytes(&mut self, bytes: &[u8]) -> i32 {
        self.new_big_int(BigInt::from_bytes_be(Sign::Plus, bytes))
    }

    /// Reads a big integer; unknown handles fail the call.
    pub fn big_int(&self, handle: i32) -> Result<&BigInt, HostError> {
        self.arena
            .big_ints
            .get(&handle)
            .ok_or(HostError::NoValueUnderHandle)
    }

    /// Replaces the value under an existing handle, creating it if needed.
    pub fn set_big_int(&mut self, handle: i32, value: BigInt) {
        self.arena.big_ints.insert(handle, value);
    }

    /// Combined byte length of two operands, for gas charging.
    pub fn big_int_operand_len(&self, a: i32, b: i32) -> Result<u64, HostError> {
        let la = (self.big_int(a)?.bits() / 8 + 1) as u64;
        let lb = (self.big_int(b)?.bits() / 8 + 1) as u64;
        Ok(la + lb)
    }

    // --- big floats ---

    /// Allocates a big float.
    pub fn new_big_float(&mut self, value: f64) -> Result<i32, HostError> {
        if value.is_nan() || value.is_infinite() {
            return Err(HostError::BigFloatInvalid);
        }
        let handle = self.next_handle();
        self.arena.big_floats.insert(handle, value);
        Ok(handle)
    }

    /// Reads a big float.
    pub fn big_float(&self, handle: i32) -> Result<f64, HostError> {
        self.arena
            .big_floats
            .get(&handle)
            .copied()
            .ok_or(HostError::NoValueUnderHandle)
    }

    /// Replaces the value under an existing handle, creating it if needed.
    /// Non-finite results are rejected so execution stays deterministic.
    pub fn set_big_float(&mut self, handle: i32, value: f64) -> Result<(), HostError> {
        if value.is_nan() || value.is_infinite() {
            return Err(HostError::BigFloatInvalid);
        }
        self.arena.big_floats.insert(handle, value);
        Ok(())
    }

    // --- managed buffers ---

    /// Allocates a buffer.
    pub fn new_buffer(&mut self, bytes: Vec<u8>) -> i32 {
        let handle = self.next_handle();
        self.arena.buffers.insert(handle, bytes);
        handle
    }

    /// Reads a buffer.
    pub fn buffer(&self, handle: i32) -> Result<&Vec<u8>, HostError> {
        self.arena
            .buffers
            .get(&handle)
            .ok_or(HostError::NoValueUnderHandle)
    }

    /// Mutable access to a buffer.
    pub fn buffer_mut(&mut self, handle: i32) -> Result<&mut Vec<u8>, HostError> {
        self.arena
            .buffers
            .get_mut(&handle)
            .ok_or(HostError::NoValueUnderHandle)
    }

    /// Replaces the bytes under an existing handle, creating it if needed.
    pub fn set_buffer(&mut self, handle: i32, bytes: Vec<u8>) {
        self.arena.buffers.insert(handle, bytes);
    }

    // --- elliptic curves ---

    /// Allocates a curve-parameters handle.
    pub fn new_curve(&mut self, curve: EcCurve) -> i32 {
        let handle = self.next_handle();
        self.arena.curves.insert(handle, curve);
        handle
    }

    /// Reads curve parameters.
    pub fn curve(&self, handle: i32) -> Result<EcCurve, HostError> {
        self.arena
            .curves
            .get(&handle)
            .copied()
            .ok_or(HostError::NoValueUnderHandle)
    }

    // --- managed maps ---

    /// Allocates a managed map.
    pub fn new_map(&mut self) -> i32 {
        let handle = self.next_handle();
        self.arena.maps.insert(handle, BTreeMap::new());
        handle
    }

    /// Reads a value out of a managed map.
    pub fn map_get(&self, handle: i32, key: &[u8]) -> Result<Vec<u8>, HostError> {
        let map = self
            .arena
            .maps
            .get(&handle)
            .ok_or(HostError::NoValueUnderHandle)?;
        Ok(map.get(key).cloned().unwrap_or_default())
    }

    /// Writes a value into a managed map.
    pub fn map_put(&mut self, handle: i32, key: &[u8], value: &[u8]) -> Result<(), HostError> {
        let map = self
            .arena
            .maps
            .get_mut(&handle)
            .ok_or(HostError::NoValueUnderHandle)?;
        map.insert(key.to_vec(), value.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_monotonic_across_types() {
        let mut managed = ManagedTypesContext::new();
        let a = managed.new_big_int(BigInt::from(1));
        let b = managed.new_buffer(vec![1]);
        let c = managed.new_map();
        assert_eq!((a, b, c), (0, 1, 2));
    }

    #[test]
    fn unknown_handle_is_an_error() {
        let managed = ManagedTypesContext::new();
        assert!(matches!(
            managed.big_int(7),
            Err(HostError::NoValueUnderHandle)
        ));
    }

    #[test]
    fn pop_discard_restores_snapshot() {
        let mut managed = ManagedTypesContext::new();
        let kept = managed.new_big_int(BigInt::from(10));

        managed.push_state();
        let child = managed.new_big_int(BigInt::from(20));
        managed.set_big_int(kept, BigInt::from(99));
        managed.pop_discard();

        assert_eq!(managed.big_int(kept).unwrap(), &BigInt::from(10));
        assert!(managed.big_int(child).is_err());
    }

    #[test]
    fn pop_set_active_keeps_child_handles() {
        let mut managed = ManagedTypesContext::new();
        managed.push_state();
        let child = managed.new_buffer(b"data".to_vec());
        managed.pop_set_active();
        assert_eq!(managed.buffer(child).unwrap(), b"data");
    }

    #[test]
    fn non_finite_big_floats_are_rejected() {
        let mut managed = ManagedTypesContext::new();
        assert!(managed.new_big_float(f64::NAN).is_err());
        assert!(managed.new_big_float(f64::INFINITY).is_err());
        let h = managed.new_big_float(2.0).unwrap();
        assert!(managed.set_big_float(h, f64::NEG_INFINITY).is_err());
    }
}
