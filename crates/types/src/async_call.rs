// Path: crates/types/src/async_call.rs
//! Persisted records of in-flight asynchronous sub-calls.
//!
//! When a contract registers an asynchronous call to another shard, execution
//! suspends: the runtime serializes its [`AsyncContext`] into storage and
//! returns. The callback later arrives as a fresh top-level call, at which
//! point the context is reloaded to locate the right callback function and
//! the gas locked for it.

use parity_scale_codec::{Decode, Encode};

use crate::address::Address;

/// Lifecycle of one registered asynchronous call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode, Default)]
pub enum AsyncCallStatus {
    /// Registered but not yet dispatched or resolved.
    #[default]
    Pending,
    /// The destination executed successfully.
    Resolved,
    /// The destination failed; the error callback applies.
    Rejected,
}

/// One asynchronous call generated during execution.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Default)]
pub struct AsyncCall {
    /// Status of the call.
    pub status: AsyncCallStatus,
    /// The account the call is addressed to.
    pub destination: Address,
    /// Serialized call data (function plus arguments).
    pub data: Vec<u8>,
    /// Gas forwarded to the destination.
    pub gas_limit: u64,
    /// Gas locked for invoking the callback.
    pub gas_locked: u64,
    /// Value transferred, as unsigned big-endian bytes.
    pub value_bytes: Vec<u8>,
    /// Name of the callback invoked when the destination succeeds.
    pub success_callback: Vec<u8>,
    /// Name of the callback invoked when the destination fails.
    pub error_callback: Vec<u8>,
}

/// A group of asynchronous calls registered under one caller-supplied
/// context identifier.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Default)]
pub struct AsyncCallGroup {
    /// The caller-supplied context identifier.
    pub identifier: Vec<u8>,
    /// Calls registered under this identifier, in registration order.
    pub calls: Vec<AsyncCall>,
}

impl AsyncCallGroup {
    /// A new, empty group.
    pub fn new(identifier: Vec<u8>) -> Self {
        Self {
            identifier,
            calls: Vec::new(),
        }
    }

    /// Finds the call addressed to `destination`, if any.
    pub fn find_call(&self, destination: &Address) -> Option<&AsyncCall> {
        self.calls.iter().find(|c| &c.destination == destination)
    }
}

/// The full async bookkeeping of one execution, serialized to storage on
/// suspension.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode, Default)]
pub struct AsyncContext {
    /// The account that registered the calls.
    pub caller: Address,
    /// Return data recorded at suspension time.
    pub return_data: Vec<u8>,
    /// Groups keyed by context identifier, in registration order.
    pub call_groups: Vec<AsyncCallGroup>,
}

impl AsyncContext {
    /// Returns the group with the given identifier, if present.
    pub fn group(&self, identifier: &[u8]) -> Option<&AsyncCallGroup> {
        self.call_groups.iter().find(|g| g.identifier == identifier)
    }

    /// Returns the group with the given identifier, creating it when absent.
    pub fn group_mut(&mut self, identifier: &[u8]) -> &mut AsyncCallGroup {
        if let Some(idx) = self
            .call_groups
            .iter()
            .position(|g| g.identifier == identifier)
        {
            &mut self.call_groups[idx]
        } else {
            self.call_groups.push(AsyncCallGroup::new(identifier.to_vec()));
            let last = self.call_groups.len() - 1;
            &mut self.call_groups[last]
        }
    }

    /// True when no calls are registered.
    pub fn is_empty(&self) -> bool {
        self.call_groups.iter().all(|g| g.calls.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;

    #[test]
    fn context_roundtrips_through_codec() {
        let mut ctx = AsyncContext {
            caller: Address::from_tag("caller"),
            ..AsyncContext::default()
        };
        ctx.group_mut(b"ctx-1").calls.push(AsyncCall {
            destination: Address::from_tag("dest"),
            data: b"doSomething@01".to_vec(),
            gas_limit: 5000,
            gas_locked: 1000,
            value_bytes: vec![42],
            success_callback: b"callBack".to_vec(),
            error_callback: b"callBack".to_vec(),
            status: AsyncCallStatus::Pending,
        });

        let bytes = codec::to_bytes_canonical(&ctx).unwrap();
        let decoded: AsyncContext = codec::from_bytes_canonical(&bytes).unwrap();
        assert_eq!(ctx, decoded);
    }

    #[test]
    fn group_mut_reuses_existing_identifier() {
        let mut ctx = AsyncContext::default();
        ctx.group_mut(b"a").calls.push(AsyncCall::default());
        ctx.group_mut(b"a").calls.push(AsyncCall::default());
        assert_eq!(ctx.call_groups.len(), 1);
        assert_eq!(ctx.call_groups[0].calls.len(), 2);
    }
}
