// Path: crates/host/src/contexts/mod.rs
//! The six per-call contexts.
//!
//! Each context owns one slice of a call's state and exposes the state-stack
//! discipline used by nested execution: `push_state` snapshots, then either
//! `pop_set_active` (commit) or `pop_discard` (roll back). Contexts never
//! hold references to each other; operations that need a sibling receive it
//! as an explicit parameter.

mod blockchain;
mod managed_types;
mod metering;
mod output;
mod reserved;
mod runtime;
mod storage;

pub use blockchain::BlockchainContext;
pub use managed_types::{EcCurve, ManagedTypesContext};
pub use metering::{GasTraceMap, MeteringContext};
pub use output::OutputContext;
pub use reserved::ReservedFunctions;
pub use runtime::{InstanceEnv, RecordedError, RuntimeContext};
pub use storage::StorageContext;
