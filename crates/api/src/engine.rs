// Path: crates/api/src/engine.rs
//! The WASM engine binding: compilation, instantiation, memory, breakpoints.
//!
//! The host drives the engine exclusively through these traits, which keeps
//! the concrete engine replaceable (the workspace ships a wasmtime adapter in
//! `crucible-wasm`, and tests substitute a scripted mock). Opcode metering,
//! breakpoint observation and import binding are all engine-side concerns
//! hidden behind this seam.

use std::sync::Arc;

use crucible_types::breakpoint::BreakpointCell;
use crucible_types::error::EngineError;
use crucible_types::gas::OpcodeCosts;

/// A scalar crossing the WASM boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WasmValue {
    /// A 32-bit integer.
    I32(i32),
    /// A 64-bit integer.
    I64(i64),
}

impl WasmValue {
    /// The value as `i32`, truncating a 64-bit value.
    pub fn as_i32(&self) -> i32 {
        match self {
            WasmValue::I32(v) => *v,
            WasmValue::I64(v) => *v as i32,
        }
    }

    /// The value as `i64`.
    pub fn as_i64(&self) -> i64 {
        match self {
            WasmValue::I32(v) => *v as i64,
            WasmValue::I64(v) => *v,
        }
    }
}

/// Bounds-checked access to the linear memory of a running instance.
///
/// A view is only valid for the duration of one EEI dispatch; the engine
/// constructs it around whatever memory handle its host-function callback
/// receives.
pub trait MemoryView {
    /// Current memory size in bytes.
    fn len(&self) -> u64;

    /// True when the instance exports no memory or an empty one.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies `length` bytes starting at `offset` out of linear memory.
    fn load(&self, offset: u64, length: u64) -> Result<Vec<u8>, EngineError>;

    /// Copies `data` into linear memory at `offset`.
    fn store(&mut self, offset: u64, data: &[u8]) -> Result<(), EngineError>;
}

/// The host side of the import binding.
///
/// The engine routes every imported function a contract calls to
/// [`EeiDispatcher::dispatch`], passing the import name, the raw arguments
/// and a view over the caller's linear memory. An `Err` return becomes an
/// engine trap, aborting execution at that point.
pub trait EeiDispatcher: Send {
    /// Executes the named EEI function.
    fn dispatch(
        &mut self,
        name: &str,
        args: &[WasmValue],
        memory: &mut dyn MemoryView,
    ) -> Result<Vec<WasmValue>, String>;

    /// The set of import names this dispatcher understands, used for
    /// contract verification and reserved-name population.
    fn import_names(&self) -> &[&'static str];
}

/// A compiled WASM module, ready for (repeated) instantiation.
pub trait CompiledModule: Send + Sync {
    /// Downcast support: engines only instantiate their own module type.
    fn as_any(&self) -> &dyn std::any::Any;

    /// Serializes the module for the warm cache.
    fn serialize(&self) -> Result<Vec<u8>, EngineError>;

    /// Names of the functions the module imports.
    fn imported_functions(&self) -> Vec<String>;

    /// Names of the functions the module exports.
    fn exported_functions(&self) -> Vec<String>;

    /// True when the module declares a start function.
    fn has_start_function(&self) -> bool;

    /// The module's declared initial memory, in pages.
    fn declared_memory_pages(&self) -> u32;

    /// True when the module contains floating-point opcodes.
    fn uses_float_opcodes(&self) -> bool;
}

/// The shared gas-points ledger of one instance.
///
/// Opcode gas burned by the engine and EEI gas charged by the metering
/// context accumulate in the same counter, so `remaining()` is authoritative
/// at any point during execution. The metering context and the instance each
/// hold a clone of the same `Arc<GasPoints>`.
#[derive(Debug, Default)]
pub struct GasPoints {
    limit: std::sync::atomic::AtomicU64,
    used: std::sync::atomic::AtomicU64,
}

impl GasPoints {
    /// A fresh ledger with the given limit and nothing used.
    pub fn new(limit: u64) -> Self {
        Self {
            limit: std::sync::atomic::AtomicU64::new(limit),
            used: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// The programmed limit.
    pub fn limit(&self) -> u64 {
        self.limit.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Reprograms the limit.
    pub fn set_limit(&self, limit: u64) {
        self.limit.store(limit, std::sync::atomic::Ordering::SeqCst);
    }

    /// Points consumed so far.
    pub fn used(&self) -> u64 {
        self.used.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Overwrites the consumed points.
    pub fn set_used(&self, used: u64) {
        self.used.store(used, std::sync::atomic::Ordering::SeqCst);
    }

    /// Consumes points. Returns `false` when the limit is now exceeded; the
    /// overdraft is still recorded so `remaining()` reads zero.
    pub fn use_points(&self, points: u64) -> bool {
        let prior = self
            .used
            .fetch_add(points, std::sync::atomic::Ordering::SeqCst);
        prior.saturating_add(points) <= self.limit()
    }

    /// Returns points to the ledger (storage-release refunds, unused gas of
    /// a successful sub-call).
    pub fn free_points(&self, points: u64) {
        let _ = self
            .used
            .fetch_update(
                std::sync::atomic::Ordering::SeqCst,
                std::sync::atomic::Ordering::SeqCst,
                |used| Some(used.saturating_sub(points)),
            );
    }

    /// Points still available.
    pub fn remaining(&self) -> u64 {
        self.limit().saturating_sub(self.used())
    }
}

/// Parameters for instantiating a compiled module.
pub struct InstantiationParams {
    /// The gas-points ledger shared with the metering context.
    pub points: Arc<GasPoints>,
    /// The breakpoint cell shared with the supervising task.
    pub breakpoints: Arc<BreakpointCell>,
    /// Maximum linear-memory pages the instance may grow to.
    pub max_memory_pages: u32,
}

/// A live instantiation of a compiled module.
///
/// Instances are `Send` so the supervisor can move them onto worker threads,
/// but they are never shared: one instance belongs to exactly one execution
/// at a time.
pub trait WasmInstance: Send {
    /// Invokes an exported function, routing imports through `eei`.
    fn call_export(&mut self, name: &str, eei: &mut dyn EeiDispatcher)
        -> Result<(), EngineError>;

    /// True when the instance exports a function with this name.
    fn has_export(&self, name: &str) -> bool;

    /// All exported function names.
    fn exported_function_names(&self) -> Vec<String>;

    /// True when the module imported the named function.
    fn is_function_imported(&self, name: &str) -> bool;

    /// The gas-points ledger this instance burns opcode gas into.
    fn points(&self) -> Arc<GasPoints>;

    /// Reads bytes from the instance's memory outside of a dispatch.
    fn memory_load(&mut self, offset: u64, length: u64) -> Result<Vec<u8>, EngineError>;

    /// Writes bytes to the instance's memory outside of a dispatch.
    fn memory_store(&mut self, offset: u64, data: &[u8]) -> Result<(), EngineError>;

    /// The breakpoint cell observed by this instance.
    fn breakpoints(&self) -> Arc<BreakpointCell>;

    /// Restores the instance to a freshly-instantiated state for warm reuse.
    fn reset(&mut self) -> Result<(), EngineError>;

    /// Releases the instance's resources. Safe to call more than once and
    /// from the panic barrier.
    fn clean(&mut self);
}

/// A handle that forces every running instance of an engine to observe its
/// breakpoint cell promptly. Used by the timeout supervisor.
pub trait InterruptHandle: Send + Sync {
    /// Requests that running instances reach a safe point and poll their
    /// breakpoints.
    fn interrupt(&self);
}

/// A sandboxed WASM engine.
pub trait WasmEngine: Send + Sync {
    /// Compiles a module from raw bytecode.
    fn compile(&self, code: &[u8]) -> Result<Arc<dyn CompiledModule>, EngineError>;

    /// Rebuilds a module from bytes produced by [`CompiledModule::serialize`].
    fn deserialize_module(&self, bytes: &[u8]) -> Result<Arc<dyn CompiledModule>, EngineError>;

    /// Programs the per-opcode cost vector for subsequent compilations.
    ///
    /// Costs are per engine instance; two hosts never interfere.
    fn set_opcode_costs(&self, costs: &OpcodeCosts);

    /// Instantiates a compiled module.
    fn instantiate(
        &self,
        module: &Arc<dyn CompiledModule>,
        params: InstantiationParams,
    ) -> Result<Box<dyn WasmInstance>, EngineError>;

    /// The interrupt handle for this engine.
    fn interrupt_handle(&self) -> Arc<dyn InterruptHandle>;
}
