// Path: crates/vm/wasm/src/lib.rs

//! # Crucible WASM Engine
//!
//! Wasmtime-backed implementation of the engine-binding traits. Contracts
//! run with fuel metering (the opcode-cost vector is folded to fuel units),
//! epoch interruption carries breakpoint observation, and every import is
//! bound dynamically to the host's EEI dispatcher.

use parking_lot::RwLock;
use std::sync::Arc;
use wasmtime::{
    Caller, Config, Engine, Extern, Func, FuncType, Module, Store, UpdateDeadline, Val,
};

use crucible_api::engine::{
    CompiledModule, EeiDispatcher, GasPoints, InstantiationParams, InterruptHandle, MemoryView,
    WasmEngine, WasmInstance, WasmValue,
};
use crucible_types::breakpoint::{Breakpoint, BreakpointCell};
use crucible_types::error::EngineError;
use crucible_types::gas::OpcodeCosts;

mod facts;

use facts::ModuleFacts;

/// What rides in every store: the per-call collaborators plus the raw
/// dispatcher pointer installed for the duration of one export call.
struct StoreData {
    /// Pointer to the `&mut dyn EeiDispatcher` of the running export call.
    /// Only valid while `call_export` has it installed.
    dispatcher: Option<*mut dyn EeiDispatcher>,
    points: Arc<GasPoints>,
    breakpoints: Arc<BreakpointCell>,
    /// Fuel level at the last points synchronization.
    synced_fuel: u64,
    /// Gas points per fuel unit, snapshotted at instantiation.
    fuel_scale: u64,
}

// The dispatcher pointer never leaves the worker thread that owns both the
// store and the dispatcher; Send is required only because wasmtime stores
// demand it.
unsafe impl Send for StoreData {}

/// The wasmtime-backed engine.
pub struct WasmtimeEngine {
    engine: Engine,
    /// Average opcode cost used as the fuel scale. Wasmtime's fuel meter
    /// charges per instruction class, so the per-opcode vector is folded to
    /// a single multiplier; exact per-opcode schedules are an engine-side
    /// approximation here.
    fuel_scale: RwLock<u64>,
    interrupt: Arc<EpochInterrupt>,
}

struct EpochInterrupt {
    engine: Engine,
}

impl InterruptHandle for EpochInterrupt {
    fn interrupt(&self) {
        self.engine.increment_epoch();
    }
}

impl WasmtimeEngine {
    /// Builds a deterministic engine: fuel metering on, epoch interruption
    /// on, floats/SIMD/threads off.
    pub fn new() -> Result<Self, EngineError> {
        let mut config = Config::new();
        config.consume_fuel(true);
        config.epoch_interruption(true);
        config.wasm_threads(false);
        config.wasm_simd(false);
        config.wasm_relaxed_simd(false);
        config.wasm_reference_types(false);
        let engine = Engine::new(&config).map_err(|e| EngineError::Compile(e.to_string()))?;
        Ok(Self {
            interrupt: Arc::new(EpochInterrupt {
                engine: engine.clone(),
            }),
            engine,
            fuel_scale: RwLock::new(1),
        })
    }
}

struct WasmtimeModule {
    module: Module,
    facts: ModuleFacts,
}

impl CompiledModule for WasmtimeModule {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn serialize(&self) -> Result<Vec<u8>, EngineError> {
        self.module
            .serialize()
            .map_err(|e| EngineError::Serialize(e.to_string()))
    }

    fn imported_functions(&self) -> Vec<String> {
        self.facts.imported_functions.clone()
    }

    fn exported_functions(&self) -> Vec<String> {
        self.facts.exported_functions.clone()
    }

    fn has_start_function(&self) -> bool {
        self.facts.has_start_function
    }

    fn declared_memory_pages(&self) -> u32 {
        self.facts.memory_pages
    }

    fn uses_float_opcodes(&self) -> bool {
        self.facts.uses_float_opcodes
    }
}

impl WasmEngine for WasmtimeEngine {
    fn compile(&self, code: &[u8]) -> Result<Arc<dyn CompiledModule>, EngineError> {
        let facts = facts::scan_module(code)?;
        let module =
            Module::new(&self.engine, code).map_err(|e| EngineError::Compile(e.to_string()))?;
        log::trace!(target: "vm", "compiled module: {} bytes", code.len());
        Ok(Arc::new(WasmtimeModule { module, facts }))
    }

    fn deserialize_module(&self, bytes: &[u8]) -> Result<Arc<dyn CompiledModule>, EngineError> {
        // The serialized form is wasmtime's own; start-function and float
        // facts were verified before the module was ever serialized, so
        // rebuilding the import/export surface is sufficient here.
        let module = unsafe { Module::deserialize(&self.engine, bytes) }
            .map_err(|e| EngineError::Deserialize(e.to_string()))?;
        let facts = facts::facts_from_module(&module);
        Ok(Arc::new(WasmtimeModule { module, facts }))
    }

    fn set_opcode_costs(&self, costs: &OpcodeCosts) {
        // Fold the vector to its mean cost; wasmtime fuel cannot vary per
        // opcode.
        let sum: u64 = costs.0.iter().sum();
        let mean = (sum / 256).max(1);
        *self.fuel_scale.write() = mean;
    }

    fn instantiate(
        &self,
        module: &Arc<dyn CompiledModule>,
        params: InstantiationParams,
    ) -> Result<Box<dyn WasmInstance>, EngineError> {
        let concrete = module
            .as_any()
            .downcast_ref::<WasmtimeModule>()
            .ok_or_else(|| EngineError::Instantiate("foreign module type".to_string()))?;

        let fuel_scale = (*self.fuel_scale.read()).max(1);
        let initial_fuel = params.points.remaining() / fuel_scale;
        let mut store = Store::new(
            &self.engine,
            StoreData {
                dispatcher: None,
                points: params.points.clone(),
                breakpoints: params.breakpoints.clone(),
                synced_fuel: initial_fuel,
                fuel_scale,
            },
        );
        store
            .set_fuel(initial_fuel)
            .map_err(|e| EngineError::Instantiate(e.to_string()))?;
        store.set_epoch_deadline(1);
        store.epoch_deadline_callback(|ctx| {
            if ctx.data().breakpoints.get() != Breakpoint::None {
                return Err(wasmtime::Error::msg("breakpoint"));
            }
            Ok(UpdateDeadline::Continue(1))
        });
        let mut imports: Vec<Extern> = Vec::new();
        for import in concrete.module.imports() {
            let name = import.name().to_string();
            let func_ty = match import.ty() {
                wasmtime::ExternType::Func(ty) => ty,
                _ => {
                    return Err(EngineError::UnknownImport(format!(
                        "non-function import {name}"
                    )))
                }
            };
            imports.push(Extern::Func(bind_import(&mut store, &name, func_ty)));
        }

        let instance = wasmtime::Instance::new(&mut store, &concrete.module, &imports)
            .map_err(|e| EngineError::Instantiate(e.to_string()))?;

        Ok(Box::new(WasmtimeInstance {
            store,
            instance,
            points: params.points,
            breakpoints: params.breakpoints,
            facts: concrete.facts.clone(),
        }))
    }

    fn interrupt_handle(&self) -> Arc<dyn InterruptHandle> {
        self.interrupt.clone()
    }
}

/// Binds one import to the dispatcher installed in the store.
fn bind_import(store: &mut Store<StoreData>, name: &str, ty: FuncType) -> Func {
    let import_name = name.to_string();
    Func::new(store, ty, move |mut caller, params, results| {
        if caller.data().breakpoints.get() != Breakpoint::None {
            return Err(wasmtime::Error::msg("breakpoint"));
        }

        sync_engine_fuel(&mut caller)?;

        let dispatcher_ptr = caller
            .data()
            .dispatcher
            .ok_or_else(|| wasmtime::Error::msg("no dispatcher installed"))?;
        let args: Vec<WasmValue> = params
            .iter()
            .map(|v| match v {
                Val::I64(x) => WasmValue::I64(*x),
                Val::I32(x) => WasmValue::I32(*x),
                _ => WasmValue::I32(0),
            })
            .collect();

        let memory = caller
            .get_export("memory")
            .and_then(|e| e.into_memory())
            .ok_or_else(|| wasmtime::Error::msg("module exports no memory"))?;

        let outcome = {
            // The pointer was installed by call_export on this same thread
            // and outlives the wasm frame it serves.
            let dispatcher = unsafe { &mut *dispatcher_ptr };
            let mut view = CallerMemoryView {
                caller: &mut caller,
                memory,
            };
            dispatcher.dispatch(&import_name, &args, &mut view)
        };

        match outcome {
            Ok(values) => {
                sync_host_charges(&mut caller)?;
                for (slot, value) in results.iter_mut().zip(values) {
                    *slot = match value {
                        WasmValue::I32(x) => Val::I32(x),
                        WasmValue::I64(x) => Val::I64(x),
                    };
                }
                Ok(())
            }
            Err(message) => Err(wasmtime::Error::msg(message)),
        }
    })
}

/// Folds fuel burned by the engine since the last synchronization into the
/// shared points ledger, at the configured points-per-fuel scale.
fn sync_engine_fuel(caller: &mut Caller<'_, StoreData>) -> wasmtime::Result<()> {
    let fuel = caller.get_fuel()?;
    let synced = caller.data().synced_fuel;
    if fuel < synced {
        let data = caller.data_mut();
        data.points
            .use_points((synced - fuel).saturating_mul(data.fuel_scale));
        data.synced_fuel = fuel;
    }
    Ok(())
}

/// Reflects host-side gas charges back into the engine's fuel counter.
fn sync_host_charges(caller: &mut Caller<'_, StoreData>) -> wasmtime::Result<()> {
    let scale = caller.data().fuel_scale;
    let remaining = caller.data().points.remaining() / scale;
    caller.set_fuel(remaining)?;
    caller.data_mut().synced_fuel = remaining;
    Ok(())
}

struct CallerMemoryView<'a, 'c> {
    caller: &'a mut Caller<'c, StoreData>,
    memory: wasmtime::Memory,
}

impl MemoryView for CallerMemoryView<'_, '_> {
    fn len(&self) -> u64 {
        self.memory.data_size(&*self.caller) as u64
    }

    fn load(&self, offset: u64, length: u64) -> Result<Vec<u8>, EngineError> {
        let data = self.memory.data(&*self.caller);
        let end = offset
            .checked_add(length)
            .ok_or(EngineError::MemoryOutOfBounds)?;
        if end > data.len() as u64 {
            return Err(EngineError::MemoryOutOfBounds);
        }
        Ok(data[offset as usize..end as usize].to_vec())
    }

    fn store(&mut self, offset: u64, data: &[u8]) -> Result<(), EngineError> {
        let memory = self.memory.data_mut(&mut *self.caller);
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or(EngineError::MemoryOutOfBounds)?;
        if end > memory.len() as u64 {
            return Err(EngineError::MemoryOutOfBounds);
        }
        memory[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }
}

struct WasmtimeInstance {
    store: Store<StoreData>,
    instance: wasmtime::Instance,
    points: Arc<GasPoints>,
    breakpoints: Arc<BreakpointCell>,
    facts: ModuleFacts,
}

impl WasmInstance for WasmtimeInstance {
    fn call_export(
        &mut self,
        name: &str,
        eei: &mut dyn EeiDispatcher,
    ) -> Result<(), EngineError> {
        let func = self
            .instance
            .get_func(&mut self.store, name)
            .ok_or_else(|| EngineError::ExportNotFound(name.to_string()))?;

        // Install the dispatcher for the duration of this call; the raw
        // pointer is cleared again before returning, error or not.
        let dispatcher_ptr: *mut dyn EeiDispatcher = unsafe {
            std::mem::transmute::<&mut dyn EeiDispatcher, &'static mut dyn EeiDispatcher>(eei)
        };
        self.store.data_mut().dispatcher = Some(dispatcher_ptr);
        let scale = self.store.data().fuel_scale;
        let remaining = self.points.remaining() / scale;
        let _ = self.store.set_fuel(remaining);
        self.store.data_mut().synced_fuel = remaining;

        let result = func.call(&mut self.store, &[], &mut []);

        self.store.data_mut().dispatcher = None;
        let fuel = self.store.get_fuel().unwrap_or(0);
        let synced = self.store.data().synced_fuel;
        if fuel < synced {
            self.points.use_points((synced - fuel).saturating_mul(scale));
            self.store.data_mut().synced_fuel = fuel;
        }

        match result {
            Ok(()) => Ok(()),
            Err(error) => {
                if self.store.get_fuel().unwrap_or(1) == 0 {
                    self.breakpoints.set(Breakpoint::OutOfGas);
                }
                Err(EngineError::Trap(error.to_string()))
            }
        }
    }

    fn has_export(&self, name: &str) -> bool {
        self.facts.exported_functions.iter().any(|e| e == name)
    }

    fn exported_function_names(&self) -> Vec<String> {
        self.facts.exported_functions.clone()
    }

    fn is_function_imported(&self, name: &str) -> bool {
        self.facts.imported_functions.iter().any(|i| i == name)
    }

    fn points(&self) -> Arc<GasPoints> {
        self.points.clone()
    }

    fn memory_load(&mut self, offset: u64, length: u64) -> Result<Vec<u8>, EngineError> {
        let memory = self
            .instance
            .get_memory(&mut self.store, "memory")
            .ok_or(EngineError::NoMemory)?;
        let data = memory.data(&self.store);
        let end = offset
            .checked_add(length)
            .ok_or(EngineError::MemoryOutOfBounds)?;
        if end > data.len() as u64 {
            return Err(EngineError::MemoryOutOfBounds);
        }
        Ok(data[offset as usize..end as usize].to_vec())
    }

    fn memory_store(&mut self, offset: u64, data: &[u8]) -> Result<(), EngineError> {
        let memory = self
            .instance
            .get_memory(&mut self.store, "memory")
            .ok_or(EngineError::NoMemory)?;
        let slice = memory.data_mut(&mut self.store);
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or(EngineError::MemoryOutOfBounds)?;
        if end > slice.len() as u64 {
            return Err(EngineError::MemoryOutOfBounds);
        }
        slice[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    fn breakpoints(&self) -> Arc<BreakpointCell> {
        self.breakpoints.clone()
    }

    fn reset(&mut self) -> Result<(), EngineError> {
        self.breakpoints.set(Breakpoint::None);
        self.points.set_used(0);
        Ok(())
    }

    fn clean(&mut self) {
        self.store.data_mut().dispatcher = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // (module
    //   (import "env" "finish" (func))
    //   (memory (export "memory") 1)
    //   (export "init" (func 1))
    //   (func (call 0)))
    const CALLS_IMPORT: &[u8] = &[
        0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00, // magic + version
        0x01, 0x04, 0x01, 0x60, 0x00, 0x00, // type () -> ()
        0x02, 0x0e, 0x01, 0x03, b'e', b'n', b'v', 0x06, b'f', b'i', b'n', b'i', b's', b'h',
        0x00, 0x00, // import env.finish
        0x03, 0x02, 0x01, 0x00, // one local function
        0x05, 0x03, 0x01, 0x00, 0x01, // memory: min 1 page
        0x07, 0x11, 0x02, 0x06, b'm', b'e', b'm', b'o', b'r', b'y', 0x02, 0x00, 0x04, b'i',
        b'n', b'i', b't', 0x00, 0x01, // exports: memory, init
        0x0a, 0x06, 0x01, 0x04, 0x00, 0x10, 0x00, 0x0b, // body: call 0
    ];

    struct RecordingDispatcher {
        calls: Vec<String>,
    }

    impl EeiDispatcher for RecordingDispatcher {
        fn dispatch(
            &mut self,
            name: &str,
            _args: &[WasmValue],
            _memory: &mut dyn MemoryView,
        ) -> Result<Vec<WasmValue>, String> {
            self.calls.push(name.to_string());
            Ok(Vec::new())
        }

        fn import_names(&self) -> &[&'static str] {
            &["finish"]
        }
    }

    fn instantiate(engine: &WasmtimeEngine, gas: u64) -> Box<dyn WasmInstance> {
        let module = engine.compile(CALLS_IMPORT).unwrap();
        engine
            .instantiate(
                &module,
                InstantiationParams {
                    points: Arc::new(GasPoints::new(gas)),
                    breakpoints: Arc::new(BreakpointCell::new()),
                    max_memory_pages: 1024,
                },
            )
            .unwrap()
    }

    #[test]
    fn imports_route_to_the_dispatcher() {
        let engine = WasmtimeEngine::new().unwrap();
        let mut instance = instantiate(&engine, 1_000_000);
        let mut dispatcher = RecordingDispatcher { calls: Vec::new() };

        instance.call_export("init", &mut dispatcher).unwrap();
        assert_eq!(dispatcher.calls, vec!["finish".to_string()]);
        assert!(instance.points().used() > 0, "opcode fuel must be charged");
    }

    #[test]
    fn exhausted_points_trap_with_out_of_gas() {
        let engine = WasmtimeEngine::new().unwrap();
        let mut instance = instantiate(&engine, 1);
        let mut dispatcher = RecordingDispatcher { calls: Vec::new() };

        let result = instance.call_export("init", &mut dispatcher);
        assert!(result.is_err());
        assert_eq!(instance.breakpoints().get(), Breakpoint::OutOfGas);
    }

    #[test]
    fn armed_breakpoints_abort_at_the_next_import(){
        let engine = WasmtimeEngine::new().unwrap();
        let mut instance = instantiate(&engine, 1_000_000);
        let mut dispatcher = RecordingDispatcher { calls: Vec::new() };

        instance.breakpoints().set(Breakpoint::ExecutionFailed);
        let result = instance.call_export("init", &mut dispatcher);
        assert!(result.is_err());
        assert!(dispatcher.calls.is_empty(), "the import must not run");
    }

    #[test]
    fn memory_access_is_bounds_checked() {
        let engine = WasmtimeEngine::new().unwrap();
        let mut instance = instantiate(&engine, 1_000_000);

        instance.memory_store(0, b"hello").unwrap();
        assert_eq!(instance.memory_load(0, 5).unwrap(), b"hello");
        assert!(matches!(
            instance.memory_load(u64::MAX - 3, 8),
            Err(EngineError::MemoryOutOfBounds)
        ));
    }

    #[test]
    fn serialized_modules_deserialize_and_instantiate() {
        let engine = WasmtimeEngine::new().unwrap();
        let module = engine.compile(CALLS_IMPORT).unwrap();
        let bytes = module.serialize().unwrap();
        let restored = engine.deserialize_module(&bytes).unwrap();
        assert_eq!(restored.imported_functions(), vec!["finish".to_string()]);
        assert!(restored.exported_functions().contains(&"init".to_string()));
    }
}
