// Path: crates/host/src/contexts/runtime.rs
//! The runtime context: instance management, breakpoints, error aggregation
//! and per-call input plumbing.
//!
//! The live instance is owned here but is moved out while one of its exports
//! is running (the executor takes it, drives it, and puts it back), which is
//! what lets a nested execution start its own instance in this same slot
//! without aliasing the suspended parent.

use sha2::{Digest, Sha256};
use std::sync::Arc;

use crucible_api::engine::{GasPoints, InstantiationParams, WasmEngine, WasmInstance};
use crucible_api::blockchain::BlockchainHook;
use crucible_types::address::Address;
use crucible_types::async_call::{AsyncCall, AsyncContext};
use crucible_types::breakpoint::{Breakpoint, BreakpointCell};
use crucible_types::error::{ErrorCode, HostError};
use crucible_types::input::VMInput;
use crucible_types::{CALLBACK_FUNCTION_NAME, INIT_FUNCTION_NAME};

use crate::cache::{CachedModule, WarmInstanceCache};
use super::reserved::ReservedFunctions;

/// Everything `start_instance` needs from outside the runtime context.
pub struct InstanceEnv<'a> {
    /// The engine to compile and instantiate with.
    pub engine: &'a dyn WasmEngine,
    /// The shared warm cache.
    pub warm_cache: &'a WarmInstanceCache,
    /// The hook, for the compiled-code store.
    pub hook: &'a dyn BlockchainHook,
    /// Identity of the gas schedule in force.
    pub schedule_hash: [u8; 32],
    /// Memory-page bound from the host configuration.
    pub max_memory_pages: u32,
}

struct RuntimeSnapshot {
    vm_input: VMInput,
    sc_address: Address,
    function: String,
    read_only: bool,
    fail_reason: Option<HostError>,
    async_call_info: Option<AsyncCall>,
    async_context: AsyncContext,
    instance: Option<Box<dyn WasmInstance>>,
}

/// One recorded error with the call site it was observed at.
#[derive(Debug, Clone)]
pub struct RecordedError {
    /// The error itself.
    pub error: HostError,
    /// Context string: contract address and function.
    pub context: String,
}

/// Per-call runtime state.
pub struct RuntimeContext {
    vm_input: VMInput,
    sc_address: Address,
    function: String,
    read_only: bool,
    breakpoints: Arc<BreakpointCell>,
    instance: Option<Box<dyn WasmInstance>>,
    current_module: Option<Arc<dyn crucible_api::engine::CompiledModule>>,
    verify_code: bool,
    fail_reason: Option<HostError>,
    errors: Vec<RecordedError>,
    async_call_info: Option<AsyncCall>,
    async_context: AsyncContext,
    num_warm_starts: u64,
    num_cold_starts: u64,
    max_instances: u64,
    state_stack: Vec<RuntimeSnapshot>,
}

impl RuntimeContext {
    /// A runtime context bounded to `max_instances` live instance starts.
    pub fn new(max_instances: u64) -> Self {
        Self {
            vm_input: VMInput::default(),
            sc_address: Address::ZERO,
            function: String::new(),
            read_only: false,
            breakpoints: Arc::new(BreakpointCell::new()),
            instance: None,
            current_module: None,
            verify_code: false,
            fail_reason: None,
            errors: Vec::new(),
            async_call_info: None,
            async_context: AsyncContext::default(),
            num_warm_starts: 0,
            num_cold_starts: 0,
            max_instances,
            state_stack: Vec::new(),
        }
    }

    /// Resets per-call state and installs the supervisor-shared breakpoint
    /// cell for this call.
    pub fn init_state(&mut self, breakpoints: Arc<BreakpointCell>) {
        self.vm_input = VMInput::default();
        self.sc_address = Address::ZERO;
        self.function.clear();
        self.read_only = false;
        self.breakpoints = breakpoints;
        self.clean_instance();
        self.current_module = None;
        self.verify_code = false;
        self.fail_reason = None;
        self.errors.clear();
        self.async_call_info = None;
        self.async_context = AsyncContext::default();
        self.num_warm_starts = 0;
        self.num_cold_starts = 0;
        self.state_stack.clear();
    }

    /// Snapshots runtime state for a nested execution. The suspended
    /// parent's instance (if it has not been taken by the executor) moves
    /// into the snapshot.
    pub fn push_state(&mut self) {
        self.state_stack.push(RuntimeSnapshot {
            vm_input: self.vm_input.clone(),
            sc_address: self.sc_address,
            function: self.function.clone(),
            read_only: self.read_only,
            fail_reason: self.fail_reason.take(),
            async_call_info: self.async_call_info.take(),
            async_context: std::mem::take(&mut self.async_context),
            instance: self.instance.take(),
        });
    }

    /// Restores the parent's runtime state; the child's instance is cleaned.
    pub fn pop_set_active(&mut self) {
        self.clean_instance();
        if let Some(snap) = self.state_stack.pop() {
            self.vm_input = snap.vm_input;
            self.sc_address = snap.sc_address;
            self.function = snap.function;
            self.read_only = snap.read_only;
            self.fail_reason = snap.fail_reason;
            self.async_call_info = snap.async_call_info;
            self.async_context = snap.async_context;
            self.instance = snap.instance;
        }
    }

    /// Identical to [`Self::pop_set_active`] for the runtime: the child's
    /// state is never worth keeping.
    pub fn pop_discard(&mut self) {
        self.pop_set_active();
    }

    /// Drops every snapshot, cleaning any instances they hold.
    pub fn clear_state_stack(&mut self) {
        for mut snap in self.state_stack.drain(..) {
            if let Some(instance) = snap.instance.as_mut() {
                instance.clean();
            }
        }
    }

    /// Current state-stack depth.
    pub fn stack_depth(&self) -> usize {
        self.state_stack.len()
    }

    // --- input plumbing ---

    /// Installs the input of the current frame.
    pub fn set_vm_input(&mut self, input: VMInput) {
        self.vm_input = input;
    }

    /// The input of the current frame.
    pub fn vm_input(&self) -> &VMInput {
        &self.vm_input
    }

    /// Sets the contract address under execution.
    pub fn set_sc_address(&mut self, address: Address) {
        self.sc_address = address;
    }

    /// The contract address under execution.
    pub fn sc_address(&self) -> Address {
        self.sc_address
    }

    /// Sets the function to invoke.
    pub fn set_function(&mut self, function: &str) {
        self.function = function.to_string();
    }

    /// The function to invoke.
    pub fn function(&self) -> &str {
        &self.function
    }

    /// Sets the read-only flag of the current frame.
    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// True when the current frame must not mutate state.
    pub fn read_only(&self) -> bool {
        self.read_only
    }

    /// Resolves the function to call, enforcing the reserved-name policy and
    /// the restrictions on `init` and `callBack`.
    pub fn function_to_call(
        &self,
        reserved: &ReservedFunctions,
        is_async_callback: bool,
    ) -> Result<String, HostError> {
        let function = self.function.as_str();
        if function == INIT_FUNCTION_NAME {
            return Err(HostError::InitFuncCalledInRun);
        }
        if function == CALLBACK_FUNCTION_NAME && !is_async_callback {
            return Err(HostError::InvalidFunctionName);
        }
        if reserved.is_reserved(function) {
            return Err(HostError::InvalidFunctionName);
        }
        Ok(function.to_string())
    }

    // --- instance lifecycle ---

    /// Probes whether the code would instantiate from the warm cache.
    pub fn is_warm(&self, code: &[u8], env: &InstanceEnv<'_>) -> bool {
        let key = (Self::code_hash(code), env.schedule_hash);
        env.warm_cache.get(&key).is_some()
    }

    /// Starts an instance for `code`: warm cache, then the hook's
    /// compiled-code store, then a cold compile. The compiled module is
    /// cached and saved back through the hook on the cold path.
    pub fn start_instance(
        &mut self,
        code: &[u8],
        env: &InstanceEnv<'_>,
        points: Arc<GasPoints>,
        is_new_code: bool,
    ) -> Result<(), HostError> {
        if self.num_warm_starts + self.num_cold_starts >= self.max_instances {
            return Err(HostError::ExecutionFailed(
                "max instances reached".to_string(),
            ));
        }

        let code_hash = Self::code_hash(code);
        let key = (code_hash, env.schedule_hash);

        let (module, warm) = if let Some(cached) = env.warm_cache.get(&key) {
            (cached.module, true)
        } else if let Some(serialized) = env.hook.get_compiled_code(&code_hash) {
            match env.engine.deserialize_module(&serialized) {
                Ok(module) => {
                    env.warm_cache.put(
                        key,
                        CachedModule {
                            module: module.clone(),
                            serialized,
                        },
                    );
                    (module, true)
                }
                // A stale store entry falls back to a cold compile.
                Err(_) => self.compile_cold(code, &code_hash, env)?,
            }
        } else {
            self.compile_cold(code, &code_hash, env)?
        };

        let instance = env
            .engine
            .instantiate(
                &module,
                InstantiationParams {
                    points,
                    breakpoints: self.breakpoints.clone(),
                    max_memory_pages: env.max_memory_pages,
                },
            )
            .map_err(|e| HostError::ContractInvalid(e.to_string()))?;

        if warm {
            self.num_warm_starts += 1;
        } else {
            self.num_cold_starts += 1;
        }
        self.verify_code = is_new_code;
        self.current_module = Some(module);
        self.instance = Some(instance);
        Ok(())
    }

    fn compile_cold(
        &self,
        code: &[u8],
        code_hash: &[u8; 32],
        env: &InstanceEnv<'_>,
    ) -> Result<(Arc<dyn crucible_api::engine::CompiledModule>, bool), HostError> {
        let module = env
            .engine
            .compile(code)
            .map_err(|e| HostError::ContractInvalid(e.to_string()))?;
        if let Ok(serialized) = module.serialize() {
            env.hook.save_compiled_code(code_hash, &serialized);
            env.warm_cache.put(
                (*code_hash, env.schedule_hash),
                CachedModule {
                    module: module.clone(),
                    serialized,
                },
            );
        }
        Ok((module, false))
    }

    /// Verifies freshly deployed code against the EEI and the engine limits.
    /// A no-op unless the last `start_instance` installed new code.
    pub fn verify_contract_code(
        &mut self,
        eei_names: &[&str],
        reserved: &ReservedFunctions,
        max_memory_pages: u32,
    ) -> Result<(), HostError> {
        if !self.verify_code {
            return Ok(());
        }
        self.verify_code = false;

        let module = self
            .current_module
            .as_ref()
            .ok_or_else(|| HostError::ContractInvalid("no module".to_string()))?;
        Self::verify_module(module.as_ref(), eei_names, reserved, max_memory_pages)
    }

    /// Verifies a compiled module: unknown imports, floating-point opcodes,
    /// oversized memory, start functions and reserved export names are all
    /// rejected.
    pub fn verify_module(
        module: &dyn crucible_api::engine::CompiledModule,
        eei_names: &[&str],
        reserved: &ReservedFunctions,
        max_memory_pages: u32,
    ) -> Result<(), HostError> {
        for import in module.imported_functions() {
            if !eei_names.contains(&import.as_str()) {
                return Err(HostError::ContractInvalid(format!(
                    "unknown import {import}"
                )));
            }
        }
        if module.uses_float_opcodes() {
            return Err(HostError::ContractInvalid(
                "floating-point opcodes are forbidden".to_string(),
            ));
        }
        if module.declared_memory_pages() > max_memory_pages {
            return Err(HostError::ContractInvalid(
                "memory exceeds page limit".to_string(),
            ));
        }
        if module.has_start_function() {
            return Err(HostError::ContractInvalid(
                "start function is forbidden".to_string(),
            ));
        }
        for export in module.exported_functions() {
            if reserved.is_reserved(&export) {
                return Err(HostError::ContractInvalid(format!(
                    "contract exports reserved function {export}"
                )));
            }
        }
        Ok(())
    }

    /// Moves the live instance out for the executor to drive.
    pub fn take_instance(&mut self) -> Result<Box<dyn WasmInstance>, HostError> {
        self.instance
            .take()
            .ok_or_else(|| HostError::ExecutionFailed("no live instance".to_string()))
    }

    /// Returns the instance after the executor finished driving it.
    pub fn put_instance(&mut self, instance: Box<dyn WasmInstance>) {
        self.instance = Some(instance);
    }

    /// True when an instance is currently installed.
    pub fn has_instance(&self) -> bool {
        self.instance.is_some()
    }

    /// Destroys the current instance. Safe to call from the panic barrier
    /// and when no instance exists.
    pub fn clean_instance(&mut self) {
        if let Some(mut instance) = self.instance.take() {
            instance.clean();
        }
    }

    /// Warm and cold instance starts of this call, for diagnostics.
    pub fn instance_counters(&self) -> (u64, u64) {
        (self.num_warm_starts, self.num_cold_starts)
    }

    /// Reconfigures the instance-start bound.
    pub fn set_max_instances(&mut self, max_instances: u64) {
        self.max_instances = max_instances;
    }

    // --- linear memory access policy ---

    /// Bounds-checked read from a running instance's memory. Out-of-bounds
    /// access is a user error, not an engine fault.
    pub fn mem_load(
        &self,
        memory: &dyn crucible_api::engine::MemoryView,
        offset: i64,
        length: i64,
    ) -> Result<Vec<u8>, HostError> {
        if offset < 0 || length < 0 {
            return Err(HostError::MemoryBadBounds {
                offset: offset.max(0) as u64,
                length: length.max(0) as u64,
            });
        }
        if length == 0 {
            return Ok(Vec::new());
        }
        memory
            .load(offset as u64, length as u64)
            .map_err(|_| HostError::MemoryBadBounds {
                offset: offset as u64,
                length: length as u64,
            })
    }

    /// Bounds-checked write into a running instance's memory.
    pub fn mem_store(
        &self,
        memory: &mut dyn crucible_api::engine::MemoryView,
        offset: i64,
        data: &[u8],
    ) -> Result<(), HostError> {
        if offset < 0 {
            return Err(HostError::MemoryBadBounds {
                offset: 0,
                length: data.len() as u64,
            });
        }
        memory
            .store(offset as u64, data)
            .map_err(|_| HostError::MemoryBadBounds {
                offset: offset as u64,
                length: data.len() as u64,
            })
    }

    // --- breakpoints and errors ---

    /// Stores a breakpoint value for the engine to observe.
    pub fn set_breakpoint(&self, value: Breakpoint) {
        self.breakpoints.set(value);
    }

    /// The current breakpoint value.
    pub fn breakpoint(&self) -> Breakpoint {
        self.breakpoints.get()
    }

    /// The cell shared with instances and the supervisor.
    pub fn breakpoint_cell(&self) -> Arc<BreakpointCell> {
        self.breakpoints.clone()
    }

    /// Records a non-recoverable failure and arms the `ExecutionFailed`
    /// breakpoint (or `OutOfGas` for gas exhaustion).
    pub fn fail_execution(&mut self, error: HostError) {
        let breakpoint = match &error {
            HostError::NotEnoughGas => Breakpoint::OutOfGas,
            _ => Breakpoint::ExecutionFailed,
        };
        self.add_error(error.clone(), "");
        if self.fail_reason.is_none() {
            self.fail_reason = Some(error);
        }
        self.breakpoints.set(breakpoint);
    }

    /// Records a contract-signalled error and arms the `SignalError`
    /// breakpoint.
    pub fn signal_user_error(&mut self, message: &str) {
        let error = HostError::SignalError(message.to_string());
        self.add_error(error.clone(), "");
        if self.fail_reason.is_none() {
            self.fail_reason = Some(error);
        }
        self.breakpoints.set(Breakpoint::SignalError);
    }

    /// The first hard error of the call, which decides the return code.
    pub fn fail_reason(&self) -> Option<&HostError> {
        self.fail_reason.as_ref()
    }

    /// Appends to the call's error aggregation.
    pub fn add_error(&mut self, error: HostError, context: &str) {
        let context = if context.is_empty() {
            format!("{} [{}]", hex::encode(self.sc_address.as_bytes()), self.function)
        } else {
            context.to_string()
        };
        self.errors.push(RecordedError { error, context });
    }

    /// Every error recorded so far.
    pub fn all_errors(&self) -> &[RecordedError] {
        &self.errors
    }

    /// The formatted aggregation for the `internalVMErrors` log entry, or
    /// `None` when the call recorded no errors.
    pub fn formatted_errors(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }
        let joined = self
            .errors
            .iter()
            .map(|e| format!("\n\t{} ({}) while executing {}", e.error, e.error.code(), e.context))
            .collect::<String>();
        Some(joined)
    }

    // --- async bookkeeping ---

    /// Registers the async call armed by `asyncCall`, to be processed when
    /// the `AsyncCall` breakpoint is observed.
    pub fn set_async_call_info(&mut self, call: AsyncCall) {
        self.async_call_info = Some(call);
    }

    /// Takes the armed async call.
    pub fn take_async_call_info(&mut self) -> Option<AsyncCall> {
        self.async_call_info.take()
    }

    /// Adds a call to the async context tree under `identifier`.
    pub fn add_async_context_call(&mut self, identifier: &[u8], call: AsyncCall) {
        self.async_context.caller = self.sc_address;
        self.async_context.group_mut(identifier).calls.push(call);
    }

    /// The async context tree of this call.
    pub fn async_context(&self) -> &AsyncContext {
        &self.async_context
    }

    /// Mutable access to the async context tree.
    pub fn async_context_mut(&mut self) -> &mut AsyncContext {
        &mut self.async_context
    }

    fn code_hash(code: &[u8]) -> [u8; 32] {
        Sha256::digest(code).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_api::test_utils::{mock_code, MockContract, MockEngine, MockWorld};

    fn env<'a>(
        engine: &'a MockEngine,
        cache: &'a WarmInstanceCache,
        world: &'a MockWorld,
    ) -> InstanceEnv<'a> {
        InstanceEnv {
            engine,
            warm_cache: cache,
            hook: world,
            schedule_hash: [7u8; 32],
            max_memory_pages: 1024,
        }
    }

    #[test]
    fn cold_start_populates_cache_and_store() {
        let engine = MockEngine::new();
        let cache = WarmInstanceCache::new(4);
        let world = MockWorld::new();
        let code = mock_code("contract", 64);
        engine.register_contract(&code, MockContract::new().with_export("init", |_| Ok(())));

        let mut runtime = RuntimeContext::new(10);
        let points = Arc::new(GasPoints::new(1000));
        runtime
            .start_instance(&code, &env(&engine, &cache, &world), points, true)
            .unwrap();

        assert_eq!(runtime.instance_counters(), (0, 1));
        assert_eq!(cache.len(), 1);
        assert_eq!(world.compiled_code_count(), 1);

        // The second start of the same code comes out warm.
        let points = Arc::new(GasPoints::new(1000));
        runtime
            .start_instance(&code, &env(&engine, &cache, &world), points, false)
            .unwrap();
        assert_eq!(runtime.instance_counters(), (1, 1));
    }

    #[test]
    fn reserved_function_resolution() {
        let mut runtime = RuntimeContext::new(10);
        let reserved = ReservedFunctions::new(&["getCaller"]);

        runtime.set_function("init");
        assert!(matches!(
            runtime.function_to_call(&reserved, false),
            Err(HostError::InitFuncCalledInRun)
        ));

        runtime.set_function("callBack");
        assert!(runtime.function_to_call(&reserved, false).is_err());
        assert!(runtime.function_to_call(&reserved, true).is_ok());

        runtime.set_function("getCaller");
        assert!(matches!(
            runtime.function_to_call(&reserved, false),
            Err(HostError::InvalidFunctionName)
        ));

        runtime.set_function("doWork");
        assert_eq!(runtime.function_to_call(&reserved, false).unwrap(), "doWork");
    }

    #[test]
    fn fail_execution_arms_the_right_breakpoint() {
        let mut runtime = RuntimeContext::new(10);
        runtime.fail_execution(HostError::NotEnoughGas);
        assert_eq!(runtime.breakpoint(), Breakpoint::OutOfGas);

        let mut runtime = RuntimeContext::new(10);
        runtime.fail_execution(HostError::ExecutionFailed("trap".to_string()));
        assert_eq!(runtime.breakpoint(), Breakpoint::ExecutionFailed);
        assert!(runtime.formatted_errors().is_some());
    }

    #[test]
    fn push_pop_preserves_parent_frame() {
        let mut runtime = RuntimeContext::new(10);
        runtime.set_sc_address(Address::from_tag("parent"));
        runtime.set_function("parentFunction");

        runtime.push_state();
        runtime.set_sc_address(Address::from_tag("child"));
        runtime.set_function("childFunction");
        runtime.pop_discard();

        assert_eq!(runtime.sc_address(), Address::from_tag("parent"));
        assert_eq!(runtime.function(), "parentFunction");
        assert_eq!(runtime.stack_depth(), 0);
    }

    #[test]
    fn module_verification_rejects_bad_modules() {
        let engine = MockEngine::new();
        let reserved = ReservedFunctions::new(&["getCaller"]);
        use crucible_api::engine::WasmEngine as _;

        let floats = mock_code("floats", 16);
        engine.register_contract(&floats, MockContract::new().with_floats());
        let module = engine.compile(&floats).unwrap();
        assert!(RuntimeContext::verify_module(module.as_ref(), &["getCaller"], &reserved, 1024)
            .is_err());

        let bad_import = mock_code("badimport", 16);
        engine.register_contract(
            &bad_import,
            MockContract::new().with_imports(&["notAnEeiFunction"]),
        );
        let module = engine.compile(&bad_import).unwrap();
        assert!(RuntimeContext::verify_module(module.as_ref(), &["getCaller"], &reserved, 1024)
            .is_err());

        let big_memory = mock_code("bigmem", 16);
        engine.register_contract(&big_memory, MockContract::new().with_memory_pages(4096));
        let module = engine.compile(&big_memory).unwrap();
        assert!(RuntimeContext::verify_module(module.as_ref(), &[], &reserved, 1024).is_err());
    }
}
