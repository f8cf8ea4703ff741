// Path: crates/api/src/test_utils/mock_engine.rs
//! A scripted WASM engine for tests.
//!
//! Contracts are registered as sets of named export scripts — Rust closures
//! that drive the EEI the way compiled bytecode would. The raw "code" bytes
//! double as the registry key, so tests can pad them to a chosen length and
//! obtain exact compilation-gas charges.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crucible_types::breakpoint::{Breakpoint, BreakpointCell};
use crucible_types::error::EngineError;
use crucible_types::gas::OpcodeCosts;

use crate::engine::{
    CompiledModule, EeiDispatcher, GasPoints, InstantiationParams, InterruptHandle, MemoryView,
    WasmEngine, WasmInstance, WasmValue,
};

/// The environment a contract script runs in.
pub struct ScriptEnv<'a> {
    eei: &'a mut dyn EeiDispatcher,
    memory: &'a mut MockMemory,
    points: Arc<GasPoints>,
    breakpoints: Arc<BreakpointCell>,
}

impl<'a> ScriptEnv<'a> {
    /// Copies `data` into linear memory and returns its `(offset, length)`.
    pub fn write(&mut self, data: &[u8]) -> (i32, i32) {
        let offset = self.memory.bump_alloc(data.len());
        self.memory.bytes[offset..offset + data.len()].copy_from_slice(data);
        (offset as i32, data.len() as i32)
    }

    /// Reads bytes back out of linear memory.
    pub fn read(&self, offset: i32, length: i32) -> Vec<u8> {
        let start = offset as usize;
        let end = start + length as usize;
        self.memory.bytes[start..end].to_vec()
    }

    /// Invokes an EEI function by name. An `Err` is the trap that would abort
    /// a real instance; scripts propagate it with `?`.
    pub fn call(&mut self, name: &str, args: &[WasmValue]) -> Result<Vec<WasmValue>, String> {
        self.eei.dispatch(name, args, self.memory)
    }

    /// Burns execution gas points, simulating opcode metering. Exceeding the
    /// programmed limit sets the out-of-gas breakpoint and traps.
    pub fn burn(&mut self, points: u64) -> Result<(), String> {
        if !self.points.use_points(points) {
            self.breakpoints.set(Breakpoint::OutOfGas);
            return Err("out of gas".to_string());
        }
        Ok(())
    }

    /// Gas points still available.
    pub fn points_remaining(&self) -> u64 {
        self.points.remaining()
    }
}

type ScriptFn = Arc<dyn for<'a> Fn(&mut ScriptEnv<'a>) -> Result<(), String> + Send + Sync>;

#[derive(Default)]
struct ContractDef {
    exports: BTreeMap<String, ScriptFn>,
    imports: Vec<String>,
    memory_pages: u32,
    uses_floats: bool,
    has_start: bool,
}

/// A scripted contract under construction.
#[derive(Default)]
pub struct MockContract {
    inner: ContractDef,
}

impl MockContract {
    /// An empty contract with a one-page memory.
    pub fn new() -> Self {
        Self {
            inner: ContractDef {
                memory_pages: 1,
                ..ContractDef::default()
            },
        }
    }

    /// Adds an export script.
    pub fn with_export<F>(mut self, name: &str, script: F) -> Self
    where
        F: for<'a> Fn(&mut ScriptEnv<'a>) -> Result<(), String> + Send + Sync + 'static,
    {
        self.inner.exports.insert(name.to_string(), Arc::new(script));
        self
    }

    /// Declares imported function names (for verification tests).
    pub fn with_imports(mut self, imports: &[&str]) -> Self {
        self.inner.imports = imports.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Declares the initial memory size in pages.
    pub fn with_memory_pages(mut self, pages: u32) -> Self {
        self.inner.memory_pages = pages;
        self
    }

    /// Marks the module as containing floating-point opcodes.
    pub fn with_floats(mut self) -> Self {
        self.inner.uses_floats = true;
        self
    }

    /// Marks the module as declaring a start function.
    pub fn with_start_function(mut self) -> Self {
        self.inner.has_start = true;
        self
    }
}

/// Builds mock "code" bytes: a readable tag padded with zeros to an exact
/// length, so compilation gas (charged per byte) comes out to a chosen value.
pub fn mock_code(tag: &str, length: usize) -> Vec<u8> {
    let mut code = tag.as_bytes().to_vec();
    code.resize(length.max(tag.len()), 0);
    code
}

struct MockModule {
    code: Vec<u8>,
    inner: Arc<ContractDef>,
}

impl CompiledModule for MockModule {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn serialize(&self) -> Result<Vec<u8>, EngineError> {
        Ok(self.code.clone())
    }

    fn imported_functions(&self) -> Vec<String> {
        self.inner.imports.clone()
    }

    fn exported_functions(&self) -> Vec<String> {
        self.inner.exports.keys().cloned().collect()
    }

    fn has_start_function(&self) -> bool {
        self.inner.has_start
    }

    fn declared_memory_pages(&self) -> u32 {
        self.inner.memory_pages
    }

    fn uses_float_opcodes(&self) -> bool {
        self.inner.uses_floats
    }
}

struct MockMemory {
    bytes: Vec<u8>,
    alloc_offset: usize,
}

impl MockMemory {
    fn new(pages: u32) -> Self {
        Self {
            bytes: vec![0; (pages as usize).max(1) * 65_536],
            alloc_offset: 0,
        }
    }

    fn bump_alloc(&mut self, len: usize) -> usize {
        let offset = self.alloc_offset;
        if offset + len > self.bytes.len() {
            self.bytes.resize(offset + len, 0);
        }
        self.alloc_offset = offset + len;
        offset
    }
}

impl MemoryView for MockMemory {
    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn load(&self, offset: u64, length: u64) -> Result<Vec<u8>, EngineError> {
        let end = offset
            .checked_add(length)
            .ok_or(EngineError::MemoryOutOfBounds)?;
        if end > self.bytes.len() as u64 {
            return Err(EngineError::MemoryOutOfBounds);
        }
        Ok(self.bytes[offset as usize..end as usize].to_vec())
    }

    fn store(&mut self, offset: u64, data: &[u8]) -> Result<(), EngineError> {
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or(EngineError::MemoryOutOfBounds)?;
        if end > self.bytes.len() as u64 {
            return Err(EngineError::MemoryOutOfBounds);
        }
        self.bytes[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }
}

struct MockInstance {
    inner: Arc<ContractDef>,
    memory: MockMemory,
    points: Arc<GasPoints>,
    breakpoints: Arc<BreakpointCell>,
    cleaned: bool,
}

impl WasmInstance for MockInstance {
    fn call_export(
        &mut self,
        name: &str,
        eei: &mut dyn EeiDispatcher,
    ) -> Result<(), EngineError> {
        if self.cleaned {
            return Err(EngineError::Instantiate("instance was cleaned".to_string()));
        }
        let script = self
            .inner
            .exports
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::ExportNotFound(name.to_string()))?;
        let mut env = ScriptEnv {
            eei,
            memory: &mut self.memory,
            points: self.points.clone(),
            breakpoints: self.breakpoints.clone(),
        };
        script(&mut env).map_err(EngineError::Trap)
    }

    fn has_export(&self, name: &str) -> bool {
        self.inner.exports.contains_key(name)
    }

    fn exported_function_names(&self) -> Vec<String> {
        self.inner.exports.keys().cloned().collect()
    }

    fn is_function_imported(&self, name: &str) -> bool {
        self.inner.imports.iter().any(|i| i == name)
    }

    fn points(&self) -> Arc<GasPoints> {
        self.points.clone()
    }

    fn memory_load(&mut self, offset: u64, length: u64) -> Result<Vec<u8>, EngineError> {
        self.memory.load(offset, length)
    }

    fn memory_store(&mut self, offset: u64, data: &[u8]) -> Result<(), EngineError> {
        self.memory.store(offset, data)
    }

    fn breakpoints(&self) -> Arc<BreakpointCell> {
        self.breakpoints.clone()
    }

    fn reset(&mut self) -> Result<(), EngineError> {
        self.memory = MockMemory::new(self.inner.memory_pages);
        self.points.set_used(0);
        self.breakpoints.set(Breakpoint::None);
        Ok(())
    }

    fn clean(&mut self) {
        self.cleaned = true;
    }
}

struct NoopInterrupt;

impl InterruptHandle for NoopInterrupt {
    fn interrupt(&self) {}
}

/// A [`WasmEngine`] whose modules are scripted contracts.
pub struct MockEngine {
    contracts: RwLock<HashMap<Vec<u8>, Arc<ContractDef>>>,
    opcode_costs: RwLock<Option<OpcodeCosts>>,
    interrupt: Arc<NoopInterrupt>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    /// An engine with no registered contracts.
    pub fn new() -> Self {
        Self {
            contracts: RwLock::new(HashMap::new()),
            opcode_costs: RwLock::new(None),
            interrupt: Arc::new(NoopInterrupt),
        }
    }

    /// Registers a contract under the given code bytes.
    pub fn register_contract(&self, code: &[u8], contract: MockContract) {
        self.contracts
            .write()
            .insert(code.to_vec(), Arc::new(contract.inner));
    }

    /// True when opcode costs have been programmed.
    pub fn opcode_costs_programmed(&self) -> bool {
        self.opcode_costs.read().is_some()
    }
}

impl WasmEngine for MockEngine {
    fn compile(&self, code: &[u8]) -> Result<Arc<dyn CompiledModule>, EngineError> {
        let inner = self
            .contracts
            .read()
            .get(code)
            .cloned()
            .ok_or_else(|| EngineError::Compile("unknown mock code".to_string()))?;
        Ok(Arc::new(MockModule {
            code: code.to_vec(),
            inner,
        }))
    }

    fn deserialize_module(&self, bytes: &[u8]) -> Result<Arc<dyn CompiledModule>, EngineError> {
        // Mock modules serialize to their original code bytes.
        self.compile(bytes)
            .map_err(|_| EngineError::Deserialize("unknown mock module".to_string()))
    }

    fn set_opcode_costs(&self, costs: &OpcodeCosts) {
        *self.opcode_costs.write() = Some(costs.clone());
    }

    fn instantiate(
        &self,
        module: &Arc<dyn CompiledModule>,
        params: InstantiationParams,
    ) -> Result<Box<dyn WasmInstance>, EngineError> {
        let code = module.serialize()?;
        let inner = self
            .contracts
            .read()
            .get(&code)
            .cloned()
            .ok_or_else(|| EngineError::Instantiate("unknown mock module".to_string()))?;
        Ok(Box::new(MockInstance {
            memory: MockMemory::new(inner.memory_pages),
            inner,
            points: params.points,
            breakpoints: params.breakpoints,
            cleaned: false,
        }))
    }

    fn interrupt_handle(&self) -> Arc<dyn InterruptHandle> {
        self.interrupt.clone()
    }
}
