// Path: crates/vm/wasm/src/facts.rs
//! Static facts about a module, extracted before compilation.
//!
//! Contract verification needs properties wasmtime's `Module` does not
//! surface (start functions, floating-point opcode presence), so the raw
//! bytes are scanned once with `wasmparser`.

use wasmparser::{Operator, Parser, Payload};
use wasmtime::Module;

use crucible_types::error::EngineError;

/// The verification-relevant surface of one module.
#[derive(Debug, Clone, Default)]
pub struct ModuleFacts {
    /// Names of imported functions.
    pub imported_functions: Vec<String>,
    /// Names of exported functions.
    pub exported_functions: Vec<String>,
    /// True when the module declares a start function.
    pub has_start_function: bool,
    /// Initial linear-memory size in pages.
    pub memory_pages: u32,
    /// True when any function body contains a floating-point opcode.
    pub uses_float_opcodes: bool,
}

/// Scans raw module bytes.
pub fn scan_module(code: &[u8]) -> Result<ModuleFacts, EngineError> {
    let mut facts = ModuleFacts::default();

    for payload in Parser::new(0).parse_all(code) {
        let payload = payload.map_err(|e| EngineError::Compile(e.to_string()))?;
        match payload {
            Payload::ImportSection(imports) => {
                for import in imports {
                    let import = import.map_err(|e| EngineError::Compile(e.to_string()))?;
                    if matches!(import.ty, wasmparser::TypeRef::Func(_)) {
                        facts.imported_functions.push(import.name.to_string());
                    }
                }
            }
            Payload::ExportSection(exports) => {
                for export in exports {
                    let export = export.map_err(|e| EngineError::Compile(e.to_string()))?;
                    if export.kind == wasmparser::ExternalKind::Func {
                        facts.exported_functions.push(export.name.to_string());
                    }
                }
            }
            Payload::MemorySection(memories) => {
                for memory in memories {
                    let memory = memory.map_err(|e| EngineError::Compile(e.to_string()))?;
                    facts.memory_pages = facts.memory_pages.max(memory.initial as u32);
                }
            }
            Payload::StartSection { .. } => {
                facts.has_start_function = true;
            }
            Payload::CodeSectionEntry(body) => {
                let mut reader = body
                    .get_operators_reader()
                    .map_err(|e| EngineError::Compile(e.to_string()))?;
                while !reader.eof() {
                    let op = reader
                        .read()
                        .map_err(|e| EngineError::Compile(e.to_string()))?;
                    if is_float_operator(&op) {
                        facts.uses_float_opcodes = true;
                        break;
                    }
                }
            }
            _ => {}
        }
    }

    Ok(facts)
}

/// Rebuilds what facts it can from an already-compiled module (the
/// deserialization path, where the raw bytes are gone). Start-function and
/// float facts were checked before the module was ever serialized.
pub fn facts_from_module(module: &Module) -> ModuleFacts {
    let mut facts = ModuleFacts::default();
    for import in module.imports() {
        if matches!(import.ty(), wasmtime::ExternType::Func(_)) {
            facts.imported_functions.push(import.name().to_string());
        }
    }
    for export in module.exports() {
        if matches!(export.ty(), wasmtime::ExternType::Func(_)) {
            facts.exported_functions.push(export.name().to_string());
        }
        if let wasmtime::ExternType::Memory(memory) = export.ty() {
            facts.memory_pages = facts.memory_pages.max(memory.minimum() as u32);
        }
    }
    facts
}

fn is_float_operator(op: &Operator<'_>) -> bool {
    matches!(
        op,
        Operator::F32Load { .. }
            | Operator::F64Load { .. }
            | Operator::F32Store { .. }
            | Operator::F64Store { .. }
            | Operator::F32Const { .. }
            | Operator::F64Const { .. }
            | Operator::F32Abs
            | Operator::F32Neg
            | Operator::F32Ceil
            | Operator::F32Floor
            | Operator::F32Trunc
            | Operator::F32Nearest
            | Operator::F32Sqrt
            | Operator::F32Add
            | Operator::F32Sub
            | Operator::F32Mul
            | Operator::F32Div
            | Operator::F32Min
            | Operator::F32Max
            | Operator::F32Copysign
            | Operator::F64Abs
            | Operator::F64Neg
            | Operator::F64Ceil
            | Operator::F64Floor
            | Operator::F64Trunc
            | Operator::F64Nearest
            | Operator::F64Sqrt
            | Operator::F64Add
            | Operator::F64Sub
            | Operator::F64Mul
            | Operator::F64Div
            | Operator::F64Min
            | Operator::F64Max
            | Operator::F64Copysign
            | Operator::F32Eq
            | Operator::F32Ne
            | Operator::F32Lt
            | Operator::F32Gt
            | Operator::F32Le
            | Operator::F32Ge
            | Operator::F64Eq
            | Operator::F64Ne
            | Operator::F64Lt
            | Operator::F64Gt
            | Operator::F64Le
            | Operator::F64Ge
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    // (module (import "env" "finish" (func)) (memory 2) (export "init" (func 1)) (func))
    // assembled by hand; kept tiny so the scanner's section handling is the
    // thing under test.
    const MODULE_WITH_IMPORT: &[u8] = &[
        0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00, // magic + version
        0x01, 0x04, 0x01, 0x60, 0x00, 0x00, // type section: () -> ()
        0x02, 0x0e, 0x01, 0x03, b'e', b'n', b'v', 0x06, b'f', b'i', b'n', b'i', b's', b'h',
        0x00, 0x00, // import section: env.finish
        0x03, 0x02, 0x01, 0x00, // function section: one local func of type 0
        0x05, 0x03, 0x01, 0x00, 0x02, // memory section: min 2 pages
        0x07, 0x08, 0x01, 0x04, b'i', b'n', b'i', b't', 0x00, 0x01, // export "init"
        0x0a, 0x04, 0x01, 0x02, 0x00, 0x0b, // code section: empty body
    ];

    #[test]
    fn scans_imports_exports_and_memory() {
        let facts = scan_module(MODULE_WITH_IMPORT).unwrap();
        assert_eq!(facts.imported_functions, vec!["finish".to_string()]);
        assert_eq!(facts.exported_functions, vec!["init".to_string()]);
        assert_eq!(facts.memory_pages, 2);
        assert!(!facts.has_start_function);
        assert!(!facts.uses_float_opcodes);
    }

    #[test]
    fn malformed_bytes_fail_to_scan() {
        assert!(scan_module(&[0x00, 0x61, 0x73]).is_err());
    }
}
