// Path: crates/api/src/test_utils/mod.rs
//! Mock collaborators shared by unit and integration tests.
//!
//! The mocks here substitute the host's external seams: the blockchain hook
//! (`MockWorld`), the WASM engine (`MockEngine`, driven by scripted exports
//! instead of real bytecode) and the epoch handlers. Tests build contract
//! behavior as Rust closures that call back into the EEI, which is how the
//! executor, metering and output pipelines are exercised without compiled
//! WASM fixtures.

mod mock_engine;
mod mock_world;
mod stub_epochs;

pub use mock_engine::{mock_code, MockContract, MockEngine, ScriptEnv};
pub use mock_world::{MockAccount, MockWorld};
pub use stub_epochs::{StubEnableEpochs, StubEpochNotifier};
