// Path: crates/api/src/lib.rs

//! # Crucible API Crate Lints
//!
//! This crate enforces a strict set of lints to ensure high-quality,
//! panic-free, and well-documented code. Panics are disallowed in non-test
//! code to promote robust error handling.
#![cfg_attr(
    not(test),
    deny(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::todo,
        clippy::unimplemented
    )
)]
//! # Crucible API
//!
//! Core traits and interfaces for the Crucible VM host. This crate defines
//! the stable contract between the host and its external collaborators: the
//! blockchain hook, the WASM engine, built-in functions, epoch handlers and
//! the crypto hook.

/// The blockchain hook: account state, block info and compiled-code caches.
pub mod blockchain;
/// Built-in function registry and token-transfer parsing.
pub mod builtin;
/// The cryptographic hook consumed by the EEI crypto functions.
pub mod crypto;
/// The WASM engine binding: compilation, instantiation, memory, breakpoints.
pub mod engine;
/// Feature-activation epoch queries and notifications.
pub mod epochs;
/// Mock collaborators shared by unit and integration tests.
pub mod test_utils;
