//! The transpiler module translates EVM bytecode into programs for a
//! tuple-based stack machine with no addressable jumps and no native call
//! stack.
//!
//! Addressable jumps and external lookups become balanced decision trees,
//! and the nested-call semantics of the source platform are reproduced by an
//! emitted call-frame engine that snapshots state on entry and merges it
//! back only when the callee succeeds.

/// Error types for the transpiler module
pub mod error;

mod core;
mod interfaces;

// re-export the public interface
pub use core::{
    compile_contracts, transpile,
    contract::{Contract, ContractInput},
};
pub use error::Error;
pub use interfaces::{TranspileArgs, TranspileArgsBuilder};
