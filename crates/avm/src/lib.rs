//! Target machine model for evmlift.
//!
//! The target is a stack machine with a single evaluation stack, an auxiliary
//! stack, one general-purpose register, immutable tuple-structured values,
//! and a message-passing I/O surface. This crate provides the instruction
//! set, the value model, a label-aware code builder, program linking, and a
//! reference executor used to run linked programs.

/// Error types for the target machine module
pub mod error;

/// Core machine model
pub mod core;

pub use core::{
    builder::CodeBuilder,
    chain,
    executor::{Executor, ExecutorEnv, MachineStatus},
    instruction::{AvmInstruction, SourceTag},
    opcodes::{AvmOpcode, RuntimeOp},
    program::Program,
    value::{Label, Value},
};
pub use error::Error;
