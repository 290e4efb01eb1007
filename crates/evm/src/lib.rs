//! EVM bytecode model for evmlift.
//!
//! Provides the source-side instruction set as a closed enum, along with a
//! linear disassembler that turns raw bytecode into instruction records
//! carrying their program counter and push operand.

/// Core instruction set and disassembler
pub mod core;

pub use core::{
    disassemble::disassemble,
    opcodes::{EvmInstruction, EvmOp},
};
