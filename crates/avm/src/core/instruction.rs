use crate::core::{opcodes::AvmOpcode, value::Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The source-level instruction a generated instruction was lowered from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTag {
    /// Source mnemonic, e.g. `SSTORE`
    pub op: String,
    /// Source program counter
    pub pc: usize,
}

/// A single emitted instruction. Only [`AvmOpcode::Push`] carries an
/// immediate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvmInstruction {
    /// The instruction
    pub opcode: AvmOpcode,
    /// Immediate value for pushes
    pub immediate: Option<Value>,
    /// Provenance for diagnostics, when known
    pub source: Option<SourceTag>,
}

impl fmt::Display for AvmInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.immediate {
            Some(immediate) => write!(f, "{} {immediate:?}", self.opcode),
            None => write!(f, "{}", self.opcode),
        }
    }
}
