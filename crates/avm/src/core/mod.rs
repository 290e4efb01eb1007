/// Label-aware code emitter
pub mod builder;

/// Chain-state record layout shared by generated code and the executor
pub mod chain;

/// Reference interpreter for linked programs
pub mod executor;

/// Instruction representation
pub mod instruction;

/// The target instruction set
pub mod opcodes;

/// Linked programs and label resolution
pub mod program;

/// The tuple-structured value model
pub mod value;
