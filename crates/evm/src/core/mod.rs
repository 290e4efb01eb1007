/// Linear bytecode disassembler
pub mod disassemble;

/// The source instruction set
pub mod opcodes;
