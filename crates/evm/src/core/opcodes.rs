//! The source instruction set, resolved once at decode time.
//!
//! Every byte in a bytecode stream maps to exactly one variant here;
//! unrecognized bytes become [`EvmOp::Invalid`] carrying the raw byte so
//! later stages can distinguish the canonical 0xfe from stray data.

use alloy::primitives::U256;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A source-level opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvmOp {
    /// 0x00
    Stop,
    /// 0x01
    Add,
    /// 0x02
    Mul,
    /// 0x03
    Sub,
    /// 0x04
    Div,
    /// 0x05
    Sdiv,
    /// 0x06
    Mod,
    /// 0x07
    Smod,
    /// 0x08
    Addmod,
    /// 0x09
    Mulmod,
    /// 0x0a
    Exp,
    /// 0x0b
    Signextend,
    /// 0x10
    Lt,
    /// 0x11
    Gt,
    /// 0x12
    Slt,
    /// 0x13
    Sgt,
    /// 0x14
    Eq,
    /// 0x15
    Iszero,
    /// 0x16
    And,
    /// 0x17
    Or,
    /// 0x18
    Xor,
    /// 0x19
    Not,
    /// 0x1a
    Byte,
    /// 0x1b
    Shl,
    /// 0x1c
    Shr,
    /// 0x1d
    Sar,
    /// 0x20
    Sha3,
    /// 0x30
    Address,
    /// 0x31
    Balance,
    /// 0x32
    Origin,
    /// 0x33
    Caller,
    /// 0x34
    Callvalue,
    /// 0x35
    Calldataload,
    /// 0x36
    Calldatasize,
    /// 0x37
    Calldatacopy,
    /// 0x38
    Codesize,
    /// 0x39
    Codecopy,
    /// 0x3a
    Gasprice,
    /// 0x3b
    Extcodesize,
    /// 0x3c
    Extcodecopy,
    /// 0x3d
    Returndatasize,
    /// 0x3e
    Returndatacopy,
    /// 0x3f
    Extcodehash,
    /// 0x40
    Blockhash,
    /// 0x41
    Coinbase,
    /// 0x42
    Timestamp,
    /// 0x43
    Number,
    /// 0x44
    Difficulty,
    /// 0x45
    Gaslimit,
    /// 0x50
    Pop,
    /// 0x51
    Mload,
    /// 0x52
    Mstore,
    /// 0x53
    Mstore8,
    /// 0x54
    Sload,
    /// 0x55
    Sstore,
    /// 0x56
    Jump,
    /// 0x57
    Jumpi,
    /// 0x58
    Getpc,
    /// 0x59
    Msize,
    /// 0x5a
    Gas,
    /// 0x5b
    Jumpdest,
    /// 0x5f..=0x7f, PUSH0 through PUSH32. The width is the byte count of
    /// the immediate operand (0 for PUSH0).
    Push(u8),
    /// 0x80..=0x8f, DUP1 through DUP16
    Dup(u8),
    /// 0x90..=0x9f, SWAP1 through SWAP16
    Swap(u8),
    /// 0xa0..=0xa4, LOG0 through LOG4
    Log(u8),
    /// 0xf0
    Create,
    /// 0xf1
    Call,
    /// 0xf2
    Callcode,
    /// 0xf3
    Return,
    /// 0xf4
    Delegatecall,
    /// 0xf5
    Create2,
    /// 0xfa
    Staticcall,
    /// 0xfd
    Revert,
    /// 0xfe, or any byte with no assigned instruction. Carries the raw byte.
    Invalid(u8),
    /// 0xff
    Selfdestruct,
    /// Pseudo-instruction produced by the preprocessor when it recognizes a
    /// contract querying its own balance.
    SelfBalance,
}

impl EvmOp {
    /// Maps a raw byte to its instruction. Unassigned bytes become
    /// [`EvmOp::Invalid`] with the byte preserved.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => EvmOp::Stop,
            0x01 => EvmOp::Add,
            0x02 => EvmOp::Mul,
            0x03 => EvmOp::Sub,
            0x04 => EvmOp::Div,
            0x05 => EvmOp::Sdiv,
            0x06 => EvmOp::Mod,
            0x07 => EvmOp::Smod,
            0x08 => EvmOp::Addmod,
            0x09 => EvmOp::Mulmod,
            0x0a => EvmOp::Exp,
            0x0b => EvmOp::Signextend,
            0x10 => EvmOp::Lt,
            0x11 => EvmOp::Gt,
            0x12 => EvmOp::Slt,
            0x13 => EvmOp::Sgt,
            0x14 => EvmOp::Eq,
            0x15 => EvmOp::Iszero,
            0x16 => EvmOp::And,
            0x17 => EvmOp::Or,
            0x18 => EvmOp::Xor,
            0x19 => EvmOp::Not,
            0x1a => EvmOp::Byte,
            0x1b => EvmOp::Shl,
            0x1c => EvmOp::Shr,
            0x1d => EvmOp::Sar,
            0x20 => EvmOp::Sha3,
            0x30 => EvmOp::Address,
            0x31 => EvmOp::Balance,
            0x32 => EvmOp::Origin,
            0x33 => EvmOp::Caller,
            0x34 => EvmOp::Callvalue,
            0x35 => EvmOp::Calldataload,
            0x36 => EvmOp::Calldatasize,
            0x37 => EvmOp::Calldatacopy,
            0x38 => EvmOp::Codesize,
            0x39 => EvmOp::Codecopy,
            0x3a => EvmOp::Gasprice,
            0x3b => EvmOp::Extcodesize,
            0x3c => EvmOp::Extcodecopy,
            0x3d => EvmOp::Returndatasize,
            0x3e => EvmOp::Returndatacopy,
            0x3f => EvmOp::Extcodehash,
            0x40 => EvmOp::Blockhash,
            0x41 => EvmOp::Coinbase,
            0x42 => EvmOp::Timestamp,
            0x43 => EvmOp::Number,
            0x44 => EvmOp::Difficulty,
            0x45 => EvmOp::Gaslimit,
            0x50 => EvmOp::Pop,
            0x51 => EvmOp::Mload,
            0x52 => EvmOp::Mstore,
            0x53 => EvmOp::Mstore8,
            0x54 => EvmOp::Sload,
            0x55 => EvmOp::Sstore,
            0x56 => EvmOp::Jump,
            0x57 => EvmOp::Jumpi,
            0x58 => EvmOp::Getpc,
            0x59 => EvmOp::Msize,
            0x5a => EvmOp::Gas,
            0x5b => EvmOp::Jumpdest,
            0x5f..=0x7f => EvmOp::Push(byte - 0x5f),
            0x80..=0x8f => EvmOp::Dup(byte - 0x7f),
            0x90..=0x9f => EvmOp::Swap(byte - 0x8f),
            0xa0..=0xa4 => EvmOp::Log(byte - 0xa0),
            0xf0 => EvmOp::Create,
            0xf1 => EvmOp::Call,
            0xf2 => EvmOp::Callcode,
            0xf3 => EvmOp::Return,
            0xf4 => EvmOp::Delegatecall,
            0xf5 => EvmOp::Create2,
            0xfa => EvmOp::Staticcall,
            0xfd => EvmOp::Revert,
            0xff => EvmOp::Selfdestruct,
            _ => EvmOp::Invalid(byte),
        }
    }

    /// The byte count of the immediate operand following this instruction in
    /// the bytecode stream. Zero for everything but PUSH1..PUSH32.
    pub fn operand_size(&self) -> u8 {
        match self {
            EvmOp::Push(n) => *n,
            _ => 0,
        }
    }

    /// Canonical mnemonic, e.g. `PUSH2` or `SELFBALANCE`.
    pub fn name(&self) -> String {
        match self {
            EvmOp::Push(n) => format!("PUSH{n}"),
            EvmOp::Dup(n) => format!("DUP{n}"),
            EvmOp::Swap(n) => format!("SWAP{n}"),
            EvmOp::Log(n) => format!("LOG{n}"),
            EvmOp::Invalid(_) => "INVALID".to_string(),
            EvmOp::SelfBalance => "SELFBALANCE".to_string(),
            EvmOp::Getpc => "PC".to_string(),
            EvmOp::Sha3 => "SHA3".to_string(),
            other => format!("{other:?}").to_uppercase(),
        }
    }
}

impl fmt::Display for EvmOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A decoded instruction with its location and push operand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvmInstruction {
    /// The instruction
    pub op: EvmOp,
    /// Big-endian push operand, present only for PUSH1..PUSH32
    pub operand: Option<U256>,
    /// Byte offset of the instruction in its contract's code
    pub pc: usize,
    /// Byte count of the operand as it appeared in the stream
    pub operand_size: u8,
}

impl EvmInstruction {
    /// Total byte footprint of the instruction including its operand.
    pub fn byte_len(&self) -> usize {
        1 + self.operand_size as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_byte_families() {
        assert_eq!(EvmOp::from_byte(0x01), EvmOp::Add);
        assert_eq!(EvmOp::from_byte(0x5f), EvmOp::Push(0));
        assert_eq!(EvmOp::from_byte(0x60), EvmOp::Push(1));
        assert_eq!(EvmOp::from_byte(0x7f), EvmOp::Push(32));
        assert_eq!(EvmOp::from_byte(0x80), EvmOp::Dup(1));
        assert_eq!(EvmOp::from_byte(0x8f), EvmOp::Dup(16));
        assert_eq!(EvmOp::from_byte(0x90), EvmOp::Swap(1));
        assert_eq!(EvmOp::from_byte(0xa4), EvmOp::Log(4));
        assert_eq!(EvmOp::from_byte(0xfe), EvmOp::Invalid(0xfe));
        assert_eq!(EvmOp::from_byte(0xef), EvmOp::Invalid(0xef));
    }

    #[test]
    fn test_names() {
        assert_eq!(EvmOp::Push(2).name(), "PUSH2");
        assert_eq!(EvmOp::Selfdestruct.name(), "SELFDESTRUCT");
        assert_eq!(EvmOp::Getpc.name(), "PC");
        assert_eq!(EvmOp::Invalid(0xab).name(), "INVALID");
    }
}
