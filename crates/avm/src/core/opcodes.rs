//! The target instruction set.
//!
//! Arithmetic and comparison instructions pop their first operand from the
//! top of the evaluation stack. Division and modulo by zero fault rather
//! than yielding zero; generated code guards where source semantics demand
//! a zero result.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Host-provided runtime primitives available to generated code.
///
/// These operate on the chain-state record held in the machine register
/// (current call frame, contract table) rather than on explicit stack
/// arguments alone, so their semantics live with the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuntimeOp {
    /// Pop offset; push the 32-byte word at that frame-memory offset
    MemoryLoad,
    /// Pop offset and word; store the word at that frame-memory offset
    MemoryStore,
    /// Pop offset and word; store the word's low byte at that offset
    MemoryStore8,
    /// Push the current frame-memory size, rounded up to a word
    MemorySize,
    /// Pop offset and length; push that frame-memory segment as bytes
    ReadSegment,
    /// Pop a byte buffer, a memory offset, a buffer offset and a length;
    /// copy the (zero-padded) buffer slice into frame memory
    CopyBytes,
    /// Pop offset and length; push the keccak-256 hash of that segment
    Keccak,
    /// Pop a key; push the current contract's storage slot (zero default)
    StorageLoad,
    /// Pop a key and a word; write the current contract's storage slot
    StorageStore,
    /// Pop offset; push the 32-byte (zero-padded) calldata word
    CalldataLoad,
    /// Push the calldata length
    CalldataSize,
    /// Pop a memory offset, a calldata offset and a length; copy calldata
    /// into frame memory, zero-padded
    CalldataCopy,
    /// Push the current frame's return-data length
    ReturndataSize,
    /// Pop a memory offset, a return-data offset and a length; copy return
    /// data into frame memory, faulting when the range overruns
    ReturndataCopy,
    /// Pop a memory offset and a length; copy return data into frame
    /// memory, silently clamped to the data actually present
    CopyReturnData,
    /// Push the originating caller of the current message chain
    Origin,
    /// Push the current message's caller
    Caller,
    /// Push the current message's value
    Callvalue,
    /// Push the machine environment's timestamp
    Timestamp,
    /// Push the machine environment's block number
    BlockNumber,
    /// Pop a currency id; push the current contract's balance of it
    BalanceGet,
    /// Pop a contract id and a currency id; push that contract's balance
    ExtBalance,
    /// Settle the current message's value from its caller to its
    /// destination inside the frame's contract table; faults when the
    /// caller's balance is short
    TransferValue,
    /// Pop offset, length and N topics; append a log record to the frame
    EmitLog(u8),
}

/// A target machine instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AvmOpcode {
    /// Pop a and b; push a + b
    Add,
    /// Pop a and b; push a * b
    Mul,
    /// Pop a and b; push a - b
    Sub,
    /// Pop a and b; push a / b, faulting when b is zero
    Div,
    /// Pop a and b; push the signed quotient, faulting when b is zero
    Sdiv,
    /// Pop a and b; push a mod b, faulting when b is zero
    Mod,
    /// Pop a and b; push the signed remainder, faulting when b is zero
    Smod,
    /// Pop a, b and m; push (a + b) mod m, faulting when m is zero
    Addmod,
    /// Pop a, b and m; push (a * b) mod m, faulting when m is zero
    Mulmod,
    /// Pop a and b; push a ** b, wrapping
    Exp,
    /// Pop a position and a word; push the sign-extended word
    Signextend,
    /// Pop a and b; push 1 when a < b, else 0
    Lt,
    /// Pop a and b; push 1 when a > b, else 0
    Gt,
    /// Signed less-than
    Slt,
    /// Signed greater-than
    Sgt,
    /// Pop a and b; push 1 when equal, else 0. Compares whole values.
    Eq,
    /// Pop a; push 1 when it is integer zero, else 0
    Iszero,
    /// Bitwise and
    And,
    /// Bitwise or
    Or,
    /// Bitwise xor
    Xor,
    /// Bitwise complement
    Not,
    /// Pop an index and a word; push the indexed big-endian byte
    Byte,
    /// Pop a value and a shift; push value << shift
    Shl,
    /// Pop a value and a shift; push value >> shift (logical)
    Shr,
    /// Pop a value and a shift; push value >> shift (arithmetic)
    Sar,
    /// Drop the top of the stack
    Pop,
    /// Duplicate the top of the stack
    Dup0,
    /// Duplicate the second stack element
    Dup1,
    /// Duplicate the third stack element
    Dup2,
    /// Swap the top two stack elements
    Swap1,
    /// Swap the first and third stack elements
    Swap2,
    /// Move the top of the evaluation stack to the auxiliary stack
    AuxPush,
    /// Move the top of the auxiliary stack to the evaluation stack
    AuxPop,
    /// Push the instruction's immediate value
    Push,
    /// Pop an index and a tuple; push the indexed element
    Tget,
    /// Pop an index, a tuple and a value; push the tuple with the indexed
    /// element replaced
    Tset,
    /// Pop a code point and jump to it
    Jump,
    /// Pop a code point and a condition; jump when the condition is nonzero
    Cjump,
    /// Raise a fault
    Error,
    /// Stop the machine entirely
    Halt,
    /// Pop a code point and install it as the fault handler
    SetErrHandler,
    /// Remove the installed fault handler
    ClearErrHandler,
    /// Push a copy of the register
    Rget,
    /// Pop into the register
    Rset,
    /// Drain the evaluation stack into a tuple (old top first) and push it
    Pack,
    /// Pop a tuple and push its elements so the first ends up on top
    Restore,
    /// Drain the auxiliary stack into a tuple (old top first) and push it
    /// onto the evaluation stack
    PackAux,
    /// Pop a tuple from the evaluation stack and spill its elements onto
    /// the auxiliary stack so the first ends up on top
    RestoreAux,
    /// Empty the evaluation stack
    ClearStack,
    /// Empty the auxiliary stack
    ClearAux,
    /// Push the next inbound message; stops the machine when none remain
    Inbox,
    /// Pop a value and append it to the outbox
    Send,
    /// Pop a value and append it to the machine log
    Log,
    /// A host runtime primitive
    Runtime(RuntimeOp),
}

impl AvmOpcode {
    /// Canonical mnemonic.
    pub fn name(&self) -> String {
        match self {
            AvmOpcode::Runtime(op) => format!("rt_{op:?}").to_lowercase(),
            other => format!("{other:?}").to_lowercase(),
        }
    }
}

impl fmt::Display for AvmOpcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(AvmOpcode::AuxPush.name(), "auxpush");
        assert_eq!(AvmOpcode::Runtime(RuntimeOp::Keccak).name(), "rt_keccak");
        assert_eq!(AvmOpcode::Runtime(RuntimeOp::EmitLog(2)).name(), "rt_emitlog(2)");
    }
}
