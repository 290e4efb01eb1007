//! Bytecode preprocessing passes run before translation.

use alloy::primitives::U256;
use evmlift_evm::{EvmInstruction, EvmOp};

/// Strips the compiler metadata tail from an instruction stream.
///
/// Scans backwards for the swarm marker, either as an instruction pair
/// (0xa1 or 0xa2 followed by 0x65) or embedded in a push operand. A marker
/// found inside an operand keeps the carrying instruction, since the
/// boundary cannot be placed more precisely than that.
pub(crate) fn remove_metadata(mut instructions: Vec<EvmInstruction>) -> Vec<EvmInstruction> {
    let mut index = instructions.len().saturating_sub(1);
    while index > 0 {
        index -= 1;

        let op = instructions[index].op;
        if matches!(op, EvmOp::Log(1) | EvmOp::Log(2))
            && instructions[index + 1].op == EvmOp::Push(6)
        {
            instructions.truncate(index);
            return instructions;
        }

        if let Some(operand) = instructions[index].operand {
            if contains_end_marker(operand) {
                // the boundary instruction is probably valid; keep it
                instructions.truncate(index + 1);
                return instructions;
            }
        }
    }
    instructions
}

fn contains_end_marker(operand: U256) -> bool {
    let mut value = operand;
    while value >= U256::from(0xa265u64) {
        let low = value & U256::from(0xffffu64);
        if low == U256::from(0xa165u64) || low == U256::from(0xa265u64) {
            return true;
        }
        value >>= 8;
    }
    false
}

/// Rewrites the self-balance query idiom into its pseudo-instruction.
///
/// The pattern is ADDRESS, PUSH20 of the address mask, AND, BALANCE; the
/// replacement keeps the program counter of the ADDRESS.
pub(crate) fn replace_self_balance(instructions: Vec<EvmInstruction>) -> Vec<EvmInstruction> {
    let mask = (U256::from(1) << 160) - U256::from(1);
    let mut out = Vec::with_capacity(instructions.len());

    let mut index = 0;
    while index < instructions.len() {
        if index + 3 < instructions.len()
            && instructions[index].op == EvmOp::Address
            && instructions[index + 1].op == EvmOp::Push(20)
            && instructions[index + 1].operand == Some(mask)
            && instructions[index + 2].op == EvmOp::And
            && instructions[index + 3].op == EvmOp::Balance
        {
            out.push(EvmInstruction {
                op: EvmOp::SelfBalance,
                operand: None,
                pc: instructions[index].pc,
                operand_size: 0,
            });
            index += 4;
        } else {
            out.push(instructions[index].clone());
            index += 1;
        }
    }
    out
}
