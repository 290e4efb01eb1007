use crate::core::opcodes::{EvmInstruction, EvmOp};
use alloy::primitives::U256;

/// Decodes raw bytecode into a flat instruction list.
///
/// Push operands are collected big-endian. A push whose operand runs past the
/// end of the stream keeps whatever bytes remain; solidity routinely leaves
/// such tails behind metadata boundaries.
pub fn disassemble(bytecode: &[u8]) -> Vec<EvmInstruction> {
    let mut instructions = Vec::new();
    let mut pc = 0usize;

    while pc < bytecode.len() {
        let op = EvmOp::from_byte(bytecode[pc]);
        let declared = op.operand_size() as usize;
        let available = declared.min(bytecode.len() - pc - 1);

        let operand = if declared > 0 {
            let mut value = U256::ZERO;
            for byte in &bytecode[pc + 1..pc + 1 + available] {
                value = (value << 8) | U256::from(*byte);
            }
            Some(value)
        } else {
            None
        };

        instructions.push(EvmInstruction {
            op,
            operand,
            pc,
            operand_size: available as u8,
        });
        pc += 1 + available;
    }

    instructions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disassemble_simple() {
        // PUSH1 01 PUSH1 02 ADD STOP
        let instructions = disassemble(&[0x60, 0x01, 0x60, 0x02, 0x01, 0x00]);
        assert_eq!(instructions.len(), 4);
        assert_eq!(instructions[0].op, EvmOp::Push(1));
        assert_eq!(instructions[0].operand, Some(U256::from(1)));
        assert_eq!(instructions[1].pc, 2);
        assert_eq!(instructions[2].op, EvmOp::Add);
        assert_eq!(instructions[3].op, EvmOp::Stop);
    }

    #[test]
    fn test_disassemble_multibyte_operand() {
        // PUSH3 0xaabbcc
        let instructions = disassemble(&[0x62, 0xaa, 0xbb, 0xcc]);
        assert_eq!(instructions.len(), 1);
        assert_eq!(instructions[0].operand, Some(U256::from(0x00aabbccu64)));
        assert_eq!(instructions[0].operand_size, 3);
    }

    #[test]
    fn test_disassemble_truncated_push() {
        // PUSH4 with only two operand bytes left
        let instructions = disassemble(&[0x00, 0x63, 0xde, 0xad]);
        assert_eq!(instructions.len(), 2);
        assert_eq!(instructions[1].op, EvmOp::Push(4));
        assert_eq!(instructions[1].operand, Some(U256::from(0xdeadu64)));
        assert_eq!(instructions[1].operand_size, 2);
    }

    #[test]
    fn test_disassemble_push0() {
        let instructions = disassemble(&[0x5f, 0x00]);
        assert_eq!(instructions[0].op, EvmOp::Push(0));
        assert_eq!(instructions[0].operand, None);
        assert_eq!(instructions[1].pc, 1);
    }

    #[test]
    fn test_disassemble_pcs_account_for_operands() {
        // PUSH2 dead JUMPDEST
        let instructions = disassemble(&[0x61, 0xde, 0xad, 0x5b]);
        assert_eq!(instructions[1].op, EvmOp::Jumpdest);
        assert_eq!(instructions[1].pc, 3);
    }
}
