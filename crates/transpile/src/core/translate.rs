//! Per-instruction translation from source opcodes to target sequences.

use crate::{
    core::{contract::Contract, dispatch::DispatchTree, execution},
    error::Error,
};
use evmlift_avm::{AvmOpcode, AvmOpcode::*, CodeBuilder, RuntimeOp, Value};
use evmlift_evm::{EvmInstruction, EvmOp};
use tracing::warn;

/// Program-wide lookup trees shared by every contract's translation.
pub(crate) struct GlobalTables {
    /// Contract id to translated entry point
    pub entry_points: DispatchTree,
    /// Contract id to visible code bytes
    pub code_blobs: DispatchTree,
    /// Contract id to code hash
    pub code_hashes: DispatchTree,
    /// Contract id to code size
    pub code_sizes: DispatchTree,
}

/// Translation state for one contract.
pub(crate) struct TranslateCtx<'a> {
    /// The contract being translated
    pub contract: &'a Contract,
    /// Program counter to jump-destination label, this contract only
    pub jump_dests: DispatchTree,
    /// The program-wide tables
    pub tables: &'a GlobalTables,
}

/// Emits the target sequence for one source instruction.
///
/// Stack conventions mirror the source machine exactly: operands arrive in
/// source push order and results land where the source instruction would
/// leave them. Instructions the target cannot express are rejected here,
/// failing the whole compilation.
pub(crate) fn translate_instruction(
    b: &mut CodeBuilder,
    ctx: &TranslateCtx<'_>,
    instruction: &EvmInstruction,
) -> Result<(), Error> {
    match instruction.op {
        EvmOp::Stop => execution::emit_stop(b),

        EvmOp::Add => b.op(Add),
        EvmOp::Mul => b.op(Mul),
        EvmOp::Sub => b.op(Sub),
        // source semantics give zero for a zero divisor; the target faults,
        // so guard by dropping the dividend and leaving the zero
        EvmOp::Div => emit_guarded_div(b, Div),
        EvmOp::Sdiv => emit_guarded_div(b, Sdiv),
        EvmOp::Mod => emit_guarded_div(b, Mod),
        EvmOp::Smod => emit_guarded_div(b, Smod),
        EvmOp::Addmod => emit_guarded_mod(b, Addmod),
        EvmOp::Mulmod => emit_guarded_mod(b, Mulmod),
        EvmOp::Exp => b.op(Exp),
        EvmOp::Signextend => b.op(Signextend),

        EvmOp::Lt => b.op(Lt),
        EvmOp::Gt => b.op(Gt),
        EvmOp::Slt => b.op(Slt),
        EvmOp::Sgt => b.op(Sgt),
        EvmOp::Eq => b.op(Eq),
        EvmOp::Iszero => b.op(Iszero),
        EvmOp::And => b.op(And),
        EvmOp::Or => b.op(Or),
        EvmOp::Xor => b.op(Xor),
        EvmOp::Not => b.op(Not),
        EvmOp::Byte => b.op(Byte),
        // the target takes the shift amount below the value
        EvmOp::Shl => {
            b.op(Swap1);
            b.op(Shl);
        }
        EvmOp::Shr => {
            b.op(Swap1);
            b.op(Shr);
        }
        EvmOp::Sar => {
            b.op(Swap1);
            b.op(Sar);
        }

        EvmOp::Sha3 => b.op(Runtime(RuntimeOp::Keccak)),

        EvmOp::Address => b.push_int(ctx.contract.id),
        EvmOp::Balance => {
            warn!(
                contract = %ctx.contract.id,
                pc = instruction.pc,
                "BALANCE queries the compiled contract set only"
            );
            b.push_int(0u64);
            b.op(Swap1);
            b.op(Runtime(RuntimeOp::ExtBalance));
        }
        EvmOp::SelfBalance => {
            b.push_int(0u64);
            b.op(Runtime(RuntimeOp::BalanceGet));
        }
        EvmOp::Origin => b.op(Runtime(RuntimeOp::Origin)),
        EvmOp::Caller => b.op(Runtime(RuntimeOp::Caller)),
        EvmOp::Callvalue => b.op(Runtime(RuntimeOp::Callvalue)),
        EvmOp::Calldataload => b.op(Runtime(RuntimeOp::CalldataLoad)),
        EvmOp::Calldatasize => b.op(Runtime(RuntimeOp::CalldataSize)),
        EvmOp::Calldatacopy => b.op(Runtime(RuntimeOp::CalldataCopy)),

        EvmOp::Codesize => b.push_int(ctx.contract.code_size() as u64),
        EvmOp::Codecopy => {
            b.push(Value::Bytes(ctx.contract.code_blob().to_vec()));
            b.op(Runtime(RuntimeOp::CopyBytes));
        }
        EvmOp::Gasprice => b.push_int(1u64),
        EvmOp::Extcodesize => {
            warn!(
                contract = %ctx.contract.id,
                pc = instruction.pc,
                "EXTCODESIZE sees the compiled contract set only"
            );
            emit_table_lookup(b, &ctx.tables.code_sizes);
        }
        EvmOp::Extcodecopy => {
            warn!(
                contract = %ctx.contract.id,
                pc = instruction.pc,
                "EXTCODECOPY sees the compiled contract set only"
            );
            emit_table_lookup(b, &ctx.tables.code_blobs);
            b.op(Runtime(RuntimeOp::CopyBytes));
        }
        EvmOp::Extcodehash => {
            warn!(
                contract = %ctx.contract.id,
                pc = instruction.pc,
                "EXTCODEHASH sees the compiled contract set only"
            );
            emit_table_lookup(b, &ctx.tables.code_hashes);
        }
        EvmOp::Returndatasize => b.op(Runtime(RuntimeOp::ReturndataSize)),
        EvmOp::Returndatacopy => b.op(Runtime(RuntimeOp::ReturndataCopy)),

        EvmOp::Timestamp => b.op(Runtime(RuntimeOp::Timestamp)),
        EvmOp::Number => b.op(Runtime(RuntimeOp::BlockNumber)),

        EvmOp::Pop => b.op(Pop),
        EvmOp::Mload => b.op(Runtime(RuntimeOp::MemoryLoad)),
        EvmOp::Mstore => b.op(Runtime(RuntimeOp::MemoryStore)),
        EvmOp::Mstore8 => b.op(Runtime(RuntimeOp::MemoryStore8)),
        EvmOp::Sload => b.op(Runtime(RuntimeOp::StorageLoad)),
        EvmOp::Sstore => b.op(Runtime(RuntimeOp::StorageStore)),
        EvmOp::Msize => b.op(Runtime(RuntimeOp::MemorySize)),
        EvmOp::Gas => b.push_int(9999999999u64),

        // dynamic jumps resolve through the per-contract destination table;
        // a miss is a fault in the jumping frame
        EvmOp::Jump => {
            ctx.jump_dests.emit(b);
            b.op(Dup0);
            b.push_none();
            b.op(Eq);
            b.if_else(|b| b.op(AvmOpcode::Error), |b| b.op(Jump));
        }
        // the destination is validated whether or not the branch is taken
        EvmOp::Jumpi => {
            ctx.jump_dests.emit(b);
            b.op(Dup0);
            b.push_none();
            b.op(Eq);
            b.if_else(|b| b.op(AvmOpcode::Error), |b| b.op(Cjump));
        }
        EvmOp::Jumpdest => {}

        EvmOp::Push(_) => b.push_int(instruction.operand.unwrap_or_default()),
        EvmOp::Dup(n) => b.dup_n(n as usize - 1),
        EvmOp::Swap(n) => b.swap_n(n as usize),
        EvmOp::Log(n) => b.op(Runtime(RuntimeOp::EmitLog(n))),

        EvmOp::Call => {
            execution::emit_call_family(
                b,
                &ctx.tables.entry_points,
                ctx.contract.id,
                instruction.pc,
                execution::CallKind::CALL,
            );
        }
        EvmOp::Callcode => {
            execution::emit_call_family(
                b,
                &ctx.tables.entry_points,
                ctx.contract.id,
                instruction.pc,
                execution::CallKind::CALLCODE,
            );
        }
        EvmOp::Delegatecall => {
            execution::emit_call_family(
                b,
                &ctx.tables.entry_points,
                ctx.contract.id,
                instruction.pc,
                execution::CallKind::DELEGATECALL,
            );
        }
        EvmOp::Staticcall => {
            execution::emit_call_family(
                b,
                &ctx.tables.entry_points,
                ctx.contract.id,
                instruction.pc,
                execution::CallKind::STATICCALL,
            );
        }

        EvmOp::Return => execution::emit_return(b),
        EvmOp::Revert => execution::emit_revert(b),
        EvmOp::Invalid(byte) => {
            if byte != 0xfe {
                warn!(
                    contract = %ctx.contract.id,
                    pc = instruction.pc,
                    byte = format!("{byte:#04x}"),
                    "unassigned opcode treated as INVALID"
                );
            }
            b.push_int(0u64);
            b.push_int(0u64);
            execution::emit_revert(b);
        }
        EvmOp::Selfdestruct => execution::emit_selfdestruct(b),

        EvmOp::Blockhash
        | EvmOp::Coinbase
        | EvmOp::Difficulty
        | EvmOp::Gaslimit
        | EvmOp::Getpc
        | EvmOp::Create
        | EvmOp::Create2 => {
            return Err(Error::UnsupportedConstruct(format!(
                "{} in contract {} at pc {}",
                instruction.op, ctx.contract.id, instruction.pc
            )));
        }
    }
    Ok(())
}

fn emit_guarded_div(b: &mut CodeBuilder, op: AvmOpcode) {
    b.op(AvmOpcode::Dup1);
    b.op(AvmOpcode::Iszero);
    b.if_else(|b| b.op(AvmOpcode::Pop), |b| b.op(op));
}

fn emit_guarded_mod(b: &mut CodeBuilder, op: AvmOpcode) {
    b.op(AvmOpcode::Dup2);
    b.op(AvmOpcode::Iszero);
    b.if_else(
        |b| {
            b.op(AvmOpcode::Pop);
            b.op(AvmOpcode::Pop);
        },
        |b| b.op(op),
    );
}

/// Table lookup keyed by the contract id on top of the stack; a miss
/// faults the current frame.
fn emit_table_lookup(b: &mut CodeBuilder, table: &DispatchTree) {
    table.emit(b);
    b.op(AvmOpcode::Dup0);
    b.push_none();
    b.op(AvmOpcode::Eq);
    b.if_then(|b| b.op(AvmOpcode::Error));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::contract::{Contract, ContractInput};
    use alloy::primitives::U256;
    use evmlift_avm::Label;
    use std::collections::BTreeMap;

    fn contract(code: &str) -> Contract {
        Contract::from_input(&ContractInput {
            id: U256::from(10),
            code: code.to_string(),
            storage: BTreeMap::new(),
            balances: BTreeMap::new(),
        })
        .expect("should decode")
    }

    fn ctx_tables() -> GlobalTables {
        GlobalTables {
            entry_points: DispatchTree::build(vec![(
                U256::from(10),
                Value::Label(Label::contract_entry(U256::from(10))),
            )]),
            code_blobs: DispatchTree::build(Vec::new()),
            code_hashes: DispatchTree::build(Vec::new()),
            code_sizes: DispatchTree::build(Vec::new()),
        }
    }

    fn translate_all(code: &str) -> Result<CodeBuilder, Error> {
        let contract = contract(code);
        let tables = ctx_tables();
        let jump_dests = DispatchTree::build(
            contract
                .jump_dests()
                .iter()
                .map(|pc| {
                    (U256::from(*pc), Value::Label(Label::jump_dest(contract.id, *pc)))
                })
                .collect(),
        );
        let ctx = TranslateCtx { contract: &contract, jump_dests, tables: &tables };
        let mut b = CodeBuilder::new();
        for instruction in &ctx.contract.instructions {
            translate_instruction(&mut b, &ctx, instruction)?;
        }
        Ok(b)
    }

    #[test]
    fn test_arithmetic_translates_directly() {
        let b = translate_all("6001600201").expect("should translate");
        assert!(b.instructions().iter().any(|i| i.opcode == AvmOpcode::Add));
    }

    #[test]
    fn test_block_introspection_is_rejected() {
        // BLOCKHASH
        assert!(matches!(
            translate_all("600040"),
            Err(Error::UnsupportedConstruct(_))
        ));
    }

    #[test]
    fn test_create_is_rejected() {
        assert!(matches!(
            translate_all("600060006000f0"),
            Err(Error::UnsupportedConstruct(_))
        ));
    }

    #[test]
    fn test_shift_operands_are_swapped() {
        // PUSH1 02 PUSH1 01 SHL: shift 2, value 1
        let b = translate_all("600260011b").expect("should translate");
        let ops: Vec<_> = b.instructions().iter().map(|i| i.opcode).collect();
        let shl = ops.iter().position(|op| *op == AvmOpcode::Shl).expect("shl emitted");
        assert_eq!(ops[shl - 1], AvmOpcode::Swap1);
    }

    #[test]
    fn test_gas_becomes_constant() {
        let b = translate_all("5a").expect("should translate");
        assert_eq!(b.instructions()[0].immediate, Some(Value::int(9999999999u64)));
    }
}
