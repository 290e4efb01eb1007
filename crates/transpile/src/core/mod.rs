//! The compilation pipeline: contract descriptions in, linked program out.

pub mod contract;
pub(crate) mod dispatch;
pub(crate) mod execution;
pub(crate) mod preprocess;
pub(crate) mod translate;

use crate::{
    core::{
        contract::{Contract, ContractInput},
        dispatch::DispatchTree,
        translate::{translate_instruction, GlobalTables, TranslateCtx},
    },
    error::Error,
    interfaces::TranspileArgs,
};
use alloy::primitives::U256;
use evmlift_avm::{chain, AvmOpcode, CodeBuilder, Label, Program, Value};
use evmlift_evm::EvmOp;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Address reserved for the interrupt contract, which is given a nonzero
/// code size even though no code is compiled for it.
const INTERRUPT_CONTRACT_ID: u64 = 0x01;

/// Compiles the contracts named by `args` into a linked program.
///
/// The target is either a path to a JSON description file or the JSON
/// itself; writing the result anywhere is the caller's business.
pub async fn transpile(args: TranspileArgs) -> Result<Program, Error> {
    let target = args.target.trim();
    let source = if target.starts_with('[') || target.starts_with('{') {
        target.to_string()
    } else {
        std::fs::read_to_string(target)
            .map_err(|e| Error::ParseError(format!("unable to read {target}: {e}")))?
    };

    let inputs: Vec<ContractInput> = serde_json::from_str(&source)
        .map_err(|e| Error::ParseError(format!("invalid contract description: {e}")))?;

    compile_contracts(&inputs)
}

/// Compiles a set of contracts into a linked program: an initialization
/// block that seeds the machine register, the message loop, and one
/// translated block per contract.
pub fn compile_contracts(inputs: &[ContractInput]) -> Result<Program, Error> {
    let mut contracts =
        inputs.iter().map(Contract::from_input).collect::<Result<Vec<_>, _>>()?;
    contracts.sort_by_key(|contract| contract.id);
    for pair in contracts.windows(2) {
        if pair[0].id == pair[1].id {
            return Err(Error::ParseError(format!("duplicate contract id {}", pair[0].id)));
        }
    }

    let tables = build_tables(&contracts);

    let mut main = CodeBuilder::new();
    let fault_handler = Label::new("fault_handler");
    execution::emit_message_loop(&mut main, &tables.entry_points, fault_handler.clone());

    for contract in &contracts {
        debug!(
            contract = %contract.id,
            instructions = contract.instructions.len(),
            "translating contract"
        );
        let jump_dests = DispatchTree::build(
            contract
                .jump_dests()
                .into_iter()
                .map(|pc| {
                    (U256::from(pc as u64), Value::Label(Label::jump_dest(contract.id, pc)))
                })
                .collect(),
        );
        let ctx = TranslateCtx { contract, jump_dests, tables: &tables };

        main.set_label(Label::contract_entry(contract.id));
        for instruction in &contract.instructions {
            if instruction.op == EvmOp::Jumpdest {
                main.set_label(Label::jump_dest(contract.id, instruction.pc));
            }
            main.set_source(instruction.op.name(), instruction.pc);
            translate_instruction(&mut main, &ctx, instruction)?;
        }
        main.clear_source();
        // running off the end of a contract is a distinct termination
        execution::emit_invalid_sequence(&mut main);
    }

    execution::emit_fault_handler(&mut main, fault_handler);

    let mut init = CodeBuilder::new();
    let contract_table: BTreeMap<U256, Value> = contracts
        .iter()
        .map(|contract| (contract.id, contract.record_value()))
        .collect();
    init.push(chain::chain_state(
        chain::frame_template(Label::new("run_loop")),
        Value::Map(contract_table),
    ));
    init.op(AvmOpcode::Rset);
    init.push_label(Label::new("run_loop"));
    init.op(AvmOpcode::Jump);

    let program = Program::link(init, main)?;
    info!(
        contracts = contracts.len(),
        instructions = program.len(),
        "compiled program"
    );
    Ok(program)
}

fn build_tables(contracts: &[Contract]) -> GlobalTables {
    let entry_points = DispatchTree::build(
        contracts
            .iter()
            .map(|contract| {
                (contract.id, Value::Label(Label::contract_entry(contract.id)))
            })
            .collect(),
    );
    let code_blobs = DispatchTree::build(
        contracts
            .iter()
            .map(|contract| (contract.id, Value::Bytes(contract.code_blob().to_vec())))
            .collect(),
    );
    let code_hashes = DispatchTree::build(
        contracts
            .iter()
            .map(|contract| (contract.id, Value::Int(contract.code_hash())))
            .collect(),
    );
    let mut sizes: BTreeMap<U256, Value> = contracts
        .iter()
        .map(|contract| (contract.id, Value::int(contract.code_size() as u64)))
        .collect();
    sizes.insert(U256::from(INTERRUPT_CONTRACT_ID), Value::int(1u64));
    let code_sizes = DispatchTree::build(sizes.into_iter().collect());

    GlobalTables { entry_points, code_blobs, code_hashes, code_sizes }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(id: u64, code: &str) -> ContractInput {
        ContractInput {
            id: U256::from(id),
            code: code.to_string(),
            storage: BTreeMap::new(),
            balances: BTreeMap::new(),
        }
    }

    #[test]
    fn test_compile_empty_set_links() {
        let program = compile_contracts(&[]).expect("should compile");
        assert!(!program.is_empty());
    }

    #[test]
    fn test_compile_rejects_duplicate_ids() {
        let result = compile_contracts(&[input(10, "00"), input(10, "00")]);
        assert!(matches!(result, Err(Error::ParseError(_))));
    }

    #[test]
    fn test_compile_simple_contract() {
        let program = compile_contracts(&[input(10, "6001600201600055600054")])
            .expect("should compile");
        assert!(!program.is_empty());
    }

    #[tokio::test]
    async fn test_transpile_inline_json() {
        let args = crate::interfaces::TranspileArgsBuilder::new()
            .target(r#"[{"id": "0xa", "code": "0x00"}]"#.to_string())
            .build()
            .expect("should build args");
        assert!(transpile(args).await.is_ok());
    }

    #[tokio::test]
    async fn test_transpile_rejects_garbage() {
        let args = crate::interfaces::TranspileArgsBuilder::new()
            .target("not json and not a file".to_string())
            .build()
            .expect("should build args");
        assert!(transpile(args).await.is_err());
    }
}
