//! End-to-end tests: compile contract sets and run the linked programs on
//! the target executor, message in, output record out.

use alloy::primitives::U256;
use evmlift_avm::{
    chain::{self, output_field, return_code},
    Executor, MachineStatus, Value,
};
use evmlift_transpiler::{compile_contracts, ContractInput, TranspileArgsBuilder};
use std::collections::BTreeMap;

fn input(id: u64, code: &str) -> ContractInput {
    ContractInput {
        id: U256::from(id),
        code: code.to_string(),
        storage: BTreeMap::new(),
        balances: BTreeMap::new(),
    }
}

fn input_with_balance(id: u64, code: &str, balance: u64) -> ContractInput {
    let mut input = input(id, code);
    input.balances.insert(U256::ZERO, U256::from(balance));
    input
}

fn message_to(dest: u64, data: Vec<u8>, value: u64) -> Value {
    chain::message(data, U256::from(dest), U256::from(0xdeadu64), U256::from(value))
}

fn compile_and_run(contracts: &[ContractInput], messages: Vec<Value>) -> Executor {
    let program = compile_contracts(contracts).expect("should compile");
    let mut executor = Executor::new(program);
    for message in messages {
        executor.queue_message(message).expect("should queue message");
    }
    assert_eq!(executor.run().expect("should run"), MachineStatus::Done);
    executor
}

fn record(executor: &Executor, index: usize) -> &[Value] {
    executor.log()[index].as_tuple().expect("output record is a tuple")
}

fn record_code(executor: &Executor, index: usize) -> u64 {
    record(executor, index)[output_field::RETURN_CODE]
        .as_int()
        .expect("return code is an int")
        .to::<u64>()
}

fn record_data(executor: &Executor, index: usize) -> Vec<u8> {
    record(executor, index)[output_field::RETURN_DATA]
        .as_bytes()
        .expect("return data is bytes")
        .to_vec()
}

fn contract_parts(executor: &Executor, id: u64) -> &[Value] {
    executor
        .register()
        .as_tuple()
        .expect("register holds the chain state")[1]
        .as_map()
        .expect("contract table is a map")
        .get(&U256::from(id))
        .expect("contract present")
        .as_tuple()
        .expect("contract record is a tuple")
}

fn storage_slot(executor: &Executor, id: u64, key: u64) -> Option<U256> {
    contract_parts(executor, id)[0]
        .as_map()
        .expect("storage is a map")
        .get(&U256::from(key))
        .and_then(Value::as_int)
}

fn balance(executor: &Executor, id: u64) -> u64 {
    contract_parts(executor, id)[1]
        .as_map()
        .expect("balances are a map")
        .get(&U256::ZERO)
        .and_then(Value::as_int)
        .map(|value| value.to::<u64>())
        .unwrap_or(0)
}

fn word(value: u64) -> Vec<u8> {
    U256::from(value).to_be_bytes::<32>().to_vec()
}

#[tokio::test]
async fn test_division_by_zero_yields_zero() {
    // PUSH1 00 PUSH1 05 DIV MSTORE(0) RETURN(0, 32)
    let executor = compile_and_run(
        &[input(10, "600060050460005260206000f3")],
        vec![message_to(10, Vec::new(), 0)],
    );
    assert_eq!(record_code(&executor, 0), return_code::RETURN);
    assert_eq!(record_data(&executor, 0), word(0));
}

#[tokio::test]
async fn test_addmod_with_zero_modulus_yields_zero() {
    // PUSH1 00 PUSH1 05 PUSH1 06 ADDMOD MSTORE(0) RETURN(0, 32)
    let executor = compile_and_run(
        &[input(10, "6000600560060860005260206000f3")],
        vec![message_to(10, Vec::new(), 0)],
    );
    assert_eq!(record_code(&executor, 0), return_code::RETURN);
    assert_eq!(record_data(&executor, 0), word(0));
}

#[tokio::test]
async fn test_mulmod_with_zero_modulus_yields_zero() {
    // PUSH1 00 PUSH1 05 PUSH1 06 MULMOD MSTORE(0) RETURN(0, 32)
    let executor = compile_and_run(
        &[input(10, "6000600560060960005260206000f3")],
        vec![message_to(10, Vec::new(), 0)],
    );
    assert_eq!(record_code(&executor, 0), return_code::RETURN);
    assert_eq!(record_data(&executor, 0), word(0));
}

#[tokio::test]
async fn test_storage_persists_across_messages() {
    // SSTORE(0, 1) then SLOAD(0) MSTORE(0) RETURN(0, 32)
    let executor = compile_and_run(
        &[input(10, "600160005560005460005260206000f3")],
        vec![message_to(10, Vec::new(), 0), message_to(10, Vec::new(), 0)],
    );
    assert_eq!(executor.log().len(), 2);
    assert_eq!(record_data(&executor, 0), word(1));
    assert_eq!(record_data(&executor, 1), word(1));
    assert_eq!(storage_slot(&executor, 10, 0), Some(U256::from(1)));
}

#[tokio::test]
async fn test_calldata_echo() {
    // CALLDATALOAD(0) MSTORE(0) RETURN(0, 32)
    let executor = compile_and_run(
        &[input(10, "60003560005260206000f3")],
        vec![message_to(10, word(0xabcd), 0)],
    );
    assert_eq!(record_code(&executor, 0), return_code::RETURN);
    assert_eq!(record_data(&executor, 0), word(0xabcd));
}

#[tokio::test]
async fn test_jump_to_destination() {
    // PUSH1 03 JUMP JUMPDEST STOP
    let executor =
        compile_and_run(&[input(10, "6003565b00")], vec![message_to(10, Vec::new(), 0)]);
    assert_eq!(record_code(&executor, 0), return_code::STOP);
}

#[tokio::test]
async fn test_bad_jump_faults_and_next_message_still_runs() {
    let executor = compile_and_run(
        &[input(10, "60ff56")],
        vec![message_to(10, Vec::new(), 0), message_to(10, Vec::new(), 0)],
    );
    assert_eq!(executor.log().len(), 2);
    assert_eq!(record_code(&executor, 0), return_code::FAULT);
    assert_eq!(record_code(&executor, 1), return_code::FAULT);
}

#[tokio::test]
async fn test_jumpi_branches_on_the_condition() {
    // PUSH1 cond PUSH1 06 JUMPI INVALID JUMPDEST STOP; taken skips the
    // INVALID, not taken falls into it and reverts
    let executor = compile_and_run(
        &[input(10, "6001600657fe5b00"), input(20, "6000600657fe5b00")],
        vec![message_to(10, Vec::new(), 0), message_to(20, Vec::new(), 0)],
    );
    assert_eq!(record_code(&executor, 0), return_code::STOP);
    assert_eq!(record_code(&executor, 1), return_code::REVERT);
}

#[tokio::test]
async fn test_jumpi_validates_destination_even_when_not_taken() {
    // PUSH1 00 PUSH1 ff JUMPI STOP; the branch is dead but 0xff is not a
    // destination, so the frame faults
    let executor = compile_and_run(
        &[input(10, "600060ff5700")],
        vec![message_to(10, Vec::new(), 0)],
    );
    assert_eq!(record_code(&executor, 0), return_code::FAULT);
}

#[tokio::test]
async fn test_message_to_unknown_contract_faults() {
    let executor = compile_and_run(&[], vec![message_to(5, Vec::new(), 0)]);
    assert_eq!(record_code(&executor, 0), return_code::FAULT);
}

#[tokio::test]
async fn test_nested_call_returns_data() {
    // callee: MSTORE(0, 42) RETURN(0, 32)
    let callee = input(0x14, "602a60005260206000f3");
    // caller: CALL(gas=1, dest=0x14, value=0, ret range 0..32), POP,
    // RETURN(0, 32)
    let caller = input(10, "6020600060006000600060146001f15060206000f3");
    let executor =
        compile_and_run(&[caller, callee], vec![message_to(10, Vec::new(), 0)]);
    assert_eq!(record_code(&executor, 0), return_code::RETURN);
    assert_eq!(record_data(&executor, 0), word(42));
}

#[tokio::test]
async fn test_reverted_callee_state_is_discarded() {
    // callee: SSTORE(0, 5) then REVERT(0, 0)
    let callee = input(0x14, "600560005560006000fd");
    // caller: SSTORE(0, 1), CALL(gas=1, dest=0x14, value=0), SSTORE(1,
    // success), STOP
    let caller = input(10, "60016000556000600060006000600060146001f160015500");
    let executor =
        compile_and_run(&[caller, callee], vec![message_to(10, Vec::new(), 0)]);
    assert_eq!(record_code(&executor, 0), return_code::STOP);
    // the caller's write survives, the callee's does not, and the call
    // reported failure
    assert_eq!(storage_slot(&executor, 10, 0), Some(U256::from(1)));
    assert_eq!(storage_slot(&executor, 10, 1), Some(U256::ZERO));
    assert_eq!(storage_slot(&executor, 0x14, 0), None);
}

#[tokio::test]
async fn test_pure_send_reaches_the_outbox() {
    // CALL(gas=0, dest=0x14, value=5, no data, no return range), POP, STOP
    let executor = compile_and_run(
        &[input(10, "6000600060006000600560146000f15000")],
        vec![message_to(10, Vec::new(), 0)],
    );
    assert_eq!(record_code(&executor, 0), return_code::STOP);
    assert_eq!(executor.sends().len(), 1);
    let sent = executor.sends()[0].as_tuple().expect("sent message is a tuple");
    assert_eq!(sent[0], Value::Bytes(Vec::new()));
    assert_eq!(sent[1], Value::int(0x14u64));
    assert_eq!(sent[2], Value::int(10u64));
    assert_eq!(sent[3], Value::int(5u64));
}

#[tokio::test]
async fn test_value_transfer_and_self_balance() {
    // callee reports its own balance: the ADDRESS/PUSH20/AND/BALANCE idiom,
    // MSTORE(0), RETURN(0, 32)
    let callee_code = format!("3073{}163160005260206000f3", "ff".repeat(20));
    let callee = input(0x14, &callee_code);
    // caller: CALL(gas=1, dest=0x14, value=5, ret range 0..32), POP,
    // RETURN(0, 32)
    let caller = input_with_balance(10, "6020600060006000600560146001f15060206000f3", 100);
    let executor =
        compile_and_run(&[caller, callee], vec![message_to(10, Vec::new(), 0)]);
    assert_eq!(record_code(&executor, 0), return_code::RETURN);
    assert_eq!(record_data(&executor, 0), word(5));
    assert_eq!(balance(&executor, 10), 95);
    assert_eq!(balance(&executor, 0x14), 5);
}

#[tokio::test]
async fn test_insufficient_balance_fails_the_call() {
    let callee = input(0x14, "00");
    // caller: CALL(gas=1, dest=0x14, value=5), success flag to storage, STOP
    let caller = input_with_balance(
        10,
        "6000600060006000600560146001f160005500",
        3,
    );
    let executor =
        compile_and_run(&[caller, callee], vec![message_to(10, Vec::new(), 0)]);
    assert_eq!(record_code(&executor, 0), return_code::STOP);
    assert_eq!(storage_slot(&executor, 10, 0), Some(U256::ZERO));
    assert_eq!(balance(&executor, 10), 3);
    assert_eq!(balance(&executor, 0x14), 0);
}

#[tokio::test]
async fn test_log_record_carries_contract_and_topic() {
    // MSTORE(0, 7), LOG1(0, 32, topic 0x42), STOP
    let executor = compile_and_run(
        &[input(10, "6007600052604260206000a100")],
        vec![message_to(10, Vec::new(), 0)],
    );
    assert_eq!(record_code(&executor, 0), return_code::STOP);
    let logs = &record(&executor, 0)[output_field::LOGS];
    let head = logs.as_tuple().expect("log list is a cons cell")[0]
        .as_tuple()
        .expect("log record is a tuple")
        .to_vec();
    assert_eq!(head[0], Value::int(10u64));
    assert_eq!(head[1].as_bytes(), Some(word(7).as_slice()));
    assert_eq!(head[2], Value::int(0x42u64));
}

#[tokio::test]
async fn test_contract_dispatch_over_three_contracts() {
    let contracts: Vec<ContractInput> = [5u64, 10, 20]
        .iter()
        .map(|id| input(*id, &format!("60{id:02x}60005260206000f3")))
        .collect();
    let executor = compile_and_run(
        &contracts,
        vec![
            message_to(5, Vec::new(), 0),
            message_to(10, Vec::new(), 0),
            message_to(20, Vec::new(), 0),
        ],
    );
    assert_eq!(record_data(&executor, 0), word(5));
    assert_eq!(record_data(&executor, 1), word(10));
    assert_eq!(record_data(&executor, 2), word(20));
}

#[tokio::test]
async fn test_unsupported_opcode_fails_compilation() {
    // BLOCKHASH
    let result = compile_contracts(&[input(10, "600040")]);
    assert!(result.is_err());
}

#[tokio::test]
async fn test_transpile_from_inline_json() {
    let args = TranspileArgsBuilder::new()
        .target(r#"[{"id": "0xa", "code": "0x60016002015000"}]"#.to_string())
        .build()
        .expect("should build args");
    let program = evmlift_transpiler::transpile(args).await.expect("should transpile");
    assert!(!program.is_empty());
}
