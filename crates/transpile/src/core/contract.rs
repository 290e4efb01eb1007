//! Contract inputs and their derived compile-time views.

use crate::{core::preprocess, error::Error};
use alloy::primitives::{keccak256, U256};
use evmlift_avm::{chain, Value};
use evmlift_common::utils::strings::decode_hex;
use evmlift_evm::{disassemble, EvmInstruction, EvmOp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One contract as described in the compilation input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractInput {
    /// Contract id, the address it is dispatched under
    pub id: U256,
    /// Runtime bytecode, hex encoded
    pub code: String,
    /// Initial storage slots
    #[serde(default)]
    pub storage: BTreeMap<U256, U256>,
    /// Initial balances by currency id
    #[serde(default)]
    pub balances: BTreeMap<U256, U256>,
}

/// A contract after decoding and preprocessing.
#[derive(Debug, Clone)]
pub struct Contract {
    /// Contract id
    pub id: U256,
    /// Raw runtime bytecode
    pub code: Vec<u8>,
    /// Preprocessed instruction stream
    pub instructions: Vec<EvmInstruction>,
    /// Initial storage slots
    pub storage: BTreeMap<U256, U256>,
    /// Initial balances by currency id
    pub balances: BTreeMap<U256, U256>,
}

impl Contract {
    /// Decodes and preprocesses a contract input.
    pub fn from_input(input: &ContractInput) -> Result<Self, Error> {
        let code = decode_hex(&input.code)
            .map_err(|e| Error::ParseError(format!("contract {}: {e}", input.id)))?;
        let instructions = disassemble(&code);
        let instructions = preprocess::remove_metadata(instructions);
        let instructions = preprocess::replace_self_balance(instructions);

        Ok(Self {
            id: input.id,
            code,
            instructions,
            storage: input.storage.clone(),
            balances: input.balances.clone(),
        })
    }

    /// Byte size of the preprocessed code, the value CODESIZE reports.
    pub fn code_size(&self) -> usize {
        self.instructions.iter().map(|instruction| instruction.byte_len()).sum()
    }

    /// The code bytes visible to code-introspection instructions: the raw
    /// bytecode with the trailing metadata cut off.
    pub fn code_blob(&self) -> &[u8] {
        &self.code[..self.code_size().min(self.code.len())]
    }

    /// Hash of the visible code bytes.
    pub fn code_hash(&self) -> U256 {
        U256::from_be_bytes(keccak256(self.code_blob()).0)
    }

    /// Program counters of every JUMPDEST in the preprocessed stream.
    pub fn jump_dests(&self) -> Vec<usize> {
        self.instructions
            .iter()
            .filter(|instruction| instruction.op == EvmOp::Jumpdest)
            .map(|instruction| instruction.pc)
            .collect()
    }

    /// The contract-table record seeded into the initial chain state.
    pub fn record_value(&self) -> Value {
        let storage = self
            .storage
            .iter()
            .map(|(key, value)| (*key, Value::Int(*value)))
            .collect::<BTreeMap<_, _>>();
        let balances = self
            .balances
            .iter()
            .map(|(key, value)| (*key, Value::Int(*value)))
            .collect::<BTreeMap<_, _>>();
        chain::contract_record(Value::Map(storage), Value::Map(balances))
    }
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
    fn test_from_input_decodes_and_disassembles() {
        let contract =
            Contract::from_input(&input(10, "0x6001600201")).expect("should decode");
        assert_eq!(contract.instructions.len(), 3);
        assert_eq!(contract.code_size(), 5);
    }

    #[test]
    fn test_from_input_rejects_bad_hex() {
        assert!(Contract::from_input(&input(10, "0xzz")).is_err());
    }

    #[test]
    fn test_jump_dests() {
        // PUSH1 03 JUMP JUMPDEST STOP
        let contract = Contract::from_input(&input(10, "6003565b00")).expect("should decode");
        assert_eq!(contract.jump_dests(), vec![3]);
    }

    #[test]
    fn test_code_hash_covers_visible_bytes_only() {
        let with_metadata = Contract::from_input(&input(
            10,
            // STOP followed by a swarm-style metadata tail
            "00a165627a7a72305820ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff0029",
        ))
        .expect("should decode");
        let bare = Contract::from_input(&input(10, "00")).expect("should decode");
        assert_eq!(with_metadata.code_hash(), bare.code_hash());
    }
}
