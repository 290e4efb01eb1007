//! The run harness: compile a contract set, feed it a batch of messages,
//! and report what the machine logged and sent.

use crate::error::Error;
use alloy::primitives::U256;
use clap::Parser;
use evmlift_avm::{
    chain::{self, message_field},
    Executor, ExecutorEnv, Value,
};
use evmlift_common::{currency::CurrencyStore, utils::strings::decode_hex};
use evmlift_transpiler::{compile_contracts, ContractInput};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Parser)]
#[clap(
    about = "Compiles a contract set and feeds it a batch of messages",
    override_usage = "evmlift run <TARGET> --messages <MESSAGES> [OPTIONS]"
)]
pub struct RunArgs {
    /// The contracts to compile: either a path to a JSON description file or
    /// the JSON itself.
    #[clap(required = true)]
    pub target: String,

    /// The messages to feed in: either a path to a JSON file or the JSON
    /// itself.
    #[clap(long, short, default_value = "[]")]
    pub messages: String,

    /// Timestamp reported to the compiled code.
    #[clap(long, default_value_t = 1)]
    pub timestamp: u64,

    /// Block number reported to the compiled code.
    #[clap(long = "block-number", default_value_t = 1)]
    pub block_number: u64,
}

/// One inbound message as described in the message batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageInput {
    /// Destination contract id
    pub dest: U256,
    /// Caller id, zero when absent
    #[serde(default)]
    pub caller: U256,
    /// Value carried in the native currency
    #[serde(default)]
    pub value: U256,
    /// Payload bytes, hex encoded
    #[serde(default)]
    pub data: String,
}

/// What a run produced: one output record per message, plus everything the
/// machine sent outward.
#[derive(Debug, Serialize)]
pub struct RunReport {
    /// Final machine status
    pub status: String,
    /// Output records, one per processed message
    pub records: Vec<Value>,
    /// Outbound messages
    pub sends: Vec<Value>,
}

fn read_source(target: &str) -> Result<String, Error> {
    let target = target.trim();
    if target.starts_with('[') || target.starts_with('{') {
        Ok(target.to_string())
    } else {
        Ok(std::fs::read_to_string(target)?)
    }
}

pub(crate) async fn run(args: RunArgs) -> Result<String, Error> {
    let contracts: Vec<ContractInput> = serde_json::from_str(&read_source(&args.target)?)?;
    let messages: Vec<MessageInput> = serde_json::from_str(&read_source(&args.messages)?)?;

    let program = compile_contracts(&contracts)?;

    // the driver-side ledger mirrors the seeded balances so outbound sends
    // can settle against it
    let mut ledger = CurrencyStore::new();
    for contract in &contracts {
        for (currency, amount) in &contract.balances {
            ledger.add(contract.id, *currency, *amount);
        }
    }

    let mut executor = Executor::new(program).with_env(ExecutorEnv {
        timestamp: U256::from(args.timestamp),
        block_number: U256::from(args.block_number),
    });
    for message in &messages {
        let data = decode_hex(&message.data)
            .map_err(|e| Error::Generic(format!("invalid message data: {e}")))?;
        executor.queue_message(chain::message(data, message.dest, message.caller, message.value))?;
    }
    let status = executor.run()?;

    for sent in executor.sends() {
        settle(&mut ledger, sent);
    }

    let report = RunReport {
        status: format!("{status:?}"),
        records: executor.log().to_vec(),
        sends: executor.sends().to_vec(),
    };
    Ok(serde_json::to_string_pretty(&report)?)
}

/// Moves a sent message's value between ledger balances. Unsettleable sends
/// are reported and skipped rather than failing the run.
fn settle(ledger: &mut CurrencyStore, sent: &Value) {
    let Some(fields) = sent.as_tuple() else { return };
    let (Some(dest), Some(caller), Some(value)) = (
        fields.get(message_field::DEST).and_then(Value::as_int),
        fields.get(message_field::CALLER).and_then(Value::as_int),
        fields.get(message_field::VALUE).and_then(Value::as_int),
    ) else {
        return;
    };
    if value.is_zero() {
        return;
    }
    if ledger.deduct(caller, U256::ZERO, value) {
        ledger.add(dest, U256::ZERO, value);
    } else {
        warn!(%caller, %dest, %value, "send with insufficient balance left unsettled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_inline_contract_and_message() {
        let args = RunArgs {
            // SSTORE(0, 1) then STOP
            target: r#"[{"id": "0xa", "code": "0x600160005500"}]"#.to_string(),
            messages: r#"[{"dest": "0xa"}]"#.to_string(),
            timestamp: 1,
            block_number: 1,
        };
        let report = run(args).await.expect("should run");
        assert!(report.contains("Done"));
    }

    #[test]
    fn test_settle_moves_value() {
        let mut ledger = CurrencyStore::new();
        ledger.add(U256::from(10), U256::ZERO, U256::from(100));
        let sent = chain::message(Vec::new(), U256::from(20), U256::from(10), U256::from(30));
        settle(&mut ledger, &sent);
        assert_eq!(ledger.get(U256::from(10), U256::ZERO), U256::from(70));
        assert_eq!(ledger.get(U256::from(20), U256::ZERO), U256::from(30));
    }

    #[test]
    fn test_settle_skips_short_balances() {
        let mut ledger = CurrencyStore::new();
        let sent = chain::message(Vec::new(), U256::from(20), U256::from(10), U256::from(30));
        settle(&mut ledger, &sent);
        assert_eq!(ledger.get(U256::from(20), U256::ZERO), U256::ZERO);
    }
}
