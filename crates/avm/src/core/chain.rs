//! Record layouts shared by generated code and the executor.
//!
//! The machine register always holds the chain-state record. Generated code
//! and the host runtime primitives both index into these records by the
//! constants below, so the layout lives in one place.

use crate::core::value::{Label, Value};
use std::collections::BTreeMap;

/// Chain state, the value held in the machine register.
pub mod chain_field {
    /// The active call frame
    pub const CALL_FRAME: usize = 0;
    /// The committed contract table
    pub const CONTRACTS: usize = 1;
    /// Field count
    pub const COUNT: usize = 2;
}

/// A call frame.
pub mod frame_field {
    /// Identity the frame executes as (storage and balance owner)
    pub const CONTRACT_ID: usize = 0;
    /// The parent frame, or the sentinel for the root
    pub const PARENT: usize = 1;
    /// The caller's packed evaluation stack
    pub const SAVED_STACK: usize = 2;
    /// The caller's packed auxiliary stack
    pub const SAVED_AUX: usize = 3;
    /// Code point control returns to when the frame terminates
    pub const RETURN_LOCATION: usize = 4;
    /// Data produced by the last completed inner call, or by this frame
    /// itself once it terminates
    pub const RETURN_DATA: usize = 5;
    /// Pending outbound messages, a cons list
    pub const SENT_QUEUE: usize = 6;
    /// Snapshot of the contract table this frame works against
    pub const CONTRACTS: usize = 7;
    /// Byte-addressed scratch memory
    pub const MEMORY: usize = 8;
    /// The message that started this frame
    pub const MESSAGE: usize = 9;
    /// Log records, a cons list
    pub const LOGS: usize = 10;
    /// Field count
    pub const COUNT: usize = 11;
}

/// A contract table entry.
pub mod contract_field {
    /// Storage slots
    pub const STORAGE: usize = 0;
    /// Balances by currency id
    pub const BALANCES: usize = 1;
    /// Field count
    pub const COUNT: usize = 2;
}

/// A message, inbound or constructed at a call site.
pub mod message_field {
    /// Payload bytes
    pub const DATA: usize = 0;
    /// Destination contract id
    pub const DEST: usize = 1;
    /// Caller id
    pub const CALLER: usize = 2;
    /// Value carried, in the native currency
    pub const VALUE: usize = 3;
    /// Field count
    pub const COUNT: usize = 4;
}

/// The packed argument tuple of a call-family instruction.
pub mod call_field {
    /// Gas budget (ignored except by the pure-send test)
    pub const GAS: usize = 0;
    /// Destination contract id
    pub const DEST: usize = 1;
    /// Value to transfer
    pub const VALUE: usize = 2;
    /// Argument memory offset
    pub const ARG_OFFSET: usize = 3;
    /// Argument length
    pub const ARG_LENGTH: usize = 4;
    /// Return memory offset
    pub const RET_OFFSET: usize = 5;
    /// Return length cap
    pub const RET_LENGTH: usize = 6;
    /// Field count
    pub const COUNT: usize = 7;
}

/// The per-message output record the machine logs.
pub mod output_field {
    /// The inbound message
    pub const MESSAGE: usize = 0;
    /// The frame's log records
    pub const LOGS: usize = 1;
    /// Return data
    pub const RETURN_DATA: usize = 2;
    /// Termination discriminant
    pub const RETURN_CODE: usize = 3;
    /// Field count
    pub const COUNT: usize = 4;
}

/// Termination discriminants.
pub mod return_code {
    /// The code reverted
    pub const REVERT: u64 = 0;
    /// The code faulted
    pub const FAULT: u64 = 1;
    /// The code returned data
    pub const RETURN: u64 = 2;
    /// The code stopped
    pub const STOP: u64 = 3;
    /// Execution ran off the end of a translated block
    pub const INVALID_SEQUENCE: u64 = 4;
}

/// A tuple of `count` sentinel elements.
pub fn empty_record(count: usize) -> Value {
    Value::Tuple(vec![Value::none(); count])
}

/// A fresh call frame with `return_location` already installed. Every other
/// field starts at its spawn default and is filled in by generated code.
pub fn frame_template(return_location: Label) -> Value {
    let mut fields = vec![Value::none(); frame_field::COUNT];
    fields[frame_field::CONTRACT_ID] = Value::int(0u64);
    fields[frame_field::RETURN_LOCATION] = Value::Label(return_location);
    fields[frame_field::RETURN_DATA] = Value::Bytes(Vec::new());
    fields[frame_field::CONTRACTS] = Value::Map(BTreeMap::new());
    fields[frame_field::MEMORY] = Value::Bytes(Vec::new());
    Value::Tuple(fields)
}

/// A chain-state record from its two parts.
pub fn chain_state(call_frame: Value, contracts: Value) -> Value {
    let mut fields = vec![Value::none(); chain_field::COUNT];
    fields[chain_field::CALL_FRAME] = call_frame;
    fields[chain_field::CONTRACTS] = contracts;
    Value::Tuple(fields)
}

/// An inbound message value.
pub fn message(
    data: Vec<u8>,
    dest: alloy::primitives::U256,
    caller: alloy::primitives::U256,
    value: alloy::primitives::U256,
) -> Value {
    let mut fields = vec![Value::none(); message_field::COUNT];
    fields[message_field::DATA] = Value::Bytes(data);
    fields[message_field::DEST] = Value::Int(dest);
    fields[message_field::CALLER] = Value::Int(caller);
    fields[message_field::VALUE] = Value::Int(value);
    Value::Tuple(fields)
}

/// A contract table entry from its storage and balance maps.
pub fn contract_record(storage: Value, balances: Value) -> Value {
    let mut fields = vec![Value::none(); contract_field::COUNT];
    fields[contract_field::STORAGE] = storage;
    fields[contract_field::BALANCES] = balances;
    Value::Tuple(fields)
}
