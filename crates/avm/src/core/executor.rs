//! Reference interpreter for linked programs.
//!
//! The executor owns the machine state: both stacks, the register, the
//! fault-handler register, and the message queues. Host runtime primitives
//! read and write the chain-state record through the register using the
//! layouts in [`crate::core::chain`].
//!
//! Faults route through the installed fault handler; a fault with no
//! handler stops the machine in the faulted state. An empty inbox stops the
//! machine cleanly without advancing, so more messages can be queued and
//! execution resumed.

use crate::{
    core::{
        chain::{chain_field, contract_field, frame_field, message_field},
        instruction::AvmInstruction,
        opcodes::{AvmOpcode, RuntimeOp},
        program::Program,
        value::Value,
    },
    error::Error,
};
use alloy::primitives::{keccak256, I256, U256};
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

/// Memory offsets past this bound fault instead of allocating.
const MEMORY_LIMIT: usize = 1 << 26;

/// Environment values visible to generated code.
#[derive(Debug, Clone)]
pub struct ExecutorEnv {
    /// Timestamp pushed by the timestamp primitive
    pub timestamp: U256,
    /// Block number pushed by the block-number primitive
    pub block_number: U256,
}

impl Default for ExecutorEnv {
    fn default() -> Self {
        Self { timestamp: U256::from(1), block_number: U256::from(1) }
    }
}

/// Where the machine currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineStatus {
    /// Executing instructions
    Running,
    /// Blocked on an empty inbox
    Done,
    /// Stopped by a halt instruction
    Halted,
    /// Stopped by an unhandled fault
    Faulted,
}

#[derive(Debug)]
struct Fault(String);

impl Fault {
    fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

enum Flow {
    Advance,
    Jump(usize),
    Stop(MachineStatus),
}

type OpResult = Result<Flow, Fault>;

/// The reference machine.
#[derive(Debug)]
pub struct Executor {
    code: Vec<AvmInstruction>,
    pc: usize,
    stack: Vec<Value>,
    aux: Vec<Value>,
    register: Value,
    err_handler: Option<usize>,
    inbox: VecDeque<Value>,
    outbox: Vec<Value>,
    log: Vec<Value>,
    env: ExecutorEnv,
    status: MachineStatus,
    max_steps: u64,
}

impl Executor {
    /// Creates a machine over a linked program with an empty inbox.
    pub fn new(program: Program) -> Self {
        Self {
            code: program.instructions,
            pc: 0,
            stack: Vec::new(),
            aux: Vec::new(),
            register: Value::none(),
            err_handler: None,
            inbox: VecDeque::new(),
            outbox: Vec::new(),
            log: Vec::new(),
            env: ExecutorEnv::default(),
            status: MachineStatus::Running,
            max_steps: 10_000_000,
        }
    }

    /// Replaces the environment.
    pub fn with_env(mut self, env: ExecutorEnv) -> Self {
        self.env = env;
        self
    }

    /// Queues an inbound message, rejecting values that do not match the
    /// message record shape before the machine ever dequeues them. Wakes
    /// the machine if it was blocked on an empty inbox.
    pub fn queue_message(&mut self, message: Value) -> Result<(), Error> {
        let fields = message
            .as_tuple()
            .ok_or_else(|| Error::MalformedMessage("message is not a tuple".to_string()))?;
        if fields.len() != message_field::COUNT {
            return Err(Error::MalformedMessage(format!(
                "expected {} fields, got {}",
                message_field::COUNT,
                fields.len()
            )));
        }
        if fields[message_field::DATA].as_bytes().is_none() {
            return Err(Error::MalformedMessage("message data is not bytes".to_string()));
        }
        for field in [message_field::DEST, message_field::CALLER, message_field::VALUE] {
            if fields[field].as_int().is_none() {
                return Err(Error::MalformedMessage(format!("field {field} is not an integer")));
            }
        }

        self.inbox.push_back(message);
        if self.status == MachineStatus::Done {
            self.status = MachineStatus::Running;
        }
        Ok(())
    }

    /// Runs until the machine stops. Returns the stopping status.
    pub fn run(&mut self) -> Result<MachineStatus, Error> {
        let mut steps = 0u64;
        while self.status == MachineStatus::Running {
            steps += 1;
            if steps > self.max_steps {
                return Err(Error::StepLimit(self.max_steps));
            }

            let instruction = self
                .code
                .get(self.pc)
                .cloned()
                .ok_or_else(|| Error::MalformedProgram(format!("pc {} out of bounds", self.pc)))?;

            match self.execute(&instruction) {
                Ok(Flow::Advance) => self.pc += 1,
                Ok(Flow::Jump(target)) => self.pc = target,
                Ok(Flow::Stop(status)) => self.status = status,
                Err(fault) => {
                    debug!(pc = self.pc, reason = %fault.0, "machine fault");
                    match self.err_handler {
                        Some(handler) => self.pc = handler,
                        None => self.status = MachineStatus::Faulted,
                    }
                }
            }
        }
        Ok(self.status)
    }

    /// The machine log, oldest first.
    pub fn log(&self) -> &[Value] {
        &self.log
    }

    /// Outbound messages, oldest first.
    pub fn sends(&self) -> &[Value] {
        &self.outbox
    }

    /// The current status.
    pub fn status(&self) -> MachineStatus {
        self.status
    }

    /// The evaluation stack, bottom first.
    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    /// The machine register.
    pub fn register(&self) -> &Value {
        &self.register
    }

    // ---- stack helpers ----

    fn pop(&mut self) -> Result<Value, Fault> {
        self.stack.pop().ok_or_else(|| Fault::new("stack underflow"))
    }

    fn pop_int(&mut self) -> Result<U256, Fault> {
        self.pop()?.as_int().ok_or_else(|| Fault::new("expected integer"))
    }

    fn pop_usize(&mut self) -> Result<usize, Fault> {
        let value = self.pop_int()?;
        let value = usize::try_from(value).map_err(|_| Fault::new("offset too large"))?;
        if value > MEMORY_LIMIT {
            return Err(Fault::new("offset exceeds memory limit"));
        }
        Ok(value)
    }

    fn pop_tuple(&mut self) -> Result<Vec<Value>, Fault> {
        match self.pop()? {
            Value::Tuple(elements) => Ok(elements),
            _ => Err(Fault::new("expected tuple")),
        }
    }

    fn pop_bytes(&mut self) -> Result<Vec<u8>, Fault> {
        match self.pop()? {
            Value::Bytes(bytes) => Ok(bytes),
            _ => Err(Fault::new("expected bytes")),
        }
    }

    fn pop_code_point(&mut self) -> Result<usize, Fault> {
        self.pop()?.as_code_point().ok_or_else(|| Fault::new("expected code point"))
    }

    fn push_int(&mut self, value: U256) {
        self.stack.push(Value::Int(value));
    }

    fn push_bool(&mut self, value: bool) {
        self.push_int(if value { U256::from(1) } else { U256::ZERO });
    }

    // ---- chain-state helpers ----

    fn frame(&self) -> Result<Vec<Value>, Fault> {
        let chain =
            self.register.as_tuple().ok_or_else(|| Fault::new("register is not chain state"))?;
        chain
            .get(chain_field::CALL_FRAME)
            .and_then(|frame| frame.as_tuple())
            .map(|frame| frame.to_vec())
            .ok_or_else(|| Fault::new("chain state has no call frame"))
    }

    fn frame_field(&self, field: usize) -> Result<Value, Fault> {
        self.frame()?
            .get(field)
            .cloned()
            .ok_or_else(|| Fault::new("call frame too short"))
    }

    fn set_frame_field(&mut self, field: usize, value: Value) -> Result<(), Fault> {
        let mut frame = self.frame()?;
        if field >= frame.len() {
            return Err(Fault::new("call frame too short"));
        }
        frame[field] = value;

        let mut chain = self
            .register
            .as_tuple()
            .ok_or_else(|| Fault::new("register is not chain state"))?
            .to_vec();
        chain[chain_field::CALL_FRAME] = Value::Tuple(frame);
        self.register = Value::Tuple(chain);
        Ok(())
    }

    fn memory(&self) -> Result<Vec<u8>, Fault> {
        match self.frame_field(frame_field::MEMORY)? {
            Value::Bytes(bytes) => Ok(bytes),
            _ => Err(Fault::new("frame memory is not bytes")),
        }
    }

    fn read_memory(&self, offset: usize, length: usize) -> Result<Vec<u8>, Fault> {
        if offset + length > MEMORY_LIMIT {
            return Err(Fault::new("memory read exceeds limit"));
        }
        let memory = self.memory()?;
        let mut out = vec![0u8; length];
        for (index, byte) in out.iter_mut().enumerate() {
            if let Some(value) = memory.get(offset + index) {
                *byte = *value;
            }
        }
        Ok(out)
    }

    fn write_memory(&mut self, offset: usize, data: &[u8]) -> Result<(), Fault> {
        if data.is_empty() {
            return Ok(());
        }
        if offset + data.len() > MEMORY_LIMIT {
            return Err(Fault::new("memory write exceeds limit"));
        }
        let mut memory = self.memory()?;
        if memory.len() < offset + data.len() {
            memory.resize(offset + data.len(), 0);
        }
        memory[offset..offset + data.len()].copy_from_slice(data);
        self.set_frame_field(frame_field::MEMORY, Value::Bytes(memory))
    }

    fn message_field(&self, field: usize) -> Result<Value, Fault> {
        match self.frame_field(frame_field::MESSAGE)? {
            Value::Tuple(message) => {
                message.get(field).cloned().ok_or_else(|| Fault::new("message too short"))
            }
            _ => Err(Fault::new("frame has no message")),
        }
    }

    fn calldata(&self) -> Result<Vec<u8>, Fault> {
        match self.message_field(message_field::DATA)? {
            Value::Bytes(bytes) => Ok(bytes),
            _ => Err(Fault::new("message data is not bytes")),
        }
    }

    fn return_data(&self) -> Result<Vec<u8>, Fault> {
        match self.frame_field(frame_field::RETURN_DATA)? {
            Value::Bytes(bytes) => Ok(bytes),
            _ => Err(Fault::new("frame return data is not bytes")),
        }
    }

    fn contracts(&self) -> Result<BTreeMap<U256, Value>, Fault> {
        match self.frame_field(frame_field::CONTRACTS)? {
            Value::Map(map) => Ok(map),
            _ => Err(Fault::new("frame contract table is not a map")),
        }
    }

    fn contract_parts(record: &Value) -> Result<(BTreeMap<U256, Value>, BTreeMap<U256, Value>), Fault> {
        let fields = record.as_tuple().ok_or_else(|| Fault::new("contract record is not a tuple"))?;
        let storage = fields
            .get(contract_field::STORAGE)
            .and_then(|value| value.as_map())
            .ok_or_else(|| Fault::new("contract record has no storage"))?;
        let balances = fields
            .get(contract_field::BALANCES)
            .and_then(|value| value.as_map())
            .ok_or_else(|| Fault::new("contract record has no balances"))?;
        Ok((storage.clone(), balances.clone()))
    }

    fn balance_of(&self, contract_id: U256, currency: U256) -> Result<U256, Fault> {
        let contracts = self.contracts()?;
        let Some(record) = contracts.get(&contract_id) else {
            return Ok(U256::ZERO);
        };
        let (_, balances) = Self::contract_parts(record)?;
        Ok(balances.get(&currency).and_then(|value| value.as_int()).unwrap_or(U256::ZERO))
    }

    // ---- instruction execution ----

    #[allow(clippy::too_many_lines)]
    fn execute(&mut self, instruction: &AvmInstruction) -> OpResult {
        match instruction.opcode {
            AvmOpcode::Add => self.binary_int(|a, b| Ok(a.wrapping_add(b))),
            AvmOpcode::Mul => self.binary_int(|a, b| Ok(a.wrapping_mul(b))),
            AvmOpcode::Sub => self.binary_int(|a, b| Ok(a.wrapping_sub(b))),
            AvmOpcode::Div => self.binary_int(|a, b| {
                a.checked_div(b).ok_or_else(|| Fault::new("division by zero"))
            }),
            AvmOpcode::Sdiv => self.binary_int(|a, b| {
                if b.is_zero() {
                    return Err(Fault::new("division by zero"));
                }
                let (a, b) = (I256::from_raw(a), I256::from_raw(b));
                Ok(a.checked_div(b).unwrap_or(I256::MIN).into_raw())
            }),
            AvmOpcode::Mod => self.binary_int(|a, b| {
                a.checked_rem(b).ok_or_else(|| Fault::new("modulo by zero"))
            }),
            AvmOpcode::Smod => self.binary_int(|a, b| {
                if b.is_zero() {
                    return Err(Fault::new("modulo by zero"));
                }
                let (a, b) = (I256::from_raw(a), I256::from_raw(b));
                Ok(a.checked_rem(b).unwrap_or(I256::ZERO).into_raw())
            }),
            AvmOpcode::Addmod => self.ternary_int(|a, b, m| {
                if m.is_zero() {
                    return Err(Fault::new("modulo by zero"));
                }
                Ok(a.add_mod(b, m))
            }),
            AvmOpcode::Mulmod => self.ternary_int(|a, b, m| {
                if m.is_zero() {
                    return Err(Fault::new("modulo by zero"));
                }
                Ok(a.mul_mod(b, m))
            }),
            AvmOpcode::Exp => self.binary_int(|a, b| Ok(a.pow(b))),
            AvmOpcode::Signextend => self.binary_int(|position, word| {
                if position >= U256::from(32) {
                    return Ok(word);
                }
                let bit = usize::try_from(position).expect("position fits") * 8 + 7;
                if word.bit(bit) {
                    Ok(word | (U256::MAX << (bit + 1)))
                } else {
                    Ok(word & ((U256::from(1) << (bit + 1)) - U256::from(1)))
                }
            }),
            AvmOpcode::Lt => {
                let (a, b) = (self.pop_int()?, self.pop_int()?);
                self.push_bool(a < b);
                Ok(Flow::Advance)
            }
            AvmOpcode::Gt => {
                let (a, b) = (self.pop_int()?, self.pop_int()?);
                self.push_bool(a > b);
                Ok(Flow::Advance)
            }
            AvmOpcode::Slt => {
                let (a, b) = (self.pop_int()?, self.pop_int()?);
                self.push_bool(I256::from_raw(a) < I256::from_raw(b));
                Ok(Flow::Advance)
            }
            AvmOpcode::Sgt => {
                let (a, b) = (self.pop_int()?, self.pop_int()?);
                self.push_bool(I256::from_raw(a) > I256::from_raw(b));
                Ok(Flow::Advance)
            }
            AvmOpcode::Eq => {
                let (a, b) = (self.pop()?, self.pop()?);
                self.push_bool(a == b);
                Ok(Flow::Advance)
            }
            AvmOpcode::Iszero => {
                let a = self.pop_int()?;
                self.push_bool(a.is_zero());
                Ok(Flow::Advance)
            }
            AvmOpcode::And => self.binary_int(|a, b| Ok(a & b)),
            AvmOpcode::Or => self.binary_int(|a, b| Ok(a | b)),
            AvmOpcode::Xor => self.binary_int(|a, b| Ok(a ^ b)),
            AvmOpcode::Not => {
                let a = self.pop_int()?;
                self.push_int(!a);
                Ok(Flow::Advance)
            }
            AvmOpcode::Byte => self.binary_int(|index, word| {
                if index >= U256::from(32) {
                    return Ok(U256::ZERO);
                }
                let bytes = word.to_be_bytes::<32>();
                Ok(U256::from(bytes[usize::try_from(index).expect("index fits")]))
            }),
            AvmOpcode::Shl => self.binary_int(|value, shift| {
                if shift >= U256::from(256) {
                    return Ok(U256::ZERO);
                }
                Ok(value << usize::try_from(shift).expect("shift fits"))
            }),
            AvmOpcode::Shr => self.binary_int(|value, shift| {
                if shift >= U256::from(256) {
                    return Ok(U256::ZERO);
                }
                Ok(value >> usize::try_from(shift).expect("shift fits"))
            }),
            AvmOpcode::Sar => self.binary_int(|value, shift| {
                let signed = I256::from_raw(value);
                if shift >= U256::from(256) {
                    return Ok(if signed.is_negative() { U256::MAX } else { U256::ZERO });
                }
                Ok(signed.asr(usize::try_from(shift).expect("shift fits")).into_raw())
            }),
            AvmOpcode::Pop => {
                self.pop()?;
                Ok(Flow::Advance)
            }
            AvmOpcode::Dup0 => self.dup(0),
            AvmOpcode::Dup1 => self.dup(1),
            AvmOpcode::Dup2 => self.dup(2),
            AvmOpcode::Swap1 => self.swap(1),
            AvmOpcode::Swap2 => self.swap(2),
            AvmOpcode::AuxPush => {
                let value = self.pop()?;
                self.aux.push(value);
                Ok(Flow::Advance)
            }
            AvmOpcode::AuxPop => {
                let value = self.aux.pop().ok_or_else(|| Fault::new("aux stack underflow"))?;
                self.stack.push(value);
                Ok(Flow::Advance)
            }
            AvmOpcode::Push => {
                let immediate = instruction
                    .immediate
                    .clone()
                    .ok_or_else(|| Fault::new("push without immediate"))?;
                if matches!(immediate, Value::Label(_)) {
                    return Err(Fault::new("push of unlinked label"));
                }
                self.stack.push(immediate);
                Ok(Flow::Advance)
            }
            AvmOpcode::Tget => {
                let index = self.pop_usize()?;
                let tuple = self.pop_tuple()?;
                let element = tuple
                    .get(index)
                    .cloned()
                    .ok_or_else(|| Fault::new("tuple index out of range"))?;
                self.stack.push(element);
                Ok(Flow::Advance)
            }
            AvmOpcode::Tset => {
                let index = self.pop_usize()?;
                let mut tuple = self.pop_tuple()?;
                let value = self.pop()?;
                if index >= tuple.len() {
                    return Err(Fault::new("tuple index out of range"));
                }
                tuple[index] = value;
                self.stack.push(Value::Tuple(tuple));
                Ok(Flow::Advance)
            }
            AvmOpcode::Jump => {
                let target = self.pop_code_point()?;
                Ok(Flow::Jump(target))
            }
            AvmOpcode::Cjump => {
                let target = self.pop_code_point()?;
                let condition = self.pop_int()?;
                if condition.is_zero() {
                    Ok(Flow::Advance)
                } else {
                    Ok(Flow::Jump(target))
                }
            }
            AvmOpcode::Error => Err(Fault::new("explicit fault")),
            AvmOpcode::Halt => Ok(Flow::Stop(MachineStatus::Halted)),
            AvmOpcode::SetErrHandler => {
                let handler = self.pop_code_point()?;
                self.err_handler = Some(handler);
                Ok(Flow::Advance)
            }
            AvmOpcode::ClearErrHandler => {
                self.err_handler = None;
                Ok(Flow::Advance)
            }
            AvmOpcode::Rget => {
                self.stack.push(self.register.clone());
                Ok(Flow::Advance)
            }
            AvmOpcode::Rset => {
                self.register = self.pop()?;
                Ok(Flow::Advance)
            }
            AvmOpcode::Pack => {
                let mut elements = Vec::with_capacity(self.stack.len());
                while let Some(value) = self.stack.pop() {
                    elements.push(value);
                }
                self.stack.push(Value::Tuple(elements));
                Ok(Flow::Advance)
            }
            AvmOpcode::Restore => {
                let elements = self.pop_tuple()?;
                for value in elements.into_iter().rev() {
                    self.stack.push(value);
                }
                Ok(Flow::Advance)
            }
            AvmOpcode::PackAux => {
                let mut elements = Vec::with_capacity(self.aux.len());
                while let Some(value) = self.aux.pop() {
                    elements.push(value);
                }
                self.stack.push(Value::Tuple(elements));
                Ok(Flow::Advance)
            }
            AvmOpcode::RestoreAux => {
                let elements = self.pop_tuple()?;
                for value in elements.into_iter().rev() {
                    self.aux.push(value);
                }
                Ok(Flow::Advance)
            }
            AvmOpcode::ClearStack => {
                self.stack.clear();
                Ok(Flow::Advance)
            }
            AvmOpcode::ClearAux => {
                self.aux.clear();
                Ok(Flow::Advance)
            }
            AvmOpcode::Inbox => match self.inbox.pop_front() {
                Some(message) => {
                    self.stack.push(message);
                    Ok(Flow::Advance)
                }
                None => Ok(Flow::Stop(MachineStatus::Done)),
            },
            AvmOpcode::Send => {
                let value = self.pop()?;
                self.outbox.push(value);
                Ok(Flow::Advance)
            }
            AvmOpcode::Log => {
                let value = self.pop()?;
                self.log.push(value);
                Ok(Flow::Advance)
            }
            AvmOpcode::Runtime(op) => self.execute_runtime(op),
        }
    }

    fn binary_int(&mut self, f: impl FnOnce(U256, U256) -> Result<U256, Fault>) -> OpResult {
        let a = self.pop_int()?;
        let b = self.pop_int()?;
        let result = f(a, b)?;
        self.push_int(result);
        Ok(Flow::Advance)
    }

    fn ternary_int(
        &mut self,
        f: impl FnOnce(U256, U256, U256) -> Result<U256, Fault>,
    ) -> OpResult {
        let a = self.pop_int()?;
        let b = self.pop_int()?;
        let c = self.pop_int()?;
        let result = f(a, b, c)?;
        self.push_int(result);
        Ok(Flow::Advance)
    }

    fn dup(&mut self, depth: usize) -> OpResult {
        if self.stack.len() <= depth {
            return Err(Fault::new("stack underflow"));
        }
        let value = self.stack[self.stack.len() - 1 - depth].clone();
        self.stack.push(value);
        Ok(Flow::Advance)
    }

    fn swap(&mut self, depth: usize) -> OpResult {
        if self.stack.len() <= depth {
            return Err(Fault::new("stack underflow"));
        }
        let top = self.stack.len() - 1;
        self.stack.swap(top, top - depth);
        Ok(Flow::Advance)
    }

    #[allow(clippy::too_many_lines)]
    fn execute_runtime(&mut self, op: RuntimeOp) -> OpResult {
        match op {
            RuntimeOp::MemoryLoad => {
                let offset = self.pop_usize()?;
                let word = self.read_memory(offset, 32)?;
                self.push_int(U256::from_be_slice(&word));
                Ok(Flow::Advance)
            }
            RuntimeOp::MemoryStore => {
                let offset = self.pop_usize()?;
                let word = self.pop_int()?;
                self.write_memory(offset, &word.to_be_bytes::<32>())?;
                Ok(Flow::Advance)
            }
            RuntimeOp::MemoryStore8 => {
                let offset = self.pop_usize()?;
                let word = self.pop_int()?;
                self.write_memory(offset, &[word.to_be_bytes::<32>()[31]])?;
                Ok(Flow::Advance)
            }
            RuntimeOp::MemorySize => {
                let length = self.memory()?.len();
                self.push_int(U256::from(length.div_ceil(32) * 32));
                Ok(Flow::Advance)
            }
            RuntimeOp::ReadSegment => {
                let offset = self.pop_usize()?;
                let length = self.pop_usize()?;
                let segment = self.read_memory(offset, length)?;
                self.stack.push(Value::Bytes(segment));
                Ok(Flow::Advance)
            }
            RuntimeOp::CopyBytes => {
                let buffer = self.pop_bytes()?;
                let memory_offset = self.pop_usize()?;
                let buffer_offset = self.pop_usize()?;
                let length = self.pop_usize()?;
                let mut data = vec![0u8; length];
                for (index, byte) in data.iter_mut().enumerate() {
                    if let Some(value) = buffer.get(buffer_offset + index) {
                        *byte = *value;
                    }
                }
                self.write_memory(memory_offset, &data)?;
                Ok(Flow::Advance)
            }
            RuntimeOp::Keccak => {
                let offset = self.pop_usize()?;
                let length = self.pop_usize()?;
                let segment = self.read_memory(offset, length)?;
                self.push_int(U256::from_be_bytes(keccak256(&segment).0));
                Ok(Flow::Advance)
            }
            RuntimeOp::StorageLoad => {
                let key = self.pop_int()?;
                let contract_id = self
                    .frame_field(frame_field::CONTRACT_ID)?
                    .as_int()
                    .ok_or_else(|| Fault::new("frame has no contract id"))?;
                let contracts = self.contracts()?;
                let record = contracts
                    .get(&contract_id)
                    .ok_or_else(|| Fault::new("unknown contract"))?;
                let (storage, _) = Self::contract_parts(record)?;
                let value =
                    storage.get(&key).and_then(|value| value.as_int()).unwrap_or(U256::ZERO);
                self.push_int(value);
                Ok(Flow::Advance)
            }
            RuntimeOp::StorageStore => {
                let key = self.pop_int()?;
                let value = self.pop_int()?;
                let contract_id = self
                    .frame_field(frame_field::CONTRACT_ID)?
                    .as_int()
                    .ok_or_else(|| Fault::new("frame has no contract id"))?;
                let mut contracts = self.contracts()?;
                let record = contracts
                    .get(&contract_id)
                    .ok_or_else(|| Fault::new("unknown contract"))?;
                let (mut storage, balances) = Self::contract_parts(record)?;
                storage.insert(key, Value::Int(value));
                contracts.insert(
                    contract_id,
                    crate::core::chain::contract_record(
                        Value::Map(storage),
                        Value::Map(balances),
                    ),
                );
                self.set_frame_field(frame_field::CONTRACTS, Value::Map(contracts))?;
                Ok(Flow::Advance)
            }
            RuntimeOp::CalldataLoad => {
                let offset = self.pop_usize()?;
                let data = self.calldata()?;
                let mut word = [0u8; 32];
                for (index, byte) in word.iter_mut().enumerate() {
                    if let Some(value) = data.get(offset + index) {
                        *byte = *value;
                    }
                }
                self.push_int(U256::from_be_bytes(word));
                Ok(Flow::Advance)
            }
            RuntimeOp::CalldataSize => {
                let length = self.calldata()?.len();
                self.push_int(U256::from(length));
                Ok(Flow::Advance)
            }
            RuntimeOp::CalldataCopy => {
                let memory_offset = self.pop_usize()?;
                let data_offset = self.pop_usize()?;
                let length = self.pop_usize()?;
                let data = self.calldata()?;
                let mut out = vec![0u8; length];
                for (index, byte) in out.iter_mut().enumerate() {
                    if let Some(value) = data.get(data_offset + index) {
                        *byte = *value;
                    }
                }
                self.write_memory(memory_offset, &out)?;
                Ok(Flow::Advance)
            }
            RuntimeOp::ReturndataSize => {
                let length = self.return_data()?.len();
                self.push_int(U256::from(length));
                Ok(Flow::Advance)
            }
            RuntimeOp::ReturndataCopy => {
                let memory_offset = self.pop_usize()?;
                let data_offset = self.pop_usize()?;
                let length = self.pop_usize()?;
                let data = self.return_data()?;
                if data_offset + length > data.len() {
                    return Err(Fault::new("return data read out of range"));
                }
                let slice = data[data_offset..data_offset + length].to_vec();
                self.write_memory(memory_offset, &slice)?;
                Ok(Flow::Advance)
            }
            RuntimeOp::CopyReturnData => {
                let memory_offset = self.pop_usize()?;
                let length = self.pop_usize()?;
                let data = self.return_data()?;
                let copied = length.min(data.len());
                let slice = data[..copied].to_vec();
                self.write_memory(memory_offset, &slice)?;
                Ok(Flow::Advance)
            }
            RuntimeOp::Origin => {
                let mut frame = self.frame()?;
                loop {
                    let parent = frame
                        .get(frame_field::PARENT)
                        .cloned()
                        .ok_or_else(|| Fault::new("call frame too short"))?;
                    if parent.is_none() {
                        break;
                    }
                    frame = parent
                        .as_tuple()
                        .ok_or_else(|| Fault::new("parent frame is not a tuple"))?
                        .to_vec();
                }
                let message = frame
                    .get(frame_field::MESSAGE)
                    .and_then(|message| message.as_tuple())
                    .ok_or_else(|| Fault::new("root frame has no message"))?;
                let caller = message
                    .get(message_field::CALLER)
                    .cloned()
                    .ok_or_else(|| Fault::new("message too short"))?;
                self.stack.push(caller);
                Ok(Flow::Advance)
            }
            RuntimeOp::Caller => {
                let caller = self.message_field(message_field::CALLER)?;
                self.stack.push(caller);
                Ok(Flow::Advance)
            }
            RuntimeOp::Callvalue => {
                let value = self.message_field(message_field::VALUE)?;
                self.stack.push(value);
                Ok(Flow::Advance)
            }
            RuntimeOp::Timestamp => {
                self.push_int(self.env.timestamp);
                Ok(Flow::Advance)
            }
            RuntimeOp::BlockNumber => {
                self.push_int(self.env.block_number);
                Ok(Flow::Advance)
            }
            RuntimeOp::BalanceGet => {
                let currency = self.pop_int()?;
                let contract_id = self
                    .frame_field(frame_field::CONTRACT_ID)?
                    .as_int()
                    .ok_or_else(|| Fault::new("frame has no contract id"))?;
                let balance = self.balance_of(contract_id, currency)?;
                self.push_int(balance);
                Ok(Flow::Advance)
            }
            RuntimeOp::ExtBalance => {
                let contract_id = self.pop_int()?;
                let currency = self.pop_int()?;
                let balance = self.balance_of(contract_id, currency)?;
                self.push_int(balance);
                Ok(Flow::Advance)
            }
            RuntimeOp::TransferValue => {
                self.transfer_value()?;
                Ok(Flow::Advance)
            }
            RuntimeOp::EmitLog(topic_count) => {
                let offset = self.pop_usize()?;
                let length = self.pop_usize()?;
                let data = self.read_memory(offset, length)?;

                let contract_id = self.frame_field(frame_field::CONTRACT_ID)?;
                let mut record = vec![contract_id, Value::Bytes(data)];
                for _ in 0..topic_count {
                    record.push(Value::Int(self.pop_int()?));
                }

                let tail = self.frame_field(frame_field::LOGS)?;
                self.set_frame_field(
                    frame_field::LOGS,
                    Value::Tuple(vec![Value::Tuple(record), tail]),
                )?;
                Ok(Flow::Advance)
            }
        }
    }

    /// Moves the active message's value from caller to destination within
    /// the frame's contract table. Callers absent from the table are
    /// external; their funds were settled before the message entered the
    /// machine, so only the credit side applies.
    fn transfer_value(&mut self) -> Result<(), Fault> {
        let value = self
            .message_field(message_field::VALUE)?
            .as_int()
            .ok_or_else(|| Fault::new("message value is not an integer"))?;
        if value.is_zero() {
            return Ok(());
        }

        let caller = self
            .message_field(message_field::CALLER)?
            .as_int()
            .ok_or_else(|| Fault::new("message caller is not an integer"))?;
        let dest = self
            .message_field(message_field::DEST)?
            .as_int()
            .ok_or_else(|| Fault::new("message destination is not an integer"))?;
        let native = U256::ZERO;
        let mut contracts = self.contracts()?;

        if let Some(record) = contracts.get(&caller) {
            let (storage, mut balances) = Self::contract_parts(record)?;
            let balance =
                balances.get(&native).and_then(|value| value.as_int()).unwrap_or(U256::ZERO);
            if balance < value {
                return Err(Fault::new("insufficient balance"));
            }
            balances.insert(native, Value::Int(balance - value));
            contracts.insert(
                caller,
                crate::core::chain::contract_record(Value::Map(storage), Value::Map(balances)),
            );
        }

        let record =
            contracts.get(&dest).ok_or_else(|| Fault::new("unknown destination contract"))?;
        let (storage, mut balances) = Self::contract_parts(record)?;
        let balance =
            balances.get(&native).and_then(|value| value.as_int()).unwrap_or(U256::ZERO);
        balances.insert(native, Value::Int(balance + value));
        contracts.insert(
            dest,
            crate::core::chain::contract_record(Value::Map(storage), Value::Map(balances)),
        );

        self.set_frame_field(frame_field::CONTRACTS, Value::Map(contracts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{builder::CodeBuilder, value::Label};

    fn run_main(build: impl FnOnce(&mut CodeBuilder)) -> Executor {
        let mut main = CodeBuilder::new();
        build(&mut main);
        main.op(AvmOpcode::Halt);
        let program = Program::link(CodeBuilder::new(), main).expect("should link");
        let mut executor = Executor::new(program);
        executor.run().expect("should run");
        executor
    }

    #[test]
    fn test_sub_pops_top_first() {
        let executor = run_main(|b| {
            b.push_int(1u64);
            b.push_int(2u64);
            b.op(AvmOpcode::Sub);
        });
        // top was 2, so the result is 2 - 1
        assert_eq!(executor.stack(), &[Value::int(1u64)]);
    }

    #[test]
    fn test_division_by_zero_faults() {
        let mut main = CodeBuilder::new();
        main.push_int(0u64);
        main.push_int(5u64);
        main.op(AvmOpcode::Div);
        let program = Program::link(CodeBuilder::new(), main).expect("should link");
        let mut executor = Executor::new(program);
        let status = executor.run().expect("should run");
        assert_eq!(status, MachineStatus::Faulted);
    }

    #[test]
    fn test_fault_routes_to_handler() {
        let executor = run_main(|b| {
            let handler = Label::new("handler");
            let done = Label::new("done");
            b.push_label(handler.clone());
            b.op(AvmOpcode::SetErrHandler);
            b.op(AvmOpcode::Error);
            b.set_label(handler);
            b.push_int(42u64);
            b.push_label(done.clone());
            b.op(AvmOpcode::Jump);
            b.set_label(done);
        });
        assert_eq!(executor.status(), MachineStatus::Halted);
        assert_eq!(executor.stack(), &[Value::int(42u64)]);
    }

    #[test]
    fn test_tuple_get_set() {
        let executor = run_main(|b| {
            b.push_int(7u64);
            b.push(Value::Tuple(vec![Value::int(0u64), Value::int(0u64)]));
            b.tset(1);
            b.tget(1);
        });
        assert_eq!(executor.stack(), &[Value::int(7u64)]);
    }

    #[test]
    fn test_pack_restore_roundtrip() {
        let executor = run_main(|b| {
            b.push_int(1u64);
            b.push_int(2u64);
            b.push_int(3u64);
            b.op(AvmOpcode::Pack);
            b.op(AvmOpcode::Restore);
        });
        assert_eq!(
            executor.stack(),
            &[Value::int(1u64), Value::int(2u64), Value::int(3u64)]
        );
    }

    #[test]
    fn test_deep_dup_copies_the_right_element() {
        let executor = run_main(|b| {
            b.push_int(10u64);
            b.push_int(20u64);
            b.push_int(30u64);
            b.push_int(40u64);
            // stack is [40, 30, 20, 10]; depth 3 is 10
            b.dup_n(3);
        });
        assert_eq!(
            executor.stack(),
            &[
                Value::int(10u64),
                Value::int(20u64),
                Value::int(30u64),
                Value::int(40u64),
                Value::int(10u64),
            ]
        );
    }

    #[test]
    fn test_deep_swap_exchanges_the_right_element() {
        let executor = run_main(|b| {
            b.push_int(10u64);
            b.push_int(20u64);
            b.push_int(30u64);
            b.push_int(40u64);
            b.swap_n(3);
        });
        assert_eq!(
            executor.stack(),
            &[
                Value::int(40u64),
                Value::int(20u64),
                Value::int(30u64),
                Value::int(10u64),
            ]
        );
    }

    #[test]
    fn test_if_else_takes_the_true_branch() {
        let executor = run_main(|b| {
            b.push_int(1u64);
            b.if_else(|b| b.push_int(111u64), |b| b.push_int(222u64));
        });
        assert_eq!(executor.stack(), &[Value::int(111u64)]);
    }

    #[test]
    fn test_if_else_takes_the_false_branch() {
        let executor = run_main(|b| {
            b.push_int(0u64);
            b.if_else(|b| b.push_int(111u64), |b| b.push_int(222u64));
        });
        assert_eq!(executor.stack(), &[Value::int(222u64)]);
    }

    #[test]
    fn test_make_tuple_preserves_order() {
        let executor = run_main(|b| {
            b.push_int(3u64);
            b.push_int(2u64);
            b.push_int(1u64);
            b.make_tuple(3);
        });
        assert_eq!(
            executor.stack(),
            &[Value::Tuple(vec![Value::int(1u64), Value::int(2u64), Value::int(3u64)])]
        );
    }

    #[test]
    fn test_empty_inbox_stops_cleanly_and_resumes() {
        let mut main = CodeBuilder::new();
        let start = Label::new("start");
        main.set_label(start.clone());
        main.op(AvmOpcode::Inbox);
        main.op(AvmOpcode::Log);
        main.push_label(start);
        main.op(AvmOpcode::Jump);
        let program = Program::link(CodeBuilder::new(), main).expect("should link");

        let mut executor = Executor::new(program);
        assert_eq!(executor.run().expect("should run"), MachineStatus::Done);
        assert!(executor.log().is_empty());

        let message =
            crate::core::chain::message(Vec::new(), U256::from(9), U256::ZERO, U256::ZERO);
        executor.queue_message(message.clone()).expect("should queue");
        executor.run().expect("should run");
        assert_eq!(executor.log(), &[message]);
    }

    #[test]
    fn test_malformed_message_is_rejected_at_the_door() {
        let mut main = CodeBuilder::new();
        main.op(AvmOpcode::Halt);
        let program = Program::link(CodeBuilder::new(), main).expect("should link");
        let mut executor = Executor::new(program);

        assert!(executor.queue_message(Value::int(9u64)).is_err());
        assert!(executor.queue_message(Value::Tuple(vec![Value::none()])).is_err());
        assert!(executor
            .queue_message(crate::core::chain::message(
                Vec::new(),
                U256::ZERO,
                U256::ZERO,
                U256::ZERO
            ))
            .is_ok());
    }
}
