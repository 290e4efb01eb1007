//! The emitted call engine.
//!
//! The target machine has no call stack, so nested-call semantics are code
//! the transpiler generates: call sites spawn a frame value carrying a
//! snapshot of the mutable world (contract table, send queue, logs), pack
//! the caller's stacks into the parent frame, and jump into the callee.
//! Terminal handlers store the frame's result and jump to the return
//! location recorded at spawn; the shared resume sequence merges the
//! callee's world into the parent only when the termination discriminant
//! signals success.
//!
//! Stack comments below read top-first.

use crate::core::dispatch::DispatchTree;
use evmlift_avm::{
    chain::{
        self, call_field, chain_field, frame_field, message_field, output_field, return_code,
    },
    AvmOpcode::*,
    CodeBuilder, Label, RuntimeOp, Value,
};
use alloy::primitives::U256;

/// Which identity a spawned frame executes under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameIdentity {
    /// The destination contract: its storage, its balance
    Callee,
    /// The calling frame's identity, for delegate-style calls
    Caller,
}

/// Shape of a call-family source instruction.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CallKind {
    /// Identity the spawned frame runs under
    pub identity: FrameIdentity,
    /// Whether the message value moves between balances
    pub transfer: bool,
    /// Whether the source instruction carries a value argument
    pub has_value: bool,
}

impl CallKind {
    pub(crate) const CALL: Self =
        Self { identity: FrameIdentity::Callee, transfer: true, has_value: true };
    pub(crate) const CALLCODE: Self =
        Self { identity: FrameIdentity::Caller, transfer: false, has_value: true };
    pub(crate) const DELEGATECALL: Self =
        Self { identity: FrameIdentity::Caller, transfer: false, has_value: false };
    // mutation inside the callee is not blocked; the frame merge still
    // discards it when the callee fails
    pub(crate) const STATICCALL: Self =
        Self { identity: FrameIdentity::Callee, transfer: false, has_value: false };
}

/// RETURN: [offset, length, ..] becomes the frame's return data.
pub(crate) fn emit_return(b: &mut CodeBuilder) {
    emit_terminal(b, return_code::RETURN, true);
}

/// REVERT: like RETURN but with the failure discriminant.
pub(crate) fn emit_revert(b: &mut CodeBuilder) {
    emit_terminal(b, return_code::REVERT, true);
}

/// STOP: empty return data, success discriminant.
pub(crate) fn emit_stop(b: &mut CodeBuilder) {
    emit_terminal(b, return_code::STOP, false);
}

/// Fall-through off the end of a translated block.
pub(crate) fn emit_invalid_sequence(b: &mut CodeBuilder) {
    emit_terminal(b, return_code::INVALID_SEQUENCE, false);
}

fn emit_terminal(b: &mut CodeBuilder, code: u64, data_from_stack: bool) {
    if data_from_stack {
        // [offset, length, ..]
        b.op(Runtime(RuntimeOp::ReadSegment));
    } else {
        b.push(Value::Bytes(Vec::new()));
    }
    b.store_frame_field(frame_field::RETURN_DATA);
    b.op(ClearStack);
    b.op(ClearAux);
    b.load_frame_field(frame_field::RETURN_LOCATION);
    b.push_int(code);
    b.op(Swap1);
    b.op(Jump); // arrive at the return location with [code]
}

/// The program-wide fault handler. Faults behave like a terminal in the
/// frame that was current when they fired: stacks are gone, return data is
/// empty, and control unwinds one level with the fault discriminant.
pub(crate) fn emit_fault_handler(b: &mut CodeBuilder, label: Label) {
    b.set_label(label);
    b.op(ClearStack);
    b.op(ClearAux);
    b.push(Value::Bytes(Vec::new()));
    b.store_frame_field(frame_field::RETURN_DATA);
    b.load_frame_field(frame_field::RETURN_LOCATION);
    b.push_int(return_code::FAULT);
    b.op(Swap1);
    b.op(Jump);
}

/// SELFDESTRUCT: flush the frame's pending sends and stop the machine.
/// The beneficiary argument is discarded; no balance sweep happens.
pub(crate) fn emit_selfdestruct(b: &mut CodeBuilder) {
    b.op(Pop);
    b.load_frame_field(frame_field::SENT_QUEUE);
    emit_flush_sends(b);
    b.op(Halt);
}

/// A call-family instruction at `pc` of contract `contract_id`.
///
/// Input is the source operand stack for the instruction; output is the
/// success flag, with return data copied into the caller's memory range.
pub(crate) fn emit_call_family(
    b: &mut CodeBuilder,
    entry_points: &DispatchTree,
    contract_id: U256,
    pc: usize,
    kind: CallKind,
) {
    if !kind.has_value {
        // six-argument form: inject value = 0 behind the destination
        b.push_int(0u64);
        b.op(Swap2);
        b.op(Swap1);
    }
    // [gas, dest, value, arg_offset, arg_length, ret_offset, ret_length, ..]
    b.make_tuple(call_field::COUNT);

    // a zero-gas call with no argument and no return range is a pure send
    b.op(Dup0);
    b.tget(call_field::GAS);
    b.op(Iszero);
    b.op(Dup1);
    b.tget(call_field::ARG_LENGTH);
    b.op(Iszero);
    b.op(And);
    b.op(Dup1);
    b.tget(call_field::RET_LENGTH);
    b.op(Iszero);
    b.op(And);
    // [pure?, call_tuple, ..]
    b.if_else(
        |b| {
            // enqueue and report success without any frame work
            emit_send_message(b);
            b.load_frame_field(frame_field::SENT_QUEUE);
            b.op(Swap1);
            b.make_tuple(2);
            b.store_frame_field(frame_field::SENT_QUEUE);
            b.push_int(1u64);
        },
        |b| {
            // an unresolvable destination faults the calling frame
            b.op(Dup0);
            b.tget(call_field::DEST);
            entry_points.emit(b);
            b.op(Dup0);
            b.push_none();
            b.op(Eq);
            b.if_else(|b| b.op(Error), |_| {});
            b.op(Pop);

            // message = [data, dest, caller, value]
            b.op(Dup0);
            b.tget(call_field::ARG_LENGTH);
            b.op(Dup1);
            b.tget(call_field::ARG_OFFSET);
            b.op(Runtime(RuntimeOp::ReadSegment));
            // [data, call_tuple, ..]
            b.op(Dup1);
            b.tget(call_field::DEST);
            b.load_frame_field(frame_field::CONTRACT_ID);
            b.dup_n(3);
            b.tget(call_field::VALUE);
            // [value, caller, dest, data, call_tuple, ..]
            b.push(chain::empty_record(message_field::COUNT));
            b.tset(message_field::VALUE);
            b.tset(message_field::CALLER);
            b.tset(message_field::DEST);
            b.tset(message_field::DATA);
            // [message, call_tuple, ..]

            let resume_at = Label::call_return(contract_id, pc);
            emit_perform_call(b, entry_points, resume_at.clone(), kind);
            b.set_label(resume_at);
            emit_resume(b);
            // [discriminant, call_tuple, ..]
            emit_success_flag(b);
            b.op(Swap1);
            b.op(Pop);
            b.op(Swap1);
            // [call_tuple, success, ..]
            b.op(Dup0);
            b.tget(call_field::RET_LENGTH);
            b.op(Dup1);
            b.tget(call_field::RET_OFFSET);
            b.op(Runtime(RuntimeOp::CopyReturnData));
            b.op(Pop);
            // [success, ..]
        },
    );
}

/// [call_tuple, ..] becomes [message, ..] with an empty payload.
fn emit_send_message(b: &mut CodeBuilder) {
    b.op(Dup0);
    b.tget(call_field::VALUE);
    b.op(Dup1);
    b.tget(call_field::DEST);
    b.load_frame_field(frame_field::CONTRACT_ID);
    b.op(Swap1);
    // [dest, caller, value, call_tuple, ..]
    b.push(Value::Bytes(Vec::new()));
    b.make_tuple(message_field::COUNT);
    b.op(Swap1);
    b.op(Pop);
}

/// Spawns a frame for [message, ..], saves the caller's stacks, installs
/// the frame, optionally settles the message value, and jumps into the
/// callee. Control comes back to `resume_at` with the discriminant on top.
pub(crate) fn emit_perform_call(
    b: &mut CodeBuilder,
    entry_points: &DispatchTree,
    resume_at: Label,
    kind: CallKind,
) {
    b.push(chain::frame_template(resume_at));
    // [frame, message, ..]
    match kind.identity {
        FrameIdentity::Callee => {
            b.op(Dup1);
            b.tget(message_field::DEST);
            b.op(Swap1);
            b.tset(frame_field::CONTRACT_ID);
        }
        FrameIdentity::Caller => {
            b.load_frame_field(frame_field::CONTRACT_ID);
            b.op(Swap1);
            b.tset(frame_field::CONTRACT_ID);
        }
    }
    // snapshot the caller's world
    for field in [frame_field::CONTRACTS, frame_field::SENT_QUEUE, frame_field::LOGS] {
        b.load_frame_field(field);
        b.op(Swap1);
        b.tset(field);
    }
    b.tset(frame_field::MESSAGE);
    // [frame, ..rest]

    // pack the caller's stacks into its own frame and link it as parent
    b.op(AuxPush);
    b.op(Pack);
    b.load_frame();
    b.tset(frame_field::SAVED_STACK);
    b.op(AuxPop);
    b.op(Swap1);
    b.op(PackAux);
    b.op(Swap1);
    b.tset(frame_field::SAVED_AUX);
    b.op(Swap1);
    b.tset(frame_field::PARENT);
    b.store_frame();

    if kind.transfer {
        b.op(Runtime(RuntimeOp::TransferValue));
    }

    b.load_message_field(message_field::DEST);
    entry_points.emit(b);
    b.op(Dup0);
    b.push_none();
    b.op(Eq);
    b.if_else(|b| b.op(Error), |b| b.op(Jump));
}

/// The shared resume sequence at a call's return location. Entered with
/// [discriminant] and the callee frame still installed; leaves
/// [discriminant, ..caller stack] with the parent frame reinstalled and
/// the caller's auxiliary stack restored.
pub(crate) fn emit_resume(b: &mut CodeBuilder) {
    b.op(AuxPush);
    b.load_frame();
    b.op(Dup0);
    b.tget(frame_field::PARENT);
    // [parent, callee]; return data crosses the boundary unconditionally
    b.op(Dup1);
    b.tget(frame_field::RETURN_DATA);
    b.op(Swap1);
    b.tset(frame_field::RETURN_DATA);
    b.op(AuxPop);
    // [discriminant, parent, callee]
    emit_success_flag(b);
    b.if_then(|b| {
        // success: the callee's world becomes the caller's
        b.op(AuxPush);
        for field in [frame_field::CONTRACTS, frame_field::SENT_QUEUE, frame_field::LOGS] {
            b.op(Dup1);
            b.tget(field);
            b.op(Swap1);
            b.tset(field);
        }
        b.op(AuxPop);
    });
    // [discriminant, parent, callee]
    b.op(Swap1);
    b.store_frame();
    b.op(Swap1);
    b.op(Pop);
    // [discriminant]
    b.op(AuxPush);
    b.load_frame_field(frame_field::SAVED_STACK);
    b.op(Restore);
    b.op(AuxPop);
    b.load_frame_field(frame_field::SAVED_AUX);
    b.op(RestoreAux);
}

/// [discriminant, ..] becomes [success, discriminant, ..]. Success means
/// RETURN or STOP; the fault and invalid-sequence discriminants both fail.
fn emit_success_flag(b: &mut CodeBuilder) {
    b.op(Dup0);
    b.push_int(return_code::RETURN);
    b.op(Eq);
    b.op(Dup1);
    b.push_int(return_code::STOP);
    b.op(Eq);
    b.op(Or);
}

/// Sends every message on the cons-list queue at the top of the stack,
/// oldest last, and drops the exhausted queue.
fn emit_flush_sends(b: &mut CodeBuilder) {
    let next = b.fresh_label("flush");
    let done = b.fresh_label("flush_done");
    b.set_label(next.clone());
    b.op(Dup0);
    b.push_none();
    b.op(Eq);
    b.push_label(done.clone());
    b.op(Cjump);
    b.op(Dup0);
    b.tget(0);
    b.op(Send);
    b.tget(1);
    b.push_label(next);
    b.op(Jump);
    b.set_label(done);
    b.op(Pop);
}

/// The top-level message loop: one inbound message, one root call, one
/// output record. A fault anywhere inside the call produces the fault
/// discriminant here, and the next message is processed normally.
pub(crate) fn emit_message_loop(
    b: &mut CodeBuilder,
    entry_points: &DispatchTree,
    fault_handler: Label,
) {
    let run_loop = Label::new("run_loop");
    let resume_at = Label::new("initial_resume");

    b.set_label(run_loop.clone());
    b.op(Inbox);
    // [message]
    b.push_label(fault_handler);
    b.op(SetErrHandler);

    // fresh root frame over the committed contract table
    b.push(chain::frame_template(resume_at.clone()));
    b.op(Rget);
    b.tget(chain_field::CONTRACTS);
    b.op(Swap1);
    b.tset(frame_field::CONTRACTS);
    b.op(Swap1);
    b.op(Dup0);
    b.op(Swap2);
    b.tset(frame_field::MESSAGE);
    b.store_frame();
    // [message]; keep a copy across the call for the output record
    b.op(Dup0);
    emit_perform_call(b, entry_points, resume_at.clone(), CallKind::CALL);
    b.set_label(resume_at);
    emit_resume(b);
    // [discriminant, message]
    b.op(ClearErrHandler);

    // commit the root frame's contract table
    b.load_frame_field(frame_field::CONTRACTS);
    b.op(Rget);
    b.tset(chain_field::CONTRACTS);
    b.op(Rset);

    b.load_frame_field(frame_field::SENT_QUEUE);
    emit_flush_sends(b);

    // output record: [message, logs, return_data, return_code]
    b.push(chain::empty_record(output_field::COUNT));
    b.tset(output_field::RETURN_CODE);
    b.tset(output_field::MESSAGE);
    b.load_frame_field(frame_field::LOGS);
    b.op(Swap1);
    b.tset(output_field::LOGS);
    b.load_frame_field(frame_field::RETURN_DATA);
    b.op(Swap1);
    b.tset(output_field::RETURN_DATA);
    b.op(Log);

    b.push_label(run_loop);
    b.op(Jump);
}
