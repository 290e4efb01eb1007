//! Append-only code emitter with labels and structured helpers.

use crate::core::{
    chain::{chain_field, frame_field},
    instruction::{AvmInstruction, SourceTag},
    opcodes::AvmOpcode,
    value::{Label, Value},
};
use alloy::primitives::{ruint::UintTryFrom, U256};

/// Emits an instruction stream while tracking label positions.
///
/// The deep stack helpers lower to native two-deep instructions plus
/// auxiliary stack shuffles, since the machine has no generic dup or swap.
#[derive(Debug, Default)]
pub struct CodeBuilder {
    instructions: Vec<AvmInstruction>,
    labels: Vec<(Label, usize)>,
    fresh: usize,
    source: Option<SourceTag>,
}

impl CodeBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of instructions emitted so far.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Whether nothing has been emitted yet.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Tags every instruction emitted from here on with its source opcode
    /// and program counter.
    pub fn set_source(&mut self, op: impl Into<String>, pc: usize) {
        self.source = Some(SourceTag { op: op.into(), pc });
    }

    /// Stops tagging emitted instructions.
    pub fn clear_source(&mut self) {
        self.source = None;
    }

    /// Emits a bare instruction.
    pub fn op(&mut self, opcode: AvmOpcode) {
        self.instructions.push(AvmInstruction {
            opcode,
            immediate: None,
            source: self.source.clone(),
        });
    }

    /// Emits a push of `value`.
    pub fn push(&mut self, value: Value) {
        self.instructions.push(AvmInstruction {
            opcode: AvmOpcode::Push,
            immediate: Some(value),
            source: self.source.clone(),
        });
    }

    /// Emits a push of an integer.
    pub fn push_int<T>(&mut self, value: T)
    where
        U256: UintTryFrom<T>,
    {
        self.push(Value::Int(U256::from(value)));
    }

    /// Emits a push of a label, resolved to a code point at link time.
    pub fn push_label(&mut self, label: Label) {
        self.push(Value::Label(label));
    }

    /// Emits a push of the not-found sentinel.
    pub fn push_none(&mut self) {
        self.push(Value::none());
    }

    /// Defines `label` at the current position.
    pub fn set_label(&mut self, label: Label) {
        self.labels.push((label, self.instructions.len()));
    }

    /// Returns a label unique within this builder.
    pub fn fresh_label(&mut self, prefix: &str) -> Label {
        let label = Label::new(format!("__{prefix}_{}", self.fresh));
        self.fresh += 1;
        label
    }

    /// Pushes element `index` of the tuple on top of the stack.
    pub fn tget(&mut self, index: usize) {
        self.push_int(index as u64);
        self.op(AvmOpcode::Tget);
    }

    /// With `[tuple, value, ..]` on the stack, replaces element `index` of
    /// the tuple with the value, leaving the updated tuple.
    pub fn tset(&mut self, index: usize) {
        self.push_int(index as u64);
        self.op(AvmOpcode::Tset);
    }

    /// Duplicates the stack element at `depth` (0 is the top).
    pub fn dup_n(&mut self, depth: usize) {
        match depth {
            0 => self.op(AvmOpcode::Dup0),
            1 => self.op(AvmOpcode::Dup1),
            2 => self.op(AvmOpcode::Dup2),
            _ => {
                for _ in 0..depth - 2 {
                    self.op(AvmOpcode::AuxPush);
                }
                self.op(AvmOpcode::Dup2);
                for _ in 0..depth - 2 {
                    self.op(AvmOpcode::AuxPop);
                    self.op(AvmOpcode::Swap1);
                }
            }
        }
    }

    /// Swaps the top of the stack with the element at `depth`.
    pub fn swap_n(&mut self, depth: usize) {
        match depth {
            0 => {}
            1 => self.op(AvmOpcode::Swap1),
            2 => self.op(AvmOpcode::Swap2),
            _ => {
                for _ in 0..depth - 1 {
                    self.op(AvmOpcode::Swap1);
                    self.op(AvmOpcode::AuxPush);
                }
                self.op(AvmOpcode::Swap1);
                for _ in 0..depth - 1 {
                    self.op(AvmOpcode::AuxPop);
                    self.op(AvmOpcode::Swap1);
                }
            }
        }
    }

    /// Emits a two-way branch on the integer at the top of the stack. The
    /// condition is consumed.
    pub fn if_else(
        &mut self,
        then: impl FnOnce(&mut Self),
        otherwise: impl FnOnce(&mut Self),
    ) {
        let on_true = self.fresh_label("then");
        let done = self.fresh_label("endif");
        self.push_label(on_true.clone());
        self.op(AvmOpcode::Cjump);
        otherwise(self);
        self.push_label(done.clone());
        self.op(AvmOpcode::Jump);
        self.set_label(on_true);
        then(self);
        self.set_label(done);
    }

    /// [`CodeBuilder::if_else`] with an empty else branch.
    pub fn if_then(&mut self, then: impl FnOnce(&mut Self)) {
        self.if_else(then, |_| {});
    }

    /// Collects the top `count` stack values into a tuple, first value at
    /// element 0.
    pub fn make_tuple(&mut self, count: usize) {
        self.push(Value::Tuple(vec![Value::none(); count]));
        for index in 0..count {
            self.tset(index);
        }
    }

    /// Pushes the active call frame.
    pub fn load_frame(&mut self) {
        self.op(AvmOpcode::Rget);
        self.tget(chain_field::CALL_FRAME);
    }

    /// Pushes field `field` of the active call frame.
    pub fn load_frame_field(&mut self, field: usize) {
        self.load_frame();
        self.tget(field);
    }

    /// Pops the top of the stack into field `field` of the active call
    /// frame, writing the updated frame back through the register.
    pub fn store_frame_field(&mut self, field: usize) {
        self.load_frame();
        self.tset(field);
        self.op(AvmOpcode::Rget);
        self.tset(chain_field::CALL_FRAME);
        self.op(AvmOpcode::Rset);
    }

    /// Replaces the active call frame with the tuple on top of the stack.
    pub fn store_frame(&mut self) {
        self.op(AvmOpcode::Rget);
        self.tset(chain_field::CALL_FRAME);
        self.op(AvmOpcode::Rset);
    }

    /// Pushes field `field` of the active frame's message.
    pub fn load_message_field(&mut self, field: usize) {
        self.load_frame_field(frame_field::MESSAGE);
        self.tget(field);
    }

    pub(crate) fn into_parts(self) -> (Vec<AvmInstruction>, Vec<(Label, usize)>) {
        (self.instructions, self.labels)
    }

    /// The instructions emitted so far.
    pub fn instructions(&self) -> &[AvmInstruction] {
        &self.instructions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tget_emits_index_then_op() {
        let mut builder = CodeBuilder::new();
        builder.tget(3);
        assert_eq!(builder.instructions()[0].immediate, Some(Value::int(3u64)));
        assert_eq!(builder.instructions()[1].opcode, AvmOpcode::Tget);
    }

    #[test]
    fn test_dup_n_shallow_uses_native_ops() {
        let mut builder = CodeBuilder::new();
        builder.dup_n(2);
        assert_eq!(builder.instructions().len(), 1);
        assert_eq!(builder.instructions()[0].opcode, AvmOpcode::Dup2);
    }

    #[test]
    fn test_dup_n_deep_spills_to_aux() {
        let mut builder = CodeBuilder::new();
        builder.dup_n(4);
        let opcodes: Vec<_> =
            builder.instructions().iter().map(|instruction| instruction.opcode).collect();
        assert_eq!(
            opcodes,
            vec![
                AvmOpcode::AuxPush,
                AvmOpcode::AuxPush,
                AvmOpcode::Dup2,
                AvmOpcode::AuxPop,
                AvmOpcode::Swap1,
                AvmOpcode::AuxPop,
                AvmOpcode::Swap1,
            ]
        );
    }

    #[test]
    fn test_fresh_labels_are_distinct() {
        let mut builder = CodeBuilder::new();
        let a = builder.fresh_label("x");
        let b = builder.fresh_label("x");
        assert_ne!(a, b);
    }
}
