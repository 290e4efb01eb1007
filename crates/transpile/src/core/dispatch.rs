//! Balanced decision trees for multi-way lookup in generated code.
//!
//! The machine has no indexed jump, so every key-to-payload table (contract
//! dispatch, jump destinations, code introspection) is compiled into a
//! comparison tree once, at build time. Lookups in the emitted code cost
//! O(log n) comparisons and leave either the payload or the not-found
//! sentinel on the stack.

use alloy::primitives::U256;
use evmlift_avm::{AvmOpcode, CodeBuilder, Value};

/// A decision tree over sorted integer keys.
#[derive(Debug, Clone)]
pub(crate) enum DispatchTree {
    /// No keys; every lookup misses
    Empty,
    /// One key
    Leaf {
        /// The key
        key: U256,
        /// Its payload
        value: Value,
    },
    /// Two keys, tested in sequence
    Pair {
        /// The smaller entry
        first: (U256, Value),
        /// The larger entry
        second: (U256, Value),
    },
    /// Three or more keys, split at the median
    Node {
        /// Keys below the pivot go left
        pivot: U256,
        /// Subtree of keys less than the pivot
        left: Box<DispatchTree>,
        /// Subtree of keys greater than or equal to the pivot
        right: Box<DispatchTree>,
    },
}

impl DispatchTree {
    /// Builds a tree from key/payload pairs. Keys need not be sorted.
    pub(crate) fn build(mut entries: Vec<(U256, Value)>) -> Self {
        entries.sort_by_key(|(key, _)| *key);
        Self::build_sorted(&entries)
    }

    fn build_sorted(entries: &[(U256, Value)]) -> Self {
        match entries {
            [] => DispatchTree::Empty,
            [(key, value)] => DispatchTree::Leaf { key: *key, value: value.clone() },
            [first, second] => {
                DispatchTree::Pair { first: first.clone(), second: second.clone() }
            }
            _ => {
                let mid = entries.len() / 2;
                DispatchTree::Node {
                    pivot: entries[mid].0,
                    left: Box::new(Self::build_sorted(&entries[..mid])),
                    right: Box::new(Self::build_sorted(&entries[mid..])),
                }
            }
        }
    }

    /// Compile-time lookup, mirroring what the emitted code computes.
    pub(crate) fn get(&self, key: U256) -> Option<&Value> {
        match self {
            DispatchTree::Empty => None,
            DispatchTree::Leaf { key: k, value } => (*k == key).then_some(value),
            DispatchTree::Pair { first, second } => {
                if first.0 == key {
                    Some(&first.1)
                } else if second.0 == key {
                    Some(&second.1)
                } else {
                    None
                }
            }
            DispatchTree::Node { pivot, left, right } => {
                if key < *pivot {
                    left.get(key)
                } else {
                    right.get(key)
                }
            }
        }
    }

    /// Emits lookup code: consumes the key on top of the stack and leaves
    /// the payload, or the sentinel on a miss.
    pub(crate) fn emit(&self, b: &mut CodeBuilder) {
        match self {
            DispatchTree::Empty => {
                b.op(AvmOpcode::Pop);
                b.push_none();
            }
            DispatchTree::Leaf { key, value } => {
                Self::emit_candidate(b, *key, value.clone(), |b| {
                    b.op(AvmOpcode::Pop);
                    b.push_none();
                });
            }
            DispatchTree::Pair { first, second } => {
                let (second_key, second_value) = second.clone();
                Self::emit_candidate(b, first.0, first.1.clone(), move |b| {
                    Self::emit_candidate(b, second_key, second_value, |b| {
                        b.op(AvmOpcode::Pop);
                        b.push_none();
                    });
                });
            }
            DispatchTree::Node { pivot, left, right } => {
                b.op(AvmOpcode::Dup0);
                b.push_int(*pivot);
                b.op(AvmOpcode::Gt);
                b.if_else(|b| left.emit(b), |b| right.emit(b));
            }
        }
    }

    /// Key equality test against one candidate: on a hit the key is
    /// replaced by `value`, otherwise `miss` runs with the key still on
    /// the stack.
    fn emit_candidate(
        b: &mut CodeBuilder,
        key: U256,
        value: Value,
        miss: impl FnOnce(&mut CodeBuilder),
    ) {
        b.op(AvmOpcode::Dup0);
        b.push_int(key);
        b.op(AvmOpcode::Eq);
        b.if_else(
            move |b| {
                b.op(AvmOpcode::Pop);
                b.push(value);
            },
            miss,
        );
    }
}
