//! The machine's value model.
//!
//! Values are immutable trees: ints, tuples, byte buffers, ordered maps,
//! and code points. Mutating a field of a tuple held elsewhere produces a
//! fresh tuple, which is what makes call-frame snapshots cheap to take and
//! safe to discard.

use crate::error::Error;
use alloy::primitives::{ruint::UintTryFrom, U256};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// A symbolic code location, resolved to a code point at link time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label(String);

impl Label {
    /// Creates a label from an arbitrary name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The entry point of a contract's translated code.
    pub fn contract_entry(contract_id: U256) -> Self {
        Self(format!("contract_entry_{contract_id}"))
    }

    /// A translated JUMPDEST within a contract.
    pub fn jump_dest(contract_id: U256, pc: usize) -> Self {
        Self(format!("jumpdest_{contract_id}_{pc}"))
    }

    /// The resume point of a call site within a contract.
    pub fn call_return(contract_id: U256, pc: usize) -> Self {
        Self(format!("call_return_{contract_id}_{pc}"))
    }

    /// The label name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A machine value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    /// A 256-bit unsigned integer
    Int(U256),
    /// An immutable tuple of values
    Tuple(Vec<Value>),
    /// An immutable byte buffer
    Bytes(Vec<u8>),
    /// An ordered map from integers to values
    Map(BTreeMap<U256, Value>),
    /// An unresolved code label; only present before linking
    Label(Label),
    /// An absolute code location
    CodePoint(usize),
}

impl Value {
    /// The distinguished not-found sentinel: the empty tuple.
    pub fn none() -> Self {
        Value::Tuple(Vec::new())
    }

    /// Whether this value is the sentinel.
    pub fn is_none(&self) -> bool {
        matches!(self, Value::Tuple(elements) if elements.is_empty())
    }

    /// An integer value from anything convertible to a U256.
    pub fn int<T>(value: T) -> Self
    where
        U256: UintTryFrom<T>,
    {
        Value::Int(U256::from(value))
    }

    /// The integer behind this value, if it is one.
    pub fn as_int(&self) -> Option<U256> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// The tuple elements behind this value, if it is one.
    pub fn as_tuple(&self) -> Option<&[Value]> {
        match self {
            Value::Tuple(elements) => Some(elements),
            _ => None,
        }
    }

    /// The bytes behind this value, if it is one.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// The map behind this value, if it is one.
    pub fn as_map(&self) -> Option<&BTreeMap<U256, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// The code point behind this value, if it is one.
    pub fn as_code_point(&self) -> Option<usize> {
        match self {
            Value::CodePoint(point) => Some(*point),
            _ => None,
        }
    }

    /// Replaces every [`Value::Label`] in this tree with the code point it
    /// resolves to. Fails on labels absent from `positions`.
    pub fn resolve_labels(&self, positions: &HashMap<Label, usize>) -> Result<Value, Error> {
        match self {
            Value::Label(label) => positions
                .get(label)
                .map(|position| Value::CodePoint(*position))
                .ok_or_else(|| Error::UnresolvedLabel(label.to_string())),
            Value::Tuple(elements) => Ok(Value::Tuple(
                elements
                    .iter()
                    .map(|element| element.resolve_labels(positions))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            Value::Map(map) => Ok(Value::Map(
                map.iter()
                    .map(|(key, value)| Ok((*key, value.resolve_labels(positions)?)))
                    .collect::<Result<BTreeMap<_, _>, Error>>()?,
            )),
            other => Ok(other.clone()),
        }
    }
}

impl From<U256> for Value {
    fn from(value: U256) -> Self {
        Value::Int(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::Int(U256::from(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_accepts_the_usual_widths() {
        assert_eq!(Value::int(5u8), Value::int(5u64));
        assert_eq!(Value::int(5usize), Value::int(U256::from(5u64)));
    }

    #[test]
    fn test_sentinel_is_empty_tuple() {
        assert!(Value::none().is_none());
        assert!(!Value::Tuple(vec![Value::none()]).is_none());
        assert!(!Value::int(0u64).is_none());
    }

    #[test]
    fn test_resolve_labels_nested() {
        let mut positions = HashMap::new();
        positions.insert(Label::new("a"), 7usize);

        let value = Value::Tuple(vec![
            Value::int(1u64),
            Value::Label(Label::new("a")),
            Value::Tuple(vec![Value::Label(Label::new("a"))]),
        ]);
        let resolved = value.resolve_labels(&positions).expect("should resolve");
        assert_eq!(
            resolved,
            Value::Tuple(vec![
                Value::int(1u64),
                Value::CodePoint(7),
                Value::Tuple(vec![Value::CodePoint(7)]),
            ])
        );
    }

    #[test]
    fn test_resolve_labels_missing() {
        let positions = HashMap::new();
        let value = Value::Label(Label::new("missing"));
        assert!(value.resolve_labels(&positions).is_err());
    }
}
