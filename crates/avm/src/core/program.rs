//! Linked programs.
//!
//! Linking concatenates the initialization stream and the main stream,
//! resolves every label (including labels buried inside push immediates)
//! to an absolute code point, and rejects duplicates and dangling
//! references. Execution always starts at code point zero.

use crate::{
    core::{builder::CodeBuilder, instruction::AvmInstruction},
    error::Error,
};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

/// A fully linked instruction stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    /// The linked instructions; execution starts at index 0
    pub instructions: Vec<AvmInstruction>,
}

impl Program {
    /// Links an initialization stream and a main stream into one program.
    pub fn link(init: CodeBuilder, main: CodeBuilder) -> Result<Self, Error> {
        let (init_instructions, init_labels) = init.into_parts();
        let (main_instructions, main_labels) = main.into_parts();
        let offset = init_instructions.len();

        let mut positions = HashMap::new();
        let labels = init_labels
            .into_iter()
            .chain(main_labels.into_iter().map(|(label, at)| (label, at + offset)));
        for (label, at) in labels {
            if positions.insert(label.clone(), at).is_some() {
                return Err(Error::DuplicateLabel(label.to_string()));
            }
        }

        let instructions = init_instructions
            .into_iter()
            .chain(main_instructions)
            .map(|instruction| {
                let immediate = match instruction.immediate {
                    Some(immediate) => Some(immediate.resolve_labels(&positions)?),
                    None => None,
                };
                Ok(AvmInstruction { immediate, ..instruction })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(Self { instructions })
    }

    /// Number of instructions in the program.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Whether the program is empty.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        opcodes::AvmOpcode,
        value::{Label, Value as V},
    };

    #[test]
    fn test_link_offsets_main_labels() {
        let mut init = CodeBuilder::new();
        init.push_int(0u64);
        init.op(AvmOpcode::Pop);

        let mut main = CodeBuilder::new();
        main.set_label(Label::new("start"));
        main.push_label(Label::new("start"));
        main.op(AvmOpcode::Jump);

        let program = Program::link(init, main).expect("should link");
        assert_eq!(program.len(), 4);
        assert_eq!(program.instructions[2].immediate, Some(V::CodePoint(2)));
    }

    #[test]
    fn test_link_resolves_labels_inside_tuples() {
        let mut main = CodeBuilder::new();
        main.set_label(Label::new("here"));
        main.push(V::Tuple(vec![V::int(1u64), V::Label(Label::new("here"))]));

        let program = Program::link(CodeBuilder::new(), main).expect("should link");
        assert_eq!(
            program.instructions[0].immediate,
            Some(V::Tuple(vec![V::int(1u64), V::CodePoint(0)]))
        );
    }

    #[test]
    fn test_link_rejects_duplicate_labels() {
        let mut main = CodeBuilder::new();
        main.set_label(Label::new("twice"));
        main.push_int(0u64);
        main.set_label(Label::new("twice"));

        assert!(matches!(
            Program::link(CodeBuilder::new(), main),
            Err(Error::DuplicateLabel(_))
        ));
    }

    #[test]
    fn test_link_rejects_dangling_labels() {
        let mut main = CodeBuilder::new();
        main.push_label(Label::new("nowhere"));

        assert!(matches!(
            Program::link(CodeBuilder::new(), main),
            Err(Error::UnresolvedLabel(_))
        ));
    }
}
