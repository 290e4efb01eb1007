/// Error type for the target machine module
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A label was referenced but never defined
    #[error("unresolved label: {0}")]
    UnresolvedLabel(String),
    /// A label was defined more than once
    #[error("duplicate label: {0}")]
    DuplicateLabel(String),
    /// A linked instruction is malformed, e.g. a push with no immediate
    #[error("malformed program: {0}")]
    MalformedProgram(String),
    /// An inbound message does not match the message record shape
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    /// The executor exceeded its step limit
    #[error("step limit exceeded after {0} steps")]
    StepLimit(u64),
    /// Generic internal error
    #[error("Internal error: {0}")]
    Eyre(#[from] eyre::Report),
}
