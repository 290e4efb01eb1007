/// Error type for the transpiler module
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The source bytecode uses an instruction with no translation
    #[error("unsupported construct: {0}")]
    UnsupportedConstruct(String),
    /// An error occurred while parsing the contract inputs
    #[error("Parse error: {0}")]
    ParseError(String),
    /// An error occurred while linking the generated program
    #[error("Link error: {0}")]
    Link(#[from] evmlift_avm::Error),
    /// Generic internal error that may occur during transpilation
    #[error("Internal error: {0}")]
    Eyre(#[from] eyre::Report),
}
