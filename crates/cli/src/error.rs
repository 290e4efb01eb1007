#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Generic(String),
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Serde error: {0}")]
    SerdeError(#[from] serde_json::Error),
    #[error("Transpile error: {0}")]
    TranspileError(#[from] evmlift_transpiler::Error),
    #[error("Machine error: {0}")]
    MachineError(#[from] evmlift_avm::Error),
}
