mod args;

pub use args::{TranspileArgs, TranspileArgsBuilder};
