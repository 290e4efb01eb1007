use clap::Parser;
use derive_builder::Builder;

#[derive(Debug, Clone, Parser, Builder)]
#[clap(
    about = "Translates EVM contracts into a linked target-machine program",
    override_usage = "evmlift transpile <TARGET> [OPTIONS]"
)]
pub struct TranspileArgs {
    /// The contracts to compile: either a path to a JSON description file or
    /// the JSON itself.
    #[clap(required = true)]
    pub target: String,

    /// Name of the output file.
    #[clap(long, short, default_value = "", hide_default_value = true)]
    pub name: String,

    /// The output directory to write the output to or 'print' to print to the console
    #[clap(long = "output", short = 'o', default_value = "output", hide_default_value = true)]
    pub output: String,
}

impl TranspileArgsBuilder {
    pub fn new() -> Self {
        Self {
            target: Some(String::new()),
            name: Some(String::new()),
            output: Some(String::new()),
        }
    }
}
