pub(crate) mod error;
pub(crate) mod log_args;
pub(crate) mod output;
pub(crate) mod run;

use error::Error;
use log_args::LogArgs;
use output::{build_output_path, write_file};
use run::RunArgs;
use tracing::info;

use clap::{Parser, Subcommand};

use evmlift_transpiler::{transpile, TranspileArgs};

#[derive(Debug, Parser)]
#[clap(name = "evmlift", version)]
pub struct Arguments {
    #[clap(subcommand)]
    pub sub: Subcommands,

    #[clap(flatten)]
    logs: LogArgs,
}

#[derive(Debug, Subcommand)]
#[clap(
    about = "Evmlift compiles sets of EVM contracts into linked programs for a tuple-based stack machine."
)]
#[allow(clippy::large_enum_variant)]
pub enum Subcommands {
    #[clap(name = "transpile", about = "Compile a contract set into a linked program")]
    Transpile(TranspileArgs),

    #[clap(name = "run", about = "Compile a contract set and feed it a batch of messages")]
    Run(RunArgs),
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Arguments::parse();

    // setup logging
    args.logs.init_tracing();

    match args.sub {
        Subcommands::Transpile(cmd) => {
            // if the user has passed an output filename, override the default
            let mut filename: String = "program.json".to_string();
            let given_name = cmd.name.as_str();

            if !given_name.is_empty() {
                filename = format!("{}-{}", given_name, filename);
            }

            let program = transpile(cmd.clone())
                .await
                .map_err(|e| Error::Generic(format!("failed to transpile contracts: {e}")))?;
            let serialized = serde_json::to_string_pretty(&program)?;

            if cmd.output == "print" {
                println!("{serialized}");
            } else {
                let output_path = build_output_path(&cmd.output, &filename)
                    .map_err(|e| Error::Generic(format!("failed to build output path: {e}")))?;
                write_file(&output_path, &serialized)
                    .map_err(|e| Error::Generic(format!("failed to write output: {e}")))?;
                info!(path = %output_path, "wrote linked program");
            }
        }
        Subcommands::Run(cmd) => {
            let report = run::run(cmd).await?;
            println!("{report}");
        }
    }

    Ok(())
}
