use std::{env, fs, path::Path};

use eyre::{eyre, Result};

/// build a standardized output path for the given parameters. follows the following cases:
/// - if `output` is the default value (`output`), return `{cwd}/output/{filename}`
/// - if `output` is specified, return `/{output}/{filename}`
pub(crate) fn build_output_path(output: &str, filename: &str) -> Result<String> {
    if output == "output" {
        let cwd = env::current_dir()?
            .into_os_string()
            .into_string()
            .map_err(|_| eyre!("Unable to get current working directory"))?;
        return Ok(format!("{cwd}/output/{filename}"));
    }

    Ok(format!("{output}/{filename}"))
}

/// write `contents` to `path`, creating parent directories as needed
pub(crate) fn write_file(path: &str, contents: &str) -> Result<()> {
    if let Some(parent) = Path::new(path).parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    Ok(())
}
