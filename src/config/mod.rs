pub mod model;
pub mod validate;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use model::StackConfig;

pub const CONFIG_FILENAME: &str = "appstack.toml";

/// Load and parse the config file, returning the parsed config together with
/// the raw source (the source feeds validation diagnostics).
pub fn load_config(path: &Path) -> Result<(StackConfig, String)> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let config: StackConfig = toml::from_str(&source)
        .with_context(|| format!("parsing config file {}", path.display()))?;
    Ok((config, source))
}

/// Resolve the config file path: an explicit `-f` path must exist; otherwise
/// walk upward from the current directory looking for `appstack.toml`.
pub fn resolve_config(cli_file: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = cli_file {
        if path.is_file() {
            return Ok(path.canonicalize()?);
        }
        bail!("config file not found: {}", path.display());
    }

    let cwd = std::env::current_dir()?;
    let mut dir = cwd.clone();
    loop {
        let candidate = dir.join(CONFIG_FILENAME);
        if candidate.is_file() {
            return Ok(candidate);
        }
        if !dir.pop() {
            bail!(
                "no {} found in {} or any parent directory",
                CONFIG_FILENAME,
                cwd.display()
            );
        }
    }
}
