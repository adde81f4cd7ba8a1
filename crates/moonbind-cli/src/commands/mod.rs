//! CLI command implementations.

pub mod check;
pub mod new;
pub mod run;
pub mod words;

use std::path::{Path, PathBuf};

use anyhow::Context;
use moonbind_runtime::RuntimeConfig;

/// Configuration from `--config`, or `moonbind.toml` in the working directory
pub(crate) fn load_config(path: Option<PathBuf>) -> anyhow::Result<RuntimeConfig> {
    match path {
        Some(path) => RuntimeConfig::from_file(&path)
            .with_context(|| format!("failed to load {}", path.display())),
        None => {
            let cwd = std::env::current_dir()?;
            RuntimeConfig::discover(&cwd)
                .with_context(|| format!("failed to load configuration from {}", cwd.display()))
        }
    }
}

/// Script key for a command-line argument. `res://` paths pass through;
/// anything else is taken relative to the project root.
pub(crate) fn script_key(config: &RuntimeConfig, arg: &str) -> String {
    let root = &config.engine.script_root;
    if arg.starts_with(root.as_str()) {
        return arg.to_string();
    }
    let relative = arg.trim_start_matches("./").replace('\\', "/");
    format!("{}{}", root, relative)
}

/// Script key for a file on disk
pub(crate) fn file_key(config: &RuntimeConfig, file: &Path) -> String {
    let absolute = |path: &Path| path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let file = absolute(file);
    match file.strip_prefix(absolute(&config.project.root)) {
        Ok(relative) => script_key(config, &relative.to_string_lossy()),
        Err(_) => file.to_string_lossy().into_owned(),
    }
}
