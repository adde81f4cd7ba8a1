//! `moonbind run` - instantiate a script and call a method on it.

use std::path::PathBuf;

use anyhow::Context;
use moonbind_runtime::Runtime;
use termcolor::ColorChoice;
use tracing::info;

use crate::output::StyledOutput;

pub fn execute(
    script: Option<String>,
    method: String,
    config: Option<PathBuf>,
    color: ColorChoice,
) -> anyhow::Result<()> {
    let config = super::load_config(config)?;
    let script = match script.or_else(|| config.project.main.clone()) {
        Some(script) => super::script_key(&config, &script),
        None => anyhow::bail!("no script given and no project.main configured"),
    };
    let runtime = Runtime::new(config)?;
    info!(script = %script, method = %method, "running script");

    let result = runtime
        .run_script(&script, &method, &[])
        .with_context(|| format!("{}:{} failed", script, method))?;

    let mut out = StyledOutput::new(color);
    out.info(&format!("{}", result));
    out.newline();
    out.flush();
    Ok(())
}
