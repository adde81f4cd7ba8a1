//! `moonbind check` - validate scripts without registering them.

use std::path::PathBuf;

use anyhow::Context;
use moonbind_runtime::Runtime;
use termcolor::ColorChoice;

use crate::output::StyledOutput;

pub fn execute(files: Vec<PathBuf>, config: Option<PathBuf>, color: ColorChoice) -> anyhow::Result<()> {
    let config = super::load_config(config)?;
    let keys: Vec<String> = files
        .iter()
        .map(|file| super::file_key(&config, file))
        .collect();
    let runtime = Runtime::new(config)?;
    let mut out = StyledOutput::new(color);
    let mut failed = 0;

    for (file, key) in files.iter().zip(keys) {
        let source = std::fs::read_to_string(file)
            .with_context(|| format!("failed to read {}", file.display()))?;
        let validation = runtime.engine().validate(&key, &source);
        if validation.is_ok() {
            out.success("ok");
            out.plain(&format!(" {}\n", file.display()));
            for function in &validation.functions {
                out.dim(&format!("  {}\n", function));
            }
        } else {
            failed += 1;
            for err in &validation.errors {
                out.error("error");
                out.plain(&format!(
                    " {}:{}:{}: {}\n",
                    file.display(),
                    err.line,
                    err.column,
                    err.message
                ));
            }
        }
    }
    out.flush();

    if failed > 0 {
        anyhow::bail!("{} of {} file(s) failed validation", failed, files.len());
    }
    Ok(())
}
