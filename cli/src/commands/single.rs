use std::path::Path;

use anyhow::Context;
use muzzle::{EngineMode, ScriptSource};
use serde_json::{Map, Value};

use crate::cli::SingleArgs;
use crate::config::MergedConfig;
use crate::engine::create_server;
use crate::error::{CliResult, check_outcome};

pub async fn execute(args: SingleArgs, config: MergedConfig) -> CliResult<()> {
    let script = read_source(&args)?;
    tracing::info!(
        script = %args.script.display(),
        includes = script.includes.len(),
        variables = script.variables.len(),
        "single-shot script read"
    );

    let mut server = create_server(&config, EngineMode::Single(script))?;
    let outcome = server.serve_stdio().await?;
    check_outcome(outcome)
}

fn read_source(args: &SingleArgs) -> CliResult<ScriptSource> {
    let mut script = ScriptSource::new(read_text(&args.script, "script")?);

    for path in &args.includes {
        script = script.include(read_text(path, "include")?);
    }

    if let Some(path) = &args.variables {
        for (name, value) in read_variables(path)? {
            script = script.variable(name, value);
        }
    }

    Ok(script)
}

fn read_text(path: &Path, what: &str) -> CliResult<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {what} file: {}", path.display()))
}

fn read_variables(path: &Path) -> CliResult<Map<String, Value>> {
    let content = read_text(path, "variables")?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse variables file: {}", path.display()))?;
    match value {
        Value::Object(map) => Ok(map),
        _ => anyhow::bail!("variables file must hold a JSON object: {}", path.display()),
    }
}
