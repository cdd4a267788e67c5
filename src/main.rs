//! execbox command line front end
//!
//! Reads a Python snippet from a file or stdin, runs it in the sandbox and
//! prints the result as JSON. Exits 0 when the run succeeded, 1 otherwise.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::AsyncReadExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

use execbox::{ExecboxConfig, Sandbox};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Run a Python snippet in the execbox sandbox")]
struct Cli {
    /// Source file to run; `-` or nothing reads stdin
    file: Option<PathBuf>,

    /// Use the safe profile (10s, 128 MiB, no network, no serialization modules)
    #[clap(long, conflicts_with_all = ["timeout", "memory", "allow_network"])]
    safe: bool,

    /// Configuration file (defaults to $EXECBOX_CONFIG, then the built-in defaults)
    #[clap(long, short)]
    config: Option<PathBuf>,

    /// Wall clock timeout in seconds
    #[clap(long)]
    timeout: Option<f64>,

    /// Memory limit in MiB
    #[clap(long)]
    memory: Option<u64>,

    /// Leave socket operations enabled
    #[clap(long)]
    allow_network: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(load_env_and_filter(None)?)
        .init();

    let cli = Cli::parse();

    let mut config =
        ExecboxConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    config.limits = apply_overrides(&cli, &config)?;

    let code = read_source(cli.file.as_ref()).await?;
    let sandbox = Sandbox::from_config(&config);
    info!(
        "Running {} bytes of code (safe={}, interpreter={})",
        code.len(),
        cli.safe,
        sandbox.interpreter().display()
    );

    let result = if cli.safe {
        sandbox.run_safe(&code).await
    } else {
        sandbox.run(&code).await
    };

    let json = serde_json::to_string_pretty(&result).context("Failed to serialize result")?;
    println!("{}", json);

    Ok(if result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Load `.env` first, so a `RUST_LOG` set there reaches the filter
fn load_env_and_filter(env_file: Option<&Path>) -> Result<EnvFilter> {
    match env_file {
        Some(path) => {
            dotenvy::from_path(path).ok();
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }
    Ok(EnvFilter::from_default_env().add_directive("execbox=info".parse()?))
}

fn apply_overrides(cli: &Cli, config: &ExecboxConfig) -> Result<execbox::ResourceLimits> {
    let mut builder = config.limits.to_builder();
    if let Some(timeout) = cli.timeout {
        builder = builder.timeout_seconds(timeout);
    }
    if let Some(memory) = cli.memory {
        builder = builder.max_memory_mb(memory);
    }
    if cli.allow_network {
        builder = builder.allow_network(true);
    }
    builder.build().context("Invalid limits on the command line")
}

async fn read_source(file: Option<&PathBuf>) -> Result<String> {
    match file {
        Some(path) if path.as_os_str() != "-" => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display())),
        _ => {
            let mut code = String::new();
            tokio::io::stdin()
                .read_to_string(&mut code)
                .await
                .context("Failed to read code from stdin")?;
            Ok(code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_dotenv_log_level_reaches_filter() {
        if std::env::var_os("RUST_LOG").is_some() {
            eprintln!("Skipping: RUST_LOG already set");
            return;
        }
        let mut env_file = NamedTempFile::new().unwrap();
        writeln!(env_file, "RUST_LOG=execbox_dotenv_marker=trace").unwrap();

        let filter = load_env_and_filter(Some(env_file.path())).unwrap();
        let rendered = filter.to_string();
        assert!(rendered.contains("execbox_dotenv_marker=trace"), "{}", rendered);
        assert!(rendered.contains("execbox=info"), "{}", rendered);
    }
}
