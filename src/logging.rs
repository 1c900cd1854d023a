use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// Without `debug`, events go to stderr filtered by `RUST_LOG` (default
/// `warn`). With `debug`, everything at `debug` and above is written to
/// `<cwd>/.logs`, which is truncated and given a session header.
pub fn init_logging(cwd: &Path, debug: bool) -> Result<Option<PathBuf>> {
    if !debug {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
        return Ok(None);
    }

    let debug_path = cwd.join(".logs");
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&debug_path)
        .with_context(|| format!("open {}", debug_path.display()))?;
    writeln!(
        file,
        "=== Terminaut Debug Log - {}\n",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    )
    .context("write log header")?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(Some(debug_path))
}
