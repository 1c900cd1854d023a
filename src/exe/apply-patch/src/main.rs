use std::io::Read;
use std::process::ExitCode;

use anyhow::{Context, Result};
use terminaut_apply_patch::PatchInterpreter;

fn read_patch() -> Result<String> {
    if let Some(arg) = std::env::args().nth(1) {
        return Ok(arg);
    }
    let mut buf = String::new();
    std::io::stdin()
        .read_to_string(&mut buf)
        .context("read patch from stdin")?;
    Ok(buf)
}

fn main() -> Result<ExitCode> {
    let patch = read_patch()?;
    let cwd = std::env::current_dir().context("resolve working directory")?;
    let report = PatchInterpreter::new(cwd).execute(&patch);
    println!("{}", report.render());
    Ok(if report.success() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
