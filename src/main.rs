use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use scorch::{Compilation, ScorchError};

#[derive(Parser)]
#[command(name = "scorch")]
#[command(about = "Compile a YAML security-rules tree into realtime-database rules JSON")]
#[command(version)]
struct Cli {
    /// Input rules file (.yaml or .yml)
    input: PathBuf,

    /// Output base path; defaults to the input path with its extension dropped
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<(), ScorchError> {
    let compilation = Compilation::from_file(&cli.input)?;

    let base = cli
        .output
        .clone()
        .unwrap_or_else(|| cli.input.with_extension(""));

    fs::write(with_suffix(&base, ".json"), render(&compilation.rules)?)?;
    if let Some(firecrypt) = &compilation.firecrypt {
        fs::write(with_suffix(&base, "_firecrypt.json"), render(firecrypt)?)?;
    }
    Ok(())
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut path = base.as_os_str().to_owned();
    path.push(suffix);
    PathBuf::from(path)
}

fn render(rules: &serde_json::Value) -> Result<String, ScorchError> {
    let document = serde_json::json!({ "rules": rules });
    let mut text = serde_json::to_string_pretty(&document)?;
    text.push('\n');
    Ok(text)
}
