//! `sleuth parse`: interpret a recorded backend reply.

use anyhow::{Context, Result};
use clap::Parser;
use sleuth_core::ResponseInterpreter;
use std::io::Read;
use std::path::PathBuf;

#[derive(Parser, Debug)]
pub struct ParseArgs {
    /// File holding the reply (default: stdin)
    pub file: Option<PathBuf>,
}

pub fn execute(args: &ParseArgs) -> Result<()> {
    let reply = match &args.file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            buf
        }
    };

    let interpretation = ResponseInterpreter::new().parse(&reply);
    let json = serde_json::to_string_pretty(&interpretation)
        .context("Failed to serialize interpretation")?;
    println!("{json}");
    Ok(())
}
