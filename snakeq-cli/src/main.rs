use anyhow::Result;
use clap::Parser;
use serde_json::Value;
use snakeq::{JobRegistry, registry::JobContext};

use snakeq_cli::Cli;

/// Handlers available to the stock binary.
fn registry() -> JobRegistry {
    JobRegistry::new().with_handler("snakeq", "echo", |ctx: JobContext| async move {
        for argument in &ctx.arguments {
            ctx.output.println(&argument.to_string());
        }
        Ok(Value::Array(ctx.arguments))
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = snakeq_cli::run(cli, registry()).await {
        eprintln!("❌ {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
