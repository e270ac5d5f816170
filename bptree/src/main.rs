// Forbid unwrap() in production code to prevent panics on bad input.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
use std::io::BufRead;

use bptree::{Command, IndexConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    // Logs go to stderr; stdout carries command results only.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bptree=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match IndexConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        "Loaded configuration: working_directory={}, source_key_width={}",
        config.working_directory.display(),
        config.source_key_width
    );

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::error!("Failed to read command: {e}");
                std::process::exit(1);
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                tracing::debug!("rejected command {line:?}: {e:?}");
                println!("{e}");
                continue;
            }
        };

        match command.execute(&config) {
            Ok(output) => println!("{output}"),
            Err(e) => {
                tracing::warn!("{line:?} failed: {e}");
                println!("{e}");
            }
        }
    }

    tracing::debug!("end of input");
}
