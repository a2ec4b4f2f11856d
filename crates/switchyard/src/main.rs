// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Switchyard Routing Service CLI
//!
//! # Usage
//!
//! ```bash
//! # Run from a configuration file
//! switchyard --config switchyard.toml
//!
//! # Generate an example configuration
//! switchyard gen-config --output switchyard.toml
//!
//! # Validate a configuration file
//! switchyard validate --config switchyard.toml
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use switchyard::config::EXAMPLE_CONFIG;
use switchyard::{
    RouterConfig, RoutingService, RoutingStatsSnapshot, TracingSink, TransportRegistry,
};
use tracing_subscriber::EnvFilter;

/// Switchyard Routing Service
#[derive(Parser, Debug)]
#[command(name = "switchyard")]
#[command(about = "Switchyard Routing Service - Message identification, transformation and dispatch")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Statistics reporting interval (seconds, 0 to disable; overrides the file)
    #[arg(long)]
    stats_interval: Option<u64>,

    /// Log level (trace, debug, info, warn, error; overrides the file)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "switchyard.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Subcommands log at the requested level (or info)
    if let Some(cmd) = args.command {
        init_logging(args.log_level.as_deref().unwrap_or("info"));
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
        };
    }

    let config_path = args
        .config
        .ok_or("Missing --config (or use gen-config to create one)")?;
    let config = RouterConfig::from_file(&config_path)?;

    init_logging(args.log_level.as_deref().unwrap_or(&config.log_level));

    let registry = TransportRegistry::with_builtins();
    let service = RoutingService::from_config(&config, &registry, Arc::new(TracingSink));

    println!("Switchyard Routing Service v{}", env!("CARGO_PKG_VERSION"));
    println!("=====================================");
    println!();

    for instance in service.instances() {
        println!(
            "Instance: {} ({} connectors, {} messages)",
            instance.id(),
            instance.connectors().len(),
            instance.mappings().len()
        );
    }
    for (id, err) in service.failed() {
        println!("Instance: {} NOT STARTED ({})", id, err);
    }
    println!();

    let started = service.start();
    if started == 0 {
        return Err("No routing instance could be started".into());
    }

    println!("Press Ctrl+C to stop...");
    println!();

    let service = Arc::new(service);

    // Stats reporting task
    let stats_interval = args.stats_interval.unwrap_or(config.stats_interval_secs);
    if config.enable_stats && stats_interval > 0 {
        let stats_service = Arc::clone(&service);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(stats_interval));
            // First tick fires immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                print_stats(&stats_service.instance_stats());
            }
        });
    }

    // Wait for Ctrl+C
    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");
    service.stop();

    if config.enable_stats {
        println!("\nFinal Statistics:");
        print_stats(&service.instance_stats());
    }

    Ok(())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn cmd_gen_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    // Refuse to write an example that does not load
    RouterConfig::example()?;

    std::fs::write(&output, EXAMPLE_CONFIG)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = match RouterConfig::from_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    };

    let registry = TransportRegistry::with_builtins();
    let mut broken = 0;

    println!("Instances: {}", config.instances.len());
    for instance in &config.instances {
        let problem = instance.check_references().err().or_else(|| {
            instance
                .connectors
                .iter()
                .find(|c| !registry.has_backend(&c.kind))
                .map(|c| switchyard::ConfigError::UnknownType {
                    category: "connector",
                    name: c.kind.clone(),
                })
                .or_else(|| {
                    instance
                        .connectors
                        .iter()
                        .flat_map(|c| c.connections.iter())
                        .find(|c| !registry.has_transport(&c.kind))
                        .map(|c| switchyard::ConfigError::UnknownType {
                            category: "transport",
                            name: c.kind.clone(),
                        })
                })
        });

        match problem {
            None => println!(
                "  [ok] {} ({} connectors, {} messages, {} loggers)",
                instance.id,
                instance.connectors.len(),
                instance.messages.len(),
                instance.loggers.len()
            ),
            Some(e) => {
                broken += 1;
                println!("  [!!] {}: {}", instance.id, e);
            }
        }
    }

    if broken > 0 {
        eprintln!("Configuration invalid: {} instance(s) cannot start", broken);
        std::process::exit(1);
    }
    println!("Configuration valid!");
    Ok(())
}

fn print_stats(stats: &[(String, RoutingStatsSnapshot)]) {
    println!("--- Routing Statistics ---");
    for (id, stat) in stats {
        println!(
            "  {}: {} payloads ({:.1}/s), {} unidentified, {} msgs ({:.1}/s), {} write failures, {} transform failures",
            id,
            stat.payloads_received,
            stat.payloads_per_second(),
            stat.payloads_unidentified,
            stat.messages_dispatched,
            stat.messages_per_second(),
            stat.write_failures,
            stat.transform_failures
        );
    }
}
