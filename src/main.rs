//! Turnstile CLI - an intercepting HTTP/HTTPS forward proxy

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use turnstile::config::{ConnectRule, RequestRule};
use turnstile::{Config, Policy, ProxyServer, SystemClock};

#[derive(Parser)]
#[command(name = "turnstile")]
#[command(about = "An intercepting HTTP/HTTPS forward proxy with per-request rules")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the proxy server
    Run {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Bind address (overrides config)
        #[arg(short, long)]
        bind: Option<String>,

        /// Log level (error, warn, info, debug, trace); defaults to the config's
        #[arg(short, long)]
        log_level: Option<String>,
    },

    /// Validate a configuration file
    ValidateConfig {
        /// Path to configuration file
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            bind,
            log_level,
        } => {
            let mut cfg = match config {
                Some(ref path) => Config::from_file(path)?,
                None => Config::parse("")?,
            };

            let log_level = log_level.unwrap_or_else(|| cfg.logging.level.clone());
            let filter =
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));

            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();

            match config {
                Some(ref path) => tracing::info!(path = %path.display(), "Loaded configuration"),
                None => tracing::info!("Using default configuration"),
            }

            if let Some(addr) = bind {
                cfg.proxy.bind_address = addr;
            }

            let server = ProxyServer::new(cfg)?;

            tracing::info!("Starting proxy server...");
            tracing::info!("Configure clients with:");
            tracing::info!("  export HTTP_PROXY=http://{}", server.bind_address());
            tracing::info!("  export HTTPS_PROXY=http://{}", server.bind_address());

            // Handle Ctrl+C
            let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
            tokio::spawn(async move {
                tokio::signal::ctrl_c().await.ok();
                tracing::info!("Shutting down...");
                let _ = shutdown_tx.send(());
            });

            if let Err(e) = server.run_until_shutdown(shutdown_rx).await {
                tracing::error!(error = %e, "Proxy server failed");
                std::process::exit(1);
            }
        }

        Commands::ValidateConfig { config } => {
            println!("Validating configuration: {}", config.display());

            let cfg = Config::from_file(&config)?;
            let policy = Policy::from_config(&cfg, Arc::new(SystemClock))?;

            println!("Configuration is valid!");
            println!();
            println!("  Bind address: {}", cfg.proxy.bind_address);
            println!("  Log level: {}", cfg.logging.level);
            println!(
                "  Log allowed requests: {}",
                cfg.logging.log_allowed_requests
            );
            println!(
                "  Log blocked requests: {}",
                cfg.logging.log_blocked_requests
            );
            println!(
                "  Audit log: {}",
                cfg.logging
                    .audit_log
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "disabled".to_string())
            );
            match cfg.access.whitelist {
                Some(ref ips) => println!(
                    "  Whitelist: {} address(es){}",
                    ips.len(),
                    if cfg.access.apply_to_connect {
                        ", also gating CONNECT"
                    } else {
                        ""
                    }
                ),
                None => println!("  Whitelist: disabled (all clients admitted)"),
            }
            println!(
                "  X-Forwarded-For: {}",
                if cfg.access.trust_forwarded_for {
                    "trusted (first hop)"
                } else {
                    "ignored"
                }
            );

            if !cfg.request_rules.is_empty() {
                println!();
                println!("Request rules:");
                for (i, rule) in cfg.request_rules.iter().enumerate() {
                    match rule {
                        RequestRule::SetHeader { name, value } => {
                            println!("  {}. set_header {}: {}", i + 1, name, value)
                        }
                        RequestRule::AppendHeader { name, value } => {
                            println!("  {}. append_header {}: {}", i + 1, name, value)
                        }
                        RequestRule::RemoveHeader { name } => {
                            println!("  {}. remove_header {}", i + 1, name)
                        }
                        RequestRule::BlockHours {
                            host,
                            start_hour,
                            end_hour,
                            status,
                            ..
                        } => println!(
                            "  {}. block_hours {} {:02}:00-{:02}:59 -> {}",
                            i + 1,
                            host,
                            start_hour,
                            end_hour,
                            status
                        ),
                    }
                }
            }

            if !cfg.connect_rules.is_empty() {
                println!();
                println!("CONNECT rules:");
                for (i, rule) in cfg.connect_rules.iter().enumerate() {
                    match rule {
                        ConnectRule::RejectTarget {
                            pattern,
                            regex,
                            status,
                            ..
                        } => println!(
                            "  {}. reject_target {}{} -> {}",
                            i + 1,
                            pattern,
                            if *regex { " (regex)" } else { "" },
                            status
                        ),
                    }
                }
            }

            println!();
            println!(
                "Request chain: {}",
                policy.requests().chain().rule_names().join(" -> ")
            );
            println!(
                "CONNECT chain: {}",
                policy.connects().chain().rule_names().join(" -> ")
            );
        }
    }

    Ok(())
}
