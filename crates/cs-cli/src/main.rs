//! CharsetSwitch CLI
//!
//! Developer tooling: inspect exported settings files, drive the real rule
//! manager against them, and soak the manager for invariant violations.

use std::future::Future;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use cs_core::SUPPORTED_CHARSETS;
use cs_manager::{Dispatcher, RuleEngine};

mod report;
mod settings;
mod soak;

#[cfg(feature = "e2e")]
mod e2e;

use report::{LabelInfo, RestoreReport, RuleInfo};

#[derive(Parser)]
#[command(name = "cs-cli")]
#[command(about = "CharsetSwitch settings and rule tooling")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the supported charset labels
    Labels {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show what a settings file contains
    Status {
        /// Settings file to inspect
        #[arg(short, long, default_value = "charset-switch.json")]
        settings: String,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Apply a charset override for a hostname
    Apply {
        /// Settings file to update
        #[arg(short, long, default_value = "charset-switch.json")]
        settings: String,

        /// Hostname to override
        host: String,

        /// Charset label, case-insensitive
        charset: String,
    },

    /// Remove the override for a hostname
    Reset {
        /// Settings file to update
        #[arg(short, long, default_value = "charset-switch.json")]
        settings: String,

        /// Hostname to clear
        host: String,
    },

    /// Replay saved intent into a fresh engine and report what installs
    Restore {
        /// Settings file to replay
        #[arg(short, long, default_value = "charset-switch.json")]
        settings: String,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Run a randomized soak against in-memory backends
    Soak {
        /// Number of operations to run
        #[arg(short, long, default_value_t = 10_000)]
        operations: u32,

        /// Seed for the deterministic sequence
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Size of the hostname pool
        #[arg(long, default_value_t = 12)]
        hosts: u32,

        /// Emit JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Run end-to-end browser checks against a built extension
    #[cfg(feature = "e2e")]
    E2e {
        /// chromedriver URL
        #[arg(long, default_value = "http://localhost:9515")]
        chromedriver_url: String,

        /// Path to the unpacked extension
        #[arg(long)]
        extension_path: String,

        /// Run Chrome headless
        #[arg(long)]
        headless: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Labels { json } => cmd_labels(json),
        Commands::Status { settings, json } => run_async(cmd_status(&settings, json)),
        Commands::Apply {
            settings,
            host,
            charset,
        } => run_async(cmd_apply(&settings, &host, &charset)),
        Commands::Reset { settings, host } => run_async(cmd_reset(&settings, &host)),
        Commands::Restore { settings, json } => run_async(cmd_restore(&settings, json)),
        Commands::Soak {
            operations,
            seed,
            hosts,
            json,
        } => cmd_soak(operations, seed, hosts, json),
        #[cfg(feature = "e2e")]
        Commands::E2e {
            chromedriver_url,
            extension_path,
            headless,
        } => e2e::run_e2e(e2e::E2eOptions {
            chromedriver_url,
            extension_path,
            headless,
        }),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run_async<T>(fut: impl Future<Output = Result<T, String>>) -> Result<T, String> {
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed to start tokio runtime: {}", e))?;
    runtime.block_on(fut)
}

fn cmd_labels(json: bool) -> Result<(), String> {
    let labels: Vec<LabelInfo> = SUPPORTED_CHARSETS
        .iter()
        .map(|charset| LabelInfo {
            label: charset.as_str().to_string(),
            content_type: charset.content_type_value(),
        })
        .collect();

    if json {
        let text = serde_json::to_string_pretty(&labels).map_err(|e| e.to_string())?;
        println!("{text}");
        return Ok(());
    }

    println!("Supported charsets:");
    for info in &labels {
        println!("  {:<14} {}", info.label, info.content_type);
    }
    Ok(())
}

async fn cmd_status(settings: &str, json: bool) -> Result<(), String> {
    let status = settings::read_status(settings).await?;

    if json {
        let text = serde_json::to_string_pretty(&status).map_err(|e| e.to_string())?;
        println!("{text}");
        return Ok(());
    }

    println!("Settings: {}", status.settings_path);
    println!("  Overrides:  {}", status.overrides.len());
    for entry in &status.overrides {
        println!("    {:<30} {}", entry.hostname, entry.charset);
    }
    println!("  Snapshot:   {} rule(s)", status.snapshot.len());
    for entry in &status.snapshot {
        println!("    [{}] {}", entry.rule_id, entry.hostname);
    }
    Ok(())
}

async fn cmd_apply(settings: &str, host: &str, charset: &str) -> Result<(), String> {
    let (manager, _) = settings::open_session(settings).await?;
    let dispatcher = Dispatcher::new(Arc::new(manager));

    let outcome = dispatcher.apply_charset(host, charset).await;
    if !outcome.success {
        return Err(format!(
            "Apply failed for '{}' with charset '{}' (run `cs-cli labels` for valid labels)",
            host, charset
        ));
    }

    let canonical = dispatcher
        .charset_for(host)
        .await
        .map(|c| c.as_str().to_string())
        .unwrap_or_else(|| charset.to_string());
    println!(
        "Applied {} => {} (rule {})",
        host,
        canonical,
        outcome.rule_id.unwrap_or(0)
    );
    print_engine_rules(dispatcher.manager().engine()).await
}

async fn cmd_reset(settings: &str, host: &str) -> Result<(), String> {
    let (manager, _) = settings::open_session(settings).await?;
    let dispatcher = Dispatcher::new(Arc::new(manager));

    let outcome = dispatcher.reset_charset(host).await;
    if !outcome.success {
        return Err(format!("Reset failed for '{}'", host));
    }

    if outcome.removed {
        println!("Removed override for {}", host);
    } else {
        println!("No override was set for {}", host);
    }
    print_engine_rules(dispatcher.manager().engine()).await
}

async fn cmd_restore(settings: &str, json: bool) -> Result<(), String> {
    let (manager, stats) = settings::open_session(settings).await?;

    let rules = manager
        .engine()
        .list_rules()
        .await
        .map_err(|e| e.to_string())?;
    let report = RestoreReport {
        restored: stats.restored,
        failed: stats.failed,
        rules: rules.iter().map(RuleInfo::from_engine_rule).collect(),
    };

    if json {
        let text = serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?;
        println!("{text}");
        return Ok(());
    }

    println!("Restored {} rule(s), {} failed", report.restored, report.failed);
    for info in &report.rules {
        println!("  [{}] {} => {}", info.rule_id, info.hostname, info.charset);
    }
    Ok(())
}

fn cmd_soak(operations: u32, seed: u64, hosts: u32, json: bool) -> Result<(), String> {
    let report = soak::run_soak(&soak::SoakOptions {
        operations,
        seed,
        hosts,
    })?;

    if json {
        let text = serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?;
        println!("{text}");
    } else {
        println!("Soak complete: {} operations (seed {})", report.operations, report.seed);
        println!("  Applies:     {}", report.applies);
        println!("  Resets:      {}", report.resets);
        println!("  Reconciles:  {}", report.reconciles);
        println!("  Restores:    {}", report.restores);
        println!("  Wipes:       {}", report.wipes);
        println!("  Final rules: {}", report.final_rule_count);
    }

    if !report.violations.is_empty() {
        for violation in &report.violations {
            eprintln!("  VIOLATION: {violation}");
        }
        return Err(format!(
            "{} invariant violation(s) detected",
            report.violations.len()
        ));
    }
    Ok(())
}

async fn print_engine_rules<E: RuleEngine>(engine: &E) -> Result<(), String> {
    let rules = engine.list_rules().await.map_err(|e| e.to_string())?;
    println!("Engine now holds {} rule(s):", rules.len());
    for rule in &rules {
        println!(
            "  [{}] {} => {}",
            rule.id,
            rule.matched_host().unwrap_or("?"),
            rule.charset_label().unwrap_or("?")
        );
    }
    Ok(())
}
