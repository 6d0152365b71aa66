//! Guardrails CLI
//!
//! Operator tooling over the approval configuration: show the effective
//! settings, the flow a `feature.action` key resolves to, and which of its
//! steps a given actor could sign.

#![deny(unsafe_code)]

use anyhow::Context;
use clap::{Parser, Subcommand};
use guardrails_engine::{telemetry, GuardrailsConfig};
use guardrails_policy::{evaluate, ActorProfile, SigningContext};
use guardrails_types::FlowDefinition;
use serde::Serialize;
use std::ffi::OsString;
use std::io::Write;
use tracing::debug;

/// Guardrails CLI application
#[derive(Parser)]
#[command(name = "guardrails")]
#[command(about = "Guardrails - inspect approval flows and signing rules", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "GUARDRAILS_CONFIG", default_value = "guardrails.toml")]
    config: String,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Show the effective configuration
    Config,

    /// Show the flow applied for a `feature.action` key
    Flow { key: String },

    /// Check whether a non-empty flow is configured for a key
    Exists { key: String },

    /// Check which steps of a flow an actor may sign
    CanSign {
        key: String,

        /// Actor id
        #[arg(long, default_value = "cli")]
        actor: String,

        /// Capability held by the actor (repeatable)
        #[arg(long = "capability")]
        capabilities: Vec<String>,

        /// Membership held by the actor (repeatable)
        #[arg(long = "membership")]
        memberships: Vec<String>,

        /// Guard the actor authenticated against
        #[arg(long)]
        guard: Option<String>,
    },
}

#[derive(Serialize)]
struct FlowReport<'a> {
    key: &'a str,
    source: &'static str,
    steps: FlowDefinition,
}

#[derive(Serialize)]
struct ExistsReport<'a> {
    key: &'a str,
    configured: bool,
}

#[derive(Serialize)]
struct EligibilityReport {
    level: usize,
    step: String,
    eligible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

/// Run using the current process arguments, printing to stdout.
pub fn run() -> anyhow::Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    run_with_args(std::env::args_os(), &mut out)
}

/// Run using the provided argument iterator and output.
pub fn run_with_args<I, T>(args: I, out: &mut dyn Write) -> anyhow::Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);

    if let Err(err) = telemetry::init_tracing(cli.verbose) {
        debug!(error = %err, "Tracing already initialized");
    }

    let config = GuardrailsConfig::load(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config))?;

    match cli.command {
        Commands::Config => print_json(out, &config),
        Commands::Flow { key } => {
            let (source, steps) = resolve(&config, &key)?;
            print_json(
                out,
                &FlowReport {
                    key: &key,
                    source,
                    steps,
                },
            )
        }
        Commands::Exists { key } => {
            let configured = config.configured_flows().exists(&key);
            print_json(
                out,
                &ExistsReport {
                    key: &key,
                    configured,
                },
            )
        }
        Commands::CanSign {
            key,
            actor,
            capabilities,
            memberships,
            guard,
        } => {
            let mut profile = ActorProfile::new(actor)
                .with_capabilities(capabilities)
                .with_memberships(memberships);
            if let Some(guard) = guard {
                profile = profile.with_guard(guard);
            }

            let (_, flow) = resolve(&config, &key)?;
            let report: Vec<EligibilityReport> = flow
                .steps()
                .iter()
                .enumerate()
                .map(|(i, step)| {
                    let verdict = evaluate(Some(&profile), &step.signers, SigningContext::default());
                    EligibilityReport {
                        level: i + 1,
                        step: step.name.clone(),
                        eligible: verdict.is_eligible(),
                        reason: verdict.denial().map(ToString::to_string),
                    }
                })
                .collect();
            print_json(out, &report)
        }
    }
}

/// Configured flow for `key`, or the built-in default step.
fn resolve(config: &GuardrailsConfig, key: &str) -> anyhow::Result<(&'static str, FlowDefinition)> {
    let flows = config.configured_flows();
    let source = if flows.exists(key) { "configured" } else { "default" };
    let fallback = config.default_flow();
    let flow = flows
        .resolve(key, Some(&fallback), &config.defaults.step_meta)
        .with_context(|| format!("resolving flow '{key}'"))?
        .unwrap_or(fallback);
    Ok((source, flow))
}

fn print_json<T: Serialize + ?Sized>(out: &mut dyn Write, value: &T) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}
