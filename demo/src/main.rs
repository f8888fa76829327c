//! AVARA reference CLI
//!
//! Runs the reference scenarios and inspects ledger and policy files.
//!
//! Usage:
//!   cargo run -p avara-demo -- run-all
//!   cargo run -p avara-demo -- tool-gate --ledger var/avara_audit.jsonl
//!   cargo run -p avara-demo -- logs --ledger var/avara_audit.jsonl --tail 20
//!   cargo run -p avara-demo -- verify --ledger var/avara_audit.jsonl
//!   cargo run -p avara-demo -- check-policy crates/avara-ref-agents/policies/default.toml

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use avara_audit::{chain::first_broken_link, FileLedger};
use avara_contracts::error::AvaraResult;
use avara_policy::PolicyConfig;
use avara_ref_agents::{
    fixtures::{ScenarioLedger, ScenarioReport},
    scenarios::{anomaly, context, lifecycle, tool_gate},
};

// ── CLI definition ────────────────────────────────────────────────────────────

/// AVARA: runtime authorization for autonomous agents.
#[derive(Parser)]
#[command(
    name = "avara",
    about = "AVARA control plane reference CLI",
    long_about = "Runs AVARA reference scenarios showing identity, behavioral, tool,\n\
                  and approval enforcement, and inspects audit ledgers and policies."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct RunArgs {
    /// Append to this JSONL ledger instead of keeping the chain in memory.
    #[arg(long)]
    ledger: Option<PathBuf>,
}

impl RunArgs {
    fn ledger(&self) -> AvaraResult<ScenarioLedger> {
        match &self.ledger {
            Some(path) => ScenarioLedger::file(path),
            None => Ok(ScenarioLedger::memory()),
        }
    }
}

type Scenario = fn(ScenarioLedger) -> AvaraResult<ScenarioReport>;

#[derive(Subcommand)]
enum Command {
    /// Run all four reference scenarios in sequence.
    RunAll(RunArgs),
    /// Scenario 1: identity and approval lifecycle.
    Lifecycle(RunArgs),
    /// Scenario 2: anomaly revocation and intent drift.
    Anomaly(RunArgs),
    /// Scenario 3: tool registration, permission, and argument checks.
    ToolGate(RunArgs),
    /// Scenario 4: context budget, retrieval firewall, message monitor.
    Context(RunArgs),
    /// Print entries from a JSONL ledger file.
    Logs {
        #[arg(long)]
        ledger: PathBuf,
        /// Only the most recent N entries.
        #[arg(long)]
        tail: Option<usize>,
    },
    /// Verify the hash chain of a JSONL ledger file.
    Verify {
        #[arg(long)]
        ledger: PathBuf,
    },
    /// Parse a policy file and summarize it.
    CheckPolicy { path: PathBuf },
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // Set RUST_LOG=debug for a trace of every guard decision.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::RunAll(args) => run(
            &args,
            &[lifecycle::run_on, anomaly::run_on, tool_gate::run_on, context::run_on],
        ),
        Command::Lifecycle(args) => run(&args, &[lifecycle::run_on]),
        Command::Anomaly(args) => run(&args, &[anomaly::run_on]),
        Command::ToolGate(args) => run(&args, &[tool_gate::run_on]),
        Command::Context(args) => run(&args, &[context::run_on]),
        Command::Logs { ledger, tail } => show_logs(&ledger, tail),
        Command::Verify { ledger } => verify_ledger(&ledger),
        Command::CheckPolicy { path } => check_policy(&path),
    };

    if let Err(e) = result {
        eprintln!("avara error: {}", e);
        std::process::exit(1);
    }
}

// ── Scenario dispatch ─────────────────────────────────────────────────────────

fn run(args: &RunArgs, scenarios: &[Scenario]) -> AvaraResult<()> {
    print_banner();
    let ledger = args.ledger()?;

    let mut verified = 0;
    for scenario in scenarios {
        if scenario(ledger.clone())?.chain_verified {
            verified += 1;
        }
    }

    println!(
        "All selected scenarios completed; {}/{} audit chain checks passed.",
        verified,
        scenarios.len()
    );
    if let Some(path) = &args.ledger {
        println!("Ledger written to {}", path.display());
    }
    Ok(())
}

// ── Ledger and policy inspection ──────────────────────────────────────────────

fn show_logs(path: &Path, tail: Option<usize>) -> AvaraResult<()> {
    let events = FileLedger::read_events(path)?;
    let skip = tail.map_or(0, |n| events.len().saturating_sub(n));
    info!(path = %path.display(), total = events.len(), shown = events.len() - skip, "reading ledger");

    for event in &events[skip..] {
        let entry = &event.entry;
        println!(
            "{} #{:<5} {:<26} {:<38} {:<9} {}",
            entry.timestamp.to_rfc3339(),
            entry.sequence,
            entry.event_type.to_string(),
            entry.agent_id,
            entry
                .decision
                .map(|d| format!("{:?}", d).to_uppercase())
                .unwrap_or_else(|| "-".to_string()),
            entry.context
        );
    }
    Ok(())
}

fn verify_ledger(path: &Path) -> AvaraResult<()> {
    let events = FileLedger::read_events(path)?;
    match first_broken_link(&events) {
        None => {
            println!("{}: VERIFIED ({} entries)", path.display(), events.len());
            Ok(())
        }
        Some(index) => {
            println!(
                "{}: FAILED at entry {} of {}",
                path.display(),
                index,
                events.len()
            );
            std::process::exit(2);
        }
    }
}

fn check_policy(path: &Path) -> AvaraResult<()> {
    let policy = PolicyConfig::from_file(path)?;

    println!("Policy {} is valid.", path.display());
    println!("  Default TTL:          {}s", policy.identity.default_ttl_seconds);
    println!(
        "  Anomaly limits:       {} actions / {}s, '{}' at most {}x",
        policy.anomaly.max_actions_per_window,
        policy.anomaly.window_seconds,
        policy.anomaly.flagged_action,
        policy.anomaly.max_flagged_repeats
    );
    println!(
        "  Intent thresholds:    block > {}, review > {} (escalate: {})",
        policy.intent.block_above,
        policy.intent.review_above,
        policy.intent.escalate_review_to_high_risk
    );
    println!(
        "  High-risk actions:    {}",
        policy
            .breaker
            .high_risk_actions
            .iter()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("  Context budget:       {} tokens", policy.context.max_tokens);
    println!("  Schema verification:  {}", policy.verify_arguments);
    println!("  Tools:                {}", policy.tools.len());
    for tool in &policy.tools {
        println!(
            "    {:<20} {}{}",
            tool.name,
            tool.description,
            if tool.is_active { "" } else { " (inactive)" }
        );
    }
    println!("  Documents:            {}", policy.documents.len());
    Ok(())
}

// ── Banner ────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("AVARA: Runtime Authorization Control Plane");
    println!("==========================================");
    println!();
    println!("Guard chain per proposed action:");
    println!("  [1] Identity: ephemeral, scoped, TTL-bound; unknown or expired → reject");
    println!("  [2] Anomaly: abnormal rate or repeated scans → identity revoked");
    println!("  [3] Intent: task/action drift scored; severe drift → block");
    println!("  [4] Tools: registered, active, permitted, arguments match schema");
    println!("  [5] Circuit breaker: high-risk actions halt for human approval");
    println!("  Every decision is appended to a SHA-256 hash-chained audit ledger.");
    println!();
}
