//! treb - deployment orchestration with a fork-aware registry
//!
//! Usage:
//!   treb run script/Deploy.s.sol --network sepolia
//!   treb orchestrate deploy.toml --network sepolia
//!   treb list --tag core
//!   treb fork enter sepolia

mod interactive;

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use console::style;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use treb_core::commands::{
    DeploymentsCommand, OrchestrateCommand, OrchestrateOptions, RunCommand, RunOptions,
    ShowOptions, TagOptions, TransactionsCommand,
};
use treb_core::context::AppContext;
use treb_core::fork::{EnterReport, ForkHealth};
use treb_core::orchestration::StepReport;
use treb_core::registry::{Deployment, DeploymentFilter, Disambiguator, Upsert};

use crate::interactive::PromptDisambiguator;

#[derive(Parser)]
#[command(name = "treb")]
#[command(about = "Deployment orchestration with a fork-aware registry", long_about = None)]
struct Cli {
    /// Project root (defaults to the current directory)
    #[arg(long, global = true)]
    project: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, default_value = "table")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Broadcast a single deployment script
    Run {
        /// Script path, relative to the project root
        script: String,
        /// Network name from treb.toml
        #[arg(long, short)]
        network: String,
        /// Namespace (defaults to treb.toml's)
        #[arg(long)]
        namespace: Option<String>,
        /// Environment override for the script (KEY=VALUE)
        #[arg(long, value_name = "KEY=VALUE")]
        env: Vec<String>,
    },

    /// Plan and run an orchestration file in dependency order
    Orchestrate {
        /// Orchestration TOML file
        file: PathBuf,
        #[arg(long, short)]
        network: String,
        #[arg(long)]
        namespace: Option<String>,
        /// Print the plan without running it
        #[arg(long)]
        dry_run: bool,
    },

    /// List recorded deployments
    #[command(alias = "ls")]
    List(ListArgs),

    /// Show one deployment
    Show {
        /// Identity, address, or `Name[:label]`
        query: String,
        #[arg(long)]
        namespace: Option<String>,
        #[arg(long)]
        chain: Option<u64>,
        /// Confirm the address has code on this network
        #[arg(long, value_name = "NETWORK")]
        check: Option<String>,
    },

    /// Add or remove deployment tags
    Tag {
        /// Identity, address, or `Name[:label]`
        query: String,
        #[arg(long = "add", value_name = "TAG")]
        add: Vec<String>,
        #[arg(long = "remove", value_name = "TAG")]
        remove: Vec<String>,
    },

    /// Settle pending transactions and multisig proposals
    Tx(TxArgs),

    /// Manage fork sessions
    Fork(ForkArgs),
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// Machine-readable JSON
    Json,
    /// No output
    Quiet,
}

#[derive(Args)]
struct ListArgs {
    #[arg(long)]
    namespace: Option<String>,
    #[arg(long)]
    chain: Option<u64>,
    #[arg(long)]
    contract: Option<String>,
    #[arg(long)]
    tag: Option<String>,
    /// Only deployments recorded on a fork
    #[arg(long, conflicts_with = "live")]
    fork: bool,
    /// Only deployments recorded outside a fork
    #[arg(long)]
    live: bool,
}

#[derive(Args)]
struct TxArgs {
    #[command(subcommand)]
    command: TxSubcommand,
}

#[derive(Subcommand)]
enum TxSubcommand {
    /// Mark a pending transaction executed
    Executed {
        /// `tx-<hash>` or hash
        id: String,
        #[arg(long)]
        block: u64,
    },
    /// Mark a pending transaction failed
    Failed {
        /// `tx-<hash>` or hash
        id: String,
    },
    /// Mark a multisig proposal executed
    SafeExecuted {
        safe_tx_hash: String,
        /// Hash of the executing transaction
        #[arg(long = "tx")]
        execution_tx: String,
        #[arg(long)]
        block: u64,
    },
}

#[derive(Args)]
struct ForkArgs {
    #[command(subcommand)]
    command: ForkSubcommand,
}

#[derive(Subcommand)]
enum ForkSubcommand {
    /// Start a fork of a network
    Enter { network: String },
    /// Stop a fork and restore the registry
    Exit {
        network: String,
        /// Exit even if the registry cannot be restored
        #[arg(long)]
        force: bool,
    },
    /// Undo the last step (or all steps) on a fork
    Revert {
        network: String,
        #[arg(long)]
        all: bool,
    },
    /// Replace a fork with a fresh node
    Restart { network: String },
    /// Show active forks
    Status,
    /// Show a fork's snapshot stack
    History { network: String },
    /// Show registry records added on a fork
    Diff { network: String },
    /// Show the fork node's log
    Logs {
        network: String,
        #[arg(long, short = 'n', default_value_t = 50)]
        lines: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "treb=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let project_root = match cli.project {
        Some(path) => path,
        None => std::env::current_dir().context("Failed to determine current directory")?,
    };
    tracing::debug!(project = %project_root.display(), "loading project");
    let ctx = AppContext::load(project_root)?;
    run_cli(&ctx, cli.command, cli.format)
}

fn run_cli(ctx: &AppContext, command: Commands, format: OutputFormat) -> Result<()> {
    match command {
        Commands::Run {
            script,
            network,
            namespace,
            env,
        } => {
            let mut options = RunOptions::new(script, network);
            if let Some(namespace) = namespace {
                options = options.with_namespace(namespace);
            }
            for (key, value) in parse_env(&env)? {
                options = options.with_env(key, value);
            }
            let report = RunCommand::new(ctx).execute(&options)?;
            match format {
                OutputFormat::Table => print_step(&report),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Quiet => {}
            }
        }
        Commands::Orchestrate {
            file,
            network,
            namespace,
            dry_run,
        } => {
            let mut options = OrchestrateOptions::new(file, network).with_dry_run(dry_run);
            if let Some(namespace) = namespace {
                options = options.with_namespace(namespace);
            }
            let report = OrchestrateCommand::new(ctx).execute(&options)?;
            match format {
                OutputFormat::Table => {
                    println!("Group: {}", style(&report.group).bold());
                    for (i, step) in report.plan.iter().enumerate() {
                        let deps = if step.depends_on.is_empty() {
                            String::new()
                        } else {
                            format!(" (after {})", step.depends_on.join(", "))
                        };
                        println!("  {}. {} {}{}", i + 1, step.name, step.script, deps);
                    }
                    for step in &report.steps {
                        print_step(step);
                    }
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Quiet => {}
            }
        }
        Commands::List(args) => run_list(ctx, args, format)?,
        Commands::Show {
            query,
            namespace,
            chain,
            check,
        } => {
            let mut options = ShowOptions::new(query);
            if let Some(namespace) = namespace {
                options = options.with_namespace(namespace);
            }
            if let Some(chain) = chain {
                options = options.with_chain_id(chain);
            }
            if let Some(network) = check {
                options = options.with_check(network);
            }
            let prompt = PromptDisambiguator::for_terminal();
            let report = DeploymentsCommand::new(ctx)
                .show(&options, prompt.as_ref().map(|p| p as &dyn Disambiguator))?;
            match format {
                OutputFormat::Table => {
                    print_deployment(&report.deployment);
                    match report.has_code {
                        Some(true) => println!("  {} code present on chain", style("✓").green()),
                        Some(false) => println!("  {} no code at address", style("✗").red()),
                        None => {}
                    }
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Quiet => {}
            }
        }
        Commands::Tag { query, add, remove } => {
            if add.is_empty() && remove.is_empty() {
                anyhow::bail!("Nothing to do: pass --add or --remove");
            }
            let mut options = TagOptions::new(query);
            for tag in add {
                options = options.with_add(tag);
            }
            for tag in remove {
                options = options.with_remove(tag);
            }
            let prompt = PromptDisambiguator::for_terminal();
            let report = DeploymentsCommand::new(ctx)
                .tag(&options, prompt.as_ref().map(|p| p as &dyn Disambiguator))?;
            match format {
                OutputFormat::Table => {
                    let marker = if report.changed { "✓" } else { "•" };
                    println!(
                        "{} {} [{}]",
                        marker,
                        report.deployment_id,
                        report.tags.join(", ")
                    );
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Quiet => {}
            }
        }
        Commands::Tx(args) => run_tx(ctx, args, format)?,
        Commands::Fork(args) => run_fork(ctx, args, format)?,
    }
    Ok(())
}

fn run_list(ctx: &AppContext, args: ListArgs, format: OutputFormat) -> Result<()> {
    let mut filter = DeploymentFilter::new();
    if let Some(namespace) = args.namespace {
        filter = filter.with_namespace(namespace);
    }
    if let Some(chain) = args.chain {
        filter = filter.with_chain_id(chain);
    }
    if let Some(contract) = args.contract {
        filter = filter.with_contract_name(contract);
    }
    if let Some(tag) = args.tag {
        filter = filter.with_tag(tag);
    }
    if args.fork {
        filter = filter.with_fork(true);
    } else if args.live {
        filter = filter.with_fork(false);
    }

    let deployments = DeploymentsCommand::new(ctx).list(&filter)?;
    match format {
        OutputFormat::Table => print_deployment_table(&deployments),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&deployments)?),
        OutputFormat::Quiet => {}
    }
    Ok(())
}

fn run_tx(ctx: &AppContext, args: TxArgs, format: OutputFormat) -> Result<()> {
    let command = TransactionsCommand::new(ctx);
    let (subject, outcome) = match args.command {
        TxSubcommand::Executed { id, block } => {
            let outcome = command.mark_executed(&id, block)?;
            (id, outcome)
        }
        TxSubcommand::Failed { id } => {
            let outcome = command.mark_failed(&id)?;
            (id, outcome)
        }
        TxSubcommand::SafeExecuted {
            safe_tx_hash,
            execution_tx,
            block,
        } => {
            let outcome = command.execute_safe(&safe_tx_hash, &execution_tx, block)?;
            (safe_tx_hash, outcome)
        }
    };
    match format {
        OutputFormat::Table => match outcome {
            Upsert::Unchanged => println!("• {subject} already settled"),
            _ => println!("✓ {subject} updated"),
        },
        OutputFormat::Json => {
            let output = serde_json::json!({ "id": subject, "outcome": outcome });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Quiet => {}
    }
    Ok(())
}

fn run_fork(ctx: &AppContext, args: ForkArgs, format: OutputFormat) -> Result<()> {
    let sessions = ctx.fork_sessions();
    match args.command {
        ForkSubcommand::Enter { network } => {
            let report = sessions.enter(&network)?;
            print_enter(&report, "Forked", format)?;
        }
        ForkSubcommand::Restart { network } => {
            let report = sessions.restart(&network)?;
            print_enter(&report, "Restarted fork of", format)?;
        }
        ForkSubcommand::Exit { network, force } => {
            let report = if force {
                sessions.force_exit(&network)?
            } else {
                sessions.exit(&network)?
            };
            match format {
                OutputFormat::Table => {
                    println!(
                        "{} Exited fork of {} ({} step(s) discarded)",
                        style("✓").green(),
                        report.network,
                        report.discarded_steps
                    );
                    if !report.was_alive {
                        println!("  ⚠ fork node had already stopped");
                    }
                    if !report.registry_restored {
                        println!("  ⚠ registry was not restored and may hold fork records");
                    }
                    for id in &report.discarded_live {
                        println!("  ⚠ discarded live record {id}");
                    }
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Quiet => {}
            }
        }
        ForkSubcommand::Revert { network, all } => {
            let snapshots = ctx.snapshots();
            let report = if all {
                snapshots.revert_all(&network)?
            } else {
                snapshots.revert(&network)?
            };
            match format {
                OutputFormat::Table => {
                    println!(
                        "{} Reverted {} step(s) on {}",
                        style("✓").green(),
                        report.count(),
                        report.network
                    );
                    for entry in &report.reverted {
                        println!("  #{} {}", entry.index, entry.command);
                    }
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Quiet => {}
            }
        }
        ForkSubcommand::Status => {
            let forks = sessions.status()?;
            match format {
                OutputFormat::Table => {
                    if forks.is_empty() {
                        println!("No active forks.");
                        return Ok(());
                    }
                    println!(
                        "{:<16} {:<10} {:<8} {:<24} {:>9}",
                        "Network", "Chain", "Health", "URL", "Snapshots"
                    );
                    println!("{}", "-".repeat(71));
                    for fork in &forks {
                        let health = match fork.health {
                            ForkHealth::Healthy => style(fork.health.to_string()).green(),
                            ForkHealth::Dead => style(fork.health.to_string()).red(),
                        };
                        println!(
                            "{:<16} {:<10} {:<8} {:<24} {:>9}",
                            fork.network, fork.chain_id, health, fork.fork_url, fork.snapshots
                        );
                    }
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&forks)?),
                OutputFormat::Quiet => {
                    if forks.iter().any(|f| f.health == ForkHealth::Dead) {
                        std::process::exit(1);
                    }
                }
            }
        }
        ForkSubcommand::History { network } => {
            let history = sessions.history(&network)?;
            match format {
                OutputFormat::Table => {
                    println!("{:<6} {:<20} {:<12} Command", "Index", "Created", "Snapshot");
                    println!("{}", "-".repeat(60));
                    for entry in &history {
                        println!(
                            "{:<6} {:<20} {:<12} {}",
                            entry.index,
                            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                            entry.snapshot_id,
                            entry.command
                        );
                    }
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&history)?),
                OutputFormat::Quiet => {}
            }
        }
        ForkSubcommand::Diff { network } => {
            let diff = sessions.diff(&network)?;
            match format {
                OutputFormat::Table => {
                    if diff.is_empty() {
                        println!("No changes since the fork was entered.");
                        return Ok(());
                    }
                    if !diff.deployments.is_empty() {
                        println!("Deployments ({}):", diff.deployments.len());
                        for deployment in &diff.deployments {
                            println!("  + {} {}", deployment.id, deployment.address);
                        }
                    }
                    if !diff.transactions.is_empty() {
                        println!("Transactions ({}):", diff.transactions.len());
                        for tx in &diff.transactions {
                            println!("  + {} {}", tx.id, tx.status);
                        }
                    }
                    if !diff.safe_transactions.is_empty() {
                        println!("Safe transactions ({}):", diff.safe_transactions.len());
                        for hash in &diff.safe_transactions {
                            println!("  + {hash}");
                        }
                    }
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&diff)?),
                OutputFormat::Quiet => {}
            }
        }
        ForkSubcommand::Logs { network, lines } => {
            for line in sessions.logs(&network, lines)? {
                println!("{line}");
            }
        }
    }
    Ok(())
}

fn print_enter(report: &EnterReport, verb: &str, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            println!(
                "{} {} {} (chain {}) -> {}",
                style("✓").green(),
                verb,
                style(&report.network).bold(),
                report.chain_id,
                report.fork_url
            );
            println!("  PID {} | ${} now points at the fork", report.pid, report.env_var);
            for balance in &report.balances {
                println!(
                    "  {:<12} {} {} ETH",
                    balance.name,
                    balance.address,
                    format_ether(balance.balance)
                );
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
        OutputFormat::Quiet => {}
    }
    Ok(())
}

fn print_step(report: &StepReport) {
    let snapshot = report
        .snapshot_index
        .map(|index| format!(" [snapshot #{index}]"))
        .unwrap_or_default();
    println!(
        "{} {} ({}){}",
        style("✓").green(),
        report.step,
        report.script,
        snapshot
    );
    for (id, outcome) in &report.commit.deployments {
        match outcome {
            Upsert::Inserted => println!("  + {id}"),
            Upsert::Updated => println!("  ~ {id}"),
            Upsert::Unchanged => println!("  • {id} (already deployed)"),
        }
    }
}

fn print_deployment(deployment: &Deployment) {
    println!("{}", style(&deployment.id).bold());
    println!("  Address:     {}", deployment.address);
    println!("  Type:        {}", deployment.kind);
    println!("  Transaction: {}", deployment.transaction_id);
    if let Some(implementation) = &deployment.implementation {
        println!("  Implements:  {implementation}");
    }
    if let Some(script) = &deployment.script {
        println!("  Script:      {script}");
    }
    if !deployment.tags.is_empty() {
        let tags: Vec<&str> = deployment.tags.iter().map(String::as_str).collect();
        println!("  Tags:        {}", tags.join(", "));
    }
    if deployment.fork {
        println!("  {}", style("recorded on a fork").yellow());
    }
}

fn print_deployment_table(deployments: &[Deployment]) {
    if deployments.is_empty() {
        println!("No deployments recorded.");
        return;
    }
    println!("{:<40} {:<44} {:<10}", "Deployment", "Address", "Type");
    println!("{}", "-".repeat(96));
    for deployment in deployments {
        let fork = if deployment.fork { " (fork)" } else { "" };
        println!(
            "{:<40} {:<44} {:<10}{}",
            deployment.id, deployment.address, deployment.kind, fork
        );
    }
}

fn parse_env(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .filter(|(key, _)| !key.is_empty())
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .ok_or_else(|| anyhow::anyhow!("Invalid env override '{pair}', expected KEY=VALUE"))
        })
        .collect()
}

/// Wei as ether with four decimals.
fn format_ether(wei: u128) -> String {
    const WEI_PER_ETHER: u128 = 1_000_000_000_000_000_000;
    let whole = wei / WEI_PER_ETHER;
    let fraction = (wei % WEI_PER_ETHER) / 100_000_000_000_000;
    format!("{whole}.{fraction:04}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_need_a_key() {
        let parsed = parse_env(&["A=1".to_string(), "B=x=y".to_string()]).unwrap();
        assert_eq!(parsed["A"], "1");
        assert_eq!(parsed["B"], "x=y");
        assert!(parse_env(&["=1".to_string()]).is_err());
        assert!(parse_env(&["NOEQ".to_string()]).is_err());
    }

    #[test]
    fn formats_ether() {
        assert_eq!(format_ether(10_000_000_000_000_000_000_000), "10000.0000");
        assert_eq!(format_ether(1_500_000_000_000_000_000), "1.5000");
        assert_eq!(format_ether(0), "0.0000");
    }

    #[test]
    fn fork_revert_parses_all_flag() {
        let cli = Cli::try_parse_from(["treb", "fork", "revert", "--all", "sepolia"]).unwrap();
        match cli.command {
            Commands::Fork(ForkArgs {
                command: ForkSubcommand::Revert { network, all },
            }) => {
                assert_eq!(network, "sepolia");
                assert!(all);
            }
            _ => panic!("expected fork revert"),
        }
    }

    #[test]
    fn list_rejects_fork_and_live_together() {
        assert!(Cli::try_parse_from(["treb", "list", "--fork", "--live"]).is_err());
    }
}
