use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod session;

use config::PatchbayConfig;
use patchbay_core::usage::format_usage_summary;
use patchbay_core::{DispatchError, DispatchEvent, RoundOutcome, RoutedMessage, route};
use session::Session;

#[derive(Parser)]
#[command(name = "patchbay")]
#[command(version)]
#[command(about = "Patchbay: a group chat between you and several AI agents")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config directory and default config
    Init,

    /// Show current configuration
    Config,

    /// List registered agents and their status
    Agents,

    /// Send one message to the room and print every reply
    Ask {
        /// The message to send, with @mentions
        message: String,
    },

    /// Interactive group chat
    Chat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Config => cmd_config(&cli.config).await,
        Commands::Agents => cmd_agents(&cli.config).await,
        Commands::Ask { message } => cmd_ask(&cli.config, &message).await,
        Commands::Chat => cmd_chat(&cli.config).await,
    };
    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        let default_config = include_str!("../../../config/default.toml");
        tokio::fs::write(&config_path, default_config).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&config_path, std::fs::Permissions::from_mode(0o600))
                .await?;
        }
        info!("Created default config at {}", config_path.display());
    }

    let state_dir = config_dir.join("state");
    tokio::fs::create_dir_all(&state_dir).await?;

    println!("Patchbay initialized at {}", config_dir.display());
    println!("Edit {} to configure your API keys and agents.", config_path.display());
    Ok(())
}

async fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = PatchbayConfig::load(config_path)?;
    println!("{:#?}", cfg);
    Ok(())
}

async fn cmd_agents(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = PatchbayConfig::load(config_path)?;
    let (events_tx, _events_rx) = mpsc::unbounded_channel();
    let session = Session::build(&cfg, events_tx)?;
    print_agents(&session).await;
    Ok(())
}

async fn cmd_ask(config_path: &Option<PathBuf>, message: &str) -> Result<()> {
    let cfg = PatchbayConfig::load(config_path)?;
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let session = Session::build(&cfg, events_tx)?;
    let printer = tokio::spawn(print_events(events_rx));

    let routed = route(message, &session.participants.profiles());
    report_routing(&routed);
    let outcome = session.coordinator.dispatch(&routed).await?;
    report_skipped(&outcome.skipped);
    if outcome.is_passive() && outcome.skipped.is_empty() {
        println!("(no agent mentioned, message saved; try @all or @<name>)");
    }

    // Closing the last sender ends the printer
    drop(session);
    printer.await?;
    Ok(())
}

async fn cmd_chat(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = PatchbayConfig::load(config_path)?;
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let session = Session::build(&cfg, events_tx)?;
    let printer = tokio::spawn(print_events(events_rx));

    println!("Patchbay chat. Mention agents with @Name or @all, /help for commands, Ctrl+C to quit.");
    print_participants(&session);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut rounds: JoinSet<Result<RoundOutcome, DispatchError>> = JoinSet::new();
    let mut interrupted = false;

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Interrupted");
                interrupted = true;
                break;
            }
            Some(joined) = rounds.join_next(), if !rounds.is_empty() => {
                match joined {
                    Ok(Ok(outcome)) => {
                        report_skipped(&outcome.skipped);
                        for late in outcome.stale() {
                            println!("({} answered after /clear; reply dropped)", late.agent_id());
                        }
                        debug!("Round {} finished", outcome.round_id);
                    }
                    Ok(Err(e)) => error!("Dispatch error: {}", e),
                    Err(e) => error!("Round task failed: {}", e),
                }
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line.starts_with('/') {
                    match handle_command(&session, line).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Quit) => break,
                        Err(e) => println!("error: {:#}", e),
                    }
                    continue;
                }

                let routed = route(line, &session.participants.profiles());
                report_routing(&routed);
                let coordinator = session.coordinator.clone();
                rounds.spawn(async move { coordinator.dispatch(&routed).await });
            }
        }
    }

    if interrupted {
        rounds.shutdown().await;
    } else if !rounds.is_empty() {
        info!("Waiting for {} round(s) in flight", rounds.len());
        while rounds.join_next().await.is_some() {}
    }
    drop(session);
    printer.await?;
    println!("Bye.");
    Ok(())
}

enum Flow {
    Continue,
    Quit,
}

async fn handle_command(session: &Session, line: &str) -> Result<Flow> {
    let mut parts = line.splitn(3, ' ');
    let command = parts.next().unwrap_or_default();
    let arg = parts.next().map(str::trim).unwrap_or_default();
    let rest = parts.next().map(str::trim).unwrap_or_default();

    match command {
        "/quit" | "/exit" => return Ok(Flow::Quit),
        "/help" => print_help(),
        "/join" => {
            if session.participants.join(arg) {
                println!("{} joined", arg);
            } else if session.registry.contains(arg) {
                println!("{} is already here", arg);
            } else {
                println!("unknown agent: {}", arg);
            }
        }
        "/leave" => {
            if session.participants.leave(arg) {
                println!("{} left", arg);
            } else {
                println!("{} is not a participant", arg);
            }
        }
        "/participants" => print_participants(session),
        "/agents" => print_agents(session).await,
        "/history" => {
            let history = session.coordinator.history();
            if history.is_empty() {
                println!("(history is empty)");
            } else {
                println!("{}", history.transcript());
            }
        }
        "/clear" => {
            session.clear();
            println!("History cleared.");
        }
        "/sync" => {
            let relay = session
                .relays
                .get(arg)
                .with_context(|| format!("{} is not a manual agent", arg))?;
            println!("{}", relay.delta_context(&session.coordinator.history().snapshot()));
        }
        "/paste" => {
            if rest.is_empty() {
                anyhow::bail!("usage: /paste <agent-id> <text>");
            }
            session.coordinator.paste_reply(arg, rest)?;
            println!("Saved reply from {}", arg);
        }
        "/usage" => {
            if !session.usage.is_enabled() {
                println!("Usage tracking is disabled ([usage] enabled = false).");
            } else if arg == "reset" {
                session.usage.clear().await;
                println!("Usage counters reset.");
            } else {
                println!("{}", format_usage_summary(&session.usage.snapshot()));
            }
        }
        other => println!("unknown command: {} (try /help)", other),
    }
    Ok(Flow::Continue)
}

fn print_help() {
    println!("  /join <id>          add an agent to the room");
    println!("  /leave <id>         remove an agent from the room");
    println!("  /participants       who is in the room");
    println!("  /agents             every registered agent and its status");
    println!("  /history            the conversation so far");
    println!("  /clear              start over");
    println!("  /sync <id>          context to paste into a manual agent's chat");
    println!("  /paste <id> <text>  record a manual agent's reply");
    println!("  /usage [reset]      replies and latency per agent");
    println!("  /quit               leave");
}

fn print_participants(session: &Session) {
    let profiles = session.participants.profiles();
    if profiles.is_empty() {
        println!("Nobody is in the room. Use /join <id>.");
        return;
    }
    let handles: Vec<&str> = profiles.iter().map(|p| p.handle.as_str()).collect();
    println!("In the room: {}", handles.join(", "));
}

async fn print_agents(session: &Session) {
    for profile in session.registry.list() {
        let status = match session.registry.get(&profile.id) {
            Some(agent) => agent.adapter.check_status().await.to_string(),
            None => "missing".to_string(),
        };
        let marker = if session.participants.contains(&profile.id) { "*" } else { " " };
        println!(
            "{} {:<28} {:<20} {:<14} {}",
            marker, profile.id, profile.handle, profile.capability, status
        );
    }
}

fn report_routing(routed: &RoutedMessage) {
    for token in &routed.unmatched {
        println!("(nobody in the room matches {})", token);
    }
}

fn report_skipped(skipped: &[String]) {
    for id in skipped {
        println!("({} is a manual agent: /sync {} then /paste {} <reply>)", id, id, id);
    }
}

async fn print_events(mut events: mpsc::UnboundedReceiver<DispatchEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            DispatchEvent::Reply { handle, content, .. } => {
                println!("\n{}:\n{}\n", handle, content);
            }
            DispatchEvent::Failed { agent_id, error, .. } => {
                println!("\n[{}] error: {}\n", agent_id, error);
            }
            DispatchEvent::RoundComplete {
                round_id,
                succeeded,
                failed,
            } => {
                debug!(
                    "Round {} done: {} replied, {} failed",
                    round_id, succeeded, failed
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_ask() {
        let cli = Cli::parse_from(["patchbay", "--debug", "ask", "@all hello"]);
        assert!(cli.debug);
        assert!(matches!(cli.command, Commands::Ask { ref message } if message == "@all hello"));
    }
}
