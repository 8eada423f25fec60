//! CLI argument parsing and command routing
//!
//! A thin shell around the library: `audit` runs one thought through the
//! engine, `sessions` inspects persisted state, `check` probes the judge.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::audit::{AuditEngine, Thought};
use crate::config::GavelConfig;
use crate::gate::ConcurrencyGate;
use crate::judge::{CodexJudgeClient, JudgeClient};
use crate::subprocess::{ProcessRunner, TokioProcessRunner};

#[derive(Parser)]
#[command(name = "gavel", version, about = "Iterative adversarial code-audit orchestrator")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase logging verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// Audit a thought read from a file or stdin
    Audit {
        /// Read the thought text from this file instead of stdin
        #[arg(long)]
        file: Option<PathBuf>,

        /// Session to audit under; derived from the working directory when omitted
        #[arg(long)]
        session: Option<String>,

        #[arg(long, default_value_t = 1)]
        thought_number: u32,

        #[arg(long, default_value_t = 1)]
        total_thoughts: u32,
    },

    /// Inspect and manage persisted sessions
    Sessions {
        #[command(subcommand)]
        command: SessionsCommand,
    },

    /// Check whether the judge executable is available
    Check,
}

#[derive(Subcommand)]
pub enum SessionsCommand {
    /// List known session ids
    List,
    /// Print one session as JSON
    Show { id: String },
    /// Evict sessions idle longer than the given age
    Clean {
        #[arg(long, default_value_t = 24)]
        max_age_hours: u64,
    },
}

pub async fn execute_command(command: Command) -> Result<()> {
    let config = GavelConfig::from_env();
    let working_dir = std::env::current_dir().context("cannot determine working directory")?;
    let engine = AuditEngine::production(config, working_dir)
        .context("failed to initialize the audit engine")?;

    match command {
        Command::Audit {
            file,
            session,
            thought_number,
            total_thoughts,
        } => {
            let text = match file {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("cannot read {}", path.display()))?,
                None => {
                    let mut buffer = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buffer)
                        .context("cannot read thought from stdin")?;
                    buffer
                }
            };
            let thought = Thought {
                thought: text,
                thought_number,
                total_thoughts,
                next_thought_needed: true,
                session_id: session,
            };

            let gate = ConcurrencyGate::new(Arc::new(engine));
            let cancel = CancellationToken::new();
            match gate.audit(&thought, &cancel).await {
                Ok(response) => {
                    println!("{}", serde_json::to_string_pretty(&response)?);
                    Ok(())
                }
                Err(e) => {
                    let envelope = e.to_envelope(None);
                    println!("{}", serde_json::to_string_pretty(&envelope)?);
                    Err(e.into())
                }
            }
        }

        Command::Sessions { command } => match command {
            SessionsCommand::List => {
                for id in engine.store().list_ids().await {
                    println!("{id}");
                }
                Ok(())
            }
            SessionsCommand::Show { id } => {
                let outcome = engine.store().get_or_create(&id).await?;
                println!("{}", serde_json::to_string_pretty(&outcome.state)?);
                Ok(())
            }
            SessionsCommand::Clean { max_age_hours } => {
                let evicted = engine
                    .store()
                    .evict_idle(std::time::Duration::from_secs(max_age_hours * 3600))
                    .await?;
                println!("evicted {} session(s)", evicted.len());
                Ok(())
            }
        },

        Command::Check => {
            let runner: Arc<dyn ProcessRunner> = Arc::new(TokioProcessRunner);
            let client =
                CodexJudgeClient::new(runner, engine.config().judge_executable.clone(), 0);
            if client.check_availability().await? {
                println!("judge '{}' is available", engine.config().judge_executable);
                Ok(())
            } else {
                anyhow::bail!(
                    "judge '{}' is not available on PATH",
                    engine.config().judge_executable
                )
            }
        }
    }
}
