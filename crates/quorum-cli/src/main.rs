use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use quorum::{
    QuorumConfig, SharedVerificationService, StreamFrame, VerificationReport,
    VerificationRequest, VerificationService,
};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML config file (env vars still override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Oracle calls admitted per minute (overrides QUORUM_REQUESTS_PER_MINUTE)
    #[arg(long, global = true)]
    requests_per_minute: Option<u32>,

    /// Validator calls run concurrently per batch (overrides QUORUM_BATCH_SIZE)
    #[arg(long, global = true)]
    batch_size: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the validator panel over one or more propositions
    Verify {
        /// Proposition to verify (repeatable)
        #[arg(short, long = "proposition", required = true)]
        propositions: Vec<String>,

        /// Session id to report progress under (generated when absent)
        #[arg(long)]
        session_id: Option<String>,

        /// Print live progress frames to stderr while verifying
        #[arg(long, default_value_t = false)]
        stream: bool,
    },
    /// Split free text into checkable propositions
    Split { text: String },
    /// Answer a question, split the answer, and verify every proposition
    Ask {
        question: String,

        /// Print live progress frames to stderr while verifying
        #[arg(long, default_value_t = false)]
        stream: bool,
    },
    /// Show configured oracles and current quota
    Health,
}

/// Output of `ask`: the generated answer and its verification.
#[derive(Debug, Serialize)]
struct AskOutput {
    question: String,
    answer: String,
    report: VerificationReport,
}

fn load_config(args: &Args) -> Result<QuorumConfig> {
    let mut config = match &args.config {
        Some(path) => QuorumConfig::from_toml_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => QuorumConfig::from_env(),
    };
    if let Some(n) = args.requests_per_minute {
        config.rate_limit.requests_per_window = n;
        config.rate_limit.window_secs = 60;
    }
    if let Some(n) = args.batch_size {
        config.panel.batch_size = n;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Wait for the progress printer to drain. Returns false if it panicked or
/// was cancelled.
async fn join_printer(printer: tokio::task::JoinHandle<()>, session_id: &str) -> bool {
    match printer.await {
        Ok(()) => true,
        Err(e) => {
            warn!(session_id, error = %e, "Progress printer task failed");
            false
        }
    }
}

async fn run_verify(
    service: &SharedVerificationService,
    propositions: Vec<String>,
    session_id: Option<String>,
    stream: bool,
) -> Result<VerificationReport> {
    let session_id = session_id.unwrap_or_else(VerificationService::new_session_id);

    // Subscribe before starting so no update is missed.
    let printer = stream.then(|| {
        let mut subscription = service.subscribe(&session_id);
        tokio::spawn(async move {
            while let Some(frame) = subscription.next().await {
                eprint!("{}", frame.to_sse());
                if let StreamFrame::Event(event) = &frame {
                    if matches!(event.event_type(), "completed" | "error") {
                        break;
                    }
                }
            }
        })
    });

    let result = service
        .verify(VerificationRequest::new(propositions).with_session_id(session_id.clone()))
        .await;

    if let Some(printer) = printer {
        if result.is_ok() {
            join_printer(printer, &session_id).await;
        } else {
            printer.abort();
        }
    }

    let report = result.with_context(|| format!("verification session {session_id} failed"))?;
    info!(
        session_id = %report.session_id,
        score = report.answer_quality.overall_score,
        elapsed_ms = report.elapsed_ms,
        "Verification finished"
    );
    Ok(report)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&args)?;
    let service = VerificationService::from_config(config)
        .context("building verification service")?
        .shared();

    match args.command {
        Command::Verify {
            propositions,
            session_id,
            stream,
        } => {
            let report = run_verify(&service, propositions, session_id, stream).await?;
            print_json(&report)
        }
        Command::Split { text } => {
            let propositions = service.split_into_propositions(&text).await?;
            print_json(&propositions)
        }
        Command::Ask { question, stream } => {
            let answer = service
                .generate_answer(&question)
                .await
                .context("generating answer")?;
            let propositions = service
                .split_into_propositions(&answer)
                .await
                .context("splitting answer into propositions")?;
            info!(count = propositions.len(), "Verifying generated answer");
            let report = run_verify(&service, propositions, None, stream).await?;
            print_json(&AskOutput {
                question,
                answer,
                report,
            })
        }
        Command::Health => print_json(&service.health()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_verify() {
        let args = Args::parse_from([
            "quorum-cli",
            "verify",
            "-p",
            "Water boils at 100C at sea level.",
            "--proposition",
            "The Moon is a planet.",
            "--session-id",
            "s1",
            "--stream",
        ]);
        match args.command {
            Command::Verify {
                propositions,
                session_id,
                stream,
            } => {
                assert_eq!(propositions.len(), 2);
                assert_eq!(session_id.as_deref(), Some("s1"));
                assert!(stream);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::parse_from([
            "quorum-cli",
            "health",
            "--config",
            "quorum.toml",
            "--batch-size",
            "4",
        ]);
        assert_eq!(args.config, Some(PathBuf::from("quorum.toml")));
        assert_eq!(args.batch_size, Some(4));
        assert!(matches!(args.command, Command::Health));
    }

    #[test]
    fn test_verify_requires_proposition() {
        assert!(Args::try_parse_from(["quorum-cli", "verify"]).is_err());
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quorum.toml");
        std::fs::write(&path, "[panel]\nbatch_size = 4\nbatch_delay_ms = 250\n").unwrap();

        let args = Args::parse_from([
            "quorum-cli",
            "--config",
            path.to_str().unwrap(),
            "--requests-per-minute",
            "10",
            "health",
        ]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.panel.batch_size, 4);
        assert_eq!(config.panel.batch_delay_ms, 250);
        assert_eq!(config.rate_limit.requests_per_window, 10);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let args = Args::parse_from(["quorum-cli", "--batch-size", "0", "health"]);
        assert!(load_config(&args).is_err());
    }

    #[tokio::test]
    async fn test_printer_failure_is_reported_not_raised() {
        let clean = tokio::spawn(async {});
        assert!(join_printer(clean, "s1").await);

        let crashed = tokio::spawn(async { panic!("stderr closed") });
        assert!(!join_printer(crashed, "s1").await);
    }
}
