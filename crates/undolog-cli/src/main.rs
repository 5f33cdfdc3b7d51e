use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use undolog::{
    ApplyError, Change, HistoryConfig, MutationApplier, SessionId, Seq, TracingSink,
    Transaction, TransactionKind, UndoEngine,
};

/// Inspects a persistent undo/redo history log.
#[derive(Parser, Debug)]
#[command(name = "undolog", version, about)]
struct Cli {
    /// JSON config file to load.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory holding the log database; overrides the config.
    #[arg(long = "data-dir")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every session in the log.
    Sessions,
    /// List the transactions of a session with their changes.
    History {
        session: SessionId,
        /// Include before/after snapshot sizes.
        #[arg(long)]
        snapshots: bool,
    },
    /// Print one change as JSON.
    Show { session: SessionId, seq: Seq },
    /// Write every change of a session as JSON lines to stdout.
    Export { session: SessionId },
}

/// Applier for a read-only inspection engine; it never replays anything.
struct ReadOnly;

impl MutationApplier for ReadOnly {
    fn begin(&mut self) -> Result<(), ApplyError> {
        Err(ApplyError::new("the inspector does not replay changes"))
    }

    fn apply_data(&mut self, _: Option<&[u8]>, _: &str, _: &str) -> Result<(), ApplyError> {
        Err(ApplyError::new("the inspector does not replay changes"))
    }

    fn apply_reference(&mut self, _: Option<&[u8]>, _: &str, _: &str) -> Result<(), ApplyError> {
        Err(ApplyError::new("the inspector does not replay changes"))
    }

    fn commit(&mut self) -> Result<(), ApplyError> {
        Ok(())
    }

    fn abort(&mut self) {}
}

fn load_config(cli: &Cli) -> HistoryConfig {
    let mut config = match &cli.config {
        Some(path) => HistoryConfig::load_or_default(path),
        None => HistoryConfig::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    config
}

/// Opens an existing log; never creates one.
fn open_engine(config: &HistoryConfig) -> Result<UndoEngine> {
    let path = config.database_path();
    if !path.is_file() {
        bail!("no history log at {}", path.display());
    }
    UndoEngine::open(config, ReadOnly, TracingSink)
        .with_context(|| format!("failed to open {}", path.display()))
}

fn format_time(nanos: i64) -> String {
    DateTime::<Utc>::from_timestamp_nanos(nanos)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

fn describe_transaction(txn: &Transaction) -> String {
    let span = match txn.span {
        Some((first, last)) => format!("{first}..={last}"),
        None => "-".to_string(),
    };
    let kind = match (txn.kind, txn.reverts) {
        (TransactionKind::Commit, _) => "commit".to_string(),
        (TransactionKind::Undo, Some(id)) => format!("undo of #{id}"),
        (TransactionKind::Redo, Some(id)) => format!("redo of #{id}"),
        (TransactionKind::Undo, None) => "undo".to_string(),
        (TransactionKind::Redo, None) => "redo".to_string(),
    };
    format!(
        "#{:<5} {}  {:<12} {:<16} {}",
        txn.id,
        format_time(txn.timestamp),
        span,
        kind,
        txn.description
    )
}

fn describe_change(change: &Change, snapshots: bool) -> String {
    let mut line = format!(
        "    {:>6}  {:<6} {} {}",
        change.seq,
        change.operation.as_str(),
        change.object_type,
        change.target.handle()
    );
    if let Some(ref_handle) = change.target.ref_handle() {
        line.push_str(&format!(" -> {ref_handle}"));
    }
    if snapshots {
        let size = |s: &Option<Vec<u8>>| s.as_ref().map_or(0, Vec::len);
        line.push_str(&format!(
            "  [before {}B, after {}B]",
            size(&change.before),
            size(&change.after)
        ));
    }
    line
}

fn run(cli: &Cli, engine: &UndoEngine) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    match &cli.command {
        Command::Sessions => {
            for session in engine.sessions()? {
                writeln!(
                    out,
                    "{:<6} {}  owner={} tree={}",
                    session.id,
                    format_time(session.created_at),
                    session.owner.as_deref().unwrap_or("-"),
                    session.tree.as_deref().unwrap_or("-"),
                )?;
            }
        }
        Command::History { session, snapshots } => {
            for entry in engine.history(*session, *snapshots)? {
                writeln!(out, "{}", describe_transaction(&entry.transaction))?;
                for change in &entry.changes {
                    writeln!(out, "{}", describe_change(change, *snapshots))?;
                }
            }
            if let Some(label) = engine.undo_label(*session)? {
                writeln!(out, "next undo: {label}")?;
            }
            if let Some(label) = engine.redo_label(*session)? {
                writeln!(out, "next redo: {label}")?;
            }
        }
        Command::Show { session, seq } => {
            let change = engine.read(*session, *seq)?;
            serde_json::to_writer_pretty(&mut out, &change)?;
            writeln!(out)?;
        }
        Command::Export { session } => {
            let mut exported = 0usize;
            for change in engine.cursor(*session)? {
                serde_json::to_writer(&mut out, &change?)?;
                writeln!(out)?;
                exported += 1;
            }
            tracing::info!(session, exported, "export finished");
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so exports stay clean
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = load_config(&cli);
    tracing::debug!("Opening history log at {}", config.database_path().display());

    let engine = open_engine(&config)?;
    run(&cli, &engine)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::parse_from(["undolog", "--data-dir", "/tmp/x", "history", "3", "--snapshots"]);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/x")));
        assert!(matches!(
            cli.command,
            Command::History {
                session: 3,
                snapshots: true
            }
        ));
    }

    #[test]
    fn test_data_dir_flag_overrides_config() {
        let cli = Cli::parse_from(["undolog", "--data-dir", "/tmp/undolog", "sessions"]);
        let config = load_config(&cli);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/undolog"));
    }

    #[test]
    fn test_missing_log_is_not_created() {
        let dir = tempfile::tempdir().unwrap();
        let config = HistoryConfig::with_data_dir(dir.path().join("nowhere"));

        let err = open_engine(&config).unwrap_err();
        assert!(err.to_string().contains("no history log"));
        assert!(!config.database_path().exists());
        assert!(!dir.path().join("nowhere").exists());
    }

    #[test]
    fn test_existing_log_opens() {
        let dir = tempfile::tempdir().unwrap();
        let config = HistoryConfig::with_data_dir(dir.path());
        undolog::LogStore::open(&config.database_path()).unwrap();

        let engine = open_engine(&config).unwrap();
        assert!(engine.sessions().unwrap().is_empty());
    }

    #[test]
    fn test_format_time_epoch() {
        assert_eq!(format_time(0), "1970-01-01 00:00:00");
    }

    #[test]
    fn test_read_only_applier_refuses_replay() {
        let mut applier = ReadOnly;
        assert!(applier.begin().is_err());
    }
}
