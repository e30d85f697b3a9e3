use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use k1l1_api::{K1l1Api, NextOpponentRequest, VoteRequest, WordPairRequest};
use k1l1_core::WordId;
use serde::Serialize;
use serde_json::Value;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "k1l1")]
#[command(about = "K1L1 pairwise word ranking CLI")]
struct Cli {
    #[arg(long, default_value = "./k1l1.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    /// Add words, or the built-in list when no `--word` is given.
    Seed(SeedArgs),
    Pair,
    NextOpponent(NextOpponentArgs),
    Vote(VoteArgs),
    Rankings,
    Votes,
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    Backup(DbBackupArgs),
    Restore(DbRestoreArgs),
    IntegrityCheck,
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct DbBackupArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct DbRestoreArgs {
    #[arg(long = "in")]
    input: PathBuf,
}

#[derive(Debug, Args)]
struct SeedArgs {
    #[arg(long = "word")]
    words: Vec<String>,
}

#[derive(Debug, Args)]
struct NextOpponentArgs {
    #[arg(long)]
    winner_id: i64,
    #[arg(long)]
    loser_id: i64,
}

#[derive(Debug, Args)]
struct VoteArgs {
    #[arg(long)]
    winner_id: i64,
    #[arg(long)]
    loser_id: i64,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn to_json<T: Serialize>(value: &T, what: &str) -> Result<Value> {
    serde_json::to_value(value).with_context(|| format!("failed to serialize {what}"))
}

fn emit<T: Serialize>(value: &T, what: &str) -> Result<()> {
    emit_json(to_json(value, what)?)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let api = K1l1Api::new(cli.db);
    match cli.command {
        Command::Db { command } => run_db(command, &api),
        Command::Seed(args) => {
            let result =
                if args.words.is_empty() { api.seed_defaults()? } else { api.seed(&args.words)? };
            emit(&result, "seed result")
        }
        Command::Pair => emit(&api.word_pair(WordPairRequest::default())?, "word pair"),
        Command::NextOpponent(args) => run_next_opponent(&args, &api),
        Command::Vote(args) => {
            let result = api.vote(VoteRequest {
                winner_id: WordId(args.winner_id),
                loser_id: WordId(args.loser_id),
            })?;
            emit(&result, "vote result")
        }
        Command::Rankings => emit(&api.rankings()?, "rankings"),
        Command::Votes => emit(&api.votes()?, "vote ledger"),
    }
}

fn run_db(command: DbCommand, api: &K1l1Api) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = api.schema_status()?;
            let up_to_date = status.pending_versions.is_empty();
            let mut value = to_json(&status, "schema status")?;
            if let Value::Object(object) = &mut value {
                object.insert("up_to_date".to_string(), Value::Bool(up_to_date));
            }
            emit_json(value)
        }
        DbCommand::Migrate(args) => emit(&api.migrate(args.dry_run)?, "migration result"),
        DbCommand::Backup(args) => emit(&api.backup(&args.out)?, "backup result"),
        DbCommand::Restore(args) => emit(&api.restore(&args.input)?, "restore result"),
        DbCommand::IntegrityCheck => emit(&api.integrity_check()?, "integrity report"),
    }
}

// Each invocation is its own process, so the exclusion set only ever holds the
// loser passed on the command line.
fn run_next_opponent(args: &NextOpponentArgs, api: &K1l1Api) -> Result<()> {
    let opponent = api.next_opponent(NextOpponentRequest {
        winner_id: WordId(args.winner_id),
        loser_id: WordId(args.loser_id),
        session_id: None,
    })?;
    emit_json(serde_json::json!({ "opponent": to_json(&opponent, "opponent")? }))
}
