use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use k1l1_core::{validate_vote, validate_word_text, RankError, VoteRecord, Word, WordId};
use rusqlite::{params, Connection, DatabaseName, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

const LATEST_SCHEMA_VERSION: i64 = 1;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS words (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  word TEXT NOT NULL UNIQUE CHECK (length(word) BETWEEN 1 AND 100),
  wins INTEGER NOT NULL DEFAULT 0 CHECK (wins >= 0),
  losses INTEGER NOT NULL DEFAULT 0 CHECK (losses >= 0),
  times_shown INTEGER NOT NULL DEFAULT 0 CHECK (times_shown >= 0),
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS votes (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  winner_id INTEGER NOT NULL,
  loser_id INTEGER NOT NULL,
  recorded_at TEXT NOT NULL,
  FOREIGN KEY (winner_id) REFERENCES words(id),
  FOREIGN KEY (loser_id) REFERENCES words(id)
);

CREATE INDEX IF NOT EXISTS idx_votes_winner ON votes(winner_id);
CREATE INDEX IF NOT EXISTS idx_votes_loser ON votes(loser_id);
";

const SELECT_WORD_COLUMNS: &str = "SELECT id, word, wins, losses, times_shown FROM words";

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
    pub inferred_from_legacy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeedSummary {
    pub added: usize,
    pub skipped_existing: usize,
}

/// Counters of both words as committed together with the vote row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordedVote {
    pub vote: VoteRecord,
    pub winner: Word,
    pub loser: Word,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: i64,
    pub parent: String,
    pub fk_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
    pub ledger_matches_counters: bool,
    pub schema_status: SchemaStatus,
}

impl SqliteStore {
    /// Open a SQLite-backed word store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let (current_version, inferred_from_legacy) = detect_effective_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
            inferred_from_legacy,
        })
    }

    /// Create the word and vote tables when missing and record the schema version.
    ///
    /// # Errors
    /// Returns an error when schema creation fails or the database carries an unknown version.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;
        if version == 0 {
            if table_exists(&self.conn, "words")? {
                // Tables created without a migration record.
                tracing::info!("recording schema version 1 for existing words table");
                record_schema_version(&self.conn, 1)?;
            } else {
                apply_migration_1(&self.conn)?;
            }
            version = current_schema_version(&self.conn)?;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    /// Load every word in insertion (id) order.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read from `SQLite`.
    pub fn list_words(&self) -> Result<Vec<Word>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SELECT_WORD_COLUMNS} ORDER BY id ASC"))
            .context("failed to prepare word listing")?;
        let rows = stmt.query_map([], word_from_row)?;

        let mut words = Vec::new();
        for row in rows {
            words.push(row.context("failed to decode word row")?);
        }
        Ok(words)
    }

    /// # Errors
    /// Returns an error when the lookup query fails.
    pub fn get_word(&self, id: WordId) -> Result<Option<Word>> {
        load_word(&self.conn, id)
    }

    /// # Errors
    /// Returns an error when the lookup query fails.
    pub fn get_word_by_text(&self, text: &str) -> Result<Option<Word>> {
        self.conn
            .query_row(
                &format!("{SELECT_WORD_COLUMNS} WHERE word = ?1"),
                params![text],
                word_from_row,
            )
            .optional()
            .with_context(|| format!("failed to look up word {text:?}"))
    }

    /// Apply one vote: bump both counters and append the ledger row in one transaction.
    ///
    /// # Errors
    /// Returns [`RankError::WordNotFound`] (wrapped in `anyhow`) when either id is
    /// unknown, [`RankError::Validation`] for a self-vote, or a storage error when
    /// any write fails. Nothing is committed on error.
    pub fn record_vote(&mut self, winner_id: WordId, loser_id: WordId) -> Result<RecordedVote> {
        validate_vote(winner_id, loser_id)?;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start vote transaction")?;

        for id in [winner_id, loser_id] {
            if load_word(&tx, id)?.is_none() {
                return Err(RankError::WordNotFound(id).into());
            }
        }

        tx.execute("UPDATE words SET wins = wins + 1 WHERE id = ?1", params![winner_id.0])
            .context("failed to increment winner wins")?;
        tx.execute("UPDATE words SET losses = losses + 1 WHERE id = ?1", params![loser_id.0])
            .context("failed to increment loser losses")?;

        let recorded_at = OffsetDateTime::now_utc();
        tx.execute(
            "INSERT INTO votes(winner_id, loser_id, recorded_at) VALUES (?1, ?2, ?3)",
            params![winner_id.0, loser_id.0, rfc3339(recorded_at)?],
        )
        .context("failed to append vote record")?;
        let vote_id = tx.last_insert_rowid();

        let winner = load_word(&tx, winner_id)?.ok_or(RankError::WordNotFound(winner_id))?;
        let loser = load_word(&tx, loser_id)?.ok_or(RankError::WordNotFound(loser_id))?;

        tx.commit().context("failed to commit vote transaction")?;

        Ok(RecordedVote {
            vote: VoteRecord { id: vote_id, winner_id, loser_id, recorded_at },
            winner,
            loser,
        })
    }

    /// Count one presentation for each listed word. Unknown ids are skipped.
    ///
    /// # Errors
    /// Returns an error when any update in the transaction fails.
    pub fn mark_shown(&mut self, ids: &[WordId]) -> Result<usize> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start shown transaction")?;
        let mut updated = 0;
        for id in ids {
            updated += tx
                .execute(
                    "UPDATE words SET times_shown = times_shown + 1 WHERE id = ?1",
                    params![id.0],
                )
                .with_context(|| format!("failed to increment times_shown for word {id}"))?;
        }
        tx.commit().context("failed to commit shown transaction")?;
        Ok(updated)
    }

    /// Insert each word whose text is not already stored.
    ///
    /// # Errors
    /// Returns an error when a word fails validation or the insert transaction fails.
    pub fn seed_words<S>(&mut self, words: &[S]) -> Result<SeedSummary>
    where
        S: AsRef<str>,
    {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("failed to start seed transaction")?;
        let created_at = now_rfc3339()?;
        let mut summary = SeedSummary { added: 0, skipped_existing: 0 };

        for raw in words {
            let text = validate_word_text(raw.as_ref())?;
            let inserted = tx
                .execute(
                    "INSERT INTO words(word, created_at) VALUES (?1, ?2)
                     ON CONFLICT(word) DO NOTHING",
                    params![text, created_at],
                )
                .with_context(|| format!("failed to insert seed word {text:?}"))?;
            if inserted == 1 {
                summary.added += 1;
            } else {
                summary.skipped_existing += 1;
            }
        }

        tx.commit().context("failed to commit seed transaction")?;
        Ok(summary)
    }

    /// Load the vote ledger oldest first.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or timestamps cannot be parsed.
    pub fn list_votes(&self) -> Result<Vec<VoteRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, winner_id, loser_id, recorded_at FROM votes ORDER BY id ASC")
            .context("failed to prepare vote listing")?;
        let mut rows = stmt.query([])?;

        let mut votes = Vec::new();
        while let Some(row) = rows.next()? {
            votes.push(VoteRecord {
                id: row.get(0)?,
                winner_id: WordId(row.get(1)?),
                loser_id: WordId(row.get(2)?),
                recorded_at: parse_rfc3339(&row.get::<_, String>(3)?)?,
            });
        }
        Ok(votes)
    }

    /// Write a consistent copy of the database to `out_file`.
    ///
    /// # Errors
    /// Returns an error when backup directories cannot be created or backup fails.
    pub fn backup_database(&self, out_file: &Path) -> Result<()> {
        if let Some(parent) = out_file.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory for backup file {}", out_file.display())
            })?;
        }

        self.conn
            .backup(DatabaseName::Main, out_file, None)
            .with_context(|| format!("failed to create sqlite backup at {}", out_file.display()))
    }

    /// Restore this database from a `SQLite` backup file, then migrate to latest.
    ///
    /// # Errors
    /// Returns an error when the backup file is missing, restore fails, or migrations fail.
    pub fn restore_database(&mut self, in_file: &Path) -> Result<()> {
        if !in_file.exists() {
            return Err(anyhow!("backup file does not exist: {}", in_file.display()));
        }

        self.conn
            .restore(DatabaseName::Main, in_file, None::<fn(rusqlite::backup::Progress)>)
            .with_context(|| {
                format!("failed to restore sqlite backup from {}", in_file.display())
            })?;

        self.migrate()?;
        Ok(())
    }

    /// Run quick-check, foreign-key-check, ledger agreement, and schema status probes.
    ///
    /// # Errors
    /// Returns an error when any integrity probe query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let mut stmt = self
            .conn
            .prepare("PRAGMA foreign_key_check")
            .context("failed to prepare PRAGMA foreign_key_check")?;
        let rows = stmt.query_map([], |row| {
            Ok(ForeignKeyViolation {
                table: row.get(0)?,
                rowid: row.get(1)?,
                parent: row.get(2)?,
                fk_index: row.get(3)?,
            })
        })?;

        let mut foreign_key_violations = Vec::new();
        for row in rows {
            foreign_key_violations.push(row?);
        }

        let ledger_matches_counters = if table_exists(&self.conn, "words")? {
            ledger_matches_counters(&self.conn)?
        } else {
            true
        };

        let schema_status = self.schema_status()?;
        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            foreign_key_violations,
            ledger_matches_counters,
            schema_status,
        })
    }
}

fn word_from_row(row: &Row<'_>) -> rusqlite::Result<Word> {
    Ok(Word {
        id: WordId(row.get(0)?),
        text: row.get(1)?,
        wins: row.get(2)?,
        losses: row.get(3)?,
        times_shown: row.get(4)?,
    })
}

fn load_word(conn: &Connection, id: WordId) -> Result<Option<Word>> {
    conn.query_row(&format!("{SELECT_WORD_COLUMNS} WHERE id = ?1"), params![id.0], word_from_row)
        .optional()
        .with_context(|| format!("failed to load word {id}"))
}

/// Every win and loss counter must be backed by exactly that many ledger rows.
fn ledger_matches_counters(conn: &Connection) -> Result<bool> {
    let mismatches = conn
        .query_row(
            "SELECT COUNT(*) FROM words w
             WHERE w.wins != (SELECT COUNT(*) FROM votes v WHERE v.winner_id = w.id)
                OR w.losses != (SELECT COUNT(*) FROM votes v WHERE v.loser_id = w.id)",
            [],
            |row| row.get::<_, i64>(0),
        )
        .context("failed to compare vote ledger with word counters")?;
    Ok(mismatches == 0)
}

fn apply_migration_1(conn: &Connection) -> Result<()> {
    conn.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
    record_schema_version(conn, 1)?;
    Ok(())
}

fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![table_name],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("failed to check if table exists: {table_name}"))?;
    Ok(exists == 1)
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn detect_effective_schema_version(conn: &Connection) -> Result<(i64, bool)> {
    let recorded = current_schema_version(conn)?;
    if recorded > 0 {
        return Ok((recorded, false));
    }

    if table_exists(conn, "words")? {
        return Ok((1, true));
    }

    Ok((0, false))
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    rfc3339(OffsetDateTime::now_utc())
}

fn rfc3339(value: OffsetDateTime) -> Result<String> {
    value
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
}
