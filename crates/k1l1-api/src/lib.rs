use std::path::{Path, PathBuf};

use anyhow::Result;
use k1l1_core::{
    rank_words, select_initial_pair, select_next_opponent, Opponent, PairSource, RankingEntry,
    SelectionConfig, VoteRecord, WordId, DEFAULT_SEED_WORDS,
};
use k1l1_store_sqlite::{IntegrityReport, SchemaStatus, SqliteStore};
use serde::{Deserialize, Serialize};

mod session;

pub use session::{SessionRegistry, DEFAULT_MAX_SESSIONS, MAX_SESSION_ID_LEN};

pub const SERVICE_NAME: &str = "K1L1 API";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub inferred_from_legacy: bool,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WordPairRequest {
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Initial pair plus the session token that scopes later opponent exclusions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WordPairResponse {
    pub word1: String,
    pub word1_id: WordId,
    pub word2: String,
    pub word2_id: WordId,
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NextOpponentRequest {
    pub winner_id: WordId,
    pub loser_id: WordId,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoteRequest {
    pub winner_id: WordId,
    pub loser_id: WordId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoteResult {
    pub message: String,
    pub winner: String,
    pub loser: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeedResult {
    pub message: String,
    pub added: usize,
    pub skipped_existing: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupResult {
    pub backup_path: PathBuf,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RestoreResult {
    pub restored_from: PathBuf,
    #[serde(flatten)]
    pub schema: SchemaStatus,
}

#[derive(Debug, Clone)]
pub struct K1l1Api {
    db_path: PathBuf,
    selection: SelectionConfig,
    sessions: SessionRegistry,
}

impl K1l1Api {
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self::with_config(db_path, SelectionConfig::default(), DEFAULT_MAX_SESSIONS)
    }

    #[must_use]
    pub fn with_config(db_path: PathBuf, selection: SelectionConfig, max_sessions: usize) -> Self {
        Self { db_path, selection, sessions: SessionRegistry::new(max_sessions) }
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    #[must_use]
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    fn open_store(&self) -> Result<SqliteStore> {
        let mut store = SqliteStore::open(&self.db_path)?;
        store.migrate()?;
        Ok(store)
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = SqliteStore::open(&self.db_path)?;
        store.schema_status()
    }

    /// Apply pending migrations, or return planned versions for dry-run mode.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut store = SqliteStore::open(&self.db_path)?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                inferred_from_legacy: before.inferred_from_legacy,
                after_version: None,
                up_to_date: None,
            });
        }

        let planned_versions = before.pending_versions;
        store.migrate()?;
        let after = store.schema_status()?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: planned_versions,
            inferred_from_legacy: before.inferred_from_legacy,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// Draw the opening pair of a session and count both words as shown.
    ///
    /// # Errors
    /// Returns an error when the session token is invalid or storage fails.
    pub fn word_pair(&self, input: WordPairRequest) -> Result<WordPairResponse> {
        let session_id = self.sessions.open(input.session_id.as_deref())?;
        let mut store = self.open_store()?;
        let words = store.list_words()?;

        let choice = select_initial_pair(&words, &self.selection, &mut rand::thread_rng());
        match choice.source {
            PairSource::Pool => {
                store.mark_shown(&[choice.pair.word1_id, choice.pair.word2_id])?;
            }
            PairSource::Fallback => {
                tracing::warn!(
                    words = words.len(),
                    "fewer than two words stored, serving fallback pair"
                );
            }
        }

        Ok(WordPairResponse {
            word1: choice.pair.word1,
            word1_id: choice.pair.word1_id,
            word2: choice.pair.word2,
            word2_id: choice.pair.word2_id,
            session_id,
        })
    }

    /// Pick the winner's next opponent, excluding losers already seen in this session.
    ///
    /// The loser is recorded as excluded even when no opponent is found.
    ///
    /// # Errors
    /// Returns an error when the session token is invalid or storage fails.
    pub fn next_opponent(&self, input: NextOpponentRequest) -> Result<Option<Opponent>> {
        let mut store = self.open_store()?;
        let words = store.list_words()?;

        let opponent = self.sessions.with_exclusions(input.session_id.as_deref(), |excluded| {
            let opponent = select_next_opponent(
                &words,
                input.winner_id,
                input.loser_id,
                excluded,
                &self.selection,
                &mut rand::thread_rng(),
            )
            .map(|word| Opponent { word: word.text.clone(), word_id: word.id });
            // Ids with no stored word can never be offered; dropping them keeps
            // a session's set no larger than the word table. `words` is id-ordered.
            excluded.retain(|id| words.binary_search_by_key(&id, |word| word.id).is_ok());
            opponent
        })?;

        match &opponent {
            Some(found) => {
                store.mark_shown(&[found.word_id])?;
            }
            None => {
                tracing::debug!(
                    winner_id = %input.winner_id,
                    loser_id = %input.loser_id,
                    "no opponent available"
                );
            }
        }
        Ok(opponent)
    }

    /// Record one vote outcome.
    ///
    /// # Errors
    /// Returns an error wrapping [`k1l1_core::RankError`] when an id is unknown or
    /// both ids are equal, or a storage error when the transaction fails.
    pub fn vote(&self, input: VoteRequest) -> Result<VoteResult> {
        let mut store = self.open_store()?;
        let recorded = store.record_vote(input.winner_id, input.loser_id)?;
        tracing::info!(
            vote_id = recorded.vote.id,
            winner = %recorded.winner.text,
            loser = %recorded.loser.text,
            "vote recorded"
        );
        Ok(VoteResult {
            message: "Vote recorded".to_string(),
            winner: recorded.winner.text,
            loser: recorded.loser.text,
        })
    }

    /// Current leaderboard, best first.
    ///
    /// # Errors
    /// Returns an error when words cannot be loaded.
    pub fn rankings(&self) -> Result<Vec<RankingEntry>> {
        let store = self.open_store()?;
        Ok(rank_words(&store.list_words()?))
    }

    /// Insert the built-in word list, skipping words that already exist.
    ///
    /// # Errors
    /// Returns an error when persistence fails.
    pub fn seed_defaults(&self) -> Result<SeedResult> {
        self.seed(DEFAULT_SEED_WORDS)
    }

    /// Insert `words`, skipping those already stored.
    ///
    /// # Errors
    /// Returns an error when a word is blank or too long, or persistence fails.
    pub fn seed<S>(&self, words: &[S]) -> Result<SeedResult>
    where
        S: AsRef<str>,
    {
        let mut store = self.open_store()?;
        let summary = store.seed_words(words)?;
        tracing::info!(
            added = summary.added,
            skipped_existing = summary.skipped_existing,
            "seeded words"
        );
        Ok(SeedResult {
            message: format!("Added {} new words to database", summary.added),
            added: summary.added,
            skipped_existing: summary.skipped_existing,
        })
    }

    /// Vote ledger, oldest first.
    ///
    /// # Errors
    /// Returns an error when the ledger cannot be read.
    pub fn votes(&self) -> Result<Vec<VoteRecord>> {
        let store = self.open_store()?;
        store.list_votes()
    }

    /// # Errors
    /// Returns an error when any integrity probe fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let store = SqliteStore::open(&self.db_path)?;
        store.integrity_check()
    }

    /// Copy the migrated database to `out_file`.
    ///
    /// # Errors
    /// Returns an error when migration or the `SQLite` backup fails.
    pub fn backup(&self, out_file: &Path) -> Result<BackupResult> {
        let store = self.open_store()?;
        store.backup_database(out_file)?;
        tracing::info!(backup_path = %out_file.display(), "database backed up");
        Ok(BackupResult { backup_path: out_file.to_path_buf(), status: "ok".to_string() })
    }

    /// Replace the database with `in_file` and migrate it to the latest schema.
    ///
    /// # Errors
    /// Returns an error when the backup is missing, unreadable, or cannot be migrated.
    pub fn restore(&self, in_file: &Path) -> Result<RestoreResult> {
        let mut store = SqliteStore::open(&self.db_path)?;
        store.restore_database(in_file)?;
        let status = store.schema_status()?;
        tracing::info!(restored_from = %in_file.display(), "database restored");
        Ok(RestoreResult { restored_from: in_file.to_path_buf(), schema: status })
    }
}
