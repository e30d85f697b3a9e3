use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Number of lowest-rated words considered when drawing a pair or an opponent.
pub const DEFAULT_POOL_SIZE: usize = 10;

/// Longest word text accepted by [`validate_word_text`].
pub const MAX_WORD_LEN: usize = 100;

pub const DEFAULT_SEED_WORDS: &[&str] = &[
    "mud",
    "paintings",
    "bicycles",
    "cars",
    "boats",
    "trains",
    "planes",
    "airplanes",
    "rockets",
    "helicopters",
    "firefighters",
    "police",
    "nurses",
    "coffee",
    "tea",
    "chocolate",
    "ice cream",
    "cake",
    "cookies",
    "kebab",
    "apples",
    "oranges",
    "bananas",
    "grapes",
    "strawberries",
    "blueberries",
    "raspberries",
    "peaches",
    "avocados",
    "tomatoes",
    "cucumbers",
    "broccoli",
    "peppers",
    "onions",
    "garlic",
    "mushrooms",
    "lettuce",
    "salt",
    "tigers",
    "lions",
    "bears",
    "wolves",
    "foxes",
    "eagles",
    "snakes",
    "lizards",
    "dolphins",
    "sharks",
    "candy",
    "trees",
    "mountains",
    "swimming pools",
    "river",
    "smart phones",
    "computers",
    "books",
    "music",
    "chess",
    "tofu",
    "rice",
    "pasta",
    "bread",
    "potatoes",
    "whales",
    "fish",
    "cats",
    "dogs",
    "mice",
    "geese",
    "ducks",
    "frogs",
    "turtles",
    "spiders",
    "bees",
    "ants",
    "wasps",
    "beetles",
    "butterflies",
    "fireflies",
    "plant-based milk",
    "knitted sweaters",
    "socks",
    "birkenstocks",
    "dishwashers",
    "TVs",
    "refrigerators",
    "wine",
    "beer",
    "roskilde festival",
];

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum RankError {
    #[error("word not found: {0}")]
    WordNotFound(WordId),
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash, Default,
)]
#[serde(transparent)]
pub struct WordId(pub i64);

impl Display for WordId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One ranked word with its cumulative comparison counters.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Word {
    pub id: WordId,
    pub text: String,
    pub wins: u32,
    pub losses: u32,
    pub times_shown: u32,
}

impl Word {
    /// Empirical win rate, `1.0` for a word that has never lost.
    ///
    /// A word with no comparisons at all also reports `1.0`.
    #[must_use]
    pub fn win_rate(&self) -> f64 {
        if self.losses == 0 {
            return 1.0;
        }
        f64::from(self.wins) / (f64::from(self.wins) + f64::from(self.losses))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoteRecord {
    pub id: i64,
    pub winner_id: WordId,
    pub loser_id: WordId,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WordPair {
    pub word1: String,
    pub word1_id: WordId,
    pub word2: String,
    pub word2_id: WordId,
}

impl WordPair {
    fn from_words(first: &Word, second: &Word) -> Self {
        Self {
            word1: first.text.clone(),
            word1_id: first.id,
            word2: second.text.clone(),
            word2_id: second.id,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PairSource {
    /// Both words were drawn from the stored pool.
    Pool,
    /// Fewer than two words exist; the configured fallback pair was returned.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairChoice {
    pub pair: WordPair,
    pub source: PairSource,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Opponent {
    pub word: String,
    pub word_id: WordId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankingEntry {
    pub word: String,
    pub wins: u32,
    pub losses: u32,
    pub win_rate: f64,
    pub times_shown: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionConfig {
    pub pool_size: usize,
    pub fallback_pair: WordPair,
}

impl SelectionConfig {
    /// Build a config around `pool_size`, keeping the default fallback pair.
    ///
    /// # Errors
    /// Returns [`RankError::Validation`] when `pool_size` is zero.
    pub fn with_pool_size(pool_size: usize) -> Result<Self, RankError> {
        if pool_size == 0 {
            return Err(RankError::Validation("pool_size must be at least 1".to_string()));
        }
        Ok(Self { pool_size, ..Self::default() })
    }

    /// Number of weakest candidates a draw of `needed` words looks at.
    ///
    /// Never smaller than `needed`, so an undersized pool widens instead of
    /// starving the draw.
    #[must_use]
    pub fn pool_limit(&self, needed: usize) -> usize {
        self.pool_size.max(needed)
    }
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            fallback_pair: WordPair {
                word1: "fish".to_string(),
                word1_id: WordId(1),
                word2: "whales".to_string(),
                word2_id: WordId(2),
            },
        }
    }
}

/// Word ids a session has already rejected as opponents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionSet {
    ids: BTreeSet<WordId>,
}

impl ExclusionSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when `id` was not already excluded.
    pub fn insert(&mut self, id: WordId) -> bool {
        self.ids.insert(id)
    }

    #[must_use]
    pub fn contains(&self, id: WordId) -> bool {
        self.ids.contains(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = WordId> + '_ {
        self.ids.iter().copied()
    }

    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(WordId) -> bool,
    {
        self.ids.retain(|id| keep(*id));
    }
}

impl FromIterator<WordId> for ExclusionSet {
    fn from_iter<T: IntoIterator<Item = WordId>>(iter: T) -> Self {
        Self { ids: iter.into_iter().collect() }
    }
}

fn by_win_rate_ascending(lhs: &&Word, rhs: &&Word) -> Ordering {
    lhs.win_rate().total_cmp(&rhs.win_rate())
}

fn sorted_by_win_rate(words: &[Word]) -> Vec<&Word> {
    let mut sorted = words.iter().collect::<Vec<_>>();
    sorted.sort_by(by_win_rate_ascending);
    sorted
}

/// Draw the first pair of a session from the weakest `pool_size` words.
///
/// Falls back to `config.fallback_pair` when fewer than two words exist. A
/// pool size below two widens to the two weakest words.
pub fn select_initial_pair<R>(words: &[Word], config: &SelectionConfig, rng: &mut R) -> PairChoice
where
    R: Rng + ?Sized,
{
    if words.len() < 2 {
        return PairChoice { pair: config.fallback_pair.clone(), source: PairSource::Fallback };
    }

    let sorted = sorted_by_win_rate(words);
    let pool = &sorted[..config.pool_limit(2).min(sorted.len())];

    let drawn = pool.choose_multiple(rng, 2).copied().collect::<Vec<_>>();
    match drawn.as_slice() {
        [first, second] => {
            PairChoice { pair: WordPair::from_words(first, second), source: PairSource::Pool }
        }
        _ => PairChoice { pair: config.fallback_pair.clone(), source: PairSource::Fallback },
    }
}

/// Pick the winner's next opponent from the easiest words rated above the loser.
///
/// `loser_id` is added to `excluded` before anything else, even when either id
/// is unknown. Returns `None` when an id does not resolve or no candidate
/// survives filtering.
pub fn select_next_opponent<'a, R>(
    words: &'a [Word],
    winner_id: WordId,
    loser_id: WordId,
    excluded: &mut ExclusionSet,
    config: &SelectionConfig,
    rng: &mut R,
) -> Option<&'a Word>
where
    R: Rng + ?Sized,
{
    excluded.insert(loser_id);

    let winner = words.iter().find(|word| word.id == winner_id)?;
    let loser = words.iter().find(|word| word.id == loser_id)?;
    let loser_rate = loser.win_rate();

    let mut candidates = words.iter().filter(|word| word.id != winner.id).collect::<Vec<_>>();
    candidates.sort_by(by_win_rate_ascending);

    let candidates = candidates
        .into_iter()
        .filter(|word| word.win_rate() > loser_rate)
        .take(config.pool_limit(1))
        .filter(|word| !excluded.contains(word.id))
        .collect::<Vec<_>>();

    candidates.choose(rng).copied()
}

/// Leaderboard order: higher win rate first, then more wins.
///
/// Words with equal keys keep their input order.
#[must_use]
pub fn rank_words(words: &[Word]) -> Vec<RankingEntry> {
    let mut ranked = words.iter().collect::<Vec<_>>();
    ranked.sort_by(|lhs, rhs| {
        rhs.win_rate().total_cmp(&lhs.win_rate()).then_with(|| rhs.wins.cmp(&lhs.wins))
    });

    ranked
        .into_iter()
        .map(|word| RankingEntry {
            word: word.text.clone(),
            wins: word.wins,
            losses: word.losses,
            win_rate: word.win_rate(),
            times_shown: word.times_shown,
        })
        .collect()
}

/// Reject a vote whose winner and loser are the same word.
///
/// # Errors
/// Returns [`RankError::Validation`] when `winner_id == loser_id`.
pub fn validate_vote(winner_id: WordId, loser_id: WordId) -> Result<(), RankError> {
    if winner_id == loser_id {
        return Err(RankError::Validation(format!(
            "winner and loser must be different words (both were {winner_id})"
        )));
    }
    Ok(())
}

/// Normalize seed text and check it against storage limits.
///
/// # Errors
/// Returns [`RankError::Validation`] for blank or over-long text.
pub fn validate_word_text(text: &str) -> Result<&str, RankError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(RankError::Validation("word text MUST be non-empty".to_string()));
    }
    if trimmed.chars().count() > MAX_WORD_LEN {
        return Err(RankError::Validation(format!(
            "word text MUST be at most {MAX_WORD_LEN} characters"
        )));
    }
    Ok(trimmed)
}
