// Strict record types shared by every engine component.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("invalid season label `{0}` (expected e.g. 2023/24)")]
    InvalidSeason(String),

    #[error("invalid result token `{0}` (expected W, D or L)")]
    InvalidResult(String),

    #[error("invalid competition `{0}` (expected league, cup or goblet)")]
    InvalidCompetition(String),
}

// ---------------------------------------------------------------------------
// Manager identity
// ---------------------------------------------------------------------------

/// Canonical manager token from the closed roster.
///
/// Only the identity normalizer and the store (which only ever holds
/// canonicalized tokens) construct these, so an arbitrary string can never
/// become a manager.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ManagerId(String);

impl ManagerId {
    pub(crate) fn new(token: impl Into<String>) -> Self {
        ManagerId(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ManagerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Season
// ---------------------------------------------------------------------------

/// A season label such as `2023/24`, ordered by its start year.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Season {
    label: String,
    start_year: u16,
}

impl Season {
    /// Parse a label. The first four characters must be the start year; the
    /// remainder (e.g. `/24`) is kept verbatim.
    pub fn parse(raw: &str) -> Result<Self, ModelError> {
        let label = raw.trim();
        let year = label
            .get(..4)
            .filter(|y| y.chars().all(|c| c.is_ascii_digit()))
            .and_then(|y| y.parse::<u16>().ok())
            .ok_or_else(|| ModelError::InvalidSeason(raw.to_string()))?;
        if label[4..].chars().next().is_some_and(|c| c.is_ascii_digit()) {
            return Err(ModelError::InvalidSeason(raw.to_string()));
        }
        Ok(Season {
            label: label.to_string(),
            start_year: year,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn start_year(&self) -> u16 {
        self.start_year
    }

    /// Whether `other` is the season that starts the year after this one.
    pub fn is_followed_by(&self, other: &Season) -> bool {
        other.start_year == self.start_year + 1
    }
}

impl Ord for Season {
    fn cmp(&self, other: &Self) -> Ordering {
        self.start_year
            .cmp(&other.start_year)
            .then_with(|| self.label.cmp(&other.label))
    }
}

impl PartialOrd for Season {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for Season {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Season::parse(s)
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

impl Serialize for Season {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.label)
    }
}

// ---------------------------------------------------------------------------
// Results and competitions
// ---------------------------------------------------------------------------

/// Outcome of one head-to-head gameweek from one manager's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GameResult {
    Win,
    Draw,
    Loss,
}

impl GameResult {
    /// Higher points win; equal points draw.
    pub fn from_points(points_for: f64, points_against: f64) -> Self {
        match points_for.partial_cmp(&points_against) {
            Some(Ordering::Greater) => GameResult::Win,
            Some(Ordering::Less) => GameResult::Loss,
            _ => GameResult::Draw,
        }
    }

    pub fn from_token(raw: &str) -> Result<Self, ModelError> {
        match raw.trim().to_uppercase().as_str() {
            "W" | "WIN" => Ok(GameResult::Win),
            "D" | "DRAW" => Ok(GameResult::Draw),
            "L" | "LOSS" => Ok(GameResult::Loss),
            _ => Err(ModelError::InvalidResult(raw.to_string())),
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            GameResult::Win => "W",
            GameResult::Draw => "D",
            GameResult::Loss => "L",
        }
    }

    /// The same result seen from the opponent's side.
    pub fn inverse(&self) -> Self {
        match self {
            GameResult::Win => GameResult::Loss,
            GameResult::Draw => GameResult::Draw,
            GameResult::Loss => GameResult::Win,
        }
    }

    /// League points awarded: 3 for a win, 1 for a draw.
    pub fn league_points(&self) -> u32 {
        match self {
            GameResult::Win => 3,
            GameResult::Draw => 1,
            GameResult::Loss => 0,
        }
    }
}

impl Serialize for GameResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.token())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Competition {
    League,
    Cup,
    Goblet,
}

impl Competition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Competition::League => "league",
            Competition::Cup => "cup",
            Competition::Goblet => "goblet",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, ModelError> {
        match raw.trim().to_lowercase().as_str() {
            "league" | "h2h" => Ok(Competition::League),
            "cup" => Ok(Competition::Cup),
            "goblet" => Ok(Competition::Goblet),
            _ => Err(ModelError::InvalidCompetition(raw.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// One manager's result for one gameweek.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameweekRow {
    pub season: Season,
    pub gameweek: u32,
    pub manager: ManagerId,
    pub opponent: ManagerId,
    pub points_for: f64,
    pub points_against: f64,
    pub result: GameResult,
}

impl GameweekRow {
    /// Chronological sort key: season start year, then gameweek.
    pub fn chrono_cmp(&self, other: &Self) -> Ordering {
        self.season
            .cmp(&other.season)
            .then(self.gameweek.cmp(&other.gameweek))
    }
}

/// Final (or current) table position for one manager in one competition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StandingRow {
    pub season: Season,
    pub manager: ManagerId,
    pub final_rank: u32,
    pub wins: u32,
    pub draws: u32,
    pub losses: u32,
    pub points: u32,
    pub points_for: f64,
    pub points_against: f64,
    pub competition: Competition,
}

impl StandingRow {
    pub fn games_played(&self) -> u32 {
        self.wins + self.draws + self.losses
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrophyRow {
    pub season: Season,
    pub manager: ManagerId,
    pub won_league: bool,
    pub won_cup: bool,
    pub won_goblet: bool,
}

impl TrophyRow {
    /// Number of competitions won that season (0..=3).
    pub fn count(&self) -> usize {
        [self.won_league, self.won_cup, self.won_goblet]
            .iter()
            .filter(|won| **won)
            .count()
    }
}

/// Per-season transfer activity from the legacy archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeasonMetaRow {
    pub season: Season,
    pub manager: ManagerId,
    pub transfers: u32,
    pub transfer_cost: u32,
}

/// Stored directed head-to-head tally. `season == None` marks a legacy
/// aggregate covering every season before the first synced one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairwiseRecord {
    pub season: Option<Season>,
    pub manager: ManagerId,
    pub opponent: ManagerId,
    pub wins: u32,
    pub draws: u32,
    pub losses: u32,
}

impl PairwiseRecord {
    pub fn games(&self) -> u32 {
        self.wins + self.draws + self.losses
    }

    /// The same tally seen from the opponent's side.
    pub fn flipped(&self) -> Self {
        PairwiseRecord {
            season: self.season.clone(),
            manager: self.opponent.clone(),
            opponent: self.manager.clone(),
            wins: self.losses,
            draws: self.draws,
            losses: self.wins,
        }
    }
}
