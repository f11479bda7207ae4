// Legacy archive import.
//
// Reads the historical CSV exports from one directory:
//
//   results.csv    season,gameweek,manager,opponent,points_for,points_against[,result]
//   standings.csv  season,manager,final_rank,wins,draws,losses[,points],
//                  points_for,points_against[,competition]
//   trophies.csv   season,manager,league,cup,goblet
//   meta.csv       season,manager,transfers,transfer_cost
//   h2h.csv        [season,]manager,opponent,wins,draws,losses
//
// A missing file contributes no rows. Rows with unrecognized managers or bad
// seasons are skipped with a warning.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{info, warn};

use crate::identity::Roster;
use crate::model::{
    Competition, GameResult, GameweekRow, ManagerId, PairwiseRecord, Season, SeasonMetaRow,
    StandingRow, TrophyRow,
};

pub const RESULTS_FILE: &str = "results.csv";
pub const STANDINGS_FILE: &str = "standings.csv";
pub const TROPHIES_FILE: &str = "trophies.csv";
pub const META_FILE: &str = "meta.csv";
pub const H2H_FILE: &str = "h2h.csv";

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("failed to read file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv { path: String, source: csv::Error },

    #[error("import directory not found: {0}")]
    NotADirectory(PathBuf),
}

/// Everything read from one legacy archive, already in strict record form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegacyBatch {
    pub results: Vec<GameweekRow>,
    pub standings: Vec<StandingRow>,
    pub trophies: Vec<TrophyRow>,
    pub meta: Vec<SeasonMetaRow>,
    pub pairwise: Vec<PairwiseRecord>,
}

impl LegacyBatch {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
            && self.standings.is_empty()
            && self.trophies.is_empty()
            && self.meta.is_empty()
            && self.pairwise.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Raw CSV serde structs (private)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawResult {
    season: String,
    #[serde(alias = "gw")]
    gameweek: u32,
    manager: String,
    opponent: String,
    #[serde(alias = "pf")]
    points_for: f64,
    #[serde(alias = "pa")]
    points_against: f64,
    #[serde(default)]
    result: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawStanding {
    season: String,
    manager: String,
    #[serde(alias = "rank", alias = "position")]
    final_rank: u32,
    #[serde(alias = "w")]
    wins: u32,
    #[serde(alias = "d")]
    draws: u32,
    #[serde(alias = "l")]
    losses: u32,
    #[serde(default, alias = "pts")]
    points: Option<u32>,
    #[serde(alias = "pf")]
    points_for: f64,
    #[serde(alias = "pa")]
    points_against: f64,
    #[serde(default)]
    competition: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTrophy {
    season: String,
    manager: String,
    #[serde(default, alias = "won_league")]
    league: String,
    #[serde(default, alias = "won_cup")]
    cup: String,
    #[serde(default, alias = "won_goblet")]
    goblet: String,
}

#[derive(Debug, Deserialize)]
struct RawMeta {
    season: String,
    manager: String,
    #[serde(default)]
    transfers: u32,
    #[serde(default, alias = "hits", alias = "cost")]
    transfer_cost: u32,
}

#[derive(Debug, Deserialize)]
struct RawPairwise {
    #[serde(default)]
    season: Option<String>,
    manager: String,
    opponent: String,
    #[serde(alias = "w")]
    wins: u32,
    #[serde(alias = "d")]
    draws: u32,
    #[serde(alias = "l")]
    losses: u32,
}

// ---------------------------------------------------------------------------
// Field adapters
// ---------------------------------------------------------------------------

fn season(raw: &str, file: &str) -> Option<Season> {
    match Season::parse(raw) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!("skipping {file} row: {e}");
            None
        }
    }
}

fn manager(roster: &Roster, raw: &str, file: &str) -> Option<ManagerId> {
    let id = roster.canonicalize(raw);
    if id.is_none() {
        warn!("skipping {file} row: unrecognized manager '{}'", raw.trim());
    }
    id
}

fn flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "x"
    )
}

fn reader<R: Read>(rdr: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(rdr)
}

// ---------------------------------------------------------------------------
// Reader-based loaders (private, enable testing without temp files)
// ---------------------------------------------------------------------------

/// An explicit, valid `result` column is an override and is kept even when
/// it disagrees with the points. Otherwise the result comes from the points.
fn load_results_from_reader<R: Read>(
    rdr: R,
    roster: &Roster,
) -> Result<Vec<GameweekRow>, csv::Error> {
    let mut rows = Vec::new();
    for record in reader(rdr).deserialize::<RawResult>() {
        let raw = match record {
            Ok(raw) => raw,
            Err(e) => {
                warn!("skipping malformed {RESULTS_FILE} row: {e}");
                continue;
            }
        };
        let Some(season) = season(&raw.season, RESULTS_FILE) else {
            continue;
        };
        let (Some(me), Some(them)) = (
            manager(roster, &raw.manager, RESULTS_FILE),
            manager(roster, &raw.opponent, RESULTS_FILE),
        ) else {
            continue;
        };
        if me == them {
            warn!("skipping {RESULTS_FILE} row: self-play by {me}");
            continue;
        }
        if raw.gameweek == 0 {
            warn!("skipping {RESULTS_FILE} row for {me}: gameweek 0");
            continue;
        }
        if !raw.points_for.is_finite() || !raw.points_against.is_finite() {
            warn!("skipping {RESULTS_FILE} row for {me}: non-finite points");
            continue;
        }

        let by_points = GameResult::from_points(raw.points_for, raw.points_against);
        let result = match raw.result.as_deref().map(GameResult::from_token) {
            Some(Ok(stored)) => {
                if stored != by_points {
                    warn!(
                        season = %season,
                        gameweek = raw.gameweek,
                        "keeping result override {} for {me} ({} v {})",
                        stored.token(),
                        raw.points_for,
                        raw.points_against
                    );
                }
                stored
            }
            Some(Err(e)) => {
                warn!("ignoring result column for {me}: {e}");
                by_points
            }
            None => by_points,
        };

        rows.push(GameweekRow {
            season,
            gameweek: raw.gameweek,
            manager: me,
            opponent: them,
            points_for: raw.points_for,
            points_against: raw.points_against,
            result,
        });
    }
    Ok(rows)
}

fn load_standings_from_reader<R: Read>(
    rdr: R,
    roster: &Roster,
) -> Result<Vec<StandingRow>, csv::Error> {
    let mut rows = Vec::new();
    for record in reader(rdr).deserialize::<RawStanding>() {
        let raw = match record {
            Ok(raw) => raw,
            Err(e) => {
                warn!("skipping malformed {STANDINGS_FILE} row: {e}");
                continue;
            }
        };
        let Some(season) = season(&raw.season, STANDINGS_FILE) else {
            continue;
        };
        let Some(id) = manager(roster, &raw.manager, STANDINGS_FILE) else {
            continue;
        };
        let competition = match raw.competition.as_deref().map(Competition::parse) {
            None => Competition::League,
            Some(Ok(c)) => c,
            Some(Err(e)) => {
                warn!("skipping {STANDINGS_FILE} row for {id}: {e}");
                continue;
            }
        };
        rows.push(StandingRow {
            season,
            manager: id,
            final_rank: raw.final_rank,
            wins: raw.wins,
            draws: raw.draws,
            losses: raw.losses,
            points: raw.points.unwrap_or(raw.wins * 3 + raw.draws),
            points_for: raw.points_for,
            points_against: raw.points_against,
            competition,
        });
    }
    Ok(rows)
}

fn load_trophies_from_reader<R: Read>(
    rdr: R,
    roster: &Roster,
) -> Result<Vec<TrophyRow>, csv::Error> {
    let mut merged: BTreeMap<(Season, ManagerId), TrophyRow> = BTreeMap::new();
    for record in reader(rdr).deserialize::<RawTrophy>() {
        let raw = match record {
            Ok(raw) => raw,
            Err(e) => {
                warn!("skipping malformed {TROPHIES_FILE} row: {e}");
                continue;
            }
        };
        let Some(season) = season(&raw.season, TROPHIES_FILE) else {
            continue;
        };
        let Some(id) = manager(roster, &raw.manager, TROPHIES_FILE) else {
            continue;
        };
        // At most one row per manager per season: repeated rows are OR-ed.
        let row = merged
            .entry((season.clone(), id.clone()))
            .or_insert_with(|| TrophyRow {
                season,
                manager: id,
                won_league: false,
                won_cup: false,
                won_goblet: false,
            });
        row.won_league |= flag(&raw.league);
        row.won_cup |= flag(&raw.cup);
        row.won_goblet |= flag(&raw.goblet);
    }
    Ok(merged.into_values().collect())
}

fn load_meta_from_reader<R: Read>(
    rdr: R,
    roster: &Roster,
) -> Result<Vec<SeasonMetaRow>, csv::Error> {
    let mut merged: BTreeMap<(Season, ManagerId), SeasonMetaRow> = BTreeMap::new();
    for record in reader(rdr).deserialize::<RawMeta>() {
        let raw = match record {
            Ok(raw) => raw,
            Err(e) => {
                warn!("skipping malformed {META_FILE} row: {e}");
                continue;
            }
        };
        let Some(season) = season(&raw.season, META_FILE) else {
            continue;
        };
        let Some(id) = manager(roster, &raw.manager, META_FILE) else {
            continue;
        };
        let key = (season.clone(), id.clone());
        if merged.contains_key(&key) {
            warn!("duplicate {META_FILE} entry for {id} in {season}, using latest value");
        }
        merged.insert(
            key,
            SeasonMetaRow {
                season,
                manager: id,
                transfers: raw.transfers,
                transfer_cost: raw.transfer_cost,
            },
        );
    }
    Ok(merged.into_values().collect())
}

/// Head-to-head rows are folded onto their unordered pair (lower manager id
/// first). A mirrored row for a pair already seen describes the same games
/// and is dropped.
fn load_pairwise_from_reader<R: Read>(
    rdr: R,
    roster: &Roster,
) -> Result<Vec<PairwiseRecord>, csv::Error> {
    let mut canonical: BTreeMap<(Option<Season>, ManagerId, ManagerId), PairwiseRecord> =
        BTreeMap::new();
    for record in reader(rdr).deserialize::<RawPairwise>() {
        let raw = match record {
            Ok(raw) => raw,
            Err(e) => {
                warn!("skipping malformed {H2H_FILE} row: {e}");
                continue;
            }
        };
        let season = match raw.season.as_deref() {
            None => None,
            Some(label) => match season(label, H2H_FILE) {
                Some(s) => Some(s),
                None => continue,
            },
        };
        let (Some(me), Some(them)) = (
            manager(roster, &raw.manager, H2H_FILE),
            manager(roster, &raw.opponent, H2H_FILE),
        ) else {
            continue;
        };
        if me == them {
            warn!("skipping {H2H_FILE} row: self-pairing for {me}");
            continue;
        }
        let rec = PairwiseRecord {
            season,
            manager: me,
            opponent: them,
            wins: raw.wins,
            draws: raw.draws,
            losses: raw.losses,
        };
        let rec = if rec.manager < rec.opponent { rec } else { rec.flipped() };
        let key = (rec.season.clone(), rec.manager.clone(), rec.opponent.clone());
        match canonical.get(&key) {
            Some(existing) if *existing != rec => warn!(
                "conflicting {H2H_FILE} rows for {} v {}, keeping the first",
                rec.manager, rec.opponent
            ),
            Some(_) => {}
            None => {
                canonical.insert(key, rec);
            }
        }
    }
    Ok(canonical.into_values().collect())
}

// ---------------------------------------------------------------------------
// Public path-based loaders
// ---------------------------------------------------------------------------

fn load_file<T, F>(dir: &Path, name: &str, roster: &Roster, parse: F) -> Result<Vec<T>, ImportError>
where
    F: FnOnce(std::fs::File, &Roster) -> Result<Vec<T>, csv::Error>,
{
    let path = dir.join(name);
    if !path.exists() {
        info!("{} not found, skipping", path.display());
        return Ok(Vec::new());
    }
    let file = std::fs::File::open(&path).map_err(|e| ImportError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    parse(file, roster).map_err(|e| ImportError::Csv {
        path: path.display().to_string(),
        source: e,
    })
}

/// Load every legacy CSV file found in `dir`.
pub fn load_legacy_dir(dir: &Path, roster: &Roster) -> Result<LegacyBatch, ImportError> {
    if !dir.is_dir() {
        return Err(ImportError::NotADirectory(dir.to_path_buf()));
    }
    let batch = LegacyBatch {
        results: load_file(dir, RESULTS_FILE, roster, load_results_from_reader)?,
        standings: load_file(dir, STANDINGS_FILE, roster, load_standings_from_reader)?,
        trophies: load_file(dir, TROPHIES_FILE, roster, load_trophies_from_reader)?,
        meta: load_file(dir, META_FILE, roster, load_meta_from_reader)?,
        pairwise: load_file(dir, H2H_FILE, roster, load_pairwise_from_reader)?,
    };
    info!(
        results = batch.results.len(),
        standings = batch.standings.len(),
        trophies = batch.trophies.len(),
        meta = batch.meta.len(),
        pairwise = batch.pairwise.len(),
        "loaded legacy archive from {}",
        dir.display()
    );
    Ok(batch)
}
