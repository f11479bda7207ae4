// Current-season row resolution: live data first, persisted rows second.

use serde::Serialize;
use tracing::warn;

use crate::model::{GameweekRow, PairwiseRecord, Season, StandingRow};
use crate::source::SourceError;
use crate::sync::DerivedSeason;

/// Where the current season's rows came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Derived from the authoritative source on this request.
    Live,
    /// Source unavailable; read back from the store.
    Persisted,
    /// Neither the source nor the store had anything.
    Empty,
}

/// The current season's rows, whatever their origin.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentSeasonRows {
    pub season: Season,
    pub provenance: Provenance,
    pub through_gameweek: Option<u32>,
    pub results: Vec<GameweekRow>,
    pub standings: Vec<StandingRow>,
    pub pairwise: Vec<PairwiseRecord>,
}

/// Stored current-season rows, used only when live derivation fails.
#[derive(Debug, Clone, Default)]
pub struct PersistedCurrent {
    pub results: Vec<GameweekRow>,
    pub standings: Vec<StandingRow>,
    pub pairwise: Vec<PairwiseRecord>,
}

impl PersistedCurrent {
    fn is_empty(&self) -> bool {
        self.results.is_empty() && self.standings.is_empty() && self.pairwise.is_empty()
    }
}

/// Pick the current season's rows.
///
/// A successful live fetch always wins, even when no gameweek has completed
/// yet (the season simply has no rows). Persisted rows are used only when
/// the source failed.
pub fn resolve_current_season_rows(
    season: &Season,
    live: Result<Option<DerivedSeason>, SourceError>,
    persisted: PersistedCurrent,
) -> CurrentSeasonRows {
    match live {
        Ok(Some(derived)) => CurrentSeasonRows {
            season: season.clone(),
            provenance: Provenance::Live,
            through_gameweek: Some(derived.through_gameweek),
            results: derived.results,
            standings: derived.standings,
            pairwise: derived.pairwise,
        },
        Ok(None) => CurrentSeasonRows {
            season: season.clone(),
            provenance: Provenance::Live,
            through_gameweek: None,
            results: Vec::new(),
            standings: Vec::new(),
            pairwise: Vec::new(),
        },
        Err(e) => {
            warn!(season = %season, "live season unavailable, using stored rows: {e}");
            let provenance = if persisted.is_empty() {
                Provenance::Empty
            } else {
                Provenance::Persisted
            };
            let through_gameweek = persisted.results.iter().map(|r| r.gameweek).max();
            CurrentSeasonRows {
                season: season.clone(),
                provenance,
                through_gameweek,
                results: persisted.results,
                standings: persisted.standings,
                pairwise: persisted.pairwise,
            }
        }
    }
}
