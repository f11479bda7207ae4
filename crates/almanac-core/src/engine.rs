// Read endpoints and the sync operation over one store and one match source.
//
// Every read assembles a fresh snapshot: stored rows, the live current
// season (or its stored fallback), and the merged ledger. Store read errors
// are logged and treated as "no rows" so reads always return something.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, error};

use crate::aggregate::{self, AggregateInput, AllTimeStat, SeasonSummary};
use crate::config::{Config, RatingConfig};
use crate::current::{self, CurrentSeasonRows, PersistedCurrent};
use crate::db::{ImportCounts, RecordStore};
use crate::identity::Roster;
use crate::legacy::LegacyBatch;
use crate::ledger;
use crate::model::{
    Competition, GameweekRow, ManagerId, PairwiseRecord, Season, SeasonMetaRow, StandingRow,
    TrophyRow,
};
use crate::pairwise::{self, PairwiseRow};
use crate::rating::{self, RatingInput, RatingRecord};
use crate::source::MatchSource;
use crate::streaks::Contiguity;
use crate::sync::{self, SyncReport};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("unknown manager '{0}'")]
    UnknownManager(String),
}

/// Stored and live rows for one request.
struct Snapshot {
    standings: Vec<StandingRow>,
    trophies: Vec<TrophyRow>,
    meta: Vec<SeasonMetaRow>,
    pairwise: Vec<PairwiseRecord>,
    ledger: Vec<GameweekRow>,
    current: CurrentSeasonRows,
}

fn best_effort<T>(what: &str, read: Result<Vec<T>>) -> Vec<T> {
    match read {
        Ok(rows) => rows,
        Err(e) => {
            error!("failed to read {what}, continuing without them: {e:#}");
            Vec::new()
        }
    }
}

pub struct Engine {
    store: Arc<dyn RecordStore>,
    source: Arc<dyn MatchSource>,
    roster: Roster,
    current_season: Season,
    rating: RatingConfig,
    contiguity: Contiguity,
    timeout: Duration,
}

impl Engine {
    pub fn new(
        store: Arc<dyn RecordStore>,
        source: Arc<dyn MatchSource>,
        roster: Roster,
        current_season: Season,
    ) -> Self {
        Engine {
            store,
            source,
            roster,
            current_season,
            rating: RatingConfig::default(),
            contiguity: Contiguity::WithinSeason,
            timeout: Duration::from_secs(10),
        }
    }

    /// Build an engine with every tunable taken from `config`.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn RecordStore>,
        source: Arc<dyn MatchSource>,
        roster: Roster,
    ) -> Self {
        Engine::new(store, source, roster, config.current_season.clone())
            .with_rating(config.rating.clone())
            .with_contiguity(Contiguity::from_config(&config.streaks))
            .with_timeout(Duration::from_secs(config.source.timeout_secs))
    }

    pub fn with_rating(mut self, rating: RatingConfig) -> Self {
        self.rating = rating;
        self
    }

    pub fn with_contiguity(mut self, contiguity: Contiguity) -> Self {
        self.contiguity = contiguity;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn season(&self) -> &Season {
        &self.current_season
    }

    /// Canonical id for a free-form manager name.
    pub fn resolve_manager(&self, raw: &str) -> Result<ManagerId, EngineError> {
        self.roster
            .canonicalize(raw)
            .ok_or_else(|| EngineError::UnknownManager(raw.trim().to_string()))
    }

    // ------------------------------------------------------------------
    // Snapshot assembly
    // ------------------------------------------------------------------

    async fn snapshot(&self) -> Snapshot {
        let season = &self.current_season;
        let legacy = best_effort("legacy results", self.store.legacy_results());
        let synced = best_effort("synced results", self.store.synced_results());
        let standings = best_effort("standings", self.store.standings());
        let trophies = best_effort("trophies", self.store.trophies());
        let meta = best_effort("season meta", self.store.season_meta());
        let pairwise = best_effort("pairwise records", self.store.pairwise_records());

        let (legacy_now, legacy_past): (Vec<_>, Vec<_>) =
            legacy.into_iter().partition(|r| &r.season == season);
        let (synced_now, synced_past): (Vec<_>, Vec<_>) =
            synced.into_iter().partition(|r| &r.season == season);

        let persisted = PersistedCurrent {
            results: ledger::merge_ledger(legacy_now, synced_now),
            standings: standings
                .iter()
                .filter(|s| &s.season == season && s.competition == Competition::League)
                .cloned()
                .collect(),
            pairwise: pairwise
                .iter()
                .filter(|p| p.season.as_ref() == Some(season))
                .cloned()
                .collect(),
        };
        let live =
            sync::fetch_live_season(self.source.as_ref(), &self.roster, season, self.timeout).await;
        let current = current::resolve_current_season_rows(season, live, persisted);
        debug!(
            provenance = ?current.provenance,
            rows = current.results.len(),
            "resolved current season"
        );

        let authoritative = synced_past
            .into_iter()
            .chain(current.results.iter().cloned())
            .collect();
        let ledger = ledger::merge_ledger(legacy_past, authoritative);

        Snapshot {
            standings,
            trophies,
            meta,
            pairwise,
            ledger,
            current,
        }
    }

    fn aggregate_input<'a>(&'a self, snap: &'a Snapshot) -> AggregateInput<'a> {
        AggregateInput {
            roster: &self.roster,
            standings: &snap.standings,
            trophies: &snap.trophies,
            meta: &snap.meta,
            ledger: &snap.ledger,
            current: &snap.current,
            contiguity: self.contiguity,
        }
    }

    // ------------------------------------------------------------------
    // Read endpoints
    // ------------------------------------------------------------------

    /// All-time totals for every roster member.
    pub async fn all_time_stats(&self) -> Vec<AllTimeStat> {
        let snap = self.snapshot().await;
        aggregate::aggregate_all_time(&self.aggregate_input(&snap))
    }

    /// Season-by-season breakdown for one manager.
    pub async fn season_stats(&self, manager: &str) -> Result<Vec<SeasonSummary>, EngineError> {
        let id = self.resolve_manager(manager)?;
        let snap = self.snapshot().await;
        Ok(aggregate::season_summaries(&self.aggregate_input(&snap), &id))
    }

    /// Every raw spelling that resolves to `manager`.
    pub fn variants(&self, manager: &str) -> Result<Vec<String>, EngineError> {
        let id = self.resolve_manager(manager)?;
        Ok(self.roster.variants_of(&id))
    }

    /// Symmetric head-to-head table, optionally restricted to one season.
    pub async fn pairwise(&self, season: Option<&Season>) -> Vec<PairwiseRow> {
        let snap = self.snapshot().await;
        pairwise::merge_pairwise(&self.roster, &snap.pairwise, &snap.current, season)
    }

    /// Head-to-head rows with `manager` as the subject.
    pub async fn pairwise_for(
        &self,
        manager: &str,
        season: Option<&Season>,
    ) -> Result<Vec<PairwiseRow>, EngineError> {
        let id = self.resolve_manager(manager)?;
        let table = self.pairwise(season).await;
        Ok(pairwise::rows_for(&table, &id).cloned().collect())
    }

    /// Composite ratings, highest first.
    pub async fn ratings(&self) -> Vec<RatingRecord> {
        let stats = self.all_time_stats().await;
        let inputs: Vec<RatingInput> = stats.iter().map(RatingInput::from).collect();
        rating::rate_population(&inputs, &self.rating)
    }

    /// The current season's rows and where they came from.
    pub async fn current_season(&self) -> CurrentSeasonRows {
        self.snapshot().await.current
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Synchronize the current season. Safe to call repeatedly.
    pub async fn sync(&self) -> Result<SyncReport> {
        sync::sync_season(
            self.source.as_ref(),
            self.store.as_ref(),
            &self.roster,
            &self.current_season,
            self.timeout,
        )
        .await
    }

    pub fn import_legacy(&self, batch: &LegacyBatch) -> Result<ImportCounts> {
        self.store.import_legacy(batch)
    }

    /// The last recorded sync for the current season, if any.
    pub fn last_sync(&self) -> Option<SyncReport> {
        match self.store.last_sync(&self.current_season) {
            Ok(report) => report,
            Err(e) => {
                error!("failed to read last sync: {e:#}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::source::{OfflineSource, RawMatch, StaticMatchSource};
    use std::collections::BTreeMap;

    fn roster() -> Roster {
        let mut aliases = BTreeMap::new();
        aliases.insert("Kris".to_string(), "CHRIS".to_string());
        Roster::new(["ADAM", "BEN", "CHRIS", "DAVE"], &aliases).unwrap()
    }

    fn season() -> Season {
        Season::parse("2024/25").unwrap()
    }

    fn engine(source: Arc<dyn MatchSource>) -> Engine {
        let store = Arc::new(Database::open(":memory:", roster()).unwrap());
        Engine::new(store, source, roster(), season())
    }

    fn live_source() -> Arc<dyn MatchSource> {
        Arc::new(StaticMatchSource::new(
            season(),
            Some(1),
            vec![
                RawMatch::new(1, "Adam", 64.0, "Kris", 51.0),
                RawMatch::new(1, "Ben", 40.0, "Dave", 40.0),
            ],
        ))
    }

    #[tokio::test]
    async fn unknown_manager_is_a_client_error() {
        let e = engine(live_source());
        assert!(matches!(
            e.season_stats("Zed").await,
            Err(EngineError::UnknownManager(name)) if name == "Zed"
        ));
        assert!(e.pairwise_for("", None).await.is_err());
        assert_eq!(e.variants("kris").unwrap(), vec!["CHRIS", "Kris"]);
    }

    #[tokio::test]
    async fn reads_use_live_data_without_a_sync() {
        let e = engine(live_source());
        let stats = e.all_time_stats().await;
        assert_eq!(stats.len(), 4);
        assert_eq!(stats[0].manager.as_str(), "ADAM");
        assert_eq!(stats[0].points, 3);
        assert_eq!(e.current_season().await.provenance, current::Provenance::Live);
    }

    #[tokio::test]
    async fn offline_reads_degrade_to_empty() {
        let e = engine(Arc::new(OfflineSource));
        assert_eq!(e.current_season().await.provenance, current::Provenance::Empty);
        let table = e.pairwise(None).await;
        assert_eq!(table.len(), 12);
        assert!(table.iter().all(|r| r.games_played == 0));
        assert_eq!(e.ratings().await.len(), 4);
    }

    #[tokio::test]
    async fn sync_records_its_report() {
        let e = engine(live_source());
        assert!(e.last_sync().is_none());
        let report = e.sync().await.unwrap();
        assert!(report.is_synced());
        assert_eq!(report.matches_used, 2);
        assert_eq!(e.last_sync().unwrap().latest_gameweek, Some(1));
    }
}
