// Ledger synchronization: derive this season's rows from the authoritative
// match source and replace the stored rows for the completed range.
//
// Sequence:
// 1. Ask the source for the latest completed gameweek (none -> not synced)
// 2. Fetch matches through that gameweek, resolve both sides, drop invalid ones
// 3. Derive two result rows per match, tally standings and pairwise records
// 4. Rank standings by (points desc, points_for desc, manager)
// 5. Replace the season's stored rows in one transaction

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::db::{RecordStore, SeasonScope};
use crate::identity::Roster;
use crate::model::{
    Competition, GameResult, GameweekRow, ManagerId, PairwiseRecord, Season, StandingRow,
};
use crate::source::{MatchSource, RawMatch, SourceError};

// ---------------------------------------------------------------------------
// Derived season
// ---------------------------------------------------------------------------

/// Everything derivable from one season's completed matches.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedSeason {
    pub season: Season,
    pub through_gameweek: u32,
    pub results: Vec<GameweekRow>,
    pub standings: Vec<StandingRow>,
    pub pairwise: Vec<PairwiseRecord>,
    pub matches_used: usize,
    pub matches_skipped: usize,
}

#[derive(Debug, Default, Clone)]
struct Tally {
    wins: u32,
    draws: u32,
    losses: u32,
    points_for: f64,
    points_against: f64,
}

impl Tally {
    fn record(&mut self, result: GameResult, points_for: f64, points_against: f64) {
        match result {
            GameResult::Win => self.wins += 1,
            GameResult::Draw => self.draws += 1,
            GameResult::Loss => self.losses += 1,
        }
        self.points_for += points_for;
        self.points_against += points_against;
    }

    fn league_points(&self) -> u32 {
        self.wins * 3 + self.draws
    }
}

/// Resolve and validate one raw match. Returns the two canonical sides, or
/// the reason it must be skipped.
fn resolve_match(
    m: &RawMatch,
    through: u32,
    roster: &Roster,
) -> Result<(ManagerId, ManagerId), String> {
    if m.gameweek == 0 || m.gameweek > through {
        return Err(format!("gameweek {} outside 1..={through}", m.gameweek));
    }
    if !m.points_a.is_finite() || !m.points_b.is_finite() || m.points_a < 0.0 || m.points_b < 0.0 {
        return Err(format!("invalid points {} / {}", m.points_a, m.points_b));
    }
    let a = roster
        .canonicalize(&m.side_a)
        .ok_or_else(|| format!("unrecognized manager `{}`", m.side_a))?;
    let b = roster
        .canonicalize(&m.side_b)
        .ok_or_else(|| format!("unrecognized manager `{}`", m.side_b))?;
    if a == b {
        return Err(format!("self-play by {a}"));
    }
    Ok((a, b))
}

/// Rank standings rows in place and assign `final_rank` from 1.
pub fn rank_standings(rows: &mut [StandingRow]) {
    rows.sort_by(|a, b| {
        b.points
            .cmp(&a.points)
            .then_with(|| {
                b.points_for
                    .partial_cmp(&a.points_for)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.manager.cmp(&b.manager))
    });
    for (idx, row) in rows.iter_mut().enumerate() {
        row.final_rank = idx as u32 + 1;
    }
}

/// Derive result rows, league standings, and pairwise tallies from the
/// matches of one season through gameweek `through`.
///
/// Results are decided strictly by points. Unresolvable, self-play,
/// out-of-range, and duplicate matches are skipped and counted.
pub fn derive_season(
    season: &Season,
    through: u32,
    matches: &[RawMatch],
    roster: &Roster,
) -> DerivedSeason {
    let mut results = Vec::with_capacity(matches.len() * 2);
    let mut tallies: BTreeMap<ManagerId, Tally> = BTreeMap::new();
    let mut pairs: BTreeMap<(ManagerId, ManagerId), Tally> = BTreeMap::new();
    let mut seen: HashSet<(u32, ManagerId)> = HashSet::new();
    let mut used = 0usize;
    let mut skipped = 0usize;

    for m in matches {
        let (a, b) = match resolve_match(m, through, roster) {
            Ok(sides) => sides,
            Err(reason) => {
                warn!(season = %season, gameweek = m.gameweek, "skipping match: {reason}");
                skipped += 1;
                continue;
            }
        };
        if seen.contains(&(m.gameweek, a.clone())) || seen.contains(&(m.gameweek, b.clone())) {
            warn!(season = %season, gameweek = m.gameweek, "skipping duplicate match {a} v {b}");
            skipped += 1;
            continue;
        }
        seen.insert((m.gameweek, a.clone()));
        seen.insert((m.gameweek, b.clone()));

        let result_a = GameResult::from_points(m.points_a, m.points_b);
        let result_b = result_a.inverse();

        results.push(GameweekRow {
            season: season.clone(),
            gameweek: m.gameweek,
            manager: a.clone(),
            opponent: b.clone(),
            points_for: m.points_a,
            points_against: m.points_b,
            result: result_a,
        });
        results.push(GameweekRow {
            season: season.clone(),
            gameweek: m.gameweek,
            manager: b.clone(),
            opponent: a.clone(),
            points_for: m.points_b,
            points_against: m.points_a,
            result: result_b,
        });

        tallies.entry(a.clone()).or_default().record(result_a, m.points_a, m.points_b);
        tallies.entry(b.clone()).or_default().record(result_b, m.points_b, m.points_a);
        pairs
            .entry((a.clone(), b.clone()))
            .or_default()
            .record(result_a, m.points_a, m.points_b);
        pairs.entry((b, a)).or_default().record(result_b, m.points_b, m.points_a);
        used += 1;
    }

    results.sort_by(|x, y| x.gameweek.cmp(&y.gameweek).then_with(|| x.manager.cmp(&y.manager)));

    let mut standings: Vec<StandingRow> = tallies
        .into_iter()
        .map(|(manager, t)| StandingRow {
            season: season.clone(),
            manager,
            final_rank: 0,
            wins: t.wins,
            draws: t.draws,
            losses: t.losses,
            points: t.league_points(),
            points_for: t.points_for,
            points_against: t.points_against,
            competition: Competition::League,
        })
        .collect();
    rank_standings(&mut standings);

    let pairwise = pairs
        .into_iter()
        .map(|((manager, opponent), t)| PairwiseRecord {
            season: Some(season.clone()),
            manager,
            opponent,
            wins: t.wins,
            draws: t.draws,
            losses: t.losses,
        })
        .collect();

    DerivedSeason {
        season: season.clone(),
        through_gameweek: through,
        results,
        standings,
        pairwise,
        matches_used: used,
        matches_skipped: skipped,
    }
}

// ---------------------------------------------------------------------------
// Live fetch
// ---------------------------------------------------------------------------

/// Run one source call under `timeout`.
async fn bounded<T, F>(timeout: Duration, call: F) -> Result<T, SourceError>
where
    F: std::future::Future<Output = Result<T, SourceError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(SourceError::Timeout(timeout)),
    }
}

/// Derive the season from the live source. `Ok(None)` means the source is
/// reachable but no gameweek has completed yet.
pub async fn fetch_live_season(
    source: &dyn MatchSource,
    roster: &Roster,
    season: &Season,
    timeout: Duration,
) -> Result<Option<DerivedSeason>, SourceError> {
    let Some(latest) = bounded(timeout, source.latest_completed_gameweek(season)).await? else {
        return Ok(None);
    };
    let matches = bounded(timeout, source.fetch_matches(season, latest)).await?;
    Ok(Some(derive_season(season, latest, &matches, roster)))
}

// ---------------------------------------------------------------------------
// Synchronizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncStatus {
    Synced,
    NotSynced { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    #[serde(flatten)]
    pub status: SyncStatus,
    pub season: String,
    pub latest_gameweek: Option<u32>,
    pub matches_used: usize,
    pub matches_skipped: usize,
    pub synced_at: DateTime<Utc>,
}

impl SyncReport {
    fn not_synced(season: &Season, reason: impl Into<String>) -> Self {
        SyncReport {
            status: SyncStatus::NotSynced {
                reason: reason.into(),
            },
            season: season.label().to_string(),
            latest_gameweek: None,
            matches_used: 0,
            matches_skipped: 0,
            synced_at: Utc::now(),
        }
    }

    pub fn is_synced(&self) -> bool {
        self.status == SyncStatus::Synced
    }
}

/// Synchronize `season` into the store.
///
/// Source failures produce a `NotSynced` report and leave stored rows
/// untouched. Only a failed store write is returned as an error.
pub async fn sync_season(
    source: &dyn MatchSource,
    store: &dyn RecordStore,
    roster: &Roster,
    season: &Season,
    timeout: Duration,
) -> Result<SyncReport> {
    let report = match fetch_live_season(source, roster, season, timeout).await {
        Err(e) => {
            warn!(season = %season, "sync skipped, source unavailable: {e}");
            SyncReport::not_synced(season, e.to_string())
        }
        Ok(None) => {
            info!(season = %season, "sync skipped, no completed gameweek yet");
            SyncReport::not_synced(season, "no completed gameweek")
        }
        Ok(Some(derived)) => {
            let scope = SeasonScope {
                season: season.clone(),
                competition: Competition::League,
                through_gameweek: derived.through_gameweek,
            };
            store.replace_season(&scope, &derived)?;
            info!(
                season = %season,
                through = derived.through_gameweek,
                used = derived.matches_used,
                skipped = derived.matches_skipped,
                "season synchronized"
            );
            SyncReport {
                status: SyncStatus::Synced,
                season: season.label().to_string(),
                latest_gameweek: Some(derived.through_gameweek),
                matches_used: derived.matches_used,
                matches_skipped: derived.matches_skipped,
                synced_at: Utc::now(),
            }
        }
    };

    if let Err(e) = store.record_sync(&report) {
        warn!("failed to record sync report: {e:#}");
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::source::{OfflineSource, StaticMatchSource};

    fn roster() -> Roster {
        let mut aliases = BTreeMap::new();
        aliases.insert("KRIS".to_string(), "CHRIS".to_string());
        Roster::new(["ADAM", "BEN", "CHRIS", "DAVE"], &aliases).unwrap()
    }

    fn season() -> Season {
        Season::parse("2024/25").unwrap()
    }

    fn matches() -> Vec<RawMatch> {
        vec![
            RawMatch::new(1, "Adam", 60.0, "Ben", 40.0),
            RawMatch::new(1, "Kris", 50.0, "Dave", 50.0),
            RawMatch::new(2, "Adam", 30.0, "Chris", 70.0),
            RawMatch::new(2, "Ben", 55.0, "Dave", 45.0),
        ]
    }

    #[test]
    fn each_match_yields_two_inverse_rows() {
        let d = derive_season(&season(), 2, &matches(), &roster());
        assert_eq!(d.matches_used, 4);
        assert_eq!(d.matches_skipped, 0);
        assert_eq!(d.results.len(), 8);

        let adam_gw1 = d
            .results
            .iter()
            .find(|r| r.gameweek == 1 && r.manager.as_str() == "ADAM")
            .unwrap();
        let ben_gw1 = d
            .results
            .iter()
            .find(|r| r.gameweek == 1 && r.manager.as_str() == "BEN")
            .unwrap();
        assert_eq!(adam_gw1.result, GameResult::Win);
        assert_eq!(ben_gw1.result, GameResult::Loss);
        assert_eq!(ben_gw1.opponent.as_str(), "ADAM");
        assert!((ben_gw1.points_against - 60.0).abs() < f64::EPSILON);
    }

    #[test]
    fn standings_are_ranked_by_points_then_points_for() {
        let d = derive_season(&season(), 2, &matches(), &roster());
        let order: Vec<(&str, u32, u32)> = d
            .standings
            .iter()
            .map(|s| (s.manager.as_str(), s.points, s.final_rank))
            .collect();
        // CHRIS: D+W = 4pts, 120pf; ADAM: W+L = 3pts, 90pf; BEN: L+W = 3pts, 95pf; DAVE: D+L = 1pt
        assert_eq!(
            order,
            vec![("CHRIS", 4, 1), ("BEN", 3, 2), ("ADAM", 3, 3), ("DAVE", 1, 4)]
        );
        assert!(d.standings.iter().all(|s| s.competition == Competition::League));
    }

    #[test]
    fn invalid_matches_are_skipped() {
        let raw = vec![
            RawMatch::new(1, "Adam", 60.0, "Nobody", 40.0),
            RawMatch::new(1, "Kris", 50.0, "Chris", 40.0),
            RawMatch::new(3, "Ben", 50.0, "Dave", 40.0),
            RawMatch::new(1, "Ben", f64::NAN, "Dave", 40.0),
            RawMatch::new(1, "Ben", 50.0, "Dave", 40.0),
            RawMatch::new(1, "Dave", 10.0, "Adam", 20.0),
        ];
        let d = derive_season(&season(), 2, &raw, &roster());
        // Only BEN v DAVE in GW1 survives; the last match reuses DAVE in GW1.
        assert_eq!(d.matches_used, 1);
        assert_eq!(d.matches_skipped, 5);
        assert_eq!(d.results.len(), 2);
    }

    #[test]
    fn pairwise_tallies_are_complementary() {
        let d = derive_season(&season(), 2, &matches(), &roster());
        for rec in &d.pairwise {
            let back = d
                .pairwise
                .iter()
                .find(|r| r.manager == rec.opponent && r.opponent == rec.manager)
                .expect("reverse record present");
            assert_eq!(rec.wins, back.losses);
            assert_eq!(rec.draws, back.draws);
        }
    }

    #[test]
    fn ranking_ties_fall_back_to_manager() {
        let r = roster();
        let raw = vec![RawMatch::new(1, "Ben", 50.0, "Adam", 50.0)];
        let d = derive_season(&season(), 1, &raw, &r);
        assert_eq!(d.standings[0].manager.as_str(), "ADAM");
        assert_eq!(d.standings[1].manager.as_str(), "BEN");
    }

    #[tokio::test]
    async fn sync_writes_rows_and_reports() {
        let r = roster();
        let store = Database::open(":memory:", r.clone()).unwrap();
        let src = StaticMatchSource::new(season(), Some(2), matches());

        let report = sync_season(&src, &store, &r, &season(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(report.is_synced());
        assert_eq!(report.latest_gameweek, Some(2));
        assert_eq!(store.synced_results().unwrap().len(), 8);
        assert_eq!(store.standings().unwrap().len(), 4);

        let last = store.last_sync(&season()).unwrap().unwrap();
        assert_eq!(last.status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn unreachable_source_leaves_store_untouched() {
        let r = roster();
        let store = Database::open(":memory:", r.clone()).unwrap();
        let src = StaticMatchSource::new(season(), Some(2), matches());
        sync_season(&src, &store, &r, &season(), Duration::from_secs(5))
            .await
            .unwrap();

        let report = sync_season(&OfflineSource, &store, &r, &season(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!report.is_synced());
        assert_eq!(store.synced_results().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn no_completed_gameweek_is_a_no_op() {
        let r = roster();
        let store = Database::open(":memory:", r.clone()).unwrap();
        let src = StaticMatchSource::new(season(), None, matches());
        let report = sync_season(&src, &store, &r, &season(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(
            report.status,
            SyncStatus::NotSynced {
                reason: "no completed gameweek".into()
            }
        );
        assert!(store.synced_results().unwrap().is_empty());
    }

    struct HangingSource;

    #[async_trait::async_trait]
    impl MatchSource for HangingSource {
        async fn latest_completed_gameweek(
            &self,
            _season: &Season,
        ) -> Result<Option<u32>, SourceError> {
            std::future::pending().await
        }

        async fn fetch_matches(
            &self,
            _season: &Season,
            _through: u32,
        ) -> Result<Vec<RawMatch>, SourceError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_source_times_out() {
        let r = roster();
        let result = fetch_live_season(&HangingSource, &r, &season(), Duration::from_secs(3)).await;
        assert!(matches!(result, Err(SourceError::Timeout(_))));
    }
}
