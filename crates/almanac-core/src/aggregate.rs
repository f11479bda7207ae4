// All-time and per-season totals per manager.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::current::CurrentSeasonRows;
use crate::identity::Roster;
use crate::ledger;
use crate::model::{
    Competition, GameweekRow, ManagerId, Season, SeasonMetaRow, StandingRow, TrophyRow,
};
use crate::streaks::{self, Contiguity, PeakReport};

// ---------------------------------------------------------------------------
// Output records
// ---------------------------------------------------------------------------

/// Final league position in one completed season.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Placement {
    pub season: Season,
    pub final_rank: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllTimeStat {
    pub manager: ManagerId,
    pub seasons_played: usize,
    pub wins: u32,
    pub draws: u32,
    pub losses: u32,
    pub points: u32,
    pub points_for: f64,
    pub points_against: f64,
    pub ppg: f64,
    pub league_titles: usize,
    pub cup_wins: usize,
    pub goblet_wins: usize,
    pub transfers: u32,
    pub transfer_cost: u32,
    /// Completed seasons only; the current season's rank is provisional.
    pub placements: Vec<Placement>,
    #[serde(skip)]
    pub trophy_seasons: Vec<TrophyRow>,
    #[serde(flatten)]
    pub peaks: PeakReport,
}

impl AllTimeStat {
    pub fn games_played(&self) -> u32 {
        self.wins + self.draws + self.losses
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeasonSummary {
    pub season: Season,
    pub standing: Option<StandingRow>,
    pub trophies: Option<TrophyRow>,
    pub meta: Option<SeasonMetaRow>,
    pub peaks: PeakReport,
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Everything the aggregator reads. Stored standings may include the current
/// season; those rows are replaced by `current.standings`.
pub struct AggregateInput<'a> {
    pub roster: &'a Roster,
    pub standings: &'a [StandingRow],
    pub trophies: &'a [TrophyRow],
    pub meta: &'a [SeasonMetaRow],
    /// Merged ledger including the resolved current season.
    pub ledger: &'a [GameweekRow],
    pub current: &'a CurrentSeasonRows,
    pub contiguity: Contiguity,
}

impl AggregateInput<'_> {
    /// League standings with the current season taken from the resolved rows.
    fn league_standings(&self) -> Vec<&StandingRow> {
        self.standings
            .iter()
            .filter(|s| s.season != self.current.season)
            .chain(self.current.standings.iter())
            .filter(|s| s.competition == Competition::League)
            .collect()
    }
}

/// Points per game, zero when no games were played.
pub fn points_per_game(points: u32, games: u32) -> f64 {
    if games == 0 {
        0.0
    } else {
        f64::from(points) / f64::from(games)
    }
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

fn empty_stat(manager: ManagerId) -> AllTimeStat {
    AllTimeStat {
        manager,
        seasons_played: 0,
        wins: 0,
        draws: 0,
        losses: 0,
        points: 0,
        points_for: 0.0,
        points_against: 0.0,
        ppg: 0.0,
        league_titles: 0,
        cup_wins: 0,
        goblet_wins: 0,
        transfers: 0,
        transfer_cost: 0,
        placements: Vec::new(),
        trophy_seasons: Vec::new(),
        peaks: PeakReport::default(),
    }
}

/// One totals record per roster member, sorted by total points descending
/// then manager id.
pub fn aggregate_all_time(input: &AggregateInput<'_>) -> Vec<AllTimeStat> {
    let mut stats: BTreeMap<ManagerId, AllTimeStat> = input
        .roster
        .managers()
        .into_iter()
        .map(|m| (m.clone(), empty_stat(m)))
        .collect();
    let mut seasons: BTreeMap<ManagerId, BTreeSet<Season>> = BTreeMap::new();

    for row in input.league_standings() {
        let Some(stat) = stats.get_mut(&row.manager) else {
            continue;
        };
        stat.wins += row.wins;
        stat.draws += row.draws;
        stat.losses += row.losses;
        stat.points += row.points;
        stat.points_for += row.points_for;
        stat.points_against += row.points_against;
        seasons.entry(row.manager.clone()).or_default().insert(row.season.clone());
        if row.season != input.current.season {
            stat.placements.push(Placement {
                season: row.season.clone(),
                final_rank: row.final_rank,
            });
        }
    }

    for t in input.trophies {
        let Some(stat) = stats.get_mut(&t.manager) else {
            continue;
        };
        stat.league_titles += usize::from(t.won_league);
        stat.cup_wins += usize::from(t.won_cup);
        stat.goblet_wins += usize::from(t.won_goblet);
        if t.count() > 0 {
            stat.trophy_seasons.push(t.clone());
        }
    }

    for m in input.meta {
        if let Some(stat) = stats.get_mut(&m.manager) {
            stat.transfers += m.transfers;
            stat.transfer_cost += m.transfer_cost;
        }
    }

    for (manager, rows) in ledger::by_manager(input.ledger) {
        if let Some(stat) = stats.get_mut(&manager) {
            stat.peaks = streaks::analyze(&rows, input.contiguity);
        }
    }

    let mut out: Vec<AllTimeStat> = stats
        .into_values()
        .map(|mut stat| {
            stat.seasons_played = seasons.get(&stat.manager).map_or(0, BTreeSet::len);
            stat.ppg = points_per_game(stat.points, stat.games_played());
            stat.placements.sort_by(|a, b| a.season.cmp(&b.season));
            stat.trophy_seasons.sort_by(|a, b| a.season.cmp(&b.season));
            stat
        })
        .collect();
    out.sort_by(|a, b| b.points.cmp(&a.points).then_with(|| a.manager.cmp(&b.manager)));
    out
}

/// Season-by-season view for one manager, ascending by season. A season is
/// listed when the manager has a league standing or a ledger row in it.
pub fn season_summaries(input: &AggregateInput<'_>, manager: &ManagerId) -> Vec<SeasonSummary> {
    let standings: BTreeMap<Season, StandingRow> = input
        .league_standings()
        .into_iter()
        .filter(|s| &s.manager == manager)
        .map(|s| (s.season.clone(), s.clone()))
        .collect();

    let mut by_season: BTreeMap<Season, Vec<GameweekRow>> = BTreeMap::new();
    for row in input.ledger.iter().filter(|r| &r.manager == manager) {
        by_season.entry(row.season.clone()).or_default().push(row.clone());
    }

    let seasons: BTreeSet<Season> = standings.keys().chain(by_season.keys()).cloned().collect();
    seasons
        .into_iter()
        .map(|season| {
            let rows = by_season.get(&season).map(Vec::as_slice).unwrap_or_default();
            SeasonSummary {
                standing: standings.get(&season).cloned(),
                trophies: input
                    .trophies
                    .iter()
                    .find(|t| &t.manager == manager && t.season == season)
                    .cloned(),
                meta: input
                    .meta
                    .iter()
                    .find(|m| &m.manager == manager && m.season == season)
                    .cloned(),
                peaks: streaks::analyze(rows, input.contiguity),
                season,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::current::Provenance;
    use crate::model::GameResult;

    fn roster() -> Roster {
        Roster::new(["ADAM", "BEN", "CHRIS"], &BTreeMap::new()).unwrap()
    }

    fn id(token: &str) -> ManagerId {
        ManagerId::new(token)
    }

    fn season(label: &str) -> Season {
        Season::parse(label).unwrap()
    }

    fn standing(
        label: &str,
        manager: &str,
        rank: u32,
        w: u32,
        d: u32,
        l: u32,
        pf: f64,
    ) -> StandingRow {
        StandingRow {
            season: season(label),
            manager: id(manager),
            final_rank: rank,
            wins: w,
            draws: d,
            losses: l,
            points: 3 * w + d,
            points_for: pf,
            points_against: 0.0,
            competition: Competition::League,
        }
    }

    fn gw(label: &str, gameweek: u32, manager: &str, pf: f64, result: GameResult) -> GameweekRow {
        GameweekRow {
            season: season(label),
            gameweek,
            manager: id(manager),
            opponent: id("BEN"),
            points_for: pf,
            points_against: 40.0,
            result,
        }
    }

    fn current(standings: Vec<StandingRow>) -> CurrentSeasonRows {
        CurrentSeasonRows {
            season: season("2024/25"),
            provenance: Provenance::Live,
            through_gameweek: Some(2),
            results: Vec::new(),
            standings,
            pairwise: Vec::new(),
        }
    }

    #[test]
    fn totals_sum_past_seasons_and_live_current() {
        let r = roster();
        let stored = vec![
            standing("2022/23", "ADAM", 2, 20, 5, 13, 1900.0),
            standing("2023/24", "ADAM", 1, 25, 3, 10, 2100.0),
            // Stale current-season row, superseded by the live standings.
            standing("2024/25", "ADAM", 3, 0, 0, 9, 10.0),
            StandingRow {
                competition: Competition::Cup,
                ..standing("2023/24", "ADAM", 1, 5, 0, 0, 400.0)
            },
        ];
        let live = current(vec![standing("2024/25", "ADAM", 1, 2, 0, 0, 120.0)]);
        let trophies = vec![TrophyRow {
            season: season("2023/24"),
            manager: id("ADAM"),
            won_league: true,
            won_cup: true,
            won_goblet: false,
        }];
        let meta = vec![SeasonMetaRow {
            season: season("2023/24"),
            manager: id("ADAM"),
            transfers: 40,
            transfer_cost: 16,
        }];
        let input = AggregateInput {
            roster: &r,
            standings: &stored,
            trophies: &trophies,
            meta: &meta,
            ledger: &[],
            current: &live,
            contiguity: Contiguity::WithinSeason,
        };
        let stats = aggregate_all_time(&input);
        assert_eq!(stats.len(), 3);

        let adam = &stats[0];
        assert_eq!(adam.manager.as_str(), "ADAM");
        assert_eq!(adam.seasons_played, 3);
        assert_eq!((adam.wins, adam.draws, adam.losses), (47, 8, 23));
        assert_eq!(adam.points, 149);
        assert!((adam.points_for - 4120.0).abs() < 1e-9);
        assert!((adam.ppg - 149.0 / 78.0).abs() < 1e-12);
        assert_eq!(adam.league_titles, 1);
        assert_eq!(adam.cup_wins, 1);
        assert_eq!(adam.transfers, 40);
        assert_eq!(adam.transfer_cost, 16);
        let ranks: Vec<u32> = adam.placements.iter().map(|p| p.final_rank).collect();
        assert_eq!(ranks, vec![2, 1]);
        assert_eq!(adam.trophy_seasons.len(), 1);
    }

    #[test]
    fn every_member_appears_with_zero_safe_ppg() {
        let r = roster();
        let live = current(Vec::new());
        let input = AggregateInput {
            roster: &r,
            standings: &[],
            trophies: &[],
            meta: &[],
            ledger: &[],
            current: &live,
            contiguity: Contiguity::WithinSeason,
        };
        let stats = aggregate_all_time(&input);
        let names: Vec<&str> = stats.iter().map(|s| s.manager.as_str()).collect();
        assert_eq!(names, vec!["ADAM", "BEN", "CHRIS"]);
        assert!(stats.iter().all(|s| s.ppg == 0.0 && !s.ppg.is_nan()));
    }

    #[test]
    fn sorted_by_points_then_manager() {
        let r = roster();
        let stored = vec![
            standing("2023/24", "ADAM", 3, 1, 0, 1, 10.0),
            standing("2023/24", "BEN", 2, 1, 0, 1, 10.0),
            standing("2023/24", "CHRIS", 1, 2, 0, 0, 10.0),
        ];
        let live = current(Vec::new());
        let input = AggregateInput {
            roster: &r,
            standings: &stored,
            trophies: &[],
            meta: &[],
            ledger: &[],
            current: &live,
            contiguity: Contiguity::WithinSeason,
        };
        let names: Vec<String> = aggregate_all_time(&input)
            .into_iter()
            .map(|s| s.manager.to_string())
            .collect();
        assert_eq!(names, vec!["CHRIS", "ADAM", "BEN"]);
    }

    #[test]
    fn peaks_come_from_the_merged_ledger() {
        let r = roster();
        let ledger = vec![
            gw("2023/24", 1, "ADAM", 55.0, GameResult::Win),
            gw("2024/25", 1, "ADAM", 72.0, GameResult::Win),
            gw("2024/25", 2, "ADAM", 31.0, GameResult::Loss),
        ];
        let live = current(Vec::new());
        let input = AggregateInput {
            roster: &r,
            standings: &[],
            trophies: &[],
            meta: &[],
            ledger: &ledger,
            current: &live,
            contiguity: Contiguity::WithinSeason,
        };
        let stats = aggregate_all_time(&input);
        let adam = stats.iter().find(|s| s.manager.as_str() == "ADAM").unwrap();
        assert_eq!(adam.peaks.best_points, Some(72.0));
        assert_eq!(adam.peaks.fifty_plus_count, 2);
        assert_eq!(adam.peaks.win_streak.length, 1);
        assert_eq!(adam.peaks.win_streak.spans.len(), 2);
    }

    #[test]
    fn season_summaries_are_ascending() {
        let r = roster();
        let stored = vec![standing("2023/24", "BEN", 4, 10, 2, 26, 1700.0)];
        let ledger = vec![
            gw("2024/25", 1, "BEN", 44.0, GameResult::Loss),
            gw("2022/23", 38, "BEN", 61.0, GameResult::Win),
        ];
        let live = current(Vec::new());
        let input = AggregateInput {
            roster: &r,
            standings: &stored,
            trophies: &[],
            meta: &[],
            ledger: &ledger,
            current: &live,
            contiguity: Contiguity::WithinSeason,
        };
        let summaries = season_summaries(&input, &id("BEN"));
        let labels: Vec<&str> = summaries.iter().map(|s| s.season.label()).collect();
        assert_eq!(labels, vec!["2022/23", "2023/24", "2024/25"]);
        assert!(summaries[0].standing.is_none());
        assert_eq!(summaries[1].standing.as_ref().unwrap().final_rank, 4);
        assert_eq!(summaries[2].peaks.loss_streak.length, 1);
    }
}
