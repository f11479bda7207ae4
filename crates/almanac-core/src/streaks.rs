// Streak and peak analytics over one manager's gameweek results.

use std::fmt;

use serde::{Serialize, Serializer};

use crate::config::StreakConfig;
use crate::model::{GameResult, GameweekRow, ManagerId, Season};

/// Weeks at or above this score count as high-scoring.
pub const HIGH_SCORE_THRESHOLD: f64 = 50.0;

// ---------------------------------------------------------------------------
// Contiguity
// ---------------------------------------------------------------------------

/// When two consecutive rows belong to the same run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Contiguity {
    /// Same season, gameweek +1. Season boundaries always break a run.
    #[default]
    WithinSeason,
    /// As `WithinSeason`, and additionally `final_gameweek` of one season
    /// runs on into gameweek 1 of the next season.
    BridgeSeasons { final_gameweek: u32 },
}

impl Contiguity {
    pub fn from_config(config: &StreakConfig) -> Self {
        if config.bridge_seasons {
            Contiguity::BridgeSeasons {
                final_gameweek: config.final_gameweek,
            }
        } else {
            Contiguity::WithinSeason
        }
    }

    pub fn is_sequential(&self, prev: &GameweekRow, next: &GameweekRow) -> bool {
        if prev.season == next.season {
            return prev.gameweek.checked_add(1) == Some(next.gameweek);
        }
        match self {
            Contiguity::WithinSeason => false,
            Contiguity::BridgeSeasons { final_gameweek } => {
                prev.gameweek == *final_gameweek
                    && next.gameweek == 1
                    && prev.season.is_followed_by(&next.season)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Streak kinds and spans
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreakKind {
    Win,
    Unbeaten,
    Loss,
    Winless,
}

impl StreakKind {
    pub fn matches(&self, result: GameResult) -> bool {
        match self {
            StreakKind::Win => result == GameResult::Win,
            StreakKind::Unbeaten => result != GameResult::Loss,
            StreakKind::Loss => result == GameResult::Loss,
            StreakKind::Winless => result != GameResult::Win,
        }
    }
}

/// First and last gameweek of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Span {
    pub start_season: Season,
    pub start_gameweek: u32,
    pub end_season: Season,
    pub end_gameweek: u32,
}

impl Span {
    fn between(first: &GameweekRow, last: &GameweekRow) -> Self {
        Span {
            start_season: first.season.clone(),
            start_gameweek: first.gameweek,
            end_season: last.season.clone(),
            end_gameweek: last.gameweek,
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start_season != self.end_season {
            write!(
                f,
                "{} GW{} -> {} GW{}",
                self.start_season, self.start_gameweek, self.end_season, self.end_gameweek
            )
        } else if self.start_gameweek == self.end_gameweek {
            write!(f, "{} GW {}", self.start_season, self.start_gameweek)
        } else {
            write!(
                f,
                "{} GW{}-GW{}",
                self.start_season, self.start_gameweek, self.end_gameweek
            )
        }
    }
}

impl Serialize for Span {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Longest run length and every span that reached it, in chronological order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StreakRecord {
    pub length: usize,
    pub spans: Vec<Span>,
}

impl StreakRecord {
    fn close(&mut self, length: usize, span: Span) {
        if length == 0 {
            return;
        }
        if length > self.length {
            self.length = length;
            self.spans = vec![span];
        } else if length == self.length {
            self.spans.push(span);
        }
    }
}

/// Longest run of consecutive rows satisfying `predicate`.
///
/// `rows` must already be in chronological order.
pub fn longest_run_with_spans<P>(
    rows: &[GameweekRow],
    contiguity: Contiguity,
    predicate: P,
) -> StreakRecord
where
    P: Fn(GameResult) -> bool,
{
    let mut best = StreakRecord::default();
    let mut run_start = 0usize;
    let mut run_len = 0usize;

    for (idx, row) in rows.iter().enumerate() {
        if !predicate(row.result) {
            if run_len > 0 {
                best.close(run_len, Span::between(&rows[run_start], &rows[idx - 1]));
            }
            run_len = 0;
            continue;
        }
        if run_len > 0 && contiguity.is_sequential(&rows[idx - 1], row) {
            run_len += 1;
        } else {
            if run_len > 0 {
                best.close(run_len, Span::between(&rows[run_start], &rows[idx - 1]));
            }
            run_start = idx;
            run_len = 1;
        }
    }
    if run_len > 0 {
        best.close(run_len, Span::between(&rows[run_start], &rows[rows.len() - 1]));
    }
    best
}

// ---------------------------------------------------------------------------
// Peaks
// ---------------------------------------------------------------------------

/// One gameweek achieving a best or worst score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Occurrence {
    pub season: Season,
    pub gameweek: u32,
    pub opponent: ManagerId,
}

impl From<&GameweekRow> for Occurrence {
    fn from(row: &GameweekRow) -> Self {
        Occurrence {
            season: row.season.clone(),
            gameweek: row.gameweek,
            opponent: row.opponent.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PeakReport {
    pub best_points: Option<f64>,
    pub best_occurrences: Vec<Occurrence>,
    pub worst_points: Option<f64>,
    pub worst_occurrences: Vec<Occurrence>,
    pub fifty_plus_count: usize,
    pub win_streak: StreakRecord,
    pub unbeaten_streak: StreakRecord,
    pub loss_streak: StreakRecord,
    pub winless_streak: StreakRecord,
}

/// Track the extreme value of a series and every row that hits it.
fn extreme<'a, I>(rows: I, better: fn(f64, f64) -> bool) -> (Option<f64>, Vec<Occurrence>)
where
    I: Iterator<Item = &'a GameweekRow>,
{
    let mut value: Option<f64> = None;
    let mut hits = Vec::new();
    for row in rows {
        match value {
            Some(v) if row.points_for == v => hits.push(Occurrence::from(row)),
            Some(v) if !better(row.points_for, v) => {}
            _ => {
                value = Some(row.points_for);
                hits = vec![Occurrence::from(row)];
            }
        }
    }
    (value, hits)
}

/// Full peak and streak report for one manager. Rows may arrive in any
/// order; they are sorted chronologically first.
pub fn analyze(rows: &[GameweekRow], contiguity: Contiguity) -> PeakReport {
    if rows.is_empty() {
        return PeakReport::default();
    }
    let mut sorted = rows.to_vec();
    sorted.sort_by(|a, b| a.chrono_cmp(b));

    let (best_points, best_occurrences) = extreme(sorted.iter(), |a, b| a > b);
    let (worst_points, worst_occurrences) = extreme(sorted.iter(), |a, b| a < b);
    let streak =
        |kind: StreakKind| longest_run_with_spans(&sorted, contiguity, |r| kind.matches(r));

    PeakReport {
        best_points,
        best_occurrences,
        worst_points,
        worst_occurrences,
        fifty_plus_count: sorted
            .iter()
            .filter(|r| r.points_for >= HIGH_SCORE_THRESHOLD)
            .count(),
        win_streak: streak(StreakKind::Win),
        unbeaten_streak: streak(StreakKind::Unbeaten),
        loss_streak: streak(StreakKind::Loss),
        winless_streak: streak(StreakKind::Winless),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(season: &str, gw: u32, result: GameResult, pf: f64) -> GameweekRow {
        GameweekRow {
            season: Season::parse(season).unwrap(),
            gameweek: gw,
            manager: ManagerId::new("ADAM"),
            opponent: ManagerId::new("BEN"),
            points_for: pf,
            points_against: 40.0,
            result,
        }
    }

    fn season_of(results: &[GameResult]) -> Vec<GameweekRow> {
        results
            .iter()
            .enumerate()
            .map(|(i, r)| row("2023/24", i as u32 + 1, *r, 45.0))
            .collect()
    }

    use GameResult::{Draw as D, Loss as L, Win as W};

    #[test]
    fn longest_win_run_in_one_season() {
        let rows = season_of(&[W, W, L, W, W, W]);
        let streak = longest_run_with_spans(&rows, Contiguity::WithinSeason, |r| r == W);
        assert_eq!(streak.length, 3);
        assert_eq!(streak.spans.len(), 1);
        assert_eq!(streak.spans[0].to_string(), "2023/24 GW4-GW6");
    }

    #[test]
    fn gap_breaks_a_run() {
        let rows = vec![
            row("2023/24", 1, W, 50.0),
            row("2023/24", 2, W, 50.0),
            row("2023/24", 4, W, 50.0),
        ];
        let streak = longest_run_with_spans(&rows, Contiguity::WithinSeason, |r| r == W);
        assert_eq!(streak.length, 2);
        assert_eq!(streak.spans[0].to_string(), "2023/24 GW1-GW2");
    }

    #[test]
    fn tied_runs_are_all_reported() {
        let rows = season_of(&[L, L, W, L, L, D]);
        let streak = longest_run_with_spans(&rows, Contiguity::WithinSeason, |r| r == L);
        assert_eq!(streak.length, 2);
        let spans: Vec<String> = streak.spans.iter().map(|s| s.to_string()).collect();
        assert_eq!(spans, vec!["2023/24 GW1-GW2", "2023/24 GW4-GW5"]);

        let winless = longest_run_with_spans(&rows, Contiguity::WithinSeason, |r| r != W);
        assert_eq!(winless.length, 3);
        assert_eq!(winless.spans[0].to_string(), "2023/24 GW4-GW6");
    }

    #[test]
    fn season_boundary_breaks_by_default() {
        let rows = vec![
            row("2022/23", 37, W, 50.0),
            row("2022/23", 38, W, 50.0),
            row("2023/24", 1, W, 50.0),
            row("2023/24", 2, W, 50.0),
        ];
        let split = longest_run_with_spans(&rows, Contiguity::WithinSeason, |r| r == W);
        assert_eq!(split.length, 2);
        assert_eq!(split.spans.len(), 2);

        let bridged = longest_run_with_spans(
            &rows,
            Contiguity::BridgeSeasons { final_gameweek: 38 },
            |r| r == W,
        );
        assert_eq!(bridged.length, 4);
        assert_eq!(bridged.spans[0].to_string(), "2022/23 GW37 -> 2023/24 GW2");
    }

    #[test]
    fn bridging_requires_adjacent_seasons() {
        let rows = vec![row("2020/21", 38, W, 50.0), row("2022/23", 1, W, 50.0)];
        let streak = longest_run_with_spans(
            &rows,
            Contiguity::BridgeSeasons { final_gameweek: 38 },
            |r| r == W,
        );
        assert_eq!(streak.length, 1);
    }

    #[test]
    fn single_row_gives_length_one() {
        let report = analyze(&[row("2024/25", 5, D, 50.0)], Contiguity::WithinSeason);
        assert_eq!(report.unbeaten_streak.length, 1);
        assert_eq!(report.winless_streak.length, 1);
        assert_eq!(report.unbeaten_streak.spans[0].to_string(), "2024/25 GW 5");
        assert_eq!(report.win_streak.length, 0);
        assert!(report.win_streak.spans.is_empty());
        assert_eq!(report.fifty_plus_count, 1);
    }

    #[test]
    fn empty_input_is_all_zero() {
        let report = analyze(&[], Contiguity::WithinSeason);
        assert_eq!(report, PeakReport::default());
        assert!(report.best_points.is_none());
        assert_eq!(report.loss_streak.length, 0);
    }

    #[test]
    fn best_and_worst_keep_every_tie() {
        let rows = vec![
            row("2023/24", 3, W, 81.0),
            row("2023/24", 1, W, 81.0),
            row("2023/24", 2, L, 22.5),
            row("2022/23", 9, L, 22.5),
            row("2022/23", 10, W, 49.9),
        ];
        let report = analyze(&rows, Contiguity::WithinSeason);
        assert_eq!(report.best_points, Some(81.0));
        let best: Vec<u32> = report.best_occurrences.iter().map(|o| o.gameweek).collect();
        assert_eq!(best, vec![1, 3]);
        assert_eq!(report.worst_points, Some(22.5));
        assert_eq!(report.worst_occurrences[0].season.label(), "2022/23");
        assert_eq!(report.worst_occurrences.len(), 2);
        assert_eq!(report.fifty_plus_count, 2);
    }

    #[test]
    fn analyze_sorts_unordered_input() {
        let mut rows = season_of(&[W, W, W]);
        rows.reverse();
        let report = analyze(&rows, Contiguity::WithinSeason);
        assert_eq!(report.win_streak.length, 3);
        assert_eq!(report.win_streak.spans[0].to_string(), "2023/24 GW1-GW3");
    }

    #[test]
    fn max_gameweek_does_not_chain_into_gameweek_zero() {
        let rows = vec![row("2023/24", u32::MAX, W, 60.0), row("2023/24", 0, W, 60.0)];
        let streak = longest_run_with_spans(&rows, Contiguity::WithinSeason, |r| r == W);
        assert_eq!(streak.length, 1);
        assert_eq!(streak.spans.len(), 2);
    }
}
