// Canonical gameweek ledger assembled from several provenances.

use std::collections::BTreeMap;

use tracing::debug;

use crate::model::{GameweekRow, ManagerId, Season};

type LedgerKey = (Season, u32, ManagerId);

fn key(row: &GameweekRow) -> LedgerKey {
    (row.season.clone(), row.gameweek, row.manager.clone())
}

/// Merge two row sets into one ledger with at most one row per
/// (season, gameweek, manager). On conflict the `authoritative` row replaces
/// the `base` row. Output is sorted by season, gameweek, then manager.
pub fn merge_ledger(base: Vec<GameweekRow>, authoritative: Vec<GameweekRow>) -> Vec<GameweekRow> {
    let mut merged: BTreeMap<LedgerKey, GameweekRow> = BTreeMap::new();
    for row in base {
        merged.insert(key(&row), row);
    }
    let mut replaced = 0usize;
    for row in authoritative {
        if merged.insert(key(&row), row).is_some() {
            replaced += 1;
        }
    }
    if replaced > 0 {
        debug!(replaced, "ledger merge replaced stale rows");
    }
    merged.into_values().collect()
}

/// Group a ledger by manager; each manager's rows come out in chronological
/// order.
pub fn by_manager(ledger: &[GameweekRow]) -> BTreeMap<ManagerId, Vec<GameweekRow>> {
    let mut grouped: BTreeMap<ManagerId, Vec<GameweekRow>> = BTreeMap::new();
    for row in ledger {
        grouped.entry(row.manager.clone()).or_default().push(row.clone());
    }
    for rows in grouped.values_mut() {
        rows.sort_by(|a, b| a.chrono_cmp(b));
    }
    grouped
}

/// Rows of `ledger` belonging to `season`.
pub fn season_rows<'a>(
    ledger: &'a [GameweekRow],
    season: &'a Season,
) -> impl Iterator<Item = &'a GameweekRow> + 'a {
    ledger.iter().filter(move |row| &row.season == season)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GameResult;

    fn row(season: &str, gw: u32, manager: &str, pf: f64) -> GameweekRow {
        GameweekRow {
            season: Season::parse(season).unwrap(),
            gameweek: gw,
            manager: ManagerId::new(manager),
            opponent: ManagerId::new("OPP"),
            points_for: pf,
            points_against: 40.0,
            result: GameResult::from_points(pf, 40.0),
        }
    }

    #[test]
    fn authoritative_rows_replace_base_rows() {
        let base = vec![row("2023/24", 1, "ADAM", 30.0), row("2023/24", 2, "ADAM", 55.0)];
        let fresh = vec![row("2023/24", 2, "ADAM", 41.0), row("2023/24", 3, "ADAM", 60.0)];
        let merged = merge_ledger(base, fresh);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[1].gameweek, 2);
        assert!((merged[1].points_for - 41.0).abs() < f64::EPSILON);
    }

    #[test]
    fn merged_output_is_chronological_across_seasons() {
        let base = vec![row("2024/25", 1, "BEN", 50.0), row("2022/23", 38, "BEN", 50.0)];
        let merged = merge_ledger(base, vec![row("2023/24", 5, "ADAM", 50.0)]);
        let labels: Vec<&str> = merged.iter().map(|r| r.season.label()).collect();
        assert_eq!(labels, vec!["2022/23", "2023/24", "2024/25"]);
    }

    #[test]
    fn grouping_sorts_each_manager() {
        let ledger = vec![
            row("2024/25", 2, "ADAM", 1.0),
            row("2023/24", 9, "ADAM", 1.0),
            row("2024/25", 1, "BEN", 1.0),
        ];
        let grouped = by_manager(&ledger);
        let adam = &grouped[&ManagerId::new("ADAM")];
        assert_eq!(adam[0].season.label(), "2023/24");
        assert_eq!(adam[1].gameweek, 2);
        assert_eq!(grouped[&ManagerId::new("BEN")].len(), 1);
    }
}
