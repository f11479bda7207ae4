// Symmetric all-time head-to-head table.
//
// Every source record is first folded onto its unordered pair (lower manager
// id first), mirrored duplicates are collapsed, and the table is then emitted
// in both directions. Symmetry therefore holds by construction.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;

use crate::current::CurrentSeasonRows;
use crate::identity::Roster;
use crate::model::{ManagerId, PairwiseRecord, Season};

/// One directed row of the head-to-head table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairwiseRow {
    pub manager: ManagerId,
    pub opponent: ManagerId,
    pub wins: u32,
    pub draws: u32,
    pub losses: u32,
    pub games_played: u32,
    pub avg_points: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Wdl {
    wins: u32,
    draws: u32,
    losses: u32,
}

impl Wdl {
    fn add(&mut self, other: Wdl) {
        self.wins += other.wins;
        self.draws += other.draws;
        self.losses += other.losses;
    }

    fn flipped(self) -> Wdl {
        Wdl {
            wins: self.losses,
            draws: self.draws,
            losses: self.wins,
        }
    }
}

type PairKey = (ManagerId, ManagerId);

/// Fold directed records onto unordered pairs, oriented from the lower
/// manager id. Both directions of the same (season, pair) describe the same
/// games, so only the first one seen counts; a mirror that disagrees is
/// logged and ignored.
fn canonicalize(records: &[&PairwiseRecord]) -> BTreeMap<PairKey, Wdl> {
    let mut scoped: BTreeMap<(Option<Season>, PairKey), Wdl> = BTreeMap::new();
    for rec in records {
        if rec.manager == rec.opponent {
            warn!("ignoring self-pairing record for {}", rec.manager);
            continue;
        }
        let oriented = if rec.manager < rec.opponent {
            (*rec).clone()
        } else {
            rec.flipped()
        };
        let tally = Wdl {
            wins: oriented.wins,
            draws: oriented.draws,
            losses: oriented.losses,
        };
        let key = (oriented.season, (oriented.manager, oriented.opponent));
        match scoped.get(&key) {
            Some(existing) if *existing != tally => {
                let (manager, opponent) = &key.1;
                warn!(
                    "conflicting head-to-head records for {manager} v {opponent}, keeping the first"
                );
            }
            Some(_) => {}
            None => {
                scoped.insert(key, tally);
            }
        }
    }

    let mut merged: BTreeMap<PairKey, Wdl> = BTreeMap::new();
    for ((_, pair), tally) in scoped {
        merged.entry(pair).or_default().add(tally);
    }
    merged
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn to_row(manager: &ManagerId, opponent: &ManagerId, t: Wdl) -> PairwiseRow {
    let games = t.wins + t.draws + t.losses;
    let avg_points = if games == 0 {
        0.0
    } else {
        round2(f64::from(3 * t.wins + t.draws) / f64::from(games))
    };
    PairwiseRow {
        manager: manager.clone(),
        opponent: opponent.clone(),
        wins: t.wins,
        draws: t.draws,
        losses: t.losses,
        games_played: games,
        avg_points,
    }
}

/// Build the head-to-head table for every ordered pair of roster members.
///
/// With `filter == None` the table sums legacy aggregates, stored rows of
/// past seasons, and the resolved current season. With a filter only that
/// season's rows count.
pub fn merge_pairwise(
    roster: &Roster,
    stored: &[PairwiseRecord],
    current: &CurrentSeasonRows,
    filter: Option<&Season>,
) -> Vec<PairwiseRow> {
    let wanted = |season: Option<&Season>| match (filter, season) {
        (None, _) => true,
        (Some(f), Some(s)) => f == s,
        (Some(_), None) => false,
    };

    let mut selected: Vec<&PairwiseRecord> = stored
        .iter()
        .filter(|r| r.season.as_ref() != Some(&current.season))
        .filter(|r| wanted(r.season.as_ref()))
        .collect();
    if wanted(Some(&current.season)) {
        selected.extend(current.pairwise.iter());
    }

    let merged = canonicalize(&selected);
    let managers = roster.managers();
    let mut rows = Vec::with_capacity(managers.len() * managers.len().saturating_sub(1));
    for a in &managers {
        for b in &managers {
            if a == b {
                continue;
            }
            let tally = if a < b {
                merged.get(&(a.clone(), b.clone())).copied().unwrap_or_default()
            } else {
                merged
                    .get(&(b.clone(), a.clone()))
                    .copied()
                    .unwrap_or_default()
                    .flipped()
            };
            rows.push(to_row(a, b, tally));
        }
    }
    rows
}

/// Rows of `table` where `manager` is the subject.
pub fn rows_for<'a>(
    table: &'a [PairwiseRow],
    manager: &'a ManagerId,
) -> impl Iterator<Item = &'a PairwiseRow> + 'a {
    table.iter().filter(move |row| &row.manager == manager)
}
