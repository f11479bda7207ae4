// Composite manager rating.
//
// rating = (placement + silverware + ppg_score) * g_modifier
//
// placement   sum of a per-rank lookup over completed seasons
// silverware  per season: (league + cup + goblet values) * sweep multiplier
// ppg_score   SCALE * (ppg / PPG_MAX)^K * e^(lambda * (ppg - mean_ppg))
// g_modifier  1 + alpha * tanh(z(plus_g))

use serde::Serialize;

use crate::aggregate::AllTimeStat;
use crate::config::RatingConfig;
use crate::model::{ManagerId, TrophyRow};

// ---------------------------------------------------------------------------
// Pool statistics
// ---------------------------------------------------------------------------

/// Mean and standard deviation of one quantity across the manager population.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolStats {
    pub mean: f64,
    pub stdev: f64,
}

/// Threshold below which standard deviation is treated as zero.
const STDEV_EPSILON: f64 = 1e-9;

/// Compute mean and standard deviation for a slice of values.
///
/// Returns `PoolStats { mean: 0.0, stdev: 0.0 }` for an empty slice.
/// Uses the population standard deviation (N denominator): the roster is the
/// whole league, not a sample of it.
pub fn compute_pool_stats(values: &[f64]) -> PoolStats {
    if values.is_empty() {
        return PoolStats {
            mean: 0.0,
            stdev: 0.0,
        };
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    PoolStats {
        mean,
        stdev: variance.sqrt(),
    }
}

/// Compute a z-score given a value and pool stats.
///
/// Returns 0.0 if the standard deviation is approximately zero.
pub fn compute_zscore(value: f64, stats: &PoolStats) -> f64 {
    if stats.stdev < STDEV_EPSILON {
        return 0.0;
    }
    (value - stats.mean) / stats.stdev
}

// ---------------------------------------------------------------------------
// Inputs and population
// ---------------------------------------------------------------------------

/// What the rating needs to know about one manager.
#[derive(Debug, Clone, PartialEq)]
pub struct RatingInput {
    pub manager: ManagerId,
    /// Final league rank of each completed season.
    pub final_ranks: Vec<u32>,
    /// One row per season in which something was won.
    pub trophies: Vec<TrophyRow>,
    pub ppg: f64,
    /// Career points-for.
    pub plus_g: f64,
    pub seasons_played: usize,
}

impl From<&AllTimeStat> for RatingInput {
    fn from(stat: &AllTimeStat) -> Self {
        RatingInput {
            manager: stat.manager.clone(),
            final_ranks: stat.placements.iter().map(|p| p.final_rank).collect(),
            trophies: stat.trophy_seasons.clone(),
            ppg: stat.ppg,
            plus_g: stat.points_for,
            seasons_played: stat.seasons_played,
        }
    }
}

/// Population statistics every individual rating depends on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PopulationStats {
    pub mean_ppg: f64,
    pub plus_g: PoolStats,
}

impl PopulationStats {
    /// With fewer than two managers the `plus_g` spread is forced to zero so
    /// the margin modifier is neutral.
    pub fn from_inputs(inputs: &[RatingInput]) -> Self {
        let ppg: Vec<f64> = inputs.iter().map(|i| i.ppg).collect();
        let plus_g: Vec<f64> = inputs.iter().map(|i| i.plus_g).collect();
        let mut plus_g = compute_pool_stats(&plus_g);
        if inputs.len() < 2 {
            plus_g.stdev = 0.0;
        }
        PopulationStats {
            mean_ppg: compute_pool_stats(&ppg).mean,
            plus_g,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RatingRecord {
    pub manager: ManagerId,
    pub rating: f64,
    pub placement_score: f64,
    pub silverware_score: f64,
    pub ppg_score: f64,
    pub g_modifier: f64,
    pub base_score: f64,
    pub ppg: f64,
    pub plus_g: f64,
    pub seasons_played: usize,
}

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

/// Sum of the placement table over `ranks`. Ranks outside the table score 0.
pub fn placement_score(ranks: &[u32], config: &RatingConfig) -> f64 {
    ranks
        .iter()
        .filter_map(|&rank| {
            let idx = usize::try_from(rank).ok()?.checked_sub(1)?;
            config.placement_points.get(idx).copied()
        })
        .sum()
}

/// Silverware for one season's trophy row.
pub fn season_silverware(trophy: &TrophyRow, config: &RatingConfig) -> f64 {
    let won = trophy.count();
    if won == 0 {
        return 0.0;
    }
    let mut base = 0.0;
    if trophy.won_league {
        base += config.league_value;
    }
    if trophy.won_cup {
        base += config.cup_value;
    }
    if trophy.won_goblet {
        base += config.goblet_value;
    }
    base * config.sweep_multipliers[won.min(3) - 1]
}

pub fn silverware_score(trophies: &[TrophyRow], config: &RatingConfig) -> f64 {
    trophies.iter().map(|t| season_silverware(t, config)).sum()
}

/// Scoring-rate term. `ppg` is clamped to `[0, ppg_max]`; zero ppg scores 0.
pub fn ppg_score(ppg: f64, mean_ppg: f64, config: &RatingConfig) -> f64 {
    if !ppg.is_finite() || ppg <= 0.0 || config.ppg_max <= 0.0 {
        return 0.0;
    }
    let clamped = ppg.min(config.ppg_max);
    config.scale
        * (clamped / config.ppg_max).powf(config.exponent)
        * (config.lambda * (clamped - mean_ppg)).exp()
}

/// Margin modifier from the standard score of `plus_g`.
pub fn g_modifier(plus_g: f64, stats: &PoolStats, config: &RatingConfig) -> f64 {
    1.0 + config.alpha * compute_zscore(plus_g, stats).tanh()
}

// ---------------------------------------------------------------------------
// Ratings
// ---------------------------------------------------------------------------

/// Rate one manager against explicit population statistics.
pub fn rate_one(
    input: &RatingInput,
    population: &PopulationStats,
    config: &RatingConfig,
) -> RatingRecord {
    let placement = placement_score(&input.final_ranks, config);
    let silverware = silverware_score(&input.trophies, config);
    let ppg_term = ppg_score(input.ppg, population.mean_ppg, config);
    let modifier = g_modifier(input.plus_g, &population.plus_g, config);
    let base = placement + silverware + ppg_term;
    RatingRecord {
        manager: input.manager.clone(),
        rating: base * modifier,
        placement_score: placement,
        silverware_score: silverware,
        ppg_score: ppg_term,
        g_modifier: modifier,
        base_score: base,
        ppg: input.ppg,
        plus_g: input.plus_g,
        seasons_played: input.seasons_played,
    }
}

/// Rate every manager of the population, highest rating first (ties by
/// manager id).
pub fn rate_population(inputs: &[RatingInput], config: &RatingConfig) -> Vec<RatingRecord> {
    let population = PopulationStats::from_inputs(inputs);
    let mut records: Vec<RatingRecord> = inputs
        .iter()
        .map(|input| rate_one(input, &population, config))
        .collect();
    records.sort_by(|a, b| {
        b.rating
            .total_cmp(&a.rating)
            .then_with(|| a.manager.cmp(&b.manager))
    });
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Season;

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    fn trophy(season: &str, league: bool, cup: bool, goblet: bool) -> TrophyRow {
        TrophyRow {
            season: Season::parse(season).unwrap(),
            manager: ManagerId::new("X"),
            won_league: league,
            won_cup: cup,
            won_goblet: goblet,
        }
    }

    fn input(
        manager: &str,
        ranks: Vec<u32>,
        trophies: Vec<TrophyRow>,
        ppg: f64,
        plus_g: f64,
    ) -> RatingInput {
        RatingInput {
            manager: ManagerId::new(manager),
            final_ranks: ranks,
            trophies,
            ppg,
            plus_g,
            seasons_played: 2,
        }
    }

    fn golden_population() -> Vec<RatingInput> {
        vec![
            input("X", vec![2], vec![trophy("2023/24", true, true, false)], 2.0, 1000.0),
            input("Y", vec![5], Vec::new(), 1.0, 900.0),
            input("Z", vec![8], Vec::new(), 1.5, 1100.0),
        ]
    }

    // ---- pool stats ----

    #[test]
    fn pool_stats_known_values() {
        // Mean 5, population variance 32/8 = 4, stdev 2.
        let values = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let stats = compute_pool_stats(&values);
        assert!(approx_eq(stats.mean, 5.0, 1e-10));
        assert!(approx_eq(stats.stdev, 2.0, 1e-10));
    }

    #[test]
    fn pool_stats_empty() {
        let stats = compute_pool_stats(&[]);
        assert!(approx_eq(stats.mean, 0.0, 1e-10));
        assert!(approx_eq(stats.stdev, 0.0, 1e-10));
    }

    #[test]
    fn zscore_zero_stdev_returns_zero() {
        let stats = PoolStats {
            mean: 42.0,
            stdev: 0.0,
        };
        assert!(approx_eq(compute_zscore(100.0, &stats), 0.0, 1e-10));
    }

    // ---- components ----

    #[test]
    fn placement_table_lookup() {
        let cfg = RatingConfig::default();
        assert!(approx_eq(placement_score(&[2], &cfg), 10.0, 1e-12));
        assert!(approx_eq(placement_score(&[1, 10], &cfg), 3.0, 1e-12));
        assert!(approx_eq(placement_score(&[0, 11, 7], &cfg), 0.0, 1e-12));
    }

    #[test]
    fn silverware_sweep_multipliers() {
        let cfg = RatingConfig::default();
        let value = |league, cup, goblet| {
            season_silverware(&trophy("2020/21", league, cup, goblet), &cfg)
        };
        assert!(approx_eq(value(true, false, false), 10.0, 1e-12));
        assert!(approx_eq(value(true, true, false), 20.0, 1e-12));
        assert!(approx_eq(value(true, true, true), 26.6, 1e-9));
        assert!(approx_eq(value(false, false, false), 0.0, 1e-12));
    }

    #[test]
    fn zero_games_gives_zero_ppg_term() {
        let cfg = RatingConfig::default();
        let term = ppg_score(0.0, 1.5, &cfg);
        assert_eq!(term, 0.0);
        assert!(!term.is_nan());
    }

    #[test]
    fn ppg_is_clamped() {
        let cfg = RatingConfig::default();
        assert!(approx_eq(ppg_score(3.5, 1.5, &cfg), ppg_score(3.0, 1.5, &cfg), 1e-12));
    }

    // ---- ratings ----

    #[test]
    fn golden_scenario() {
        let cfg = RatingConfig::default();
        let records = rate_population(&golden_population(), &cfg);
        let x = records.iter().find(|r| r.manager.as_str() == "X").unwrap();
        assert!(approx_eq(x.placement_score, 10.0, 1e-12));
        assert!(approx_eq(x.silverware_score, 20.0, 1e-12));
        assert!(approx_eq(x.ppg_score, 27.957396334662388, 1e-9));
        assert_eq!(x.g_modifier, 1.0);
        assert!(approx_eq(x.rating, 57.9574, 1e-4));
        assert_eq!(records[0].manager.as_str(), "X");
    }

    #[test]
    fn higher_ppg_rates_strictly_higher() {
        let cfg = RatingConfig::default();
        let mut pop = golden_population();
        pop.push(input("W", vec![3], Vec::new(), 1.2, 1000.0));
        pop.push(input("V", vec![3], Vec::new(), 1.4, 1000.0));
        let records = rate_population(&pop, &cfg);
        let rating = |m: &str| records.iter().find(|r| r.manager.as_str() == m).unwrap().rating;
        assert!(rating("V") > rating("W"));
    }

    #[test]
    fn mean_plus_g_is_neutral() {
        let cfg = RatingConfig::default();
        let stats = PopulationStats::from_inputs(&golden_population());
        assert_eq!(g_modifier(1000.0, &stats.plus_g, &cfg), 1.0);
        assert!(g_modifier(1100.0, &stats.plus_g, &cfg) > 1.0);
        assert!(g_modifier(900.0, &stats.plus_g, &cfg) < 1.0);
    }

    #[test]
    fn single_manager_has_neutral_modifier() {
        let cfg = RatingConfig::default();
        let records = rate_population(&[input("X", vec![1], Vec::new(), 2.0, 5000.0)], &cfg);
        assert_eq!(records[0].g_modifier, 1.0);
    }

    #[test]
    fn rating_depends_on_population() {
        let cfg = RatingConfig::default();
        let x = input("X", vec![2], Vec::new(), 2.0, 1000.0);
        let weak_peer = input("Y", vec![], vec![], 1.0, 900.0);
        let strong_peer = input("Y", vec![], vec![], 2.5, 1400.0);
        let weak = PopulationStats::from_inputs(&[x.clone(), weak_peer]);
        let strong = PopulationStats::from_inputs(&[x.clone(), strong_peer]);
        assert!(rate_one(&x, &weak, &cfg).rating > rate_one(&x, &strong, &cfg).rating);
    }

    #[test]
    fn empty_population_is_empty() {
        assert!(rate_population(&[], &RatingConfig::default()).is_empty());
    }
}
