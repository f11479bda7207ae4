// SQLite persistence layer for the historical ledger and its derived tables.

use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use rusqlite::{params, Connection, Row, Transaction};
use tracing::warn;

use crate::identity::Roster;
use crate::legacy::LegacyBatch;
use crate::model::{
    Competition, GameResult, GameweekRow, ManagerId, PairwiseRecord, Season, SeasonMetaRow,
    StandingRow, TrophyRow,
};
use crate::sync::{DerivedSeason, SyncReport};

/// Pairwise rows with this season value are legacy "all seasons merged"
/// aggregates.
const ALL_SEASONS: &str = "";

// ---------------------------------------------------------------------------
// Storage abstraction
// ---------------------------------------------------------------------------

/// The range of stored rows a sync recomputes.
#[derive(Debug, Clone, PartialEq)]
pub struct SeasonScope {
    pub season: Season,
    pub competition: Competition,
    pub through_gameweek: u32,
}

/// Row counts written by a legacy import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ImportCounts {
    pub results: usize,
    pub standings: usize,
    pub trophies: usize,
    pub meta: usize,
    pub pairwise: usize,
}

/// Typed read/replace access to the stored record sets.
///
/// `replace_season` and `import_legacy` must be atomic: readers never see a
/// half-replaced season.
pub trait RecordStore: Send + Sync {
    /// Rows from the append-only legacy import table.
    fn legacy_results(&self) -> Result<Vec<GameweekRow>>;
    /// Rows written by the synchronizer.
    fn synced_results(&self) -> Result<Vec<GameweekRow>>;
    fn standings(&self) -> Result<Vec<StandingRow>>;
    fn trophies(&self) -> Result<Vec<TrophyRow>>;
    fn season_meta(&self) -> Result<Vec<SeasonMetaRow>>;
    fn pairwise_records(&self) -> Result<Vec<PairwiseRecord>>;

    /// Delete the rows covered by `scope` and insert `rows` in their place.
    fn replace_season(&self, scope: &SeasonScope, rows: &DerivedSeason) -> Result<()>;
    fn import_legacy(&self, batch: &LegacyBatch) -> Result<ImportCounts>;

    fn record_sync(&self, report: &SyncReport) -> Result<()>;
    fn last_sync(&self, season: &Season) -> Result<Option<SyncReport>>;
}

// ---------------------------------------------------------------------------
// SQLite implementation
// ---------------------------------------------------------------------------

/// SQLite-backed record store.
pub struct Database {
    conn: Mutex<Connection>,
    roster: Roster,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database (useful
    /// for tests). Stored manager tokens are re-admitted through `roster`.
    pub fn open(path: &str, roster: Roster) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS legacy_results (
                season         TEXT NOT NULL,
                gameweek       INTEGER NOT NULL,
                manager        TEXT NOT NULL,
                opponent       TEXT NOT NULL,
                points_for     REAL NOT NULL,
                points_against REAL NOT NULL,
                result         TEXT NOT NULL,
                PRIMARY KEY (season, gameweek, manager)
            );

            CREATE TABLE IF NOT EXISTS gameweek_results (
                season         TEXT NOT NULL,
                gameweek       INTEGER NOT NULL,
                manager        TEXT NOT NULL,
                opponent       TEXT NOT NULL,
                points_for     REAL NOT NULL,
                points_against REAL NOT NULL,
                result         TEXT NOT NULL,
                PRIMARY KEY (season, gameweek, manager)
            );

            CREATE TABLE IF NOT EXISTS season_standings (
                season         TEXT NOT NULL,
                competition    TEXT NOT NULL,
                manager        TEXT NOT NULL,
                final_rank     INTEGER NOT NULL,
                wins           INTEGER NOT NULL,
                draws          INTEGER NOT NULL,
                losses         INTEGER NOT NULL,
                points         INTEGER NOT NULL,
                points_for     REAL NOT NULL,
                points_against REAL NOT NULL,
                PRIMARY KEY (season, competition, manager)
            );

            CREATE TABLE IF NOT EXISTS trophies (
                season     TEXT NOT NULL,
                manager    TEXT NOT NULL,
                won_league INTEGER NOT NULL DEFAULT 0,
                won_cup    INTEGER NOT NULL DEFAULT 0,
                won_goblet INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (season, manager)
            );

            CREATE TABLE IF NOT EXISTS season_meta (
                season        TEXT NOT NULL,
                manager       TEXT NOT NULL,
                transfers     INTEGER NOT NULL DEFAULT 0,
                transfer_cost INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (season, manager)
            );

            CREATE TABLE IF NOT EXISTS pairwise_results (
                season   TEXT NOT NULL DEFAULT '',
                manager  TEXT NOT NULL,
                opponent TEXT NOT NULL,
                wins     INTEGER NOT NULL,
                draws    INTEGER NOT NULL,
                losses   INTEGER NOT NULL,
                PRIMARY KEY (season, manager, opponent)
            );

            CREATE TABLE IF NOT EXISTS sync_state (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
            roster,
        })
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock). This should never happen in normal operation.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    fn sync_key(season: &Season) -> String {
        format!("last_sync:{}", season.label())
    }

    // ------------------------------------------------------------------
    // Row decoding
    // ------------------------------------------------------------------

    /// Turn stored text columns back into typed values. Rows whose season or
    /// managers no longer parse (e.g. a manager removed from the roster) are
    /// skipped with a warning rather than failing the whole read.
    fn admit(
        &self,
        table: &str,
        season: &str,
        managers: &[&str],
    ) -> Option<(Season, Vec<ManagerId>)> {
        let season = match Season::parse(season) {
            Ok(s) => s,
            Err(e) => {
                warn!("skipping {table} row: {e}");
                return None;
            }
        };
        let mut ids = Vec::with_capacity(managers.len());
        for token in managers {
            match self.roster.member(token) {
                Some(id) => ids.push(id),
                None => {
                    warn!("skipping {table} row: `{token}` is not a roster member");
                    return None;
                }
            }
        }
        Some((season, ids))
    }

    fn load_results(&self, table: &str) -> Result<Vec<GameweekRow>> {
        struct Raw {
            season: String,
            gameweek: u32,
            manager: String,
            opponent: String,
            points_for: f64,
            points_against: f64,
            result: String,
        }

        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT season, gameweek, manager, opponent, points_for, points_against, result
                 FROM {table} ORDER BY season, gameweek, manager"
            ))
            .with_context(|| format!("failed to prepare {table} query"))?;

        let raws = stmt
            .query_map([], |row| {
                Ok(Raw {
                    season: row.get(0)?,
                    gameweek: row.get(1)?,
                    manager: row.get(2)?,
                    opponent: row.get(3)?,
                    points_for: row.get(4)?,
                    points_against: row.get(5)?,
                    result: row.get(6)?,
                })
            })
            .with_context(|| format!("failed to query {table}"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context(|| format!("failed to map {table} rows"))?;

        let mut rows = Vec::with_capacity(raws.len());
        for raw in raws {
            let Some((season, ids)) = self.admit(table, &raw.season, &[&raw.manager, &raw.opponent])
            else {
                continue;
            };
            let result = match GameResult::from_token(&raw.result) {
                Ok(r) => r,
                Err(e) => {
                    warn!("skipping {table} row: {e}");
                    continue;
                }
            };
            let [manager, opponent]: [ManagerId; 2] = match ids.try_into() {
                Ok(pair) => pair,
                Err(_) => continue,
            };
            rows.push(GameweekRow {
                season,
                gameweek: raw.gameweek,
                manager,
                opponent,
                points_for: raw.points_for,
                points_against: raw.points_against,
                result,
            });
        }
        Ok(rows)
    }

    // ------------------------------------------------------------------
    // Writers shared by sync and import
    // ------------------------------------------------------------------

    fn insert_results(
        tx: &Transaction<'_>,
        table: &str,
        rows: &[GameweekRow],
        verb: &str,
    ) -> Result<usize> {
        let mut stmt = tx
            .prepare(&format!(
                "{verb} INTO {table}
                    (season, gameweek, manager, opponent, points_for, points_against, result)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
            ))
            .with_context(|| format!("failed to prepare {table} insert"))?;
        let mut written = 0;
        for r in rows {
            written += stmt
                .execute(params![
                    r.season.label(),
                    r.gameweek,
                    r.manager.as_str(),
                    r.opponent.as_str(),
                    r.points_for,
                    r.points_against,
                    r.result.token(),
                ])
                .with_context(|| format!("failed to insert into {table}"))?;
        }
        Ok(written)
    }

    fn insert_standings(tx: &Transaction<'_>, rows: &[StandingRow]) -> Result<usize> {
        let mut stmt = tx
            .prepare(
                "INSERT OR REPLACE INTO season_standings
                    (season, competition, manager, final_rank, wins, draws, losses,
                     points, points_for, points_against)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )
            .context("failed to prepare standings insert")?;
        for s in rows {
            stmt.execute(params![
                s.season.label(),
                s.competition.as_str(),
                s.manager.as_str(),
                s.final_rank,
                s.wins,
                s.draws,
                s.losses,
                s.points,
                s.points_for,
                s.points_against,
            ])
            .context("failed to insert standing row")?;
        }
        Ok(rows.len())
    }

    fn insert_pairwise(tx: &Transaction<'_>, rows: &[PairwiseRecord]) -> Result<usize> {
        let mut stmt = tx
            .prepare(
                "INSERT OR REPLACE INTO pairwise_results
                    (season, manager, opponent, wins, draws, losses)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )
            .context("failed to prepare pairwise insert")?;
        for p in rows {
            let season = p.season.as_ref().map(Season::label).unwrap_or(ALL_SEASONS);
            stmt.execute(params![
                season,
                p.manager.as_str(),
                p.opponent.as_str(),
                p.wins,
                p.draws,
                p.losses,
            ])
            .context("failed to insert pairwise row")?;
        }
        Ok(rows.len())
    }

    /// Persist an arbitrary JSON value under `key`. Uses INSERT OR REPLACE so
    /// repeated saves overwrite the previous value.
    pub fn save_state(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let conn = self.conn();
        let json_str = serde_json::to_string(value).context("failed to serialize state value")?;
        conn.execute(
            "INSERT OR REPLACE INTO sync_state (key, value) VALUES (?1, ?2)",
            params![key, json_str],
        )
        .context("failed to save state")?;
        Ok(())
    }

    /// Load a previously saved JSON value by `key`. Returns `None` if the key
    /// does not exist.
    pub fn load_state(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT value FROM sync_state WHERE key = ?1")
            .context("failed to prepare load_state query")?;

        let mut rows = stmt
            .query_map(params![key], |row| row.get::<_, String>(0))
            .context("failed to query sync state")?;

        match rows.next() {
            Some(row_result) => {
                let json_str = row_result.context("failed to read state row")?;
                let value = serde_json::from_str(&json_str)
                    .context("failed to deserialize state value")?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

fn get_bool(row: &Row<'_>, idx: usize) -> rusqlite::Result<bool> {
    Ok(row.get::<_, i64>(idx)? != 0)
}

impl RecordStore for Database {
    fn legacy_results(&self) -> Result<Vec<GameweekRow>> {
        self.load_results("legacy_results")
    }

    fn synced_results(&self) -> Result<Vec<GameweekRow>> {
        self.load_results("gameweek_results")
    }

    fn standings(&self) -> Result<Vec<StandingRow>> {
        type Raw = (String, String, String, u32, u32, u32, u32, u32, f64, f64);
        let raws: Vec<Raw> = {
            let conn = self.conn();
            let mut stmt = conn
                .prepare(
                    "SELECT season, competition, manager, final_rank, wins, draws, losses,
                            points, points_for, points_against
                     FROM season_standings ORDER BY season, competition, final_rank",
                )
                .context("failed to prepare standings query")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                        row.get(8)?,
                        row.get(9)?,
                    ))
                })
                .context("failed to query standings")?
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("failed to map standings rows")?;
            rows
        };

        let mut out = Vec::with_capacity(raws.len());
        for (season, competition, manager, rank, w, d, l, pts, pf, pa) in raws {
            let Some((season, mut ids)) = self.admit("season_standings", &season, &[&manager])
            else {
                continue;
            };
            let competition = match Competition::parse(&competition) {
                Ok(c) => c,
                Err(e) => {
                    warn!("skipping season_standings row: {e}");
                    continue;
                }
            };
            out.push(StandingRow {
                season,
                manager: ids.remove(0),
                final_rank: rank,
                wins: w,
                draws: d,
                losses: l,
                points: pts,
                points_for: pf,
                points_against: pa,
                competition,
            });
        }
        Ok(out)
    }

    fn trophies(&self) -> Result<Vec<TrophyRow>> {
        let raws: Vec<(String, String, bool, bool, bool)> = {
            let conn = self.conn();
            let mut stmt = conn
                .prepare(
                    "SELECT season, manager, won_league, won_cup, won_goblet
                     FROM trophies ORDER BY season, manager",
                )
                .context("failed to prepare trophies query")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        get_bool(row, 2)?,
                        get_bool(row, 3)?,
                        get_bool(row, 4)?,
                    ))
                })
                .context("failed to query trophies")?
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("failed to map trophy rows")?;
            rows
        };

        Ok(raws
            .into_iter()
            .filter_map(|(season, manager, league, cup, goblet)| {
                let (season, mut ids) = self.admit("trophies", &season, &[&manager])?;
                Some(TrophyRow {
                    season,
                    manager: ids.remove(0),
                    won_league: league,
                    won_cup: cup,
                    won_goblet: goblet,
                })
            })
            .collect())
    }

    fn season_meta(&self) -> Result<Vec<SeasonMetaRow>> {
        let raws: Vec<(String, String, u32, u32)> = {
            let conn = self.conn();
            let mut stmt = conn
                .prepare(
                    "SELECT season, manager, transfers, transfer_cost
                     FROM season_meta ORDER BY season, manager",
                )
                .context("failed to prepare season_meta query")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))
                .context("failed to query season_meta")?
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("failed to map season_meta rows")?;
            rows
        };

        Ok(raws
            .into_iter()
            .filter_map(|(season, manager, transfers, cost)| {
                let (season, mut ids) = self.admit("season_meta", &season, &[&manager])?;
                Some(SeasonMetaRow {
                    season,
                    manager: ids.remove(0),
                    transfers,
                    transfer_cost: cost,
                })
            })
            .collect())
    }

    fn pairwise_records(&self) -> Result<Vec<PairwiseRecord>> {
        let raws: Vec<(String, String, String, u32, u32, u32)> = {
            let conn = self.conn();
            let mut stmt = conn
                .prepare(
                    "SELECT season, manager, opponent, wins, draws, losses
                     FROM pairwise_results ORDER BY season, manager, opponent",
                )
                .context("failed to prepare pairwise query")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                })
                .context("failed to query pairwise_results")?
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("failed to map pairwise rows")?;
            rows
        };

        let mut out = Vec::with_capacity(raws.len());
        for (season, manager, opponent, wins, draws, losses) in raws {
            let season = if season == ALL_SEASONS {
                None
            } else {
                match Season::parse(&season) {
                    Ok(s) => Some(s),
                    Err(e) => {
                        warn!("skipping pairwise_results row: {e}");
                        continue;
                    }
                }
            };
            let (Some(manager), Some(opponent)) =
                (self.roster.member(&manager), self.roster.member(&opponent))
            else {
                warn!("skipping pairwise_results row: {manager} v {opponent} not on roster");
                continue;
            };
            out.push(PairwiseRecord {
                season,
                manager,
                opponent,
                wins,
                draws,
                losses,
            });
        }
        Ok(out)
    }

    /// Delete-then-insert inside one transaction with automatic rollback on
    /// error.
    fn replace_season(&self, scope: &SeasonScope, rows: &DerivedSeason) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin transaction")?;
        let season = scope.season.label();

        tx.execute(
            "DELETE FROM gameweek_results WHERE season = ?1 AND gameweek <= ?2",
            params![season, scope.through_gameweek],
        )
        .context("failed to delete stale gameweek rows")?;
        tx.execute(
            "DELETE FROM season_standings WHERE season = ?1 AND competition = ?2",
            params![season, scope.competition.as_str()],
        )
        .context("failed to delete stale standings")?;
        tx.execute(
            "DELETE FROM pairwise_results WHERE season = ?1",
            params![season],
        )
        .context("failed to delete stale pairwise rows")?;

        Self::insert_results(&tx, "gameweek_results", &rows.results, "INSERT")?;
        Self::insert_standings(&tx, &rows.standings)?;
        Self::insert_pairwise(&tx, &rows.pairwise)?;

        tx.commit().context("failed to commit season replace")?;
        Ok(())
    }

    /// Import legacy rows in a single transaction. Legacy results are
    /// append-only (existing keys are kept); season-level rows replace any
    /// previous import of the same key.
    fn import_legacy(&self, batch: &LegacyBatch) -> Result<ImportCounts> {
        let mut conn = self.conn();
        let tx = conn.transaction().context("failed to begin import transaction")?;

        let results =
            Self::insert_results(&tx, "legacy_results", &batch.results, "INSERT OR IGNORE")?;
        let standings = Self::insert_standings(&tx, &batch.standings)?;
        let pairwise = Self::insert_pairwise(&tx, &batch.pairwise)?;

        for t in &batch.trophies {
            tx.execute(
                "INSERT OR REPLACE INTO trophies (season, manager, won_league, won_cup, won_goblet)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    t.season.label(),
                    t.manager.as_str(),
                    t.won_league,
                    t.won_cup,
                    t.won_goblet
                ],
            )
            .context("failed to insert trophy row")?;
        }
        for m in &batch.meta {
            tx.execute(
                "INSERT OR REPLACE INTO season_meta (season, manager, transfers, transfer_cost)
                 VALUES (?1, ?2, ?3, ?4)",
                params![m.season.label(), m.manager.as_str(), m.transfers, m.transfer_cost],
            )
            .context("failed to insert season_meta row")?;
        }

        tx.commit().context("failed to commit import")?;
        Ok(ImportCounts {
            results,
            standings,
            trophies: batch.trophies.len(),
            meta: batch.meta.len(),
            pairwise,
        })
    }

    fn record_sync(&self, report: &SyncReport) -> Result<()> {
        let value = serde_json::to_value(report).context("failed to serialize sync report")?;
        let season = Season::parse(&report.season).context("sync report has invalid season")?;
        self.save_state(&Self::sync_key(&season), &value)
    }

    fn last_sync(&self, season: &Season) -> Result<Option<SyncReport>> {
        match self.load_state(&Self::sync_key(season))? {
            Some(value) => {
                let report = serde_json::from_value(value).context("failed to decode sync report")?;
                Ok(Some(report))
            }
            None => Ok(None),
        }
    }
}
