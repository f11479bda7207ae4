// Authoritative current-season match source.
//
// The engine only ever asks two questions of the source: which gameweek was
// the last one completed, and what were the matches up to it. `HttpMatchSource`
// answers them over JSON/HTTP; `StaticMatchSource` answers them from memory.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::model::Season;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One match as reported by the source, before identity resolution.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawMatch {
    pub gameweek: u32,
    pub side_a: String,
    pub side_b: String,
    pub points_a: f64,
    pub points_b: f64,
}

impl RawMatch {
    pub fn new(gameweek: u32, side_a: &str, points_a: f64, side_b: &str, points_b: f64) -> Self {
        RawMatch {
            gameweek,
            side_a: side_a.to_string(),
            side_b: side_b.to_string(),
            points_a,
            points_b,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("match source request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("match source returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("match source timed out after {0:?}")]
    Timeout(Duration),

    #[error("match source unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait MatchSource: Send + Sync {
    /// The last fully completed gameweek of `season`, or `None` before the
    /// first one finishes.
    async fn latest_completed_gameweek(&self, season: &Season) -> Result<Option<u32>, SourceError>;

    /// Every match of `season` up to and including gameweek `through`.
    async fn fetch_matches(
        &self,
        season: &Season,
        through: u32,
    ) -> Result<Vec<RawMatch>, SourceError>;
}

// ---------------------------------------------------------------------------
// HTTP source
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct StatusResponse {
    latest_completed_gameweek: Option<u32>,
}

/// Any non-2xx response is a source failure.
fn check_status(status: reqwest::StatusCode, url: String) -> Result<(), SourceError> {
    if status.is_success() {
        return Ok(());
    }
    Err(SourceError::Status {
        status: status.as_u16(),
        url,
    })
}

/// JSON-over-HTTP match source.
///
/// - `GET {base}/seasons/{season}/status` -> `{"latest_completed_gameweek": n}`
/// - `GET {base}/seasons/{season}/matches?through=n` -> `[RawMatch, ...]`
///
/// Season labels contain a `/`, so they are sent with it replaced by `-`.
pub struct HttpMatchSource {
    http: reqwest::Client,
    base_url: String,
}

impl HttpMatchSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn season_url(&self, season: &Season) -> String {
        format!(
            "{}/seasons/{}",
            self.base_url,
            season.label().replace('/', "-")
        )
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: String,
    ) -> Result<T, SourceError> {
        debug!(%url, "fetching from match source");
        let response = self.http.get(&url).send().await?;
        check_status(response.status(), url)?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl MatchSource for HttpMatchSource {
    async fn latest_completed_gameweek(&self, season: &Season) -> Result<Option<u32>, SourceError> {
        let url = format!("{}/status", self.season_url(season));
        let status: StatusResponse = self.get_json(url).await?;
        Ok(status.latest_completed_gameweek)
    }

    async fn fetch_matches(
        &self,
        season: &Season,
        through: u32,
    ) -> Result<Vec<RawMatch>, SourceError> {
        let url = format!("{}/matches?through={through}", self.season_url(season));
        self.get_json(url).await
    }
}

// ---------------------------------------------------------------------------
// In-memory and offline sources
// ---------------------------------------------------------------------------

/// Serves one season's matches from memory.
#[derive(Debug, Clone)]
pub struct StaticMatchSource {
    season: Season,
    latest_completed: Option<u32>,
    matches: Vec<RawMatch>,
}

impl StaticMatchSource {
    pub fn new(season: Season, latest_completed: Option<u32>, matches: Vec<RawMatch>) -> Self {
        Self {
            season,
            latest_completed,
            matches,
        }
    }
}

#[async_trait]
impl MatchSource for StaticMatchSource {
    async fn latest_completed_gameweek(&self, season: &Season) -> Result<Option<u32>, SourceError> {
        if *season != self.season {
            return Ok(None);
        }
        Ok(self.latest_completed)
    }

    async fn fetch_matches(
        &self,
        season: &Season,
        through: u32,
    ) -> Result<Vec<RawMatch>, SourceError> {
        if *season != self.season {
            return Ok(Vec::new());
        }
        Ok(self
            .matches
            .iter()
            .filter(|m| m.gameweek <= through)
            .cloned()
            .collect())
    }
}

/// Used when no source is configured: every request fails, so reads fall
/// back to persisted rows and syncs report "not synced".
#[derive(Debug, Clone, Default)]
pub struct OfflineSource;

#[async_trait]
impl MatchSource for OfflineSource {
    async fn latest_completed_gameweek(
        &self,
        _season: &Season,
    ) -> Result<Option<u32>, SourceError> {
        Err(SourceError::Unavailable("no match source configured".into()))
    }

    async fn fetch_matches(
        &self,
        _season: &Season,
        _through: u32,
    ) -> Result<Vec<RawMatch>, SourceError> {
        Err(SourceError::Unavailable("no match source configured".into()))
    }
}
