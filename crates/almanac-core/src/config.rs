// Configuration loading and parsing (almanac.toml).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::model::Season;

/// The configuration shipped with the crate, written out by `write_default_config`.
pub const DEFAULT_CONFIG: &str = include_str!("../defaults/almanac.toml");

const CONFIG_FILE_NAME: &str = "almanac.toml";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to write default config: {message}")]
    WriteError { message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub league: LeagueConfig,
    pub current_season: Season,
    pub roster: RosterConfig,
    pub rating: RatingConfig,
    pub streaks: StreakConfig,
    pub source: SourceConfig,
    pub db_path: String,
}

// ---------------------------------------------------------------------------
// almanac.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire almanac.toml file.
#[derive(Debug, Clone, Deserialize)]
struct ConfigFile {
    league: LeagueConfig,
    roster: RosterConfig,
    #[serde(default)]
    rating: RatingConfig,
    #[serde(default)]
    streaks: StreakConfig,
    #[serde(default)]
    source: SourceConfig,
    database: DatabaseSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeagueConfig {
    pub name: String,
    pub current_season: String,
}

/// The closed manager roster and the alias table mapping historical
/// spellings onto it.
#[derive(Debug, Clone, Deserialize)]
pub struct RosterConfig {
    pub members: Vec<String>,
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

/// Constants of the composite manager rating.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RatingConfig {
    /// Points per final league rank, index 0 = 1st place.
    pub placement_points: Vec<f64>,
    pub league_value: f64,
    pub cup_value: f64,
    pub goblet_value: f64,
    /// Multiplier for winning one, two or three competitions in one season.
    pub sweep_multipliers: [f64; 3],
    pub scale: f64,
    pub ppg_max: f64,
    pub exponent: f64,
    pub lambda: f64,
    pub alpha: f64,
}

impl Default for RatingConfig {
    fn default() -> Self {
        RatingConfig {
            placement_points: vec![8.0, 10.0, 7.0, 5.0, 3.0, 1.0, 0.0, -1.0, -3.0, -5.0],
            league_value: 10.0,
            cup_value: 6.0,
            goblet_value: 3.0,
            sweep_multipliers: [1.0, 1.25, 1.4],
            scale: 40.0,
            ppg_max: 3.0,
            exponent: 1.5,
            lambda: 0.5,
            alpha: 0.1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreakConfig {
    /// Let a streak continue from a season's final gameweek into gameweek 1
    /// of the following season.
    pub bridge_seasons: bool,
    pub final_gameweek: u32,
}

impl Default for StreakConfig {
    fn default() -> Self {
        StreakConfig {
            bridge_seasons: false,
            final_gameweek: 38,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Base URL of the authoritative match source. When absent the engine
    /// runs offline on persisted rows.
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            base_url: None,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseSection {
    path: String,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Parse and validate configuration text. `path` is only used for error
/// messages.
pub fn parse_config(text: &str, path: &Path) -> Result<Config, ConfigError> {
    let file: ConfigFile = toml::from_str(text).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })?;

    let current_season =
        Season::parse(&file.league.current_season).map_err(|e| ConfigError::ValidationError {
            field: "league.current_season".into(),
            message: e.to_string(),
        })?;

    let config = Config {
        league: file.league,
        current_season,
        roster: file.roster,
        rating: file.rating,
        streaks: file.streaks,
        source: file.source,
        db_path: file.database.path,
    };

    validate(&config)?;

    Ok(config)
}

/// Load and validate configuration from the given file.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let text = read_file(path)?;
    parse_config(&text, path)
}

/// Pick the config file to use: an explicit path, else `./almanac.toml`,
/// else `almanac.toml` in the platform config directory.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return local;
    }
    match directories::ProjectDirs::from("", "", "almanac") {
        Some(dirs) => dirs.config_dir().join(CONFIG_FILE_NAME),
        None => local,
    }
}

/// Convenience wrapper: resolve the config path and load it.
pub fn load_config(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    load_config_from(&resolve_config_path(explicit))
}

/// Write the bundled default configuration to `path` unless a file already
/// exists there. Returns `true` when a file was written.
pub fn write_default_config(path: &Path) -> Result<bool, ConfigError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
            message: format!("failed to create {}: {e}", parent.display()),
        })?;
    }

    match std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
    {
        Ok(mut dest) => {
            std::io::Write::write_all(&mut dest, DEFAULT_CONFIG.as_bytes()).map_err(|e| {
                ConfigError::WriteError {
                    message: format!("failed to write {}: {e}", path.display()),
                }
            })?;
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(ConfigError::WriteError {
            message: format!("failed to create {}: {e}", path.display()),
        }),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.into(),
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    // Roster shape is checked again (with alias conflicts) when the Roster
    // is built; these are the checks that need no alias resolution.
    if config.roster.members.is_empty() {
        return Err(invalid("roster.members", "must list at least one manager"));
    }

    let r = &config.rating;
    if r.placement_points.is_empty() {
        return Err(invalid("rating.placement_points", "must not be empty"));
    }
    if r.ppg_max <= 0.0 {
        return Err(invalid(
            "rating.ppg_max",
            format!("must be > 0, got {}", r.ppg_max),
        ));
    }
    if !(0.0..=1.0).contains(&r.alpha) {
        return Err(invalid(
            "rating.alpha",
            format!("must be between 0.0 and 1.0 inclusive, got {}", r.alpha),
        ));
    }
    let finite_fields: &[(&str, f64)] = &[
        ("rating.league_value", r.league_value),
        ("rating.cup_value", r.cup_value),
        ("rating.goblet_value", r.goblet_value),
        ("rating.scale", r.scale),
        ("rating.exponent", r.exponent),
        ("rating.lambda", r.lambda),
    ];
    for (name, val) in finite_fields {
        if !val.is_finite() {
            return Err(invalid(name, format!("must be finite, got {val}")));
        }
    }
    if r.sweep_multipliers.iter().any(|m| *m <= 0.0) {
        return Err(invalid("rating.sweep_multipliers", "must all be > 0"));
    }

    if config.streaks.bridge_seasons && config.streaks.final_gameweek == 0 {
        return Err(invalid(
            "streaks.final_gameweek",
            "must be > 0 when bridge_seasons is enabled",
        ));
    }

    if config.source.timeout_secs == 0 {
        return Err(invalid("source.timeout_secs", "must be > 0"));
    }

    if config.db_path.trim().is_empty() {
        return Err(invalid("database.path", "must not be empty"));
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn default_path() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("defaults/almanac.toml")
    }

    fn parse_modified(from: &str, to: &str) -> Result<Config, ConfigError> {
        assert!(DEFAULT_CONFIG.contains(from), "default config lacks `{from}`");
        let text = DEFAULT_CONFIG.replace(from, to);
        parse_config(&text, Path::new("test.toml"))
    }

    fn expect_field(result: Result<Config, ConfigError>, expected: &str) {
        match result {
            Err(ConfigError::ValidationError { field, .. }) => assert_eq!(field, expected),
            Err(other) => panic!("expected ValidationError, got: {other}"),
            Ok(_) => panic!("expected ValidationError for {expected}, got Ok"),
        }
    }

    #[test]
    fn load_valid_config_from_project_files() {
        let config = load_config_from(&default_path()).expect("should load valid config");

        assert_eq!(config.league.name, "Sunday League Fantasy H2H");
        assert_eq!(config.current_season.label(), "2024/25");
        assert_eq!(config.roster.members.len(), 10);
        assert_eq!(config.roster.aliases.get("KRIS").map(String::as_str), Some("CHRIS"));
        assert_eq!(config.rating.placement_points.len(), 10);
        assert!((config.rating.placement_points[1] - 10.0).abs() < f64::EPSILON);
        assert!((config.rating.sweep_multipliers[2] - 1.4).abs() < f64::EPSILON);
        assert!(!config.streaks.bridge_seasons);
        assert!(config.source.base_url.is_none());
        assert_eq!(config.source.timeout_secs, 10);
        assert_eq!(config.db_path, "almanac.db");
    }

    #[test]
    fn optional_sections_fall_back_to_defaults() {
        let text = r#"
[league]
name = "Tiny"
current_season = "2023/24"

[roster]
members = ["A", "B"]

[database]
path = ":memory:"
"#;
        let config = parse_config(text, Path::new("tiny.toml")).expect("should parse");
        assert!(config.roster.aliases.is_empty());
        assert_eq!(config.rating.placement_points, RatingConfig::default().placement_points);
        assert_eq!(config.streaks.final_gameweek, 38);
        assert_eq!(config.source.timeout_secs, 10);
    }

    #[test]
    fn rejects_bad_current_season() {
        expect_field(
            parse_modified("current_season = \"2024/25\"", "current_season = \"next year\""),
            "league.current_season",
        );
    }

    #[test]
    fn rejects_empty_roster() {
        let members = "members = [\"ADAM\", \"BEN\", \"CHRIS\", \"DAVE\", \"ED\", \"FINN\", \"GARY\", \"HARRY\", \"IAN\", \"JOE\"]";
        expect_field(parse_modified(members, "members = []"), "roster.members");
    }

    #[test]
    fn rejects_alpha_out_of_range() {
        expect_field(parse_modified("alpha = 0.1", "alpha = 1.5"), "rating.alpha");
    }

    #[test]
    fn rejects_non_positive_ppg_max() {
        expect_field(parse_modified("ppg_max = 3.0", "ppg_max = 0.0"), "rating.ppg_max");
    }

    #[test]
    fn rejects_zero_timeout() {
        expect_field(
            parse_modified("timeout_secs = 10", "timeout_secs = 0"),
            "source.timeout_secs",
        );
    }

    #[test]
    fn rejects_bridging_without_final_gameweek() {
        let text = DEFAULT_CONFIG
            .replace("bridge_seasons = false", "bridge_seasons = true")
            .replace("final_gameweek = 38", "final_gameweek = 0");
        expect_field(
            parse_config(&text, Path::new("test.toml")),
            "streaks.final_gameweek",
        );
    }

    #[test]
    fn parse_error_for_invalid_toml() {
        let err = parse_config("this is not valid [[[ toml", Path::new("broken.toml")).unwrap_err();
        match &err {
            ConfigError::ParseError { path, .. } => assert!(path.ends_with("broken.toml")),
            other => panic!("expected ParseError, got: {other}"),
        }
    }

    #[test]
    fn file_not_found_for_missing_file() {
        let missing = std::env::temp_dir().join("almanac_config_test_missing/almanac.toml");
        let err = load_config_from(&missing).unwrap_err();
        match &err {
            ConfigError::FileNotFound { path } => assert!(path.ends_with("almanac.toml")),
            other => panic!("expected FileNotFound, got: {other}"),
        }
    }

    #[test]
    fn explicit_path_wins_resolution() {
        let explicit = Path::new("/somewhere/else.toml");
        assert_eq!(resolve_config_path(Some(explicit)), explicit.to_path_buf());
    }

    #[test]
    fn write_default_config_creates_then_skips() {
        let tmp = std::env::temp_dir().join("almanac_config_test_write_default");
        let _ = fs::remove_dir_all(&tmp);
        let target = tmp.join("nested/almanac.toml");

        assert!(write_default_config(&target).expect("first write should succeed"));
        let written = fs::read_to_string(&target).unwrap();
        assert_eq!(written, DEFAULT_CONFIG);

        // Existing files are never overwritten.
        fs::write(&target, "# custom\n").unwrap();
        assert!(!write_default_config(&target).expect("second call should succeed"));
        assert_eq!(fs::read_to_string(&target).unwrap(), "# custom\n");

        let _ = fs::remove_dir_all(&tmp);
    }
}
