use crate::quote::Venue;
use chrono::Duration;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

/// Engine configuration.
///
/// Layered from `config/default.toml`, `config/<ARB_ENV>.toml` and `ARB__*`
/// environment variables, in that order. Every field has a default so a bare
/// environment still yields a runnable (dry-run) engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Max age of a quote, and max gap between the two quotes of a pair.
    pub staleness_window_secs: i64,
    pub min_edge_fraction: f64,
    pub max_stake_fraction_per_event: f64,
    pub max_aggregate_exposure_fraction: f64,
    pub intent_timeout_secs: i64,
    pub venue_fees: VenueFees,
    pub team_aliases: Vec<TeamAlias>,
    /// Start times are bucketed to this granularity before matching.
    pub start_time_tolerance_minutes: i64,
    /// Jaro-Winkler floor for names missing from the alias table.
    pub fuzzy_team_threshold: f64,
    pub edge_policy: EdgePolicyConfig,
    pub sizing_policy: SizingPolicyConfig,
    pub min_stake: f64,
    pub poll_interval_secs: u64,
    pub expiry_sweep_interval_ms: u64,
    pub dry_run: bool,
    /// Starting bankroll when `bankroll_path` does not exist yet.
    pub initial_bankroll: f64,
    pub bankroll_path: PathBuf,
    pub wager_log_path: PathBuf,
    pub quote_feed_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueFees {
    pub prediction_market: f64,
    pub sportsbook: f64,
}

impl VenueFees {
    pub fn for_venue(&self, venue: Venue) -> f64 {
        match venue {
            Venue::PredictionMarket => self.prediction_market,
            Venue::Sportsbook => self.sportsbook,
        }
    }
}

impl Default for VenueFees {
    fn default() -> Self {
        Self {
            prediction_market: 0.02, // 2%
            sportsbook: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamAlias {
    pub canonical: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl TeamAlias {
    fn new(canonical: &str, aliases: &[&str]) -> Self {
        Self {
            canonical: canonical.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EdgePolicyConfig {
    #[default]
    ProbabilityGap,
    ExpectedValue,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SizingPolicyConfig {
    FractionalKelly { multiplier: f64 },
    FixedFraction { fraction: f64 },
}

impl Default for SizingPolicyConfig {
    fn default() -> Self {
        SizingPolicyConfig::FractionalKelly { multiplier: 0.25 }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            staleness_window_secs: 600,
            min_edge_fraction: 0.03,
            max_stake_fraction_per_event: 0.05,
            max_aggregate_exposure_fraction: 0.5,
            intent_timeout_secs: 30,
            venue_fees: VenueFees::default(),
            team_aliases: default_team_aliases(),
            start_time_tolerance_minutes: 15,
            fuzzy_team_threshold: 0.92,
            edge_policy: EdgePolicyConfig::default(),
            sizing_policy: SizingPolicyConfig::default(),
            min_stake: 1.0,
            poll_interval_secs: 60,
            expiry_sweep_interval_ms: 1000,
            dry_run: true,
            initial_bankroll: 1000.0,
            bankroll_path: PathBuf::from("tmp/bankroll.json"),
            wager_log_path: PathBuf::from("tmp/wagers.jsonl"),
            quote_feed_path: PathBuf::from("tmp/quotes.json"),
        }
    }
}

impl EngineConfig {
    /// Load configuration from `./config` and the environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();
        let env_name = std::env::var("ARB_ENV").unwrap_or_else(|_| "development".to_string());

        let config: EngineConfig = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join(format!("{}.toml", env_name))).required(false))
            // ARB__MIN_EDGE_FRACTION, ARB__VENUE_FEES__PREDICTION_MARKET, ...
            .add_source(
                Environment::with_prefix("ARB")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fraction_ok = |v: f64| v > 0.0 && v <= 1.0;

        if self.staleness_window_secs <= 0 {
            return Err(ConfigError::Message("staleness_window_secs must be positive".into()));
        }
        if self.intent_timeout_secs <= 0 {
            return Err(ConfigError::Message("intent_timeout_secs must be positive".into()));
        }
        if self.poll_interval_secs == 0 || self.expiry_sweep_interval_ms == 0 {
            return Err(ConfigError::Message("poll and sweep intervals must be positive".into()));
        }
        if self.start_time_tolerance_minutes <= 0 {
            return Err(ConfigError::Message(
                "start_time_tolerance_minutes must be positive".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.min_edge_fraction) {
            return Err(ConfigError::Message("min_edge_fraction must be in [0, 1)".into()));
        }
        if !fraction_ok(self.max_stake_fraction_per_event)
            || !fraction_ok(self.max_aggregate_exposure_fraction)
        {
            return Err(ConfigError::Message("exposure fractions must be in (0, 1]".into()));
        }
        if self.max_stake_fraction_per_event > self.max_aggregate_exposure_fraction {
            return Err(ConfigError::Message(
                "max_stake_fraction_per_event cannot exceed max_aggregate_exposure_fraction".into(),
            ));
        }
        for fee in [self.venue_fees.prediction_market, self.venue_fees.sportsbook] {
            if !(0.0..1.0).contains(&fee) {
                return Err(ConfigError::Message(format!("venue fee {} must be in [0, 1)", fee)));
            }
        }
        match self.sizing_policy {
            SizingPolicyConfig::FractionalKelly { multiplier } if !fraction_ok(multiplier) => {
                return Err(ConfigError::Message("kelly multiplier must be in (0, 1]".into()));
            }
            SizingPolicyConfig::FixedFraction { fraction } if !fraction_ok(fraction) => {
                return Err(ConfigError::Message("fixed fraction must be in (0, 1]".into()));
            }
            _ => {}
        }
        if self.initial_bankroll < 0.0 {
            return Err(ConfigError::Message("initial_bankroll cannot be negative".into()));
        }
        if self.min_stake < 0.0 {
            return Err(ConfigError::Message("min_stake cannot be negative".into()));
        }
        Ok(())
    }

    pub fn staleness_window(&self) -> Duration {
        Duration::seconds(self.staleness_window_secs)
    }

    pub fn intent_timeout(&self) -> Duration {
        Duration::seconds(self.intent_timeout_secs)
    }

    pub fn start_time_tolerance(&self) -> Duration {
        Duration::minutes(self.start_time_tolerance_minutes)
    }

    pub fn poll_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.poll_interval_secs)
    }

    pub fn expiry_sweep_interval(&self) -> StdDuration {
        StdDuration::from_millis(self.expiry_sweep_interval_ms)
    }
}

/// NBA nicknames with the abbreviations and city names the venues use.
fn default_team_aliases() -> Vec<TeamAlias> {
    vec![
        TeamAlias::new("Cavaliers", &["CLE", "Cleveland", "Cleveland Cavaliers", "Cavs"]),
        TeamAlias::new("Thunder", &["OKC", "Oklahoma City", "Oklahoma City Thunder"]),
        TeamAlias::new("Celtics", &["BOS", "Boston", "Boston Celtics"]),
        TeamAlias::new("Rockets", &["HOU", "Houston", "Houston Rockets"]),
        TeamAlias::new("Knicks", &["NYK", "New York", "New York Knicks"]),
        TeamAlias::new("Grizzlies", &["MEM", "Memphis", "Memphis Grizzlies"]),
        TeamAlias::new("Nuggets", &["DEN", "Denver", "Denver Nuggets"]),
        TeamAlias::new("Mavericks", &["DAL", "Dallas", "Dallas Mavericks", "Mavs"]),
        TeamAlias::new("Magic", &["ORL", "Orlando", "Orlando Magic"]),
        TeamAlias::new("Lakers", &["LAL", "Los Angeles Lakers", "LA Lakers"]),
        TeamAlias::new("Bucks", &["MIL", "Milwaukee", "Milwaukee Bucks"]),
        TeamAlias::new("Timberwolves", &["MIN", "Minnesota", "Minnesota Timberwolves", "Wolves"]),
        TeamAlias::new("Clippers", &["LAC", "Los Angeles Clippers", "LA Clippers"]),
        TeamAlias::new("Heat", &["MIA", "Miami", "Miami Heat"]),
        TeamAlias::new("Pacers", &["IND", "Indiana", "Indiana Pacers"]),
        TeamAlias::new("Warriors", &["GSW", "Golden State", "Golden State Warriors"]),
        TeamAlias::new("Pistons", &["DET", "Detroit", "Detroit Pistons"]),
        TeamAlias::new("Hawks", &["ATL", "Atlanta", "Atlanta Hawks"]),
        TeamAlias::new("Spurs", &["SAS", "San Antonio", "San Antonio Spurs"]),
        TeamAlias::new("Kings", &["SAC", "Sacramento", "Sacramento Kings"]),
        TeamAlias::new("Suns", &["PHX", "Phoenix", "Phoenix Suns"]),
        TeamAlias::new("Bulls", &["CHI", "Chicago", "Chicago Bulls"]),
        TeamAlias::new("76ers", &["PHI", "Philadelphia", "Philadelphia 76ers", "Sixers"]),
        TeamAlias::new("Nets", &["BKN", "Brooklyn", "Brooklyn Nets"]),
        TeamAlias::new("Trail Blazers", &["POR", "Portland", "Portland Trail Blazers", "Blazers"]),
        TeamAlias::new("Jazz", &["UTA", "Utah", "Utah Jazz"]),
        TeamAlias::new("Hornets", &["CHA", "Charlotte", "Charlotte Hornets"]),
        TeamAlias::new("Raptors", &["TOR", "Toronto", "Toronto Raptors"]),
        TeamAlias::new("Pelicans", &["NOP", "New Orleans", "New Orleans Pelicans"]),
        TeamAlias::new("Wizards", &["WAS", "Washington", "Washington Wizards"]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.dry_run);
        assert_eq!(config.team_aliases.len(), 30);
    }

    #[test]
    fn rejects_per_event_cap_above_aggregate_cap() {
        let config = EngineConfig {
            max_stake_fraction_per_event: 0.6,
            max_aggregate_exposure_fraction: 0.5,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_layered_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.toml"),
            r#"
min_edge_fraction = 0.05
staleness_window_secs = 120
edge_policy = "expected_value"

[venue_fees]
prediction_market = 0.01
sportsbook = 0.0

[sizing_policy]
kind = "fixed_fraction"
fraction = 0.02
"#,
        )
        .unwrap();

        let config = EngineConfig::load_from(dir.path()).unwrap();
        assert_eq!(config.min_edge_fraction, 0.05);
        assert_eq!(config.staleness_window(), Duration::seconds(120));
        assert_eq!(config.venue_fees.for_venue(Venue::PredictionMarket), 0.01);
        assert_eq!(config.edge_policy, EdgePolicyConfig::ExpectedValue);
        assert_eq!(config.sizing_policy, SizingPolicyConfig::FixedFraction { fraction: 0.02 });
        // untouched fields keep their defaults
        assert_eq!(config.intent_timeout_secs, 30);
    }
}
