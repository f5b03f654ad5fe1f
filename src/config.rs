use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Minutes between pipeline runs
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub correlation: CorrelationConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub users: Vec<UserConfig>,
    pub feeds: Vec<FeedConfig>,
}

fn default_refresh_interval() -> u64 {
    15
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Entries older than this are dropped at parse time
    #[serde(default = "default_max_age_days")]
    pub max_age_days: i64,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_age_days() -> i64 {
    30
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_age_days: default_max_age_days(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorrelationConfig {
    /// Normalized-Levenshtein title similarity above which two candidates
    /// are judged to report the same story
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Published timestamps must fall within this span to correlate
    #[serde(default = "default_window_hours")]
    pub window_hours: i64,
}

fn default_similarity_threshold() -> f64 {
    0.6
}

fn default_window_hours() -> i64 {
    48
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            window_hours: default_window_hours(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScoringConfig {
    /// Title markers that earn the urgency bonus, matched as whole words,
    /// case-insensitive
    #[serde(default = "default_urgency_patterns")]
    pub urgency_patterns: Vec<String>,
}

fn default_urgency_patterns() -> Vec<String> {
    ["breaking", "urgent", "flash", "alert", "exclusive"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            urgency_patterns: default_urgency_patterns(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct UserConfig {
    pub name: String,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default = "default_noise_keywords")]
    pub noise: Vec<String>,
}

fn default_noise_keywords() -> Vec<String> {
    [
        "sponsored",
        "advertisement",
        "buy now",
        "subscribe now",
        "limited offer",
        "click here",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_max_items")]
    pub max_items: i64,
    #[serde(default)]
    pub tier: Tier,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Owner whose keyword lists apply to this feed's items
    #[serde(default)]
    pub user: Option<String>,
}

fn default_category() -> String {
    "Uncategorized".to_string()
}

fn default_max_items() -> i64 {
    10
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Curated,
    #[default]
    Standard,
}

impl Tier {
    pub fn weight(self) -> f64 {
        match self {
            Tier::Curated => 40.0,
            Tier::Standard => 20.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Curated => "curated",
            Tier::Standard => "standard",
        }
    }

    pub fn from_str_or_default(s: &str) -> Self {
        match s {
            "curated" => Tier::Curated,
            _ => Tier::Standard,
        }
    }
}

/// Per-owner keyword lists handed to the scorer as explicit input
#[derive(Debug, Clone, Default)]
pub struct Keywords {
    pub interests: Vec<String>,
    pub noise: Vec<String>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Keyword lists for a feed's owner. Unknown or unset owners get no
    /// interests and the stock noise list.
    pub fn keywords_for(&self, user: Option<&str>) -> Keywords {
        match user.and_then(|name| self.users.iter().find(|u| u.name == name)) {
            Some(u) => Keywords {
                interests: u.interests.clone(),
                noise: u.noise.clone(),
            },
            None => Keywords {
                interests: Vec::new(),
                noise: default_noise_keywords(),
            },
        }
    }
}
