use std::fs;
use std::path::Path;

use anyhow::Context;
use chrono::Utc;
use serde::Deserialize;

use crate::activity::{ActivitySource, FixedActivity, ObservedActivity, RandomActivity};
use crate::aggregate::{AggregateOptions, AttemptJoin};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActivityMode {
    Random,
    #[default]
    Observed,
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DashboardSection {
    pub include_all_courses: bool,
    pub attempt_join: AttemptJoin,
    pub activity: ActivityMode,
    /// Used when `activity = "fixed"`.
    pub fixed_activity_days: i64,
}

impl Default for DashboardSection {
    fn default() -> Self {
        Self {
            include_all_courses: true,
            attempt_join: AttemptJoin::CourseId,
            activity: ActivityMode::Observed,
            fixed_activity_days: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub dashboard: DashboardSection,
    pub database: DatabaseSection,
    pub logging: LoggingSection,
}

/// Command-line values that win over the file and the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub owned_only: bool,
    pub legacy_attempt_match: bool,
    pub log_level: Option<String>,
}

impl Config {
    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        toml::from_str(contents).context("invalid dashboard config")
    }

    /// Reads `path` when given, falls back to defaults otherwise, then layers
    /// `DATABASE_URL` and the CLI overrides on top.
    pub fn load(path: Option<&Path>, overrides: &ConfigOverrides) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let contents = fs::read_to_string(path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                Self::from_toml(&contents)
                    .with_context(|| format!("failed to parse config {}", path.display()))?
            }
            None => Self::default(),
        };

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database.url = Some(url);
        }
        config.apply(overrides);
        Ok(config)
    }

    pub fn apply(&mut self, overrides: &ConfigOverrides) {
        if overrides.owned_only {
            self.dashboard.include_all_courses = false;
        }
        if overrides.legacy_attempt_match {
            self.dashboard.attempt_join = AttemptJoin::LegacyTitle;
        }
        if let Some(level) = &overrides.log_level {
            self.logging.level = level.clone();
        }
    }

    pub fn aggregate_options(&self) -> AggregateOptions {
        AggregateOptions {
            include_all_courses: self.dashboard.include_all_courses,
            attempt_join: self.dashboard.attempt_join,
        }
    }

    pub fn activity_source(&self) -> Box<dyn ActivitySource> {
        match self.dashboard.activity {
            ActivityMode::Random => Box::new(RandomActivity),
            ActivityMode::Observed => Box::new(ObservedActivity::new(Utc::now())),
            ActivityMode::Fixed => Box::new(FixedActivity(self.dashboard.fixed_activity_days)),
        }
    }

    pub fn database_url(&self) -> anyhow::Result<&str> {
        self.database
            .url
            .as_deref()
            .context("DATABASE_URL or [database] url must point at a Postgres instance")
    }
}
