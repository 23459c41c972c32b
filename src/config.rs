use std::env;

use crate::db::FailedFilePolicy;

pub const DEFAULT_BATCH_SIZE: usize = 5000;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_SKIP_PATTERNS: &str = "Depozycja";

/// Import settings; the database URL itself comes from the CLI (`--database-url`
/// or `DATABASE_URL`).
#[derive(Debug, Clone)]
pub struct Config {
    pub max_connections: u32,
    /// Measurements per INSERT statement
    pub batch_size: usize,
    /// Members whose name contains any of these are not imported
    pub skip_patterns: Vec<String>,
    pub failed_policy: FailedFilePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            batch_size: DEFAULT_BATCH_SIZE,
            skip_patterns: parse_skip_patterns(DEFAULT_SKIP_PATTERNS),
            failed_policy: FailedFilePolicy::Skip,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| DEFAULT_MAX_CONNECTIONS.to_string())
                .parse()
                .unwrap_or(DEFAULT_MAX_CONNECTIONS),
            batch_size: env::var("IMPORT_BATCH_SIZE")
                .unwrap_or_else(|_| DEFAULT_BATCH_SIZE.to_string())
                .parse::<usize>()
                .unwrap_or(DEFAULT_BATCH_SIZE)
                .max(1),
            skip_patterns: parse_skip_patterns(
                &env::var("IMPORT_SKIP_PATTERNS")
                    .unwrap_or_else(|_| DEFAULT_SKIP_PATTERNS.to_string()),
            ),
            failed_policy: FailedFilePolicy::Skip,
        }
    }

    pub fn with_failed_policy(mut self, policy: FailedFilePolicy) -> Self {
        self.failed_policy = policy;
        self
    }

    pub fn is_skipped_member(&self, name: &str) -> bool {
        self.skip_patterns.iter().any(|p| name.contains(p.as_str()))
    }
}

fn parse_skip_patterns(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}
