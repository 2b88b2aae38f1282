//! Environment configuration.
//!
//! All tunables come from the environment; anything invalid is fatal at
//! startup and nowhere else.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::sync::Thresholds;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} must be numeric, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },

    #[error("{var} is required")]
    Missing { var: &'static str },

    #[error("books directory {} does not exist", .0.display())]
    MissingBooksDir(PathBuf),
}

#[derive(Debug, Clone)]
pub struct AudiobookConfig {
    pub url: String,
    pub token: String,
}

#[derive(Debug, Clone)]
pub struct EbookSyncConfig {
    pub url: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct ReadalongConfig {
    pub db_path: PathBuf,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub books_dir: PathBuf,
    pub sync_period: Duration,
    pub thresholds: Thresholds,
    pub log_level: String,
    pub audiobook: AudiobookConfig,
    pub ebook_sync: EbookSyncConfig,
    pub readalong: ReadalongConfig,
    /// External transcription command; queued jobs wait when unset.
    pub transcriber_cmd: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_dir = PathBuf::from(env_or("DATA_DIR", "/data"));
        let books_dir = PathBuf::from(env_or("BOOKS_DIR", "/books"));
        if !books_dir.is_dir() {
            return Err(ConfigError::MissingBooksDir(books_dir));
        }

        let sync_period_mins = env_f64("SYNC_PERIOD_MINS", 5.0)?;
        let thresholds = Thresholds {
            audio_seconds: env_f64("SYNC_DELTA_AB_SECONDS", 60.0)?,
            ebook_fraction: env_f64("SYNC_DELTA_ES_PERCENT", 1.0)? / 100.0,
            char_window: (env_f64("SYNC_DELTA_ES_WORDS", 400.0)? * 5.0) as u64,
            regression: 0.05,
        };

        Ok(Self {
            data_dir,
            books_dir,
            sync_period: Duration::from_secs_f64(sync_period_mins * 60.0),
            thresholds,
            log_level: env_or("LOG_LEVEL", "info"),
            audiobook: AudiobookConfig {
                url: env_required("AUDIOBOOK_URL")?,
                token: env_required("AUDIOBOOK_TOKEN")?,
            },
            ebook_sync: EbookSyncConfig {
                url: env_required("EBOOK_SYNC_URL")?,
                username: env_required("EBOOK_SYNC_USER")?,
                password: env_required("EBOOK_SYNC_PASSWORD")?,
            },
            readalong: ReadalongConfig {
                db_path: PathBuf::from(env_or("READALONG_DB_PATH", "/data/readalong.db")),
                user_id: env::var("READALONG_USER_ID").ok().filter(|v| !v.is_empty()),
            },
            transcriber_cmd: env::var("TRANSCRIBER_CMD").ok().filter(|v| !v.is_empty()),
        })
    }

    pub fn index_cache_dir(&self) -> PathBuf {
        self.data_dir.join("ebook_index")
    }

    pub fn transcripts_dir(&self) -> PathBuf {
        self.data_dir.join("transcripts")
    }
}

fn env_or(var: &str, default: &str) -> String {
    env::var(var).ok().filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string())
}

fn env_required(var: &'static str) -> Result<String, ConfigError> {
    env::var(var)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing { var })
}

fn env_f64(var: &'static str, default: f64) -> Result<f64, ConfigError> {
    match env::var(var) {
        Ok(raw) if !raw.is_empty() => raw
            .parse::<f64>()
            .map_err(|_| ConfigError::InvalidNumber { var, value: raw }),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_parsing_is_strict() {
        assert_eq!(env_f64("ABRIDGE_TEST_UNSET_VAR", 7.5).unwrap(), 7.5);
        env::set_var("ABRIDGE_TEST_BAD_VAR", "sixty");
        let err = env_f64("ABRIDGE_TEST_BAD_VAR", 1.0).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber { .. }));
        env::remove_var("ABRIDGE_TEST_BAD_VAR");
    }
}
