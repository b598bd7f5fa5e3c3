use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Cola
    pub max_queue_size: usize,
    pub history_size: usize,
    pub max_playlist_size: usize,
    pub queue_page_size: usize,

    // Descargas
    pub cache_dir: PathBuf,
    pub ytdlp_path: String,
    pub audio_format: String,
    pub audio_quality: String,
    #[serde(with = "humantime_serde_compat")]
    pub fetch_timeout: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN").context("DISCORD_TOKEN is not set")?,
            application_id: std::env::var("APPLICATION_ID")
                .context("APPLICATION_ID is not set")?
                .parse()?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            // Cola
            max_queue_size: env_or("MAX_QUEUE_SIZE", defaults.max_queue_size)?,
            history_size: env_or("HISTORY_SIZE", defaults.history_size)?,
            max_playlist_size: env_or("MAX_PLAYLIST_SIZE", defaults.max_playlist_size)?,
            queue_page_size: env_or("QUEUE_PAGE_SIZE", defaults.queue_page_size)?,

            // Descargas
            cache_dir: std::env::var("CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            ytdlp_path: std::env::var("YTDLP_PATH").unwrap_or(defaults.ytdlp_path),
            audio_format: std::env::var("AUDIO_FORMAT").unwrap_or(defaults.audio_format),
            audio_quality: std::env::var("AUDIO_QUALITY").unwrap_or(defaults.audio_quality),
            fetch_timeout: match std::env::var("FETCH_TIMEOUT") {
                Ok(val) if !val.trim().is_empty() => humantime::parse_duration(val.trim())
                    .with_context(|| format!("FETCH_TIMEOUT is not a duration: {}", val))?,
                _ => defaults.fetch_timeout,
            },
        };

        std::fs::create_dir_all(&config.cache_dir)
            .with_context(|| format!("Cannot create {}", config.cache_dir.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Sanity checks on values that would otherwise fail at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.queue_page_size == 0 {
            anyhow::bail!("Queue page size must be greater than 0");
        }

        if self.max_playlist_size == 0 {
            anyhow::bail!("Max playlist size must be greater than 0");
        }

        if self.fetch_timeout.is_zero() {
            anyhow::bail!("Fetch timeout must be greater than 0");
        }

        if self.ytdlp_path.trim().is_empty() {
            anyhow::bail!("YTDLP_PATH cannot be empty");
        }

        Ok(())
    }

    /// Summary for the startup log. Never includes the token.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Queue: {} max, {} history, {} per page, {} per playlist\n  \
            Downloads: {} -> {} ({} {}), timeout {}",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.max_queue_size,
            self.history_size,
            self.queue_page_size,
            self.max_playlist_size,
            self.ytdlp_path,
            self.cache_dir.display(),
            self.audio_format,
            self.audio_quality,
            humantime::format_duration(self.fetch_timeout),
        )
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(val) if !val.trim().is_empty() => val
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {}", key, val)),
        _ => Ok(default),
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,

            max_queue_size: 1000,
            history_size: 50,
            max_playlist_size: 100,
            queue_page_size: 10,

            cache_dir: "/app/cache".into(),
            ytdlp_path: "yt-dlp".to_string(),
            audio_format: "opus".to_string(),
            audio_quality: "192K".to_string(),
            fetch_timeout: Duration::from_secs(300),
        }
    }
}

/// Serializa duraciones como texto legible ("5m", "90s")
mod humantime_serde_compat {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}
