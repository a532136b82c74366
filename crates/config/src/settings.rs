//! Runtime settings
//!
//! A single hierarchical settings object drives the pipeline. Values come
//! from a TOML file, then `QUARRY_*` environment variables (`__` separates
//! nesting levels, e.g. `QUARRY_LLM__MODEL`), then programmatic overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::ConfigError;

/// Top-level settings tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub llm: LlmSettings,
    pub transcription: TranscriptionSettings,
    pub youtube: YoutubeSettings,
    pub proxy: ProxySettings,
    pub storage: StorageSettings,
    pub mining: MiningSettings,
    pub logging: LoggingSettings,
}

/// Default LLM selection and concurrency overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// Default provider URI, `provider:model` form resolved at call sites.
    pub provider: String,
    /// Default hosted model.
    pub model: String,
    /// Default local model.
    pub local_model: String,
    /// Override for the hosted-provider semaphore. Hardware tier decides
    /// when absent.
    pub max_concurrent_cloud: Option<usize>,
    /// Override for the local-provider semaphore.
    pub max_concurrent_local: Option<usize>,
    /// Per-call timeout in seconds.
    pub request_timeout_secs: u64,
    /// Local inference endpoint.
    pub local_endpoint: String,
    /// Hosted endpoint base URL.
    pub hosted_endpoint: String,
    /// Hosted API key; usually set via `QUARRY_LLM__API_KEY`.
    pub api_key: Option<String>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: "local".to_string(),
            model: "gpt-4o-mini".to_string(),
            local_model: "qwen2.5:14b-instruct".to_string(),
            max_concurrent_cloud: None,
            max_concurrent_local: None,
            request_timeout_secs: 120,
            local_endpoint: "http://localhost:11434".to_string(),
            hosted_endpoint: "https://api.openai.com/v1".to_string(),
            api_key: None,
        }
    }
}

/// Transcription engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionSettings {
    /// Model size.
    pub whisper_model: String,
    /// False forces the CPU path.
    pub use_gpu: bool,
    /// Explicit language code. "auto" opts into detection and is a known
    /// source of wrong-language transcripts; callers set it deliberately.
    pub language: String,
    /// Path to the transcription binary.
    pub binary_path: PathBuf,
    /// Directory holding model files.
    pub model_dir: PathBuf,
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            whisper_model: "medium".to_string(),
            use_gpu: false,
            language: "en".to_string(),
            binary_path: PathBuf::from("whisper-cli"),
            model_dir: PathBuf::from("models"),
        }
    }
}

/// Acquisition pacing and archive settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct YoutubeSettings {
    /// Enable archive-file deduplication.
    pub use_download_archive: bool,
    /// Park downloads during the quiet-hours window.
    pub enable_sleep_period: bool,
    pub sleep_start_hour: u32,
    pub sleep_end_hour: u32,
    /// Fixed UTC offset for the sleep window, `+05:30` form.
    pub sleep_timezone: String,
    /// Minimum seconds between downloads on one identity.
    pub sequential_download_delay_min: u64,
    /// Maximum seconds between downloads on one identity.
    pub sequential_download_delay_max: u64,
    /// Jitter applied to the pacing delay, as a percentage.
    pub delay_randomization_percent: f64,
    /// Per-attempt timeout in seconds.
    pub download_timeout_secs: u64,
    /// Downloader binary.
    pub downloader_path: PathBuf,
}

impl Default for YoutubeSettings {
    fn default() -> Self {
        Self {
            use_download_archive: true,
            enable_sleep_period: false,
            sleep_start_hour: 0,
            sleep_end_hour: 6,
            sleep_timezone: "+00:00".to_string(),
            sequential_download_delay_min: 180,
            sequential_download_delay_max: 300,
            delay_randomization_percent: 25.0,
            download_timeout_secs: 60,
            downloader_path: PathBuf::from("yt-dlp"),
        }
    }
}

/// Identity/proxy selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    /// Proxy provider name; `None` disables proxying.
    pub provider: Option<String>,
    /// Skip URLs with no available proxy instead of downloading directly.
    pub strict_mode: bool,
}

/// Filesystem layout and database location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub database_path: PathBuf,
    /// Where acquired audio lands.
    pub audio_dir: PathBuf,
    /// Where Markdown artifacts land.
    pub markdown_dir: PathBuf,
    /// Where thumbnails land.
    pub thumbnail_dir: PathBuf,
    /// Download archive file.
    pub archive_path: PathBuf,
    /// Timestamped failure lists land here.
    pub failed_urls_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("quarry.db"),
            audio_dir: PathBuf::from("audio"),
            markdown_dir: PathBuf::from("notes"),
            thumbnail_dir: PathBuf::from("notes/Thumbnails"),
            archive_path: PathBuf::from("download_archive.txt"),
            failed_urls_dir: PathBuf::from("."),
        }
    }
}

/// Mining window shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MiningSettings {
    /// Target window length in seconds.
    pub window_min_secs: f64,
    pub window_max_secs: f64,
    /// Overlap between consecutive windows; 0 disables.
    pub window_overlap_secs: f64,
    /// Rough character budget per window, bounding the miner prompt.
    pub window_char_budget: usize,
    /// Claims per flagship-evaluator call.
    pub evaluation_batch_size: usize,
}

impl Default for MiningSettings {
    fn default() -> Self {
        Self {
            window_min_secs: 120.0,
            window_max_secs: 240.0,
            window_overlap_secs: 0.0,
            window_char_budget: 12_000,
            evaluation_batch_size: 8,
        }
    }
}

/// Log output shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `tracing_subscriber` env-filter directive.
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { filter: "info".to_string(), json: true }
    }
}

impl Settings {
    /// Validate cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.youtube.sequential_download_delay_min > self.youtube.sequential_download_delay_max {
            return Err(ConfigError::InvalidValue {
                field: "youtube.sequential_download_delay_min".to_string(),
                message: "must not exceed sequential_download_delay_max".to_string(),
            });
        }
        if self.youtube.sleep_start_hour > 23 || self.youtube.sleep_end_hour > 23 {
            return Err(ConfigError::InvalidValue {
                field: "youtube.sleep_start_hour".to_string(),
                message: "hours are 0-23".to_string(),
            });
        }
        if self.mining.window_min_secs > self.mining.window_max_secs {
            return Err(ConfigError::InvalidValue {
                field: "mining.window_min_secs".to_string(),
                message: "must not exceed window_max_secs".to_string(),
            });
        }
        if self.mining.evaluation_batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "mining.evaluation_batch_size".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Load settings: file (optional) → `QUARRY_*` environment → defaults.
pub fn load_settings(file: Option<&Path>) -> Result<Settings, ConfigError> {
    let mut builder = config::Config::builder();

    if let Some(path) = file {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        builder = builder.add_source(config::File::from(path));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("QUARRY")
            .separator("__")
            .try_parsing(true),
    );

    let settings: Settings = builder.build()?.try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.transcription.whisper_model, "medium");
        assert_eq!(settings.youtube.sequential_download_delay_min, 180);
        assert!(settings.youtube.use_download_archive);
    }

    #[test]
    fn file_values_override_defaults() {
        let mut f = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            f,
            "[transcription]\nwhisper_model = \"large\"\n\n[youtube]\nsequential_download_delay_min = 10\nsequential_download_delay_max = 20\n"
        )
        .unwrap();
        let settings = load_settings(Some(f.path())).unwrap();
        assert_eq!(settings.transcription.whisper_model, "large");
        assert_eq!(settings.youtube.sequential_download_delay_max, 20);
        // Untouched sections keep defaults
        assert_eq!(settings.llm.request_timeout_secs, 120);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(matches!(
            load_settings(Some(Path::new("/nonexistent/quarry.toml"))),
            Err(ConfigError::FileNotFound(_))
        ));
    }

    #[test]
    fn inverted_delay_bounds_rejected() {
        let mut settings = Settings::default();
        settings.youtube.sequential_download_delay_min = 500;
        assert!(settings.validate().is_err());
    }
}
