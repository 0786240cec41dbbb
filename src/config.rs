//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_SERVER_PORT, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (server, models, storage, worker)
/// makes it easier to understand and maintain as the application grows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub storage: StorageConfig,
    pub worker: WorkerConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Speech recognition model configuration.
///
/// ## Fields:
/// - `whisper_model`: Which Whisper model size to use ("tiny", "base", "small", "medium", "large")
/// - `language`: ISO 639-1 language hint passed to the decoder ("ar" for Quranic Arabic)
/// - `device`: Compute device preference ("auto", "cpu", "cuda", "metal")
///
/// ## Model size trade-offs:
/// - Smaller models: Faster processing, less memory, lower accuracy
/// - Larger models: Slower processing, more memory, higher accuracy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub whisper_model: String,
    pub language: String,
    pub device: String,
}

/// Task persistence configuration.
///
/// ## Fields:
/// - `database_path`: Where the SQLite task table lives on disk
/// - `cache_capacity`: Maximum number of task rows held in the in-memory cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database_path: String,
    pub cache_capacity: usize,
}

/// Background worker configuration.
///
/// ## Fields:
/// - `count`: Number of background workers draining the correction queue
/// - `queue_depth`: Bound on queued-but-unstarted correction jobs
/// - `min_audio_duration` / `max_audio_duration`: Accepted recording length (seconds)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub count: usize,
    pub queue_depth: usize,
    pub min_audio_duration: f64,
    pub max_audio_duration: f64,
}

/// Default values ensure the application can start even if no configuration
/// file exists. They also serve as documentation of reasonable starting values.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            models: ModelsConfig {
                whisper_model: "tiny".to_string(), // Small footprint, adequate for verse-length audio
                language: "ar".to_string(),
                device: "auto".to_string(),
            },
            storage: StorageConfig {
                database_path: "tasks.db".to_string(),
                cache_capacity: 256,
            },
            worker: WorkerConfig {
                count: 1, // One worker preserves strict upload-order processing
                queue_depth: 64,
                min_audio_duration: 0.5,
                max_audio_duration: 120.0,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST and PORT environment variables
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER_HOST=0.0.0.0`: Override server host
    /// - `APP_MODELS_WHISPER_MODEL=base`: Override whisper model
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special cases for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Deployment platforms commonly inject bare HOST/PORT without the
        // APP_ prefix convention.
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0 (port 0 is reserved and can't be used)
    /// - At least one background worker and a non-zero queue bound
    /// - A non-zero cache capacity
    /// - A positive, correctly-ordered audio duration window
    ///
    /// ## Why validate:
    /// Catching configuration errors early prevents runtime failures and
    /// provides clear error messages about what's wrong.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.worker.count == 0 {
            return Err(anyhow::anyhow!("Worker count must be greater than 0"));
        }

        if self.worker.queue_depth == 0 {
            return Err(anyhow::anyhow!("Queue depth must be greater than 0"));
        }

        if self.storage.cache_capacity == 0 {
            return Err(anyhow::anyhow!("Cache capacity must be greater than 0"));
        }

        if self.worker.min_audio_duration <= 0.0 {
            return Err(anyhow::anyhow!("Minimum audio duration must be positive"));
        }

        if self.worker.max_audio_duration <= self.worker.min_audio_duration {
            return Err(anyhow::anyhow!(
                "Maximum audio duration must exceed the minimum"
            ));
        }

        if self.storage.database_path.trim().is_empty() {
            return Err(anyhow::anyhow!("Database path cannot be empty"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test that the default configuration is valid and has expected values.
    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.models.whisper_model, "tiny");
        assert_eq!(config.models.language, "ar");
        assert!(config.validate().is_ok());
    }

    /// Test that validation catches invalid configurations.
    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.worker.count = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.worker.max_audio_duration = 0.1;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.storage.cache_capacity = 0;
        assert!(config.validate().is_err());
    }
}
