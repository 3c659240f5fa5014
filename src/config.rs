use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Output formats the sinks support.
pub const SUPPORTED_FORMATS: [&str; 3] = ["jsonl", "csv", "sqlite"];

pub const DEFAULT_BUFFER_SIZE: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // Input/output settings
    pub input_path: String,
    pub output_path: String,
    pub format: String,

    // Processing settings
    /// Number of worker tasks; 0 means one per CPU.
    pub workers: usize,
    /// Capacity of the walker → worker queue; 0 means the default.
    pub buffer_size: usize,
    /// Optional regex applied to user/host/message/source.
    pub filter_pattern: String,

    // Console settings
    pub verbose: bool,
    pub silent: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_path: String::new(),
            output_path: String::new(),
            format: "jsonl".to_string(),
            workers: 0,
            buffer_size: DEFAULT_BUFFER_SIZE,
            filter_pattern: String::new(),
            verbose: false,
            silent: false,
        }
    }
}

impl Config {
    /// Load configuration.
    /// Priority: environment variables > config file > defaults.
    pub fn load() -> Result<Self, Error> {
        let config_path = std::env::var("TIMBERLINE_CONFIG_FILE")
            .unwrap_or_else(|_| "/etc/timberline/config.toml".to_string());

        let mut config = if Path::new(&config_path).exists() {
            tracing::info!("loading configuration from {config_path}");
            Self::from_file(&config_path)?
        } else {
            Self::default()
        };

        config.apply_env();
        Ok(config)
    }

    pub fn from_file(path: &str) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| Error::Config(e.to_string()))
    }

    /// Environment variables override file values for every field.
    fn apply_env(&mut self) {
        if let Ok(value) = std::env::var("TIMBERLINE_INPUT") {
            self.input_path = value;
        }
        if let Ok(value) = std::env::var("TIMBERLINE_OUTPUT") {
            self.output_path = value;
        }
        if let Ok(value) = std::env::var("TIMBERLINE_FORMAT") {
            self.format = value;
        }
        if let Ok(value) = std::env::var("TIMBERLINE_WORKERS") {
            if let Ok(parsed) = value.parse() {
                self.workers = parsed;
            }
        }
        if let Ok(value) = std::env::var("TIMBERLINE_BUFFER_SIZE") {
            if let Ok(parsed) = value.parse() {
                self.buffer_size = parsed;
            }
        }
        if let Ok(value) = std::env::var("TIMBERLINE_FILTER") {
            self.filter_pattern = value;
        }
        if let Ok(value) = std::env::var("TIMBERLINE_VERBOSE") {
            self.verbose = value.parse().unwrap_or(false);
        }
        if let Ok(value) = std::env::var("TIMBERLINE_SILENT") {
            self.silent = value.parse().unwrap_or(false);
        }
    }

    /// Normalize and validate. Fills `workers`/`buffer_size` defaults
    /// and lowercases the format name.
    pub fn validate(&mut self) -> Result<(), Error> {
        self.format = self.format.to_lowercase();
        if !SUPPORTED_FORMATS.contains(&self.format.as_str()) {
            return Err(Error::Config(format!(
                "unsupported output format: {}",
                self.format
            )));
        }

        if self.workers == 0 {
            self.workers = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
        }
        if self.buffer_size == 0 {
            self.buffer_size = DEFAULT_BUFFER_SIZE;
        }

        if self.input_path.is_empty() {
            return Err(Error::Config("input_path must not be empty".to_string()));
        }
        if self.output_path.is_empty() {
            return Err(Error::Config("output_path must not be empty".to_string()));
        }

        Ok(())
    }
}
