//! Layered configuration.
//!
//! Precedence, highest first:
//!
//! 1. command-line flags ([`ConfigOverrides`])
//! 2. `[global]` table of the TOML file passed with `--config`
//! 3. `PMR_INSTANCE`, `PMR_CACHE_DIR`, `PMR_LOG_LEVEL`, `PMR_LOG_FILE`,
//!    `PMR_LOG_MAX_BYTES`, `PMR_LOG_BACKUP_COUNT`
//! 4. built-in defaults
//!
//! The same file may carry a `[run]` table recording a command and its
//! arguments, replayed when no command is given on the command line.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::InstanceUrl;
use crate::error::PmrError;
use crate::export::Submitter;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_instance")]
    pub pmr_instance: String,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    /// Size at which the log file is rotated; `0` keeps appending.
    #[serde(default = "default_log_max_bytes")]
    pub log_max_bytes: u64,
    /// Rotated files kept next to the log file.
    #[serde(default = "default_log_backup_count")]
    pub log_backup_count: usize,
    #[serde(default = "default_submitter")]
    pub submitter: String,
    #[serde(default = "default_submitter_mail")]
    pub submitter_mail: String,
}

fn default_instance() -> String {
    "https://models.physiomeproject.org/".to_string()
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./pmr-cache")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_log_backup_count() -> usize {
    3
}

fn default_submitter() -> String {
    Submitter::default().name
}

fn default_submitter_mail() -> String {
    Submitter::default().mail
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pmr_instance: default_instance(),
            cache_dir: default_cache_dir(),
            log_level: default_log_level(),
            log_file: None,
            log_max_bytes: default_log_max_bytes(),
            log_backup_count: default_log_backup_count(),
            submitter: default_submitter(),
            submitter_mail: default_submitter_mail(),
        }
    }
}

impl AppConfig {
    pub fn instance(&self) -> Result<InstanceUrl, PmrError> {
        self.pmr_instance.parse()
    }

    pub fn submitter(&self) -> Submitter {
        Submitter {
            name: self.submitter.clone(),
            mail: self.submitter_mail.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), PmrError> {
        self.instance()?;
        if !LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(PmrError::ConfigParse(format!(
                "log_level must be one of {}, got '{}'",
                LOG_LEVELS.join(", "),
                self.log_level
            )));
        }
        if self.cache_dir.as_os_str().is_empty() {
            return Err(PmrError::ConfigParse("cache_dir must not be empty".to_string()));
        }
        if self.log_max_bytes > 0 && self.log_backup_count == 0 {
            return Err(PmrError::ConfigParse(
                "log_backup_count must be at least 1 when log_max_bytes is set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Lower-cases `level` and maps the level names used by Python's `logging`
/// (`WARNING`, `CRITICAL`) onto their `tracing` counterparts.
pub fn normalize_log_level(level: &str) -> String {
    match level.trim().to_lowercase().as_str() {
        "warning" => "warn".to_string(),
        "critical" | "fatal" => "error".to_string(),
        other => other.to_string(),
    }
}

/// Values given on the command line. Unset fields leave lower layers alone.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pmr_instance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RunSection {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: BTreeMap<String, Value>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(
        config_file: Option<&Path>,
        overrides: &ConfigOverrides,
    ) -> Result<AppConfig, PmrError> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default())).merge(
            Env::prefixed("PMR_")
                .only(&[
                    "instance",
                    "cache_dir",
                    "log_level",
                    "log_file",
                    "log_max_bytes",
                    "log_backup_count",
                ])
                .map(|key| {
                    if key.as_str().eq_ignore_ascii_case("instance") {
                        "pmr_instance".into()
                    } else {
                        key.as_str().to_lowercase().into()
                    }
                }),
        );

        if let Some(path) = config_file {
            if !path.exists() {
                return Err(PmrError::ConfigRead(path.to_path_buf()));
            }
            figment = figment.merge(Figment::from(Toml::file(path)).focus("global"));
        }

        figment = figment.merge(Serialized::defaults(overrides.clone()));

        let mut config: AppConfig = figment
            .extract()
            .map_err(|err| PmrError::ConfigParse(err.to_string()))?;
        config.log_level = normalize_log_level(&config.log_level);
        config.validate()?;
        Ok(config)
    }

    /// The `[run]` table of `config_file`, if it has one.
    pub fn run_section(config_file: &Path) -> Result<Option<RunSection>, PmrError> {
        if !config_file.exists() {
            return Err(PmrError::ConfigRead(config_file.to_path_buf()));
        }
        let figment = Figment::from(Toml::file(config_file));
        if !figment.contains("run") {
            return Ok(None);
        }
        figment
            .extract_inner::<RunSection>("run")
            .map(Some)
            .map_err(|err| PmrError::ConfigParse(err.to_string()))
    }
}

/// Turns a `[run]` table into command-line arguments.
///
/// `true` booleans become bare flags and `false` ones are dropped, lists and
/// the special `args` key become positionals, and every other value becomes
/// `--key value` with underscores in the key written as dashes.
pub fn run_section_to_argv(run: &RunSection) -> Vec<String> {
    let Some(command) = run.command.as_deref().filter(|command| !command.is_empty()) else {
        return Vec::new();
    };
    let mut argv = vec![command.to_string()];
    for (key, value) in &run.args {
        let flag = format!("--{}", key.replace('_', "-"));
        match value {
            Value::Array(items) => argv.extend(items.iter().map(scalar_to_string)),
            _ if key == "args" => argv.push(scalar_to_string(value)),
            Value::Bool(true) => argv.push(flag),
            Value::Bool(false) | Value::Null => {}
            other => {
                argv.push(flag);
                argv.push(scalar_to_string(other));
            }
        }
    }
    argv
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
