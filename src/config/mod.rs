//! Configuration loading.
//!
//! Precedence, lowest first: built-in defaults, the TOML file, environment
//! variables, then CLI flags (applied by the binary after [`Config::load`]).

pub mod schema;

pub use schema::{
    AudioConfig, BargeInConfig, Config, RemoteConfig, ResponseConfig, TurnDetectionConfig,
};

use anyhow::Context;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Config file name inside the platform config directory.
const CONFIG_FILE_NAME: &str = "config.toml";

impl Config {
    /// Platform config path, e.g. `~/.config/parlar/config.toml` on Linux.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "parlar")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Load defaults, then the TOML file, then environment overrides.
    ///
    /// An explicit `path` must exist; the default path is optional.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(explicit) => Self::from_file(explicit)?,
            None => match Self::default_path() {
                Some(default) if default.exists() => Self::from_file(&default)?,
                _ => Self::default(),
            },
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse a TOML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_toml_str(&raw)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        tracing::debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        toml::from_str(raw).map_err(|e| anyhow::anyhow!("{e}"))
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    ///
    /// Unparseable numeric values are logged and ignored.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty("OPENAI_API_KEY").or_else(|| non_empty("OPENAI_AI_KEY")) {
            self.remote.api_key = Some(key);
        }
        if let Some(model) = non_empty("REALTIME_MODEL") {
            self.remote.model = model;
        }
        if let Some(voice) = non_empty("REALTIME_VOICE") {
            self.remote.voice = voice;
        }

        let td = &mut self.remote.turn_detection;
        override_parsed(&non_empty, "TURN_VAD_THRESH", &mut td.threshold);
        override_parsed(&non_empty, "TURN_SIL_MS", &mut td.silence_duration_ms);

        override_parsed(&non_empty, "SR", &mut self.audio.sample_rate);
        override_parsed(&non_empty, "CHUNK_MS", &mut self.audio.frame_ms);

        override_parsed(&non_empty, "BAR_GE_THRESH", &mut self.barge_in.threshold);
        override_parsed(&non_empty, "CANCEL_COOLDOWN_MS", &mut self.barge_in.cooldown_ms);
        override_parsed(
            &non_empty,
            "SUPPRESS_AFTER_CANCEL_MS",
            &mut self.barge_in.suppress_ms,
        );

        override_parsed(&non_empty, "RESP_DELAY_SHORT_MS", &mut self.response.short_delay_ms);
        override_parsed(&non_empty, "RESP_DELAY_LONG_MS", &mut self.response.long_delay_ms);
    }

    /// Reject configurations the session cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self
            .remote
            .api_key
            .as_deref()
            .is_none_or(|k| k.trim().is_empty())
        {
            anyhow::bail!("No API key configured. Set OPENAI_API_KEY or remote.api_key");
        }
        if self.remote.model.trim().is_empty() {
            anyhow::bail!("remote.model cannot be empty");
        }
        if self.audio.sample_rate == 0 {
            anyhow::bail!("audio.sample_rate must be greater than zero");
        }
        if !(10..=100).contains(&self.audio.frame_ms) {
            anyhow::bail!(
                "audio.frame_ms must be between 10 and 100 (got {})",
                self.audio.frame_ms
            );
        }
        if self.audio.capture_queue_frames == 0 || self.audio.playback_queue_frames == 0 {
            anyhow::bail!("audio queue capacities must be at least one frame");
        }
        check_unit_range("barge_in.threshold", self.barge_in.threshold)?;
        check_unit_range(
            "remote.turn_detection.threshold",
            self.remote.turn_detection.threshold,
        )?;
        if self.barge_in.min_loud_frames == 0 {
            anyhow::bail!("barge_in.min_loud_frames must be at least 1");
        }
        Ok(())
    }

    /// Copy with the API key masked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.remote.api_key.is_some() {
            copy.remote.api_key = Some("***".into());
        }
        copy
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).map_err(|e| anyhow::anyhow!("Failed to render config: {e}"))
    }
}

fn override_parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!(key, value = %raw, "Ignoring unparseable environment override"),
        }
    }
}

fn check_unit_range(name: &str, value: f32) -> anyhow::Result<()> {
    if !(0.0..=1.0).contains(&value) {
        anyhow::bail!("{name} must be within 0.0..=1.0 (got {value})");
    }
    Ok(())
}
