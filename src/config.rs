use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "section-runtime.json";
const CONFIG_PATH_VAR: &str = "SECTION_RUNTIME_CONFIG";
const MAX_DWELL_MS: u64 = 10_000;
const MIN_SLICE_MS: u64 = 100;

pub const DEFAULT_GATEWAY_URL: &str = "http://localhost:3000/api";
pub const DEFAULT_LANGUAGE: &str = "en";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeConfig {
    pub gateway_base_url: String,
    pub gateway_token: Option<String>,
    pub request_timeout_secs: u64,
    pub assessment_id: String,
    pub section_id: String,
    pub feedback_dwell_ms: u64,
    pub max_recording_attempts: u32,
    pub default_max_plays: u32,
    pub warning_threshold_secs: u64,
    pub critical_threshold_secs: u64,
    pub chunk_slice_ms: u64,
    pub default_language: String,
    pub input_device_name: Option<String>,
    pub audio_player_command: Option<String>,
    pub tts_command: Option<String>,
    pub completion_retries: u8,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            gateway_base_url: DEFAULT_GATEWAY_URL.to_string(),
            gateway_token: None,
            request_timeout_secs: 15,
            assessment_id: String::new(),
            section_id: String::new(),
            feedback_dwell_ms: 1500,
            max_recording_attempts: 3,
            default_max_plays: 2,
            warning_threshold_secs: 120,
            critical_threshold_secs: 30,
            chunk_slice_ms: 1000,
            default_language: DEFAULT_LANGUAGE.to_string(),
            input_device_name: None,
            audio_player_command: None,
            tts_command: None,
            completion_retries: 0,
        }
    }
}

impl RuntimeConfig {
    pub fn feedback_dwell(&self) -> Duration {
        Duration::from_millis(self.feedback_dwell_ms)
    }

    pub fn chunk_slice(&self) -> Duration {
        Duration::from_millis(self.chunk_slice_ms)
    }

    /// Token safe for logs.
    pub fn masked_token(&self) -> Option<String> {
        self.gateway_token.as_deref().map(mask_token)
    }

    pub fn normalize(&mut self) {
        let url = self.gateway_base_url.trim().trim_end_matches('/');
        self.gateway_base_url = if url.is_empty() {
            DEFAULT_GATEWAY_URL.to_string()
        } else {
            url.to_string()
        };
        self.gateway_token = normalize_optional(self.gateway_token.take());
        self.assessment_id = self.assessment_id.trim().to_string();
        self.section_id = self.section_id.trim().to_string();
        self.request_timeout_secs = self.request_timeout_secs.max(1);
        self.feedback_dwell_ms = self.feedback_dwell_ms.min(MAX_DWELL_MS);
        self.max_recording_attempts = self.max_recording_attempts.max(1);
        self.default_max_plays = self.default_max_plays.max(1);
        self.critical_threshold_secs = self.critical_threshold_secs.min(self.warning_threshold_secs);
        self.chunk_slice_ms = self.chunk_slice_ms.max(MIN_SLICE_MS);
        self.default_language = normalize_language(&self.default_language);
        self.input_device_name = normalize_optional(self.input_device_name.take());
        self.audio_player_command = normalize_optional(self.audio_player_command.take());
        self.tts_command = normalize_optional(self.tts_command.take());
    }

    fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = var("GATEWAY_BASE_URL") {
            self.gateway_base_url = url;
        }
        if let Some(token) = var("GATEWAY_TOKEN") {
            self.gateway_token = Some(token);
        }
        if let Some(id) = var("ASSESSMENT_ID") {
            self.assessment_id = id;
        }
        if let Some(id) = var("SECTION_ID") {
            self.section_id = id;
        }
        if let Some(device) = var("INPUT_DEVICE") {
            self.input_device_name = Some(device);
        }
        if let Some(command) = var("AUDIO_PLAYER_COMMAND") {
            self.audio_player_command = Some(command);
        }
        if let Some(command) = var("TTS_COMMAND") {
            self.tts_command = Some(command);
        }
    }
}

/// `.env`, then the JSON file, then environment overrides.
pub fn load() -> Result<RuntimeConfig, String> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            tracing::warn!("Ignoring unreadable .env: {}", e);
        }
    }
    let path = env::var(CONFIG_PATH_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(CONFIG_FILE));
    load_from(&path, |key| env::var(key).ok())
}

pub fn load_from<F>(path: &Path, var: F) -> Result<RuntimeConfig, String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = read_or_default(path)?;
    config.apply_env(var);
    config.normalize();

    tracing::info!(
        "Config loaded: gateway={}, token={}, section={}/{}",
        config.gateway_base_url,
        config.masked_token().unwrap_or_else(|| "none".to_string()),
        config.assessment_id,
        config.section_id
    );
    Ok(config)
}

fn read_or_default(path: &Path) -> Result<RuntimeConfig, String> {
    if !path.exists() {
        return Ok(RuntimeConfig::default());
    }

    let raw = fs::read_to_string(path).map_err(|e| format!("Failed to read config: {}", e))?;
    match serde_json::from_str::<RuntimeConfig>(&raw) {
        Ok(config) => Ok(config),
        Err(e) => {
            tracing::warn!("Config {} is corrupt ({}), backing up", path.display(), e);
            let backup = path.with_extension("json.bak");
            let _ = fs::copy(path, backup);
            let config = RuntimeConfig::default();
            save_raw(path, &config)?;
            Ok(config)
        }
    }
}

fn save_raw(path: &Path, config: &RuntimeConfig) -> Result<(), String> {
    let json = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, json).map_err(|e| format!("Failed to save config: {}", e))
}

fn normalize_language(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        DEFAULT_LANGUAGE.to_string()
    } else {
        trimmed.to_lowercase()
    }
}

fn normalize_optional(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 10 {
        return "******".to_string();
    }

    let prefix: String = chars[..4].iter().collect();
    let suffix: String = chars[chars.len() - 4..].iter().collect();
    format!("{}********{}", prefix, suffix)
}
