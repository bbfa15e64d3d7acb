use super::types::PlaybackError;
use super::{AudioOutput, SpeechSynthesizer};
use crate::audio::format::extension_for_mime;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::process::Command;
use uuid::Uuid;

const DOWNLOAD_TIMEOUT_SECS: u64 = 20;

/// Split a configured command line into program and arguments.
fn split_command(command: &str) -> Option<(String, Vec<String>)> {
    let mut parts = command.split_whitespace().map(str::to_string);
    let program = parts.next()?;
    Some((program, parts.collect()))
}

/// Whether `program` resolves to an existing file, directly or on PATH.
fn resolve_program(program: &str) -> Option<PathBuf> {
    let direct = Path::new(program);
    if direct.components().count() > 1 {
        return direct.exists().then(|| direct.to_path_buf());
    }
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .flat_map(|dir| {
            let plain = dir.join(program);
            let exe = dir.join(format!("{}.exe", program));
            [plain, exe]
        })
        .find(|candidate| candidate.is_file())
}

fn expand_args(args: &[String], replacements: &[(&str, &str)]) -> Vec<String> {
    args.iter()
        .map(|arg| {
            replacements
                .iter()
                .fold(arg.clone(), |acc, (key, value)| acc.replace(key, value))
        })
        .collect()
}

/// Decode an inline `data:<mime>;base64,<payload>` URL. `None` for any
/// other scheme.
fn decode_data_url(url: &str) -> Option<Result<(Vec<u8>, &'static str), PlaybackError>> {
    let rest = url.strip_prefix("data:")?;
    let decoded = match rest.split_once(";base64,") {
        Some((mime, payload)) => BASE64_STANDARD
            .decode(payload)
            .map(|bytes| (bytes, extension_for_mime(mime)))
            .map_err(|e| PlaybackError::LoadFailed(e.to_string())),
        None => Err(PlaybackError::LoadFailed(
            "only base64 data URLs are supported".to_string(),
        )),
    };
    Some(decoded)
}

/// Removes the downloaded asset however playback ends.
struct TempAsset(PathBuf);

impl Drop for TempAsset {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

/// Downloads an asset and hands it to an external player, e.g.
/// `ffplay -nodisp -autoexit -loglevel quiet {file}`.
pub struct CommandAudioOutput {
    client: reqwest::Client,
    program: PathBuf,
    args: Vec<String>,
}

impl CommandAudioOutput {
    pub fn from_command(command: Option<&str>) -> Option<Self> {
        let (program, mut args) = split_command(command?)?;
        let Some(program) = resolve_program(&program) else {
            tracing::warn!("Audio player '{}' not found", program);
            return None;
        };
        if !args.iter().any(|a| a.contains("{file}")) {
            args.push("{file}".to_string());
        }
        let client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(DOWNLOAD_TIMEOUT_SECS))
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!("Audio download client unavailable: {}", e);
                return None;
            }
        };
        tracing::info!("Audio output initialized: player={}", program.display());
        Some(Self {
            client,
            program,
            args,
        })
    }

    async fn download(&self, url: &str) -> Result<TempAsset, PlaybackError> {
        let (bytes, extension) = match decode_data_url(url) {
            Some(decoded) => decoded?,
            None => self.fetch(url).await?,
        };
        if bytes.is_empty() {
            return Err(PlaybackError::LoadFailed("empty asset".to_string()));
        }

        let path = env::temp_dir().join(format!("section-runtime-{}.{}", Uuid::new_v4(), extension));
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| PlaybackError::LoadFailed(e.to_string()))?;
        Ok(TempAsset(path))
    }

    async fn fetch(&self, url: &str) -> Result<(Vec<u8>, &'static str), PlaybackError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PlaybackError::LoadFailed(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PlaybackError::LoadFailed(format!("HTTP {}", status)));
        }
        let extension = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(extension_for_mime)
            .unwrap_or("bin");
        let bytes = response
            .bytes()
            .await
            .map_err(|e| PlaybackError::LoadFailed(e.to_string()))?;
        Ok((bytes.to_vec(), extension))
    }
}

#[async_trait]
impl AudioOutput for CommandAudioOutput {
    async fn play(&self, url: &str) -> Result<(), PlaybackError> {
        let asset = self.download(url).await?;
        let file = asset.0.to_string_lossy().to_string();
        let args = expand_args(&self.args, &[("{file}", &file)]);

        let status = Command::new(&self.program)
            .args(&args)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| PlaybackError::LoadFailed(e.to_string()))?;
        if !status.success() {
            return Err(PlaybackError::LoadFailed(format!("player exited with {}", status)));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "command-player"
    }
}

/// Speaks through an external TTS command, e.g. `espeak-ng -v {locale} {text}`.
/// Without a `{text}` placeholder the text is appended as the last argument.
pub struct CommandSynthesizer {
    program: Option<PathBuf>,
    args: Vec<String>,
}

impl CommandSynthesizer {
    pub fn from_command(command: Option<&str>) -> Self {
        let Some((program, mut args)) = command.and_then(split_command) else {
            return Self {
                program: None,
                args: Vec::new(),
            };
        };
        let resolved = resolve_program(&program);
        match &resolved {
            Some(path) => tracing::info!("Speech synthesizer initialized: {}", path.display()),
            None => tracing::warn!("Speech synthesizer '{}' not found", program),
        }
        if !args.iter().any(|a| a.contains("{text}")) {
            args.push("{text}".to_string());
        }
        Self {
            program: resolved,
            args,
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for CommandSynthesizer {
    fn is_available(&self) -> bool {
        self.program.is_some()
    }

    async fn speak(&self, text: &str, locale: &str) -> Result<(), PlaybackError> {
        let program = self.program.as_ref().ok_or(PlaybackError::Unavailable)?;
        let voice = locale.split('-').next().unwrap_or(locale).to_ascii_lowercase();
        let args = expand_args(
            &self.args,
            &[("{locale}", locale), ("{voice}", &voice), ("{text}", text)],
        );

        let status = Command::new(program)
            .args(&args)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| PlaybackError::SynthesisFailed(e.to_string()))?;
        if !status.success() {
            return Err(PlaybackError::SynthesisFailed(format!(
                "synthesizer exited with {}",
                status
            )));
        }
        Ok(())
    }
}
