pub mod audio;
pub mod config;
pub mod console;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod gateway;
pub mod media;
pub mod playback;
pub mod session;
pub mod timer;

pub use config::RuntimeConfig;
pub use error::SessionError;
pub use session::{
    CompletionReason, SessionController, SessionDeps, SessionPhase, SessionSettings,
    SessionSnapshot, UserAction,
};

use audio::CpalMicrophone;
use gateway::HttpGateway;
use media::MediaHandles;
use playback::{AudioOutput, CommandAudioOutput, CommandSynthesizer, SpeechSynthesizer};
use std::sync::Arc;
use timer::Clock;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("section_runtime=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_input_devices() -> Result<(), String> {
    let devices = CpalMicrophone::list_input_devices().map_err(|e| e.to_string())?;
    if devices.is_empty() {
        println!("No input devices found");
    }
    for device in devices {
        println!("{}", device);
    }
    Ok(())
}

/// Run the configured section in the terminal until it completes.
/// `--list-devices` prints the microphones usable as `INPUT_DEVICE`.
pub async fn run() -> Result<(), String> {
    init_tracing();
    if std::env::args().skip(1).any(|arg| arg == "--list-devices") {
        return print_input_devices();
    }

    let config = config::load()?;
    if config.assessment_id.is_empty() || config.section_id.is_empty() {
        return Err("ASSESSMENT_ID and SECTION_ID must be configured".to_string());
    }
    info!(
        "Gateway {} (token: {})",
        config.gateway_base_url,
        config.masked_token().unwrap_or_else(|| "none".to_string())
    );

    let gateway =
        HttpGateway::new(&config).map_err(|e| format!("Failed to create gateway client: {}", e))?;

    let audio_output = CommandAudioOutput::from_command(config.audio_player_command.as_deref())
        .map(|output| Arc::new(output) as Arc<dyn AudioOutput>);
    if audio_output.is_none() {
        info!("No audio player found, listening audio falls back to speech synthesis");
    }
    let synthesizer = CommandSynthesizer::from_command(config.tts_command.as_deref());
    if !synthesizer.is_available() {
        info!("No speech synthesizer found");
    }

    let deps = SessionDeps {
        gateway: Arc::new(gateway),
        microphone: Arc::new(CpalMicrophone::new(config.input_device_name.clone())),
        audio_output,
        synthesizer: Some(Arc::new(synthesizer) as Arc<dyn SpeechSynthesizer>),
        clock: Clock::system(),
        handles: MediaHandles::new(),
    };
    let controller = SessionController::new(deps, SessionSettings::from(&config));

    let reason = console::drive(controller).await;
    info!("Section ended: {:?}", reason);
    Ok(())
}
