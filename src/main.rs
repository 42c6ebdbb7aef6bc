//! Application entry point — callme desktop client.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (returns default on first run).
//! 3. Create [`tokio`] runtime (multi-thread, 2 workers).
//! 4. Open the speaker and build the [`PlaybackScheduler`].
//! 5. Build the microphone pipeline and the [`SessionController`].
//! 6. Spawn the session loop on the tokio runtime.
//! 7. Spawn the character load (REST, falls back to the built-in default).
//! 8. Run [`eframe::run_native`] — blocks the main thread until the window
//!    is closed.

use std::sync::Arc;

use callme_client::{
    app::CallApp,
    audio::CapturePipeline,
    avatar::{load_config_or_default, CharacterConfig, CharacterSource, HttpCharacterSource},
    config::AppConfig,
    playback::{
        AudioOutput, CpalOutput, PlaybackScheduler, SharedTimeline, DEFAULT_TTS_SAMPLE_RATE,
    },
    session::{run_session, SessionController, SessionHandle, SharedState, PACKET_QUEUE},
};
use tokio::sync::mpsc;

use eframe::egui;

// ---------------------------------------------------------------------------
// Native options builder
// ---------------------------------------------------------------------------

fn native_options(config: &AppConfig) -> eframe::NativeOptions {
    let (w, h) = config.ui.window_size;
    let mut vp = egui::ViewportBuilder::default()
        .with_title("callme")
        .with_inner_size([w, h])
        .with_min_inner_size([360.0, 420.0]);

    if config.ui.always_on_top {
        vp = vp.with_always_on_top();
    }

    if let Some((x, y)) = config.ui.window_position {
        vp = vp.with_position(egui::pos2(x, y));
    }

    eframe::NativeOptions {
        viewport: vp,
        ..Default::default()
    }
}

/// The speaker, or a timeline rendered against wall time when no output
/// device can be opened, so the call still runs (text only).
fn open_output(config: &AppConfig, rt: &tokio::runtime::Runtime) -> Arc<dyn AudioOutput> {
    match CpalOutput::open(config.audio.output_device.clone()) {
        Ok(output) => Arc::new(output),
        Err(e) => {
            log::warn!("Audio output unavailable ({e}); assistant speech will be silent");
            let timeline = SharedTimeline::new(DEFAULT_TTS_SAMPLE_RATE, 1);
            rt.spawn(timeline.clone().run_wall_clock());
            Arc::new(timeline)
        }
    }
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("callme client starting up");

    // 2. Configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });

    // 3. Tokio runtime
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;

    // 4. Playback
    let scheduler = PlaybackScheduler::new(open_output(&config, &rt), config.playback);

    // 5. Session controller
    let state = SharedState::new();
    let mic = CapturePipeline::new(config.audio.input_device.clone());
    let (packet_tx, packet_rx) = mpsc::channel(PACKET_QUEUE);
    let controller = SessionController::new(state.clone(), scheduler, Box::new(mic), packet_tx);

    // 6. Session loop
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let session = SessionHandle::new(command_tx);
    let session_task = rt.spawn(run_session(
        controller,
        config.server.ws_url.clone(),
        command_rx,
        packet_rx,
    ));

    // 7. Character
    let source: Arc<dyn CharacterSource> = Arc::new(HttpCharacterSource::new(
        &config.server.api_base_url,
        config.server.api_timeout_secs,
    ));
    let (character_tx, character_rx) = mpsc::channel::<CharacterConfig>(1);
    {
        let source = Arc::clone(&source);
        let character_id = config.avatar.character_id.clone();
        rt.spawn(async move {
            let character = load_config_or_default(source.as_ref(), character_id.as_deref()).await;
            let _ = character_tx.send(character).await;
        });
    }

    // 8. Build the egui app and run it (blocks until the window is closed)
    let options = native_options(&config);
    let app = CallApp::new(state, session, character_rx, source, config);

    eframe::run_native(
        "callme",
        options,
        Box::new(move |cc| {
            egui_extras::install_image_loaders(&cc.egui_ctx);
            Ok(Box::new(app))
        }),
    )
    .map_err(|e| anyhow::anyhow!("window error: {e}"))?;

    // `on_exit` sent Shutdown; let the loop tear the call down.
    if let Err(e) = rt.block_on(session_task) {
        log::warn!("Session loop ended abnormally: {e}");
    }
    log::info!("callme client stopped");
    Ok(())
}
