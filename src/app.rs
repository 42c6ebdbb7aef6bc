//! Call window — egui/eframe application.
//!
//! # Architecture
//!
//! [`CallApp`] is the top-level [`eframe::App`].  It owns the render clock:
//! each frame it reads a [`CallStatus`] snapshot, advances the
//! [`MotionController`], composites the character and draws the controls.
//! User intents go to the session loop through a [`SessionHandle`]; nothing
//! here touches the socket, microphone or speaker directly.
//!
//! # Layout
//!
//! | Area    | Content                                                  |
//! |---------|----------------------------------------------------------|
//! | Top bar | status badge, connect / hang up, mic toggle, interrupt   |
//! | Centre  | avatar stage (click a hit area to trigger its reaction)  |
//! | Bottom  | live caption, transcript, notices, text input            |

use std::sync::Arc;
use std::time::{Duration, Instant};

use eframe::egui;
use tokio::sync::mpsc;

use crate::avatar::{
    compose, hit_test, normalize_point, CharacterConfig, CharacterSource, Composition,
    MotionController, MotionInput, Pose,
};
use crate::config::AppConfig;
use crate::protocol::CallPhase;
use crate::session::{CallStatus, ConnectionState, SessionCommand, SessionHandle, SharedState};

/// Display-rate repaint interval while the character is on screen.
const FRAME_INTERVAL: Duration = Duration::from_millis(16);

// ---------------------------------------------------------------------------
// CallApp
// ---------------------------------------------------------------------------

/// eframe application — the call window.
pub struct CallApp {
    // ── Session ──────────────────────────────────────────────────────────
    state: SharedState,
    session: SessionHandle,

    // ── Character ────────────────────────────────────────────────────────
    character: CharacterConfig,
    /// Delivers the character once the background load finishes.
    character_rx: mpsc::Receiver<CharacterConfig>,
    assets: Arc<dyn CharacterSource>,
    motion: MotionController,
    /// Origin of the render clock.
    started: Instant,
    last_pose: Pose,

    // ── UI state ─────────────────────────────────────────────────────────
    text_input: String,
    show_settings: bool,

    // ── Configuration ────────────────────────────────────────────────────
    /// Application configuration (read-only after startup).
    config: AppConfig,
}

impl CallApp {
    pub fn new(
        state: SharedState,
        session: SessionHandle,
        character_rx: mpsc::Receiver<CharacterConfig>,
        assets: Arc<dyn CharacterSource>,
        config: AppConfig,
    ) -> Self {
        let mut motion = MotionController::default();
        motion.set_reduced_motion(config.avatar.reduced_motion);
        if config.server.connect_on_start {
            session.send(SessionCommand::Connect);
        }
        Self {
            state,
            session,
            character: CharacterConfig::default(),
            character_rx,
            assets,
            motion,
            started: Instant::now(),
            last_pose: Pose::default(),
            text_input: String::new(),
            show_settings: false,
            config,
        }
    }

    fn now_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    /// Swap in a freshly loaded character (non-blocking).
    fn poll_character(&mut self) {
        while let Ok(character) = self.character_rx.try_recv() {
            log::info!(
                "app: character ready ({} parts, {} hit areas)",
                character.parts.len(),
                character.hit_areas.len()
            );
            self.character = character;
        }
    }

    // ── Top bar ──────────────────────────────────────────────────────────

    fn draw_top_bar(&mut self, ui: &mut egui::Ui, status: &CallStatus) {
        ui.horizontal(|ui| {
            ui.label(
                egui::RichText::new("●")
                    .color(connection_color(status.connection))
                    .size(14.0),
            );
            ui.label(
                egui::RichText::new(status.connection.label())
                    .color(egui::Color32::from_rgb(200, 200, 200))
                    .size(13.0),
            );
            if status.connection.is_connected() {
                ui.label(
                    egui::RichText::new(status.phase.label())
                        .color(phase_color(status.phase))
                        .size(12.0),
                );
            }

            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                if ui.small_button("=").clicked() {
                    self.show_settings = !self.show_settings;
                }

                let live = status.connection != ConnectionState::Disconnected;
                let call_label = if live { "Hang up" } else { "Call" };
                if ui.button(call_label).clicked() {
                    self.session.send(if live {
                        SessionCommand::Disconnect
                    } else {
                        SessionCommand::Connect
                    });
                }

                let connected = status.connection.is_connected();
                let mic_label = if status.mic_enabled { "Mic on" } else { "Mic off" };
                if ui
                    .add_enabled(connected, egui::Button::new(mic_label).selected(status.mic_enabled))
                    .clicked()
                {
                    self.session.send(SessionCommand::ToggleMic);
                }

                if ui
                    .add_enabled(connected && status.is_speaking(), egui::Button::new("Interrupt"))
                    .clicked()
                {
                    self.session.send(SessionCommand::Interrupt);
                }
            });
        });
    }

    // ── Avatar stage ─────────────────────────────────────────────────────

    fn draw_stage(&mut self, ui: &mut egui::Ui, status: &CallStatus) {
        let now = self.now_ms();
        self.last_pose = self.motion.update(MotionInput {
            now_ms: now,
            config: &self.character,
            speaking: status.is_speaking(),
            energy: status.energy,
        });
        let composition = compose(&self.character, status.emotion, &self.last_pose);

        let canvas = self.character.canvas;
        let available = ui.available_size();
        let height = available.y.max(120.0);
        let width = (height * canvas.aspect()).min(available.x);
        let height = width / canvas.aspect();
        let (stage, response) = ui.allocate_exact_size(egui::vec2(width, height), egui::Sense::click());

        if composition.is_placeholder() {
            self.draw_placeholder(ui, stage);
        } else {
            self.paint_layers(ui, stage, &composition);
        }

        if response.clicked() {
            if let Some(pos) = response.interact_pointer_pos() {
                let rect = (stage.left(), stage.top(), stage.width(), stage.height());
                if let Some((x, y)) = normalize_point(pos.x, pos.y, rect) {
                    self.on_stage_click(x, y, now);
                }
            }
        }
    }

    fn on_stage_click(&mut self, x: f32, y: f32, now_ms: f64) {
        let Some(area) = hit_test(&self.character, x, y) else {
            return;
        };
        let reaction_id = area.reaction_id.clone();
        if self.motion.trigger_reaction(&reaction_id, now_ms, &self.character) {
            log::debug!("app: {} → {reaction_id}", area.id);
        }
    }

    fn paint_layers(&self, ui: &mut egui::Ui, stage: egui::Rect, composition: &Composition) {
        let canvas = self.character.canvas;
        let k = stage.width() / canvas.width as f32;
        for layer in &composition.layers {
            let placed = layer.placement(canvas).transformed(&composition.transform, canvas);
            let rect = egui::Rect::from_min_size(
                stage.min + egui::vec2(placed.min.0 * k, placed.min.1 * k),
                egui::vec2(placed.size.0 * k, placed.size.1 * k),
            );
            let alpha = (placed.opacity.clamp(0.0, 1.0) * 255.0).round() as u8;
            egui::Image::new(self.assets.asset_url(&layer.asset_id))
                .rotate(
                    placed.rotate_deg.to_radians(),
                    egui::vec2(placed.anchor.0, placed.anchor.1),
                )
                .tint(egui::Color32::from_white_alpha(alpha))
                .paint_at(ui, rect);
        }
    }

    fn draw_placeholder(&self, ui: &mut egui::Ui, stage: egui::Rect) {
        let painter = ui.painter();
        painter.rect_filled(stage, 8.0, egui::Color32::from_rgb(40, 40, 46));
        painter.text(
            stage.center(),
            egui::Align2::CENTER_CENTER,
            "No character image",
            egui::FontId::proportional(14.0),
            egui::Color32::from_rgb(120, 120, 120),
        );
    }

    // ── Transcript + input ───────────────────────────────────────────────

    fn draw_conversation(&mut self, ui: &mut egui::Ui, status: &CallStatus) {
        if !status.live_caption.is_empty() {
            ui.label(
                egui::RichText::new(status.live_caption.as_str())
                    .color(egui::Color32::from_rgb(130, 130, 130))
                    .italics()
                    .size(12.0),
            );
        }

        egui::ScrollArea::vertical()
            .max_height(180.0)
            .stick_to_bottom(true)
            .show(ui, |ui| {
                for turn in status.transcript.turns() {
                    if !turn.user.is_empty() {
                        ui.label(
                            egui::RichText::new(format!("You: {}", turn.user))
                                .color(egui::Color32::from_rgb(180, 200, 255))
                                .size(12.0),
                        );
                    }
                    if !turn.assistant.is_empty() {
                        ui.label(
                            egui::RichText::new(turn.assistant.as_str())
                                .color(egui::Color32::from_rgb(220, 220, 220))
                                .size(12.0),
                        );
                    }
                }
            });

        if let Some(notice) = status.notices.back() {
            ui.label(
                egui::RichText::new(notice.as_str())
                    .color(egui::Color32::from_rgb(255, 136, 68))
                    .size(11.0),
            );
        }

        ui.horizontal(|ui| {
            let connected = status.connection.is_connected();
            let width = ui.available_width() - 60.0;
            let edit = ui.add_enabled(
                connected,
                egui::TextEdit::singleline(&mut self.text_input)
                    .hint_text("Type a message")
                    .desired_width(width),
            );
            let submitted = edit.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
            if (ui.add_enabled(connected, egui::Button::new("Send")).clicked() || submitted)
                && !self.text_input.trim().is_empty()
            {
                let text = std::mem::take(&mut self.text_input);
                self.session.send(SessionCommand::SendText(text.trim().to_owned()));
            }
        });
    }

    /// Render the settings panel.
    fn draw_settings(&mut self, ui: &mut egui::Ui) {
        let muted = egui::Color32::from_rgb(140, 140, 140);
        ui.label(egui::RichText::new(format!("Server: {}", self.config.server.ws_url)).color(muted).size(11.0));
        ui.label(egui::RichText::new(format!("API: {}", self.config.server.api_base_url)).color(muted).size(11.0));
        let devices = |name: &Option<String>| name.clone().unwrap_or_else(|| "system default".into());
        ui.label(
            egui::RichText::new(format!(
                "Input: {}  Output: {}",
                devices(&self.config.audio.input_device),
                devices(&self.config.audio.output_device)
            ))
            .color(muted)
            .size(11.0),
        );
        let mut reduced = self.motion.reduced_motion();
        if ui.checkbox(&mut reduced, "Reduced motion").changed() {
            self.motion.set_reduced_motion(reduced);
        }
        ui.label(
            egui::RichText::new(format!("Motion: {}", self.last_pose.state.label()))
                .color(muted)
                .size(11.0),
        );
    }
}

fn connection_color(state: ConnectionState) -> egui::Color32 {
    match state {
        ConnectionState::Disconnected => egui::Color32::from_rgb(100, 100, 100),
        ConnectionState::Connecting => egui::Color32::from_rgb(255, 200, 68),
        ConnectionState::Connected => egui::Color32::from_rgb(80, 200, 120),
    }
}

fn phase_color(phase: CallPhase) -> egui::Color32 {
    match phase {
        CallPhase::Idle => egui::Color32::from_rgb(120, 120, 120),
        CallPhase::Listening => egui::Color32::from_rgb(80, 200, 120),
        CallPhase::Thinking => egui::Color32::from_rgb(68, 136, 255),
        CallPhase::Speaking => egui::Color32::from_rgb(255, 140, 200),
        CallPhase::Interrupted => egui::Color32::from_rgb(255, 136, 68),
    }
}

// ---------------------------------------------------------------------------
// eframe::App impl
// ---------------------------------------------------------------------------

impl eframe::App for CallApp {
    /// Called every frame by eframe.  Reads the call status, advances the
    /// character, then renders the window.
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_character();
        let status = self.state.snapshot();

        // The character animates continuously.
        ctx.request_repaint_after(FRAME_INTERVAL);

        let frame = egui::Frame::new()
            .fill(egui::Color32::from_rgb(28, 28, 32))
            .inner_margin(egui::Margin::same(8));

        egui::TopBottomPanel::top("call-bar").frame(frame).show(ctx, |ui| {
            self.draw_top_bar(ui, &status);
            if self.show_settings {
                ui.separator();
                self.draw_settings(ui);
            }
        });

        egui::TopBottomPanel::bottom("conversation")
            .frame(frame)
            .show(ctx, |ui| self.draw_conversation(ui, &status));

        egui::CentralPanel::default()
            .frame(frame)
            .show(ctx, |ui| self.draw_stage(ui, &status));
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        log::info!("call window closing");
        self.session.send(SessionCommand::Shutdown);
    }
}
