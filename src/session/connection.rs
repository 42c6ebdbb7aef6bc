//! WebSocket connection driver.
//!
//! [`run_session`] is the network-clock loop.  While disconnected it waits
//! for commands; once connected it multiplexes five sources with
//! `tokio::select!` and hands each to the [`SessionController`]:
//!
//! ```text
//! socket frames ──┐
//! commands ───────┤
//! voice packets ──┼──▶ SessionController ──▶ outbound mpsc ──▶ writer task ──▶ socket
//! decode results ─┤
//! meter tick ─────┘
//! ```
//!
//! The socket is split; a writer task owns the sink and drains the outbound
//! queue, so the controller never awaits a send.  Any read error or close
//! ends the inner loop and tears the call down; the outer loop keeps
//! running until the command channel closes or `Shutdown` arrives.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::audio::VoicePacket;
use crate::protocol::ClientMessage;

use super::controller::{SessionCommand, SessionController};

/// Display-rate meter / startup-buffer tick.
const METER_INTERVAL: Duration = Duration::from_millis(16);

// ---------------------------------------------------------------------------
// TransportError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {url} failed: {source}")]
    Connect {
        url: String,
        #[source]
        source: tungstenite::Error,
    },

    #[error("socket error: {0}")]
    Socket(#[from] tungstenite::Error),

    #[error("closed by peer")]
    Closed,
}

// ---------------------------------------------------------------------------
// SessionHandle
// ---------------------------------------------------------------------------

/// Cloneable sender of [`SessionCommand`]s for the window.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub fn new(tx: mpsc::UnboundedSender<SessionCommand>) -> Self {
        Self { tx }
    }

    /// Queue a command; silently dropped once the session loop has ended.
    pub fn send(&self, command: SessionCommand) {
        if self.tx.send(command).is_err() {
            log::debug!("session: loop has stopped, command dropped");
        }
    }
}

// ---------------------------------------------------------------------------
// run_session
// ---------------------------------------------------------------------------

/// Why the connected loop ended.
enum Exit {
    /// Back to waiting for `Connect`.
    Disconnected,
    /// Leave `run_session` entirely.
    Stop,
}

/// Drive `controller` until the command channel closes or `Shutdown`.
pub async fn run_session(
    mut controller: SessionController,
    url: String,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    mut packets: mpsc::Receiver<VoicePacket>,
) {
    loop {
        match commands.recv().await {
            None | Some(SessionCommand::Shutdown) => break,
            Some(SessionCommand::Connect) => {}
            Some(SessionCommand::Disconnect) => continue,
            Some(other) => {
                controller.handle_command(other);
                continue;
            }
        }

        // Packets captured during a previous call must not leak into this one.
        while packets.try_recv().is_ok() {}

        controller.begin_connect();
        if let Exit::Stop = connect_and_run(&mut controller, &url, &mut commands, &mut packets).await {
            log::info!("session: loop stopped");
            return;
        }
    }

    controller.teardown("shutdown");
    log::info!("session: loop stopped");
}

/// One call: connect, run until close or command, tear down.
async fn connect_and_run(
    controller: &mut SessionController,
    url: &str,
    commands: &mut mpsc::UnboundedReceiver<SessionCommand>,
    packets: &mut mpsc::Receiver<VoicePacket>,
) -> Exit {
    let socket = match tokio_tungstenite::connect_async(url).await {
        Ok((socket, _response)) => socket,
        Err(source) => {
            let e = TransportError::Connect {
                url: url.to_owned(),
                source,
            };
            log::warn!("session: {e}");
            controller.teardown(&e.to_string());
            return Exit::Disconnected;
        }
    };
    log::info!("session: socket open to {url}");

    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientMessage>();

    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let text = match message.to_json() {
                Ok(text) => text,
                Err(e) => {
                    log::warn!("session: cannot encode outbound message: {e}");
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text)).await {
                log::debug!("session: writer stopped: {e}");
                break;
            }
        }
        let _ = sink.close().await;
    });

    controller.attach(out_tx);

    let mut meter = tokio::time::interval(METER_INTERVAL);
    meter.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let (exit, reason) = loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => controller.handle_frame(&text),
                Some(Ok(Message::Binary(data))) => {
                    log::debug!("session: ignoring {} byte binary frame", data.len());
                }
                Some(Ok(Message::Close(_))) | None => {
                    break (Exit::Disconnected, TransportError::Closed.to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let e = TransportError::Socket(e);
                    log::warn!("session: {e}");
                    break (Exit::Disconnected, e.to_string());
                }
            },

            command = commands.recv() => match command {
                None | Some(SessionCommand::Shutdown) => break (Exit::Stop, "shutdown".to_owned()),
                Some(SessionCommand::Disconnect) => break (Exit::Disconnected, "closed by user".to_owned()),
                Some(SessionCommand::Connect) => {}
                Some(other) => controller.handle_command(other),
            },

            Some(packet) = packets.recv() => controller.on_packet(packet),

            completion = controller.next_completion(), if controller.has_pending_work() => {
                controller.on_completion(completion);
            }

            _ = meter.tick() => {
                controller.tick();
            }
        }
    };

    // Teardown drops the outbound sender, which ends the writer.
    controller.teardown(&reason);
    if writer.await.is_err() {
        log::warn!("session: writer task panicked");
    }
    exit
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::net::TcpListener;

    use super::*;
    use crate::audio::pipeline::testing::FakeMicrophone;
    use crate::playback::{PlaybackScheduler, PlaybackTunables, SharedTimeline};
    use crate::session::controller::PACKET_QUEUE;
    use crate::session::state::{ConnectionState, SharedState};

    async fn wait_for(state: &SharedState, what: impl Fn(&crate::session::CallStatus) -> bool) {
        for _ in 0..200 {
            if what(&state.lock()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached; status: {:?}", state.snapshot());
    }

    fn spawn_session(url: String) -> (SharedState, SessionHandle, tokio::task::JoinHandle<()>) {
        let state = SharedState::new();
        let timeline = SharedTimeline::new(16_000, 1);
        let scheduler = PlaybackScheduler::new(Arc::new(timeline), PlaybackTunables::default());
        let (packet_tx, packet_rx) = mpsc::channel(PACKET_QUEUE);
        let controller = SessionController::new(
            state.clone(),
            scheduler,
            Box::new(FakeMicrophone::default()),
            packet_tx,
        );
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_session(controller, url, cmd_rx, packet_rx));
        (state, SessionHandle::new(cmd_tx), task)
    }

    #[tokio::test]
    async fn handshake_over_a_real_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws/call", listener.local_addr().unwrap());

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();

            let hello = ws.next().await.unwrap().unwrap();
            let hello: serde_json::Value = serde_json::from_str(hello.to_text().unwrap()).unwrap();
            assert_eq!(hello["type"], "client.hello");

            ws.send(Message::Text(r#"{"type":"server.hello","session_id":"abc"}"#.into()))
                .await
                .unwrap();
            ws.send(Message::Text(r#"{"type":"bogus"}"#.into())).await.unwrap();
            ws.send(Message::Text(r#"{"type":"avatar.state","emotion":"sad","source":"llm"}"#.into()))
                .await
                .unwrap();

            // Wait for the client to hang up.
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    break;
                }
            }
        });

        let (state, handle, task) = spawn_session(url);
        handle.send(SessionCommand::Connect);
        wait_for(&state, |s| s.session_id.as_deref() == Some("abc")).await;
        wait_for(&state, |s| s.emotion == crate::avatar::Emotion::Sad).await;
        assert_eq!(state.lock().connection, ConnectionState::Connected);

        handle.send(SessionCommand::Disconnect);
        wait_for(&state, |s| s.connection == ConnectionState::Disconnected).await;
        server.await.unwrap();

        handle.send(SessionCommand::Shutdown);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn peer_close_resets_to_disconnected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws/call", listener.local_addr().unwrap());

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let _ = ws.next().await;
            ws.send(Message::Text(r#"{"type":"server.hello","session_id":"x"}"#.into()))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        });

        let (state, handle, task) = spawn_session(url);
        handle.send(SessionCommand::Connect);
        wait_for(&state, |s| {
            s.connection == ConnectionState::Disconnected
                && s.notices.iter().any(|n| n.contains("closed by peer"))
        })
        .await;

        drop(handle);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn failed_connect_reports_and_stays_usable() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let (state, handle, task) = spawn_session(format!("ws://127.0.0.1:{port}/ws/call"));

        handle.send(SessionCommand::Connect);
        wait_for(&state, |s| s.notices.iter().any(|n| n.contains("connect to"))).await;
        assert_eq!(state.lock().connection, ConnectionState::Disconnected);

        handle.send(SessionCommand::Shutdown);
        task.await.unwrap();
    }
}
