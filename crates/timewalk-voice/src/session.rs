//! **Voice session** — one conversation per client connection.
//!
//! The session loop owns the recognizer session, turn detector, response
//! controller and guide context, and selects over four sources: inbound
//! client frames, recognizer events, the turn detector's debounce deadline
//! and notices from background jobs. Every exit path tears down the current
//! response, background world jobs and the recognizer.

use crate::client::ClientSink;
use crate::config::VoiceConfig;
use crate::context::{GuideContext, Phase};
use crate::dialogue::{DialogueEngine, LanguageModel, SystemCue};
use crate::error::{VoiceError, VoiceResult};
use crate::protocol::ClientMessage;
use crate::response::{ResponseController, ResponsePipeline, Trigger};
use crate::stt::{RecognizerEvent, SttConnector, TranscriptionRelay};
use crate::tools::{SessionNotice, ToolExecutor, WorldTracking};
use crate::tts::TtsConnector;
use crate::turn::TurnDetector;
use futures::{Stream, StreamExt};
use std::sync::Arc;
use timewalk_core::WorldJobs;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Upstream services shared by all sessions.
#[derive(Clone)]
pub struct SessionServices {
    pub stt: Arc<dyn SttConnector>,
    pub tts: Arc<dyn TtsConnector>,
    pub model: Arc<dyn LanguageModel>,
    pub world_jobs: Option<Arc<dyn WorldJobs>>,
}

pub struct VoiceSession {
    config: VoiceConfig,
    services: SessionServices,
    world_tracking: WorldTracking,
}

impl VoiceSession {
    pub fn new(config: VoiceConfig, services: SessionServices) -> Self {
        Self {
            config,
            services,
            world_tracking: WorldTracking::default(),
        }
    }

    pub fn with_world_tracking(mut self, tracking: WorldTracking) -> Self {
        self.world_tracking = tracking;
        self
    }

    /// Run until the client goes away or the recognizer cannot be recovered.
    ///
    /// `inbound` yields raw client text frames; outbound events go through
    /// `client`, whose writer the caller drives.
    pub async fn run<S>(self, inbound: S, client: ClientSink) -> VoiceResult<()>
    where
        S: Stream<Item = String> + Unpin,
    {
        let stt = match TranscriptionRelay::open(self.services.stt.as_ref()).await {
            Ok(stt) => stt,
            Err(e) => {
                error!(target: "timewalk::session", "recognizer unavailable: {}", e);
                let _ = client.error("Speech recognition is unavailable");
                return Err(e);
            }
        };

        let (notice_tx, notices) = mpsc::unbounded_channel();
        let background = CancellationToken::new();
        let executor = ToolExecutor::new(client.clone(), self.services.world_jobs.clone(), notice_tx)
            .with_tracking(self.world_tracking)
            .with_cancellation(background.clone());
        let engine = DialogueEngine::new(self.services.model.clone(), self.config.dialogue.clone());
        let controller = ResponseController::new(ResponsePipeline {
            engine: Arc::new(Mutex::new(engine)),
            executor,
            tts: self.services.tts.clone(),
            synthesis: self.config.synthesis.clone(),
            client: client.clone(),
        });

        let mut state = ConnectionState {
            client,
            stt,
            stt_connector: self.services.stt.clone(),
            detector: TurnDetector::new(self.config.turn.clone()),
            controller,
            context: GuideContext::default(),
            notices,
        };
        info!(target: "timewalk::session", "🔌 Voice session started");

        let result = state.run_loop(inbound).await;

        background.cancel();
        state.controller.shutdown().await;
        state.stt.close().await;
        info!(target: "timewalk::session", "Voice session closed");
        result
    }
}

struct ConnectionState {
    client: ClientSink,
    stt: TranscriptionRelay,
    stt_connector: Arc<dyn SttConnector>,
    detector: TurnDetector,
    controller: ResponseController,
    context: GuideContext,
    notices: mpsc::UnboundedReceiver<SessionNotice>,
}

impl ConnectionState {
    async fn run_loop<S>(&mut self, mut inbound: S) -> VoiceResult<()>
    where
        S: Stream<Item = String> + Unpin,
    {
        loop {
            let deadline = self.detector.deadline();
            let debounce = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                frame = inbound.next() => match frame {
                    Some(raw) => self.on_client_frame(&raw).await,
                    None => {
                        debug!(target: "timewalk::session", "client stream ended");
                        return Ok(());
                    }
                },
                event = self.stt.next_event() => match event {
                    Ok(event) => self.on_recognizer_event(event),
                    Err(e) => self.recover_recognizer(e).await?,
                },
                _ = debounce => {
                    if let Some(text) = self.detector.poll(Instant::now()) {
                        self.fire_turn(text).await;
                    }
                },
                Some(notice) = self.notices.recv() => self.on_notice(notice).await,
            }

            if self.client.is_closed() {
                debug!(target: "timewalk::session", "client writer gone");
                return Ok(());
            }
        }
    }

    async fn on_client_frame(&mut self, raw: &str) {
        let msg = match ClientMessage::parse(raw) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(target: "timewalk::session", "skipping malformed client frame: {}", e);
                return;
            }
        };
        match msg {
            ClientMessage::Audio { data } => {
                if let Err(e) = self.stt.forward_audio(&data).await {
                    warn!(target: "timewalk::session", "audio chunk dropped: {}", e);
                }
            }
            ClientMessage::Context {
                location,
                time_period,
            } => {
                self.context.apply(location.as_ref(), time_period.as_ref());
                debug!(target: "timewalk::session", location = %self.context.location_name, period = %self.context.time_period, "context updated");
            }
            ClientMessage::Phase { phase } => {
                info!(target: "timewalk::session", %phase, "phase changed");
                self.context.set_phase(phase);
            }
            ClientMessage::Interrupt => {
                self.detector.note_interrupt(Instant::now());
                self.controller.submit(Trigger::Interrupt, &self.context).await;
            }
            ClientMessage::SessionStart => {
                self.detector.reset();
                self.controller
                    .submit(Trigger::System(SystemCue::SessionStart), &self.context)
                    .await;
            }
            ClientMessage::ConfirmExploration => {
                self.context.set_phase(Phase::Launching);
                self.controller
                    .submit(Trigger::System(SystemCue::ConfirmExploration), &self.context)
                    .await;
            }
        }
    }

    fn on_recognizer_event(&mut self, event: RecognizerEvent) {
        let now = Instant::now();
        match event {
            RecognizerEvent::Text(text) => {
                let _ = self.client.transcript(text.as_str());
                self.detector.on_fragment(&text, now);
            }
            RecognizerEvent::Step(estimates) => {
                self.detector.on_step(&estimates, now);
            }
            RecognizerEvent::Ready => debug!(target: "timewalk::session", "recognizer ready"),
            RecognizerEvent::EndOfStream => {}
        }
    }

    async fn fire_turn(&mut self, text: String) {
        if self.controller.is_running() {
            // speaking over the guide counts as barge-in
            self.detector.note_interrupt(Instant::now());
        }
        self.controller.submit(Trigger::UserTurn(text), &self.context).await;
    }

    async fn on_notice(&mut self, notice: SessionNotice) {
        match notice {
            SessionNotice::WorldReady { world_id } => {
                info!(target: "timewalk::session", %world_id, "world ready, cueing guide");
                self.controller
                    .submit(Trigger::System(SystemCue::WorldReady), &self.context)
                    .await;
            }
        }
    }

    /// Abandon the turn in progress and reopen the recognizer once.
    async fn recover_recognizer(&mut self, cause: VoiceError) -> VoiceResult<()> {
        warn!(target: "timewalk::session", "recognizer failed: {}", cause);
        self.controller.cancel_current().await;
        self.detector.reset();
        let _ = self.client.error("Speech recognition dropped; reconnecting");
        self.stt.close().await;

        match TranscriptionRelay::open(self.stt_connector.as_ref()).await {
            Ok(stt) => {
                self.stt = stt;
                info!(target: "timewalk::session", "recognizer reopened");
                Ok(())
            }
            Err(e) => {
                error!(target: "timewalk::session", "recognizer reopen failed: {}", e);
                let _ = self.client.error("Speech recognition is unavailable");
                Err(e)
            }
        }
    }
}
