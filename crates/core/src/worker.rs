//! One cooperative loop per session.
//!
//! The worker drains the inbound event queue one event per tick, folds events
//! into the session through context fusion, consults the dialogue script or
//! question policy, runs the periodic evaluation, and decays the speech flag.
//! It never exits on its own; only the session's cancellation token stops it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::collab::SharedGenerator;
use crate::fusion::ContextFusion;
use crate::protocol::ServerMessage;
use crate::session::{InterviewSession, Stage};
use crate::{dialogue, evaluation, question};

pub const TICK_INTERVAL: Duration = Duration::from_millis(100);
/// Give the client a moment to settle before the scripted greeting.
pub const GREETING_GRACE: Duration = Duration::from_secs(2);
/// Pause before responding conversationally to a fresh utterance.
pub const CONVERSE_PAUSE: Duration = Duration::from_secs(1);
/// `has_spoken_recently` clears after this much silence.
pub const SPEECH_DECAY: Duration = Duration::from_secs(3);
/// Backoff after an unexpected tick failure.
pub const TICK_BACKOFF: Duration = Duration::from_secs(1);

/// Events the connection handler enqueues for its worker. Payloads are the
/// raw data-URL strings from the wire; decoding happens during fusion.
#[derive(Debug)]
pub enum InboundEvent {
    Frame(String),
    Audio(String),
}

pub struct SessionWorker {
    session: Arc<Mutex<InterviewSession>>,
    events: mpsc::UnboundedReceiver<InboundEvent>,
    fusion: ContextFusion,
    generator: SharedGenerator,
    greeting_sent: bool,
}

impl SessionWorker {
    pub fn new(
        session: Arc<Mutex<InterviewSession>>,
        events: mpsc::UnboundedReceiver<InboundEvent>,
        fusion: ContextFusion,
        generator: SharedGenerator,
    ) -> Self {
        Self {
            session,
            events,
            fusion,
            generator,
            greeting_sent: false,
        }
    }

    /// Runs until `cancel` fires. A failing tick is logged and followed by a
    /// fixed backoff; it never terminates the loop.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("session worker cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(&cancel).await {
                        tracing::error!(error = %format!("{e:#}"), "session tick failed, backing off");
                        pause(&cancel, TICK_BACKOFF).await;
                    }
                }
            }
        }
    }

    async fn tick(&mut self, cancel: &CancellationToken) -> anyhow::Result<()> {
        self.maybe_greet(cancel).await;

        // Exactly one event per tick keeps per-session collaborator calls
        // sequential and the loop responsive to cancellation.
        match self.events.try_recv() {
            Ok(InboundEvent::Frame(data)) => {
                let mut session = self.session.lock().await;
                if let Err(e) = self.fusion.ingest_frame(&mut session, &data).await {
                    tracing::warn!(session_id = %session.id, error = %e, "frame ingestion failed");
                }
            }
            Ok(InboundEvent::Audio(data)) => {
                let stage = {
                    let mut session = self.session.lock().await;
                    if let Err(e) = self.fusion.ingest_audio(&mut session, &data).await {
                        tracing::warn!(session_id = %session.id, error = %e, "audio ingestion failed");
                    }
                    session.stage
                };
                self.respond_to_speech(stage, cancel).await;
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
        }

        {
            let mut session = self.session.lock().await;
            if evaluation::due(&session) {
                evaluation::run(&mut session, self.generator.as_ref()).await;
            }
        }

        {
            let mut session = self.session.lock().await;
            if session.has_spoken_recently {
                let silent_for_a_while = session
                    .last_speech_time
                    .is_none_or(|t| t.elapsed() > SPEECH_DECAY);
                if silent_for_a_while {
                    session.has_spoken_recently = false;
                }
            }
        }

        Ok(())
    }

    /// Sends the one-time scripted greeting once a transport is attached,
    /// after the initial grace period.
    async fn maybe_greet(&mut self, cancel: &CancellationToken) {
        if self.greeting_sent {
            return;
        }
        if self.session.lock().await.transport.is_none() {
            return;
        }
        if !pause(cancel, GREETING_GRACE).await {
            return;
        }

        let mut session = self.session.lock().await;
        if let Some(text) = dialogue::advance(&mut session) {
            session.send(ServerMessage::Question {
                question: text,
                speak: true,
            });
            self.greeting_sent = true;
        }
    }

    /// After a new utterance: re-run the script in the conversational stages,
    /// or consult the question policy during the presentation.
    async fn respond_to_speech(&mut self, stage: Stage, cancel: &CancellationToken) {
        match stage {
            Stage::AwaitingName | Stage::ProjectIntro => {
                if !pause(cancel, CONVERSE_PAUSE).await {
                    return;
                }
                let mut session = self.session.lock().await;
                if let Some(text) = dialogue::advance(&mut session) {
                    session.send(ServerMessage::Question {
                        question: text,
                        speak: true,
                    });
                }
            }
            Stage::Presentation => {
                let mut session = self.session.lock().await;
                if let Some(text) = question::generate(&mut session, self.generator.as_ref()).await
                {
                    session.send(ServerMessage::Question {
                        question: text,
                        speak: true,
                    });
                }
            }
            Stage::Greeting => {}
        }
    }
}

/// Waits for `duration` unless `cancel` fires first. Returns false when
/// cancelled so callers can bail out of the tick without finishing their work.
async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
