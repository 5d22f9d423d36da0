use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use crate::protocol::ServerMessage;

/// How much screen-derived text a session keeps, and what survives a trim.
pub const CONTEXT_CAP: usize = 5000;
pub const CONTEXT_KEEP: usize = 3000;
pub const TRANSCRIPT_CAP: usize = 3000;
pub const TRANSCRIPT_KEEP: usize = 2000;

/// Number of raw OCR extractions retained for near-duplicate detection.
pub const OCR_DEDUP_WINDOW: usize = 5;

/// The interview never asks more than this many generated questions.
pub const MAX_QUESTIONS: usize = 5;

/// Discrete phases of the scripted conversation. Transitions only ever move
/// forward in this ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Greeting,
    AwaitingName,
    ProjectIntro,
    Presentation,
}

/// One resolved question/answer exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaPair {
    pub question: String,
    pub answer: String,
    pub timestamp: DateTime<Utc>,
}

/// Rubric scores on a 1-10 scale, zero until the first successful evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationScores {
    pub technical_depth: u8,
    pub clarity: u8,
    pub originality: u8,
    pub understanding: u8,
    pub overall: u8,
}

/// Mutable state for one interview. The session worker is the sole writer;
/// the report route only takes short read snapshots through the shared lock.
pub struct InterviewSession {
    pub id: Uuid,
    /// Outbound channel to the connected client. `None` once the socket is
    /// gone; sends become no-ops.
    pub transport: Option<mpsc::UnboundedSender<ServerMessage>>,
    pub stage: Stage,
    pub context: String,
    pub transcript: String,
    pub recent_ocr_texts: VecDeque<String>,
    pub questions_asked: Vec<String>,
    pub qa_pairs: Vec<QaPair>,
    pub current_question: Option<String>,
    pub waiting_for_answer: bool,
    pub student_name: Option<String>,
    pub project_name: Option<String>,
    pub evaluation_scores: EvaluationScores,
    pub last_question_time: Option<Instant>,
    pub last_speech_time: Option<Instant>,
    pub last_response_time: Option<Instant>,
    pub last_evaluation: Instant,
    pub silence_start: Option<Instant>,
    pub has_spoken_recently: bool,
}

impl InterviewSession {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            transport: None,
            stage: Stage::Greeting,
            context: String::new(),
            transcript: String::new(),
            recent_ocr_texts: VecDeque::with_capacity(OCR_DEDUP_WINDOW),
            questions_asked: Vec::new(),
            qa_pairs: Vec::new(),
            current_question: None,
            waiting_for_answer: false,
            student_name: None,
            project_name: None,
            evaluation_scores: EvaluationScores::default(),
            last_question_time: None,
            last_speech_time: None,
            last_response_time: None,
            // Stamped at creation so the first evaluation lands a full
            // interval after the interview starts.
            last_evaluation: Instant::now(),
            silence_start: None,
            has_spoken_recently: false,
        }
    }

    /// Delivers a message to the client if a transport is still attached.
    /// A closed or missing channel is not an error here; teardown of the
    /// socket is the connection handler's business.
    pub fn send(&self, msg: ServerMessage) {
        if let Some(tx) = &self.transport {
            if tx.send(msg).is_err() {
                tracing::debug!(session_id = %self.id, "transport closed, dropping outbound message");
            }
        }
    }

    /// Records an accepted OCR extraction in the dedup window.
    pub fn remember_ocr(&mut self, raw: String) {
        if self.recent_ocr_texts.len() == OCR_DEDUP_WINDOW {
            self.recent_ocr_texts.pop_front();
        }
        self.recent_ocr_texts.push_back(raw);
    }

    /// Appends to the screen-context buffer and applies the cap.
    pub fn push_context(&mut self, line: &str) {
        self.context.push_str(line);
        cap_tail(&mut self.context, CONTEXT_CAP, CONTEXT_KEEP);
    }

    /// Appends to the speech transcript and applies the cap.
    pub fn push_transcript(&mut self, utterance: &str) {
        self.transcript.push(' ');
        self.transcript.push_str(utterance);
        cap_tail(&mut self.transcript, TRANSCRIPT_CAP, TRANSCRIPT_KEEP);
    }
}

/// If `buf` holds more than `max` chars, keep only the trailing `keep` chars.
/// Operates on char boundaries so multi-byte input never splits a codepoint.
pub fn cap_tail(buf: &mut String, max: usize, keep: usize) {
    if buf.chars().count() <= max {
        return;
    }
    let cut = buf
        .char_indices()
        .rev()
        .nth(keep - 1)
        .map(|(i, _)| i)
        .unwrap_or(0);
    buf.drain(..cut);
}

/// The trailing `n` chars of `s`, on char boundaries.
pub fn tail(s: &str, n: usize) -> &str {
    match s.char_indices().rev().nth(n.saturating_sub(1)) {
        Some((i, _)) => &s[i..],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cap_tail_keeps_trailing_chars_once_exceeded() {
        let mut buf = "a".repeat(5001);
        cap_tail(&mut buf, CONTEXT_CAP, CONTEXT_KEEP);
        assert_eq!(buf.len(), 3000);

        let mut short = "b".repeat(5000);
        cap_tail(&mut short, CONTEXT_CAP, CONTEXT_KEEP);
        assert_eq!(short.len(), 5000);
    }

    #[test]
    fn cap_tail_respects_char_boundaries() {
        let mut buf = "é".repeat(5100);
        cap_tail(&mut buf, CONTEXT_CAP, CONTEXT_KEEP);
        assert_eq!(buf.chars().count(), 3000);
    }

    #[test]
    fn push_context_never_exceeds_cap() {
        let mut session = InterviewSession::new(Uuid::new_v4());
        for _ in 0..100 {
            session.push_context(&format!("\n[SCREEN]: {}", "x".repeat(400)));
            assert!(session.context.chars().count() <= CONTEXT_CAP);
        }
    }

    #[test]
    fn dedup_window_is_bounded() {
        let mut session = InterviewSession::new(Uuid::new_v4());
        for i in 0..8 {
            session.remember_ocr(format!("text {i}"));
        }
        assert_eq!(session.recent_ocr_texts.len(), OCR_DEDUP_WINDOW);
        assert_eq!(session.recent_ocr_texts.front().unwrap(), "text 3");
    }

    #[test]
    fn tail_returns_whole_string_when_short() {
        assert_eq!(tail("abc", 10), "abc");
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("", 3), "");
    }

    #[test]
    fn stage_ordering_is_forward() {
        assert!(Stage::Greeting < Stage::AwaitingName);
        assert!(Stage::AwaitingName < Stage::ProjectIntro);
        assert!(Stage::ProjectIntro < Stage::Presentation);
    }
}
