//! Periodic rubric scoring of the presentation.
//!
//! The trigger is a plain elapsed-time counter: an evaluation is due once a
//! minute has passed since the previous attempt and at least one question has
//! been asked. Scores only ever change on a successful parse, field by field.

use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;

use crate::collab::{bounded, Generator, CALL_TIMEOUT};
use crate::protocol::ServerMessage;
use crate::session::{tail, EvaluationScores, InterviewSession};

pub const EVALUATION_INTERVAL: Duration = Duration::from_secs(60);

const EVAL_TAIL: usize = 1500;
const EVAL_MAX_TOKENS: u32 = 100;
const EVAL_TEMPERATURE: f32 = 0.3;

/// Fields absent from the model's reply keep their previous value.
#[derive(Debug, Default, Deserialize)]
pub struct PartialScores {
    pub technical_depth: Option<u8>,
    pub clarity: Option<u8>,
    pub originality: Option<u8>,
    pub understanding: Option<u8>,
    pub overall: Option<u8>,
}

impl PartialScores {
    pub fn merge_into(&self, scores: &mut EvaluationScores) {
        if let Some(v) = self.technical_depth {
            scores.technical_depth = v;
        }
        if let Some(v) = self.clarity {
            scores.clarity = v;
        }
        if let Some(v) = self.originality {
            scores.originality = v;
        }
        if let Some(v) = self.understanding {
            scores.understanding = v;
        }
        if let Some(v) = self.overall {
            scores.overall = v;
        }
    }
}

pub fn due(session: &InterviewSession) -> bool {
    !session.questions_asked.is_empty()
        && session.last_evaluation.elapsed() >= EVALUATION_INTERVAL
}

/// Requests a score update and merges it into the session. Emits an
/// `evaluation` message to the client on success. The attempt time is
/// stamped up front so a failing generator is not retried every tick.
pub async fn run(
    session: &mut InterviewSession,
    generator: &dyn Generator,
) -> Option<EvaluationScores> {
    session.last_evaluation = Instant::now();

    let prompt = build_prompt(session);
    let raw = match bounded(
        "evaluation",
        CALL_TIMEOUT,
        generator.complete(&prompt, EVAL_MAX_TOKENS, EVAL_TEMPERATURE),
    )
    .await
    {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(session_id = %session.id, error = %format!("{e:#}"), "evaluation request failed");
            return None;
        }
    };

    match parse_scores(&raw) {
        Ok(partial) => {
            partial.merge_into(&mut session.evaluation_scores);
            session.send(ServerMessage::Evaluation {
                scores: session.evaluation_scores,
            });
            Some(session.evaluation_scores)
        }
        Err(e) => {
            tracing::warn!(session_id = %session.id, error = %e, "evaluation payload did not parse, keeping previous scores");
            None
        }
    }
}

/// Parses the model's reply as a (possibly partial) score payload.
pub fn parse_scores(raw: &str) -> Result<PartialScores, serde_json::Error> {
    serde_json::from_str(strip_fences(raw))
}

/// Models sometimes wrap JSON in a markdown fence despite instructions.
fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

fn build_prompt(session: &InterviewSession) -> String {
    format!(
        "Evaluate this student's project presentation on a scale of 1-10 for each category:\n\n\
         Content: {context}\n\
         Speech: {transcript}\n\
         Questions Asked: {count}\n\n\
         Provide scores (1-10) for:\n\
         1. Technical Depth - Understanding of technical concepts and implementation\n\
         2. Clarity - Clear communication and explanation\n\
         3. Originality - Creativity and innovation in the solution\n\
         4. Understanding - Depth of knowledge about their own project\n\n\
         Return JSON format:\n\
         {{\"technical_depth\": X, \"clarity\": X, \"originality\": X, \"understanding\": X, \"overall\": X}}\n\n\
         Only return the JSON, no other text.",
        context = tail(&session.context, EVAL_TAIL),
        transcript = tail(&session.transcript, EVAL_TAIL),
        count = session.questions_asked.len(),
    )
}
