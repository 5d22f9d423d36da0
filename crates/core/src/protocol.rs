//! Wire types for the websocket transport and the report endpoint.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session::{EvaluationScores, QaPair};

/// Messages the client sends over the websocket. Payloads are data URLs;
/// everything after the first comma is base64.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Frame { data: String },
    Audio { data: String },
}

/// Messages the server pushes to the client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    SessionId {
        session_id: Uuid,
    },
    /// Scripted or generated utterances; `speak` asks the client to voice it.
    Question {
        question: String,
        speak: bool,
    },
    Evaluation {
        scores: EvaluationScores,
    },
}

/// Body of a successful `/report/{session_id}` lookup.
#[derive(Debug, Clone, Serialize)]
pub struct ReportResponse {
    pub session_id: Uuid,
    pub report: String,
    pub scores: EvaluationScores,
    pub questions_asked: usize,
    pub qa_pairs: Vec<QaPair>,
    pub student_name: String,
    pub project_name: String,
}
