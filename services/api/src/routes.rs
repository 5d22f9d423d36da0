//! Report and health endpoints: read-only views over the session registry.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use viva_core::protocol::ReportResponse;
use viva_core::report::{self, ReportInputs};

use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ReportResult {
    Ok(Box<ReportResponse>),
    Err { error: String },
}

/// `GET /report/{session_id}`: one generation call summarizing the full
/// interview into a markdown report plus the current score snapshot.
pub async fn generate_report(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
) -> Json<ReportResult> {
    let Ok(id) = Uuid::parse_str(&session_id) else {
        return Json(ReportResult::Err {
            error: "Session not found".to_string(),
        });
    };
    let Some(session) = state.registry.get(id).await else {
        return Json(ReportResult::Err {
            error: "Session not found".to_string(),
        });
    };

    // Snapshot under the lock, generate outside it.
    let inputs = ReportInputs::from_session(&*session.lock().await);

    match report::generate(&inputs, state.generator.as_ref()).await {
        Ok(text) => Json(ReportResult::Ok(Box::new(ReportResponse {
            session_id: id,
            report: text,
            scores: inputs.scores,
            questions_asked: inputs.questions_asked,
            qa_pairs: inputs.qa_pairs,
            student_name: inputs.student_name.unwrap_or_default(),
            project_name: inputs.project_name.unwrap_or_default(),
        }))),
        Err(e) => {
            warn!(%id, error = %format!("{e:#}"), "report generation failed");
            Json(ReportResult::Err {
                error: format!("{e:#}"),
            })
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub active_sessions: usize,
}

/// `GET /health`
pub async fn health_check(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "healthy",
        active_sessions: state.registry.active_count().await,
    })
}
