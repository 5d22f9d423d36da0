//! Final markdown report, produced on demand by the report endpoint.

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::collab::{bounded, Generator, REPORT_TIMEOUT};
use crate::session::{tail, EvaluationScores, InterviewSession, QaPair};

const REPORT_TAIL: usize = 2000;
const REPORT_MAX_TOKENS: u32 = 1500;
const REPORT_TEMPERATURE: f32 = 0.7;

/// Snapshot of everything the report prompt needs, cloned out of the session
/// under its lock so the worker is not blocked while the report generates.
#[derive(Debug, Clone)]
pub struct ReportInputs {
    pub session_id: Uuid,
    pub student_name: Option<String>,
    pub project_name: Option<String>,
    pub qa_pairs: Vec<QaPair>,
    pub context_tail: String,
    pub transcript_tail: String,
    pub scores: EvaluationScores,
    pub questions_asked: usize,
}

impl ReportInputs {
    pub fn from_session(session: &InterviewSession) -> Self {
        Self {
            session_id: session.id,
            student_name: session.student_name.clone(),
            project_name: session.project_name.clone(),
            qa_pairs: session.qa_pairs.clone(),
            context_tail: tail(&session.context, REPORT_TAIL).to_string(),
            transcript_tail: tail(&session.transcript, REPORT_TAIL).to_string(),
            scores: session.evaluation_scores,
            questions_asked: session.questions_asked.len(),
        }
    }
}

/// One generation call summarizing the whole interview as markdown.
pub async fn generate(inputs: &ReportInputs, generator: &dyn Generator) -> Result<String> {
    let prompt = build_prompt(inputs)?;
    bounded(
        "report generation",
        REPORT_TIMEOUT,
        generator.complete(&prompt, REPORT_MAX_TOKENS, REPORT_TEMPERATURE),
    )
    .await
    .context("report generation failed")
}

fn build_prompt(inputs: &ReportInputs) -> Result<String> {
    let qa_json = serde_json::to_string_pretty(&inputs.qa_pairs)
        .context("failed to serialize qa pairs")?;
    let scores_json =
        serde_json::to_string(&inputs.scores).context("failed to serialize scores")?;

    Ok(format!(
        "Generate a comprehensive evaluation report for this project presentation:\n\n\
         Student Name: {name}\n\
         Project Name: {project}\n\n\
         Q&A Pairs:\n{qa_json}\n\n\
         Context: {context}\n\
         Transcript: {transcript}\n\n\
         Current Scores: {scores_json}\n\n\
         Provide:\n\
         1. Overall Assessment (2-3 paragraphs)\n\
         2. Strengths (3-4 bullet points)\n\
         3. Areas for Improvement (3-4 bullet points)\n\
         4. Technical Depth Analysis\n\
         5. Final Recommendation\n\n\
         Format as markdown.",
        name = inputs.student_name.as_deref().unwrap_or("Unknown"),
        project = inputs.project_name.as_deref().unwrap_or("Unknown"),
        context = inputs.context_tail,
        transcript = inputs.transcript_tail,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::MockGenerator;
    use chrono::Utc;

    fn inputs() -> ReportInputs {
        ReportInputs {
            session_id: Uuid::new_v4(),
            student_name: Some("Alex".into()),
            project_name: None,
            qa_pairs: vec![QaPair {
                question: "Why Rust?".into(),
                answer: "Memory safety.".into(),
                timestamp: Utc::now(),
            }],
            context_tail: "[SCREEN]: fn main()".into(),
            transcript_tail: "it is written in rust".into(),
            scores: EvaluationScores::default(),
            questions_asked: 1,
        }
    }

    #[test]
    fn prompt_carries_names_and_qa_history() {
        let prompt = build_prompt(&inputs()).unwrap();
        assert!(prompt.contains("Student Name: Alex"));
        assert!(prompt.contains("Project Name: Unknown"));
        assert!(prompt.contains("Why Rust?"));
        assert!(prompt.contains("Format as markdown."));
    }

    #[tokio::test]
    async fn generation_returns_the_markdown_body() {
        let mut generator = MockGenerator::new();
        generator
            .expect_complete()
            .returning(|_, _, _| Ok("# Report\nSolid work.".to_string()));
        let report = generate(&inputs(), &generator).await.unwrap();
        assert!(report.starts_with("# Report"));
    }
}
