//! Question policy and generation for the presentation stage.

use std::time::Duration;

use tokio::time::Instant;

use crate::collab::{bounded, Generator, CALL_TIMEOUT};
use crate::session::{tail, InterviewSession, Stage, MAX_QUESTIONS};

/// Minimum gap between two generated questions.
pub const QUESTION_COOLDOWN: Duration = Duration::from_secs(5);

/// Let the candidate finish speaking before interrupting.
pub const SILENCE_GATE: Duration = Duration::from_secs(5);

/// Don't ask anything until this much fused content has accumulated.
pub const MIN_CONTENT_CHARS: usize = 200;

/// How much trailing context/transcript goes into the prompt.
const PROMPT_TAIL: usize = 1000;

const QUESTION_MAX_TOKENS: u32 = 150;
const QUESTION_TEMPERATURE: f32 = 0.7;

/// Whether the session may be asked a technical question right now. Stamps
/// `silence_start` the first time the speaking gate is consulted.
pub fn eligible(session: &mut InterviewSession) -> bool {
    let now = Instant::now();

    if session.stage != Stage::Presentation {
        return false;
    }
    if session.waiting_for_answer {
        return false;
    }
    if let Some(last) = session.last_question_time {
        if now.duration_since(last) < QUESTION_COOLDOWN {
            return false;
        }
    }
    if session.questions_asked.len() >= MAX_QUESTIONS {
        return false;
    }
    if session.has_spoken_recently {
        if session.silence_start.is_none() {
            session.silence_start = Some(now);
        }
        if let Some(last_speech) = session.last_speech_time {
            if now.duration_since(last_speech) < SILENCE_GATE {
                return false;
            }
        }
    }

    session.context.chars().count() + session.transcript.chars().count() > MIN_CONTENT_CHARS
}

/// Generates one follow-up question if policy allows. On collaborator
/// failure nothing is mutated and nothing is returned.
pub async fn generate(
    session: &mut InterviewSession,
    generator: &dyn Generator,
) -> Option<String> {
    if !eligible(session) {
        return None;
    }

    let prompt = build_prompt(session);
    let result = bounded(
        "question generation",
        CALL_TIMEOUT,
        generator.complete(&prompt, QUESTION_MAX_TOKENS, QUESTION_TEMPERATURE),
    )
    .await;

    match result {
        Ok(question) if !question.trim().is_empty() => {
            let question = question.trim().to_string();
            session.questions_asked.push(question.clone());
            session.current_question = Some(question.clone());
            session.waiting_for_answer = true;
            session.last_question_time = Some(Instant::now());
            Some(question)
        }
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(session_id = %session.id, error = %format!("{e:#}"), "question generation failed");
            None
        }
    }
}

fn build_prompt(session: &InterviewSession) -> String {
    let name = session.student_name.as_deref().unwrap_or("the student");
    format!(
        "You are conducting a conversational project interview with a student. \
         Be friendly and encouraging.\n\n\
         Student Name: {name}\n\
         Screen Content: {context}\n\
         What They Said: {transcript}\n\
         Previous Questions: {previous}\n\n\
         Generate ONE friendly, conversational question that:\n\
         1. Starts with a natural conversational phrase like \"I'm curious about...\", \
         \"That's interesting...\", \"Could you explain...\"\n\
         2. Tests their technical understanding\n\
         3. Is relevant to what they just showed or said\n\
         4. Encourages them to elaborate\n\
         5. Hasn't been asked before\n\n\
         Keep it natural and conversational, not formal.\n\n\
         Question:",
        context = tail(&session.context, PROMPT_TAIL),
        transcript = tail(&session.transcript, PROMPT_TAIL),
        previous = session.questions_asked.join(", "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::MockGenerator;
    use uuid::Uuid;

    fn ready_session() -> InterviewSession {
        let mut s = InterviewSession::new(Uuid::new_v4());
        s.stage = Stage::Presentation;
        s.context = "x".repeat(150);
        s.transcript = "y".repeat(100);
        s
    }

    #[tokio::test(start_paused = true)]
    async fn ineligible_outside_presentation() {
        let mut s = ready_session();
        s.stage = Stage::ProjectIntro;
        assert!(!eligible(&mut s));
    }

    #[tokio::test(start_paused = true)]
    async fn ineligible_while_waiting_for_answer() {
        let mut s = ready_session();
        s.waiting_for_answer = true;
        assert!(!eligible(&mut s));
    }

    #[tokio::test(start_paused = true)]
    async fn ineligible_during_question_cooldown() {
        let mut s = ready_session();
        s.last_question_time = Some(Instant::now());
        assert!(!eligible(&mut s));
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(eligible(&mut s));
    }

    #[tokio::test(start_paused = true)]
    async fn ineligible_once_question_budget_is_spent() {
        let mut s = ready_session();
        s.questions_asked = (0..MAX_QUESTIONS).map(|i| format!("q{i}")).collect();
        assert!(!eligible(&mut s));
    }

    #[tokio::test(start_paused = true)]
    async fn ineligible_while_candidate_is_still_speaking() {
        let mut s = ready_session();
        s.has_spoken_recently = true;
        s.last_speech_time = Some(Instant::now());

        assert!(!eligible(&mut s));
        assert!(s.silence_start.is_some(), "first check stamps silence_start");

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(eligible(&mut s));
    }

    #[tokio::test(start_paused = true)]
    async fn ineligible_without_enough_fused_content() {
        let mut s = ready_session();
        s.context = "x".repeat(100);
        s.transcript = "y".repeat(100);
        assert!(!eligible(&mut s), "exactly 200 chars is not enough");
    }

    #[tokio::test(start_paused = true)]
    async fn generate_records_the_question_and_arms_answer_capture() {
        let mut generator = MockGenerator::new();
        generator
            .expect_complete()
            .withf(|prompt, max_tokens, temperature| {
                prompt.contains("Student Name: the student")
                    && *max_tokens == 150
                    && (*temperature - 0.7).abs() < f32::EPSILON
            })
            .returning(|_, _, _| Ok("I'm curious about your caching layer?".to_string()));

        let mut s = ready_session();
        let q = generate(&mut s, &generator).await.unwrap();

        assert_eq!(q, "I'm curious about your caching layer?");
        assert_eq!(s.questions_asked, vec![q.clone()]);
        assert_eq!(s.current_question.as_deref(), Some(q.as_str()));
        assert!(s.waiting_for_answer);
        assert!(s.last_question_time.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn sixth_question_is_never_generated() {
        let mut generator = MockGenerator::new();
        generator.expect_complete().never();

        let mut s = ready_session();
        s.questions_asked = (0..MAX_QUESTIONS).map(|i| format!("q{i}")).collect();
        assert!(generate(&mut s, &generator).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn generator_failure_mutates_nothing() {
        let mut generator = MockGenerator::new();
        generator
            .expect_complete()
            .returning(|_, _, _| Err(anyhow::anyhow!("rate limited")));

        let mut s = ready_session();
        assert!(generate(&mut s, &generator).await.is_none());
        assert!(s.questions_asked.is_empty());
        assert!(!s.waiting_for_answer);
        assert!(s.last_question_time.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn previously_asked_questions_reach_the_prompt() {
        let mut s = ready_session();
        s.questions_asked.push("What about error handling?".into());
        s.student_name = Some("Alex".into());
        let prompt = build_prompt(&s);
        assert!(prompt.contains("Student Name: Alex"));
        assert!(prompt.contains("What about error handling?"));
    }
}
