//! The staged conversation script: greeting, name capture, project intro,
//! then the open-ended presentation. `advance` is the single entry point and
//! is rate-limited so the interviewer never talks over itself.

use std::time::Duration;

use tokio::time::Instant;

use crate::session::{InterviewSession, Stage};

/// Minimum gap between two scripted responses. The very first greeting is
/// exempt because nothing has been said yet.
pub const RESPONSE_COOLDOWN: Duration = Duration::from_secs(15);

/// Gap before a stage re-prompts instead of staying quiet.
pub const REPROMPT_GATE: Duration = Duration::from_secs(5);

/// Transcript length that counts as a sufficient project introduction.
pub const INTRO_TRANSCRIPT_MIN: usize = 50;

const WELCOME: &str = "Hello! Welcome to your project presentation interview. \
    I'm your AI interviewer today. Before we begin, could you please tell me your name?";
const NAME_REPROMPT: &str =
    "I didn't quite catch your name. Could you please tell me your name again?";
const PROJECT_REPROMPT: &str = "Could you tell me a bit more about your project? What does it do?";

/// Advances the scripted conversation one step, returning the utterance to
/// deliver, if any. Stage transitions only ever move forward.
pub fn advance(session: &mut InterviewSession) -> Option<String> {
    let now = Instant::now();

    if let Some(last) = session.last_response_time {
        if now.duration_since(last) < RESPONSE_COOLDOWN {
            return None;
        }
    }
    let past_reprompt_gate = session
        .last_response_time
        .is_none_or(|last| now.duration_since(last) > REPROMPT_GATE);

    match session.stage {
        Stage::Greeting => {
            session.stage = Stage::AwaitingName;
            session.last_response_time = Some(now);
            Some(WELCOME.to_string())
        }
        Stage::AwaitingName => {
            if let Some(name) = session.student_name.clone() {
                session.stage = Stage::ProjectIntro;
                session.last_response_time = Some(now);
                Some(format!(
                    "Nice to meet you, {name}! I'm excited to learn about your project. \
                     Could you start by telling me what you've built and what problem it solves?"
                ))
            } else if past_reprompt_gate {
                session.last_response_time = Some(now);
                Some(NAME_REPROMPT.to_string())
            } else {
                None
            }
        }
        Stage::ProjectIntro => {
            if session.transcript.chars().count() > INTRO_TRANSCRIPT_MIN {
                session.stage = Stage::Presentation;
                session.last_response_time = Some(now);
                let name_part = session
                    .student_name
                    .as_ref()
                    .map(|n| format!("{n}, "))
                    .unwrap_or_default();
                Some(format!(
                    "Thank you {name_part}for that introduction! Please go ahead and share \
                     your screen to walk me through your project. I'll be listening carefully \
                     and will ask questions when you pause."
                ))
            } else if past_reprompt_gate {
                session.last_response_time = Some(now);
                Some(PROJECT_REPROMPT.to_string())
            } else {
                None
            }
        }
        // Question generation owns this stage.
        Stage::Presentation => None,
    }
}
