//! Core engine for the live project-presentation interviewer.
//!
//! Each connected candidate gets one [`session::InterviewSession`] and one
//! [`worker::SessionWorker`]. The worker is the only writer of the session:
//! the connection handler feeds it events through a queue, and the report and
//! health routes read through the [`registry::SessionRegistry`]. External
//! engines (OCR, transcription, text generation) are reached only through
//! the traits in [`collab`], which keeps the whole engine testable offline.

pub mod collab;
pub mod dialogue;
pub mod error;
pub mod evaluation;
pub mod extract;
pub mod fusion;
pub mod protocol;
pub mod question;
pub mod registry;
pub mod report;
pub mod session;
pub mod worker;
