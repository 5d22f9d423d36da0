//! Heuristic extraction of candidate facts from transcribed speech.
//!
//! The keyword-adjacency approach is a best-effort signal, not NLP. It sits
//! behind a trait so a smarter extractor can replace it without touching the
//! state machine or the worker.

const PUNCT: &[char] = &['.', ',', '!', '?'];

const NAME_MARKERS: &[&str] = &["i'm", "im", "name", "called"];
const PROJECT_MARKERS: &[&str] = &["project", "called", "named"];
const PROJECT_HINTS: &[&str] = &["project", "built", "created"];

/// A candidate name, tagged by how it was found. Marker hits are strong
/// enough to replace an earlier capture; the leading-token fallback is only
/// trustworthy when no name has been captured yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameGuess {
    FromMarker(String),
    FirstToken(String),
}

pub trait FactExtractor: Send + Sync {
    /// Pulls a candidate name out of an utterance, if one is recognizable.
    fn extract_name(&self, utterance: &str) -> Option<NameGuess>;

    /// Pulls a project name out of an utterance, if one is recognizable.
    fn extract_project(&self, utterance: &str) -> Option<String>;
}

/// Marker-word adjacency extraction: find a marker token, take what follows.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordExtractor;

impl FactExtractor for KeywordExtractor {
    fn extract_name(&self, utterance: &str) -> Option<NameGuess> {
        let words: Vec<&str> = utterance.split_whitespace().collect();
        for (i, word) in words.iter().enumerate() {
            if NAME_MARKERS.contains(&word.to_lowercase().as_str()) {
                if let Some(next) = words.get(i + 1) {
                    return Some(NameGuess::FromMarker(next.trim_matches(PUNCT).to_string()));
                }
            }
        }
        // No marker matched; assume the utterance led with the name.
        words
            .first()
            .map(|w| NameGuess::FirstToken(w.trim_matches(PUNCT).to_string()))
    }

    fn extract_project(&self, utterance: &str) -> Option<String> {
        if !PROJECT_HINTS
            .iter()
            .any(|hint| utterance.to_lowercase().contains(hint))
        {
            return None;
        }
        let words: Vec<&str> = utterance.split_whitespace().collect();
        for (i, word) in words.iter().enumerate() {
            if PROJECT_MARKERS.contains(&word.to_lowercase().as_str()) && i + 1 < words.len() {
                let end = (i + 4).min(words.len());
                let name = words[i + 1..end].join(" ");
                return Some(name.trim_matches(PUNCT).to_string());
            }
        }
        None
    }
}
