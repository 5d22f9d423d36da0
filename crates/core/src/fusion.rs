//! Context fusion: folds visual frames and audio segments into the session's
//! bounded text buffers and extracts candidate facts along the way.

use std::collections::HashSet;
use std::io::{Cursor, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use tokio::time::Instant;

use crate::collab::{bounded, SharedOcr, SharedTranscriber, CALL_TIMEOUT};
use crate::error::FusionError;
use crate::extract::{FactExtractor, NameGuess};
use crate::session::{InterviewSession, QaPair, Stage};

/// Audio payloads below this size are treated as silence and dropped before
/// any transcription call is made.
pub const MIN_AUDIO_BYTES: usize = 1000;

/// OCR extractions this similar to a recent one are discarded as duplicates.
pub const DUP_SIMILARITY: f64 = 0.8;

pub struct ContextFusion {
    ocr: SharedOcr,
    transcriber: SharedTranscriber,
    extractor: Box<dyn FactExtractor>,
}

impl ContextFusion {
    pub fn new(
        ocr: SharedOcr,
        transcriber: SharedTranscriber,
        extractor: Box<dyn FactExtractor>,
    ) -> Self {
        Self {
            ocr,
            transcriber,
            extractor,
        }
    }

    /// Decodes a screen frame, runs OCR on a binarized copy, and appends the
    /// text to the session context unless it near-duplicates a recent
    /// extraction. Failures leave the session untouched.
    pub async fn ingest_frame(
        &self,
        session: &mut InterviewSession,
        data: &str,
    ) -> Result<(), FusionError> {
        let bytes = decode_data_url(data)?;
        let png = preprocess_frame(&bytes)?;

        let text = bounded("ocr", CALL_TIMEOUT, self.ocr.recognize(&png))
            .await
            .map_err(FusionError::Collaborator)?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(());
        }

        let is_duplicate = session
            .recent_ocr_texts
            .iter()
            .any(|old| jaccard(&text, old) > DUP_SIMILARITY);
        if is_duplicate {
            tracing::debug!(session_id = %session.id, "discarding near-duplicate ocr text");
            return Ok(());
        }

        session.push_context(&format!("\n[SCREEN]: {trimmed}"));
        session.remember_ocr(text);
        Ok(())
    }

    /// Decodes an audio segment, transcribes it through a scoped temp file,
    /// and appends the utterance to the transcript. Stage-specific fact
    /// extraction and answer capture run only on a non-empty transcription.
    pub async fn ingest_audio(
        &self,
        session: &mut InterviewSession,
        data: &str,
    ) -> Result<(), FusionError> {
        let bytes = decode_data_url(data)?;
        if bytes.len() < MIN_AUDIO_BYTES {
            return Ok(());
        }

        // NamedTempFile is removed on drop, so the recording is released on
        // every exit path, including transcription failure.
        let mut file = tempfile::Builder::new()
            .prefix("viva_audio_")
            .suffix(".wav")
            .tempfile()
            .map_err(|e| FusionError::Decode(format!("temp audio file: {e}")))?;
        file.write_all(&bytes)
            .and_then(|_| file.flush())
            .map_err(|e| FusionError::Decode(format!("temp audio file: {e}")))?;

        let text = bounded(
            "transcription",
            CALL_TIMEOUT,
            self.transcriber.transcribe(file.path()),
        )
        .await
        .map_err(FusionError::Collaborator)?;

        let utterance = text.trim();
        if utterance.is_empty() {
            return Ok(());
        }

        session.push_transcript(utterance);
        session.last_speech_time = Some(Instant::now());
        session.has_spoken_recently = true;
        session.silence_start = None;

        match session.stage {
            Stage::AwaitingName => match self.extractor.extract_name(utterance) {
                Some(NameGuess::FromMarker(name)) => session.student_name = Some(name),
                // The leading-token fallback must not clobber a name that a
                // marker already established on an earlier utterance.
                Some(NameGuess::FirstToken(name)) if session.student_name.is_none() => {
                    session.student_name = Some(name);
                }
                _ => {}
            },
            Stage::ProjectIntro => {
                if let Some(project) = self.extractor.extract_project(utterance) {
                    session.project_name = Some(project);
                }
            }
            _ => {}
        }

        if session.waiting_for_answer {
            if let Some(question) = session.current_question.take() {
                session.qa_pairs.push(QaPair {
                    question,
                    answer: utterance.to_string(),
                    timestamp: Utc::now(),
                });
            }
            session.waiting_for_answer = false;
        }

        Ok(())
    }
}

/// Pulls the base64 payload out of a data URL and decodes it. Inputs without
/// a media-type prefix are treated as bare base64.
fn decode_data_url(data: &str) -> Result<Vec<u8>, FusionError> {
    let payload = match data.split_once(',') {
        Some((_, b64)) => b64,
        None => data,
    };
    BASE64
        .decode(payload.trim())
        .map_err(|e| FusionError::Decode(format!("invalid base64 payload: {e}")))
}

/// Decodes an image and produces a binarized grayscale PNG suitable for OCR.
/// Thresholding uses Otsu's method over the luminance histogram.
fn preprocess_frame(bytes: &[u8]) -> Result<Vec<u8>, FusionError> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| FusionError::Decode(format!("unreadable image: {e}")))?;
    let gray = img.to_luma8();
    let threshold = otsu_threshold(&gray);

    let binary = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        if gray.get_pixel(x, y)[0] > threshold {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    });

    let mut out = Vec::new();
    DynamicImage::ImageLuma8(binary)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .map_err(|e| FusionError::Decode(format!("png encode: {e}")))?;
    Ok(out)
}

fn otsu_threshold(img: &GrayImage) -> u8 {
    let mut hist = [0u64; 256];
    for pixel in img.pixels() {
        hist[pixel[0] as usize] += 1;
    }
    let total = (img.width() as u64 * img.height() as u64) as f64;
    let weighted_sum: f64 = hist.iter().enumerate().map(|(v, &n)| v as f64 * n as f64).sum();

    let mut background_sum = 0.0;
    let mut background_weight = 0.0;
    let mut best = (0u8, f64::MIN);

    for t in 0..256usize {
        background_weight += hist[t] as f64;
        if background_weight == 0.0 {
            continue;
        }
        let foreground_weight = total - background_weight;
        if foreground_weight == 0.0 {
            break;
        }
        background_sum += t as f64 * hist[t] as f64;

        let mean_b = background_sum / background_weight;
        let mean_f = (weighted_sum - background_sum) / foreground_weight;
        let between = background_weight * foreground_weight * (mean_b - mean_f).powi(2);
        if between > best.1 {
            best = (t as u8, between);
        }
    }
    best.0
}

/// Jaccard similarity of the lower-cased word sets of two strings.
/// Returns 0 when either side has no words.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let words_a: HashSet<String> = a.split_whitespace().map(str::to_lowercase).collect();
    let words_b: HashSet<String> = b.split_whitespace().map(str::to_lowercase).collect();
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }
    let intersection = words_a.intersection(&words_b).count() as f64;
    let union = words_a.union(&words_b).count() as f64;
    intersection / union
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{MockOcr, MockTranscriber};
    use crate::extract::KeywordExtractor;
    use std::sync::Arc;
    use uuid::Uuid;

    fn fusion_with(ocr: MockOcr, transcriber: MockTranscriber) -> ContextFusion {
        ContextFusion::new(
            Arc::new(ocr),
            Arc::new(transcriber),
            Box::new(KeywordExtractor),
        )
    }

    fn frame_data_url() -> String {
        // A real 4x4 grayscale PNG so image decoding succeeds.
        let img = GrayImage::from_fn(4, 4, |x, _| if x < 2 { Luma([20u8]) } else { Luma([230u8]) });
        let mut png = Vec::new();
        DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .unwrap();
        format!("data:image/png;base64,{}", BASE64.encode(&png))
    }

    fn audio_data_url(len: usize) -> String {
        format!("data:audio/wav;base64,{}", BASE64.encode(vec![0u8; len]))
    }

    #[test]
    fn jaccard_over_word_sets() {
        assert_eq!(jaccard("", "anything"), 0.0);
        assert_eq!(jaccard("a b", "a b"), 1.0);
        assert!((jaccard("fn main rust", "fn main python") - 0.5).abs() < 1e-9);
        assert_eq!(jaccard("Hello World", "hello world"), 1.0);
    }

    #[test]
    fn otsu_separates_a_bimodal_histogram() {
        let img =
            GrayImage::from_fn(8, 8, |x, _| if x < 4 { Luma([10u8]) } else { Luma([240u8]) });
        let t = otsu_threshold(&img);
        assert!(t >= 10 && t < 240);
    }

    #[tokio::test]
    async fn duplicate_ocr_text_is_dropped() {
        let mut ocr = MockOcr::new();
        ocr.expect_recognize()
            .times(2)
            .returning(|_| Ok("fn main() { println!(\"hi\") }".to_string()));
        let fusion = fusion_with(ocr, MockTranscriber::new());

        let mut session = InterviewSession::new(Uuid::new_v4());
        let frame = frame_data_url();
        fusion.ingest_frame(&mut session, &frame).await.unwrap();
        fusion.ingest_frame(&mut session, &frame).await.unwrap();

        assert_eq!(session.context.matches("[SCREEN]").count(), 1);
        assert_eq!(session.recent_ocr_texts.len(), 1);
    }

    #[tokio::test]
    async fn distinct_ocr_text_is_appended() {
        let mut seq = mockall::Sequence::new();
        let mut ocr = MockOcr::new();
        ocr.expect_recognize()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok("terminal output one".to_string()));
        ocr.expect_recognize()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok("completely different editor pane".to_string()));
        let fusion = fusion_with(ocr, MockTranscriber::new());

        let mut session = InterviewSession::new(Uuid::new_v4());
        let frame = frame_data_url();
        fusion.ingest_frame(&mut session, &frame).await.unwrap();
        fusion.ingest_frame(&mut session, &frame).await.unwrap();

        assert_eq!(session.context.matches("[SCREEN]").count(), 2);
    }

    #[tokio::test]
    async fn blank_ocr_output_has_no_effect() {
        let mut ocr = MockOcr::new();
        ocr.expect_recognize().returning(|_| Ok("  \n ".to_string()));
        let fusion = fusion_with(ocr, MockTranscriber::new());

        let mut session = InterviewSession::new(Uuid::new_v4());
        fusion
            .ingest_frame(&mut session, &frame_data_url())
            .await
            .unwrap();
        assert!(session.context.is_empty());
        assert!(session.recent_ocr_texts.is_empty());
    }

    #[tokio::test]
    async fn malformed_frame_payload_is_a_decode_error() {
        let fusion = fusion_with(MockOcr::new(), MockTranscriber::new());
        let mut session = InterviewSession::new(Uuid::new_v4());

        let err = fusion
            .ingest_frame(&mut session, "data:image/png;base64,@@@not-base64@@@")
            .await
            .unwrap_err();
        assert!(matches!(err, FusionError::Decode(_)));
        assert!(session.context.is_empty());
    }

    #[tokio::test]
    async fn short_audio_is_silence() {
        let mut transcriber = MockTranscriber::new();
        transcriber.expect_transcribe().never();
        let fusion = fusion_with(MockOcr::new(), transcriber);

        let mut session = InterviewSession::new(Uuid::new_v4());
        fusion
            .ingest_audio(&mut session, &audio_data_url(999))
            .await
            .unwrap();
        assert!(session.transcript.is_empty());
        assert!(!session.has_spoken_recently);
    }

    #[tokio::test]
    async fn transcription_updates_speech_state_and_extracts_name() {
        let mut transcriber = MockTranscriber::new();
        transcriber
            .expect_transcribe()
            .returning(|_| Ok("I'm Alex".to_string()));
        let fusion = fusion_with(MockOcr::new(), transcriber);

        let mut session = InterviewSession::new(Uuid::new_v4());
        session.stage = Stage::AwaitingName;
        fusion
            .ingest_audio(&mut session, &audio_data_url(2000))
            .await
            .unwrap();

        assert_eq!(session.transcript, " I'm Alex");
        assert_eq!(session.student_name.as_deref(), Some("Alex"));
        assert!(session.has_spoken_recently);
        assert!(session.last_speech_time.is_some());
        assert!(session.silence_start.is_none());
    }

    #[tokio::test]
    async fn marker_free_follow_up_keeps_the_captured_name() {
        let mut seq = mockall::Sequence::new();
        let mut transcriber = MockTranscriber::new();
        transcriber
            .expect_transcribe()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok("I'm Alex".to_string()));
        transcriber
            .expect_transcribe()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok("Yes hello".to_string()));
        let fusion = fusion_with(MockOcr::new(), transcriber);

        // The name stage can linger after a capture while the response
        // cooldown holds the stage transition back.
        let mut session = InterviewSession::new(Uuid::new_v4());
        session.stage = Stage::AwaitingName;
        fusion
            .ingest_audio(&mut session, &audio_data_url(2000))
            .await
            .unwrap();
        fusion
            .ingest_audio(&mut session, &audio_data_url(2000))
            .await
            .unwrap();

        assert_eq!(session.student_name.as_deref(), Some("Alex"));
    }

    #[tokio::test]
    async fn leading_token_is_accepted_when_no_name_is_known() {
        let mut transcriber = MockTranscriber::new();
        transcriber
            .expect_transcribe()
            .returning(|_| Ok("Priya, nice to meet you".to_string()));
        let fusion = fusion_with(MockOcr::new(), transcriber);

        let mut session = InterviewSession::new(Uuid::new_v4());
        session.stage = Stage::AwaitingName;
        fusion
            .ingest_audio(&mut session, &audio_data_url(2000))
            .await
            .unwrap();
        assert_eq!(session.student_name.as_deref(), Some("Priya"));
    }

    #[tokio::test]
    async fn empty_transcription_has_no_effect() {
        let mut transcriber = MockTranscriber::new();
        transcriber
            .expect_transcribe()
            .returning(|_| Ok("   ".to_string()));
        let fusion = fusion_with(MockOcr::new(), transcriber);

        let mut session = InterviewSession::new(Uuid::new_v4());
        fusion
            .ingest_audio(&mut session, &audio_data_url(2000))
            .await
            .unwrap();
        assert!(session.transcript.is_empty());
        assert!(!session.has_spoken_recently);
    }

    #[tokio::test]
    async fn answer_arrival_resolves_the_outstanding_question() {
        let mut transcriber = MockTranscriber::new();
        transcriber
            .expect_transcribe()
            .returning(|_| Ok("It uses a worker pool".to_string()));
        let fusion = fusion_with(MockOcr::new(), transcriber);

        let mut session = InterviewSession::new(Uuid::new_v4());
        session.stage = Stage::Presentation;
        session.current_question = Some("How does it scale?".to_string());
        session.waiting_for_answer = true;

        fusion
            .ingest_audio(&mut session, &audio_data_url(2000))
            .await
            .unwrap();

        assert!(!session.waiting_for_answer);
        assert!(session.current_question.is_none());
        assert_eq!(session.qa_pairs.len(), 1);
        assert_eq!(session.qa_pairs[0].question, "How does it scale?");
        assert_eq!(session.qa_pairs[0].answer, "It uses a worker pool");
    }

    #[tokio::test]
    async fn transcription_failure_leaves_state_untouched() {
        let mut transcriber = MockTranscriber::new();
        transcriber
            .expect_transcribe()
            .returning(|_| Err(anyhow::anyhow!("whisper unavailable")));
        let fusion = fusion_with(MockOcr::new(), transcriber);

        let mut session = InterviewSession::new(Uuid::new_v4());
        let err = fusion
            .ingest_audio(&mut session, &audio_data_url(2000))
            .await
            .unwrap_err();
        assert!(matches!(err, FusionError::Collaborator(_)));
        assert!(session.transcript.is_empty());
    }

    #[tokio::test]
    async fn project_fact_extraction_runs_in_project_intro() {
        let mut transcriber = MockTranscriber::new();
        transcriber
            .expect_transcribe()
            .returning(|_| Ok("I created something called Study Buddy".to_string()));
        let fusion = fusion_with(MockOcr::new(), transcriber);

        let mut session = InterviewSession::new(Uuid::new_v4());
        session.stage = Stage::ProjectIntro;
        fusion
            .ingest_audio(&mut session, &audio_data_url(4000))
            .await
            .unwrap();
        assert_eq!(session.project_name.as_deref(), Some("Study Buddy"));
    }
}
