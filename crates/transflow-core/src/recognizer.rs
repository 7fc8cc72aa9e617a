//! Recognizer Session & Event Emitter: the Idle → Decoding → Draining →
//! Terminal state machine driving one streaming-ASR session per
//! `(CallId, Channel)`.
//!
//! The recognizer *model* is an injected, black-box external collaborator,
//! reached only through [`RecognizerSession`]/[`RecognizerFactory`] — an
//! abstract interface plus `Noop`/scripted test doubles, the same
//! decoupling pattern used for every other external collaborator in this
//! crate.

use async_trait::async_trait;

use crate::error::TransflowResult;
use crate::events::{TranscriptEvent, TranscriptStatus};
use crate::state::{CallId, Channel};
use crate::utils::{clamp_processing_time_ms, now_millis};

/// Result of feeding one frame to a recognizer session.
#[derive(Debug, Clone)]
pub struct FrameOutcome {
    pub is_final: bool,
    pub text: String,
}

/// One streaming-ASR session, stateful and private to the worker tailing
/// its stream: never shared across threads.
#[async_trait]
pub trait RecognizerSession: Send {
    /// Feeds one frame of audio to the decoder.
    async fn accept(&mut self, samples: &[f32]) -> TransflowResult<FrameOutcome>;

    /// Returns the most recent partial hypothesis without consuming input.
    fn partial(&self) -> String;

    /// Flushes the session, returning any trailing committed text.
    async fn flush(&mut self) -> TransflowResult<Option<String>>;
}

/// Factory for recognizer sessions, the only large shared read-only object
/// across sessions: the loaded model, not a mutable decoder.
#[async_trait]
pub trait RecognizerFactory: Send + Sync {
    async fn new_session(&self, sample_rate: u32) -> TransflowResult<Box<dyn RecognizerSession>>;
}

/// Drives one [`RecognizerSession`] through its lifecycle and emits
/// [`TranscriptEvent`]s according to the partial-dedup and
/// consolidated-once rules below.
pub struct SessionRunner {
    call_id: CallId,
    channel: Channel,
    language: String,
    engine_name: String,
    session: Box<dyn RecognizerSession>,
    last_partial: Option<String>,
    finals: Vec<String>,
    consolidated_emitted: bool,
}

impl SessionRunner {
    #[must_use]
    pub fn new(
        call_id: CallId,
        channel: Channel,
        language: String,
        engine_name: String,
        session: Box<dyn RecognizerSession>,
    ) -> Self {
        Self {
            call_id,
            channel,
            language,
            engine_name,
            session,
            last_partial: None,
            finals: Vec::new(),
            consolidated_emitted: false,
        }
    }

    /// Builds the `transcribing` placeholder event, emitted at most once per
    /// session when `TransflowConfig::emit_transcribing_placeholder` is set.
    /// Excluded from partial-dedup by construction: callers never route it
    /// through the partial-dedup path.
    #[must_use]
    pub fn transcribing_placeholder(&self) -> TranscriptEvent {
        self.base_event(0, TranscriptStatus::Transcribing, String::new(), true, 0)
    }

    /// Feeds one frame, returning zero or more events to publish.
    ///
    /// `offset_bytes` is the frame's start offset. Events must be published
    /// in non-decreasing offset order per session, which holds here because
    /// frames are fed in file order by the owning tailer.
    pub async fn feed(
        &mut self,
        samples: &[f32],
        offset_bytes: u64,
    ) -> TransflowResult<Vec<TranscriptEvent>> {
        let started_at = std::time::Instant::now();
        let outcome = self.session.accept(samples).await?;
        let processing_time_ms =
            clamp_processing_time_ms(started_at.elapsed().as_millis() as u64);

        let mut events = Vec::new();

        if outcome.is_final {
            self.finals.push(outcome.text.clone());
            events.push(self.base_event(
                offset_bytes,
                TranscriptStatus::Completed,
                outcome.text,
                false,
                processing_time_ms,
            ));
        } else {
            let trimmed = outcome.text.trim().to_string();
            let is_duplicate = self
                .last_partial
                .as_deref()
                .map(|prev| prev == trimmed)
                .unwrap_or(false);
            if !is_duplicate {
                self.last_partial = Some(trimmed.clone());
                events.push(self.base_event(
                    offset_bytes,
                    TranscriptStatus::Partial,
                    trimmed,
                    true,
                    processing_time_ms,
                ));
            }
        }

        Ok(events)
    }

    /// Drains the session and returns the single consolidated event, if any
    /// finals were produced. Never returns a value more than once per
    /// session.
    pub async fn stop(&mut self, offset_bytes: u64) -> TransflowResult<Option<TranscriptEvent>> {
        if let Some(trailing) = self.session.flush().await? {
            if !trailing.is_empty() {
                self.finals.push(trailing);
            }
        }

        if self.consolidated_emitted || self.finals.is_empty() {
            return Ok(None);
        }
        self.consolidated_emitted = true;

        let joined = self.finals.join(" ");
        Ok(Some(self.base_event(
            offset_bytes,
            TranscriptStatus::Consolidated,
            joined,
            false,
            0,
        )))
    }

    fn base_event(
        &self,
        offset_bytes: u64,
        status: TranscriptStatus,
        text: String,
        realtime: bool,
        processing_time_ms: u64,
    ) -> TranscriptEvent {
        TranscriptEvent {
            call_id: self.call_id.clone(),
            ts_ms: now_millis(),
            speaker: self.channel.speaker(),
            lang: self.language.clone(),
            confidence: None,
            offset_bytes,
            status,
            text,
            processing_time_ms,
            engine: self.engine_name.clone(),
            realtime,
            consolidated: matches!(status, TranscriptStatus::Consolidated),
        }
    }
}

/// Silent recognizer: accepts frames but never produces partial or final
/// text.
///
/// The recognizer model itself — a black-box streaming decoder — is an
/// external collaborator. This factory lets the server run end-to-end —
/// discovery, gating, tailing, publish plumbing — without a concrete
/// decoder wired in; swap in a real `RecognizerFactory` backed by the
/// deployment's chosen streaming-ASR backend to get actual transcripts.
pub struct SilentRecognizerFactory;

struct SilentSession;

#[async_trait]
impl RecognizerSession for SilentSession {
    async fn accept(&mut self, _samples: &[f32]) -> TransflowResult<FrameOutcome> {
        Ok(FrameOutcome {
            is_final: false,
            text: String::new(),
        })
    }

    fn partial(&self) -> String {
        String::new()
    }

    async fn flush(&mut self) -> TransflowResult<Option<String>> {
        Ok(None)
    }
}

#[async_trait]
impl RecognizerFactory for SilentRecognizerFactory {
    async fn new_session(&self, _sample_rate: u32) -> TransflowResult<Box<dyn RecognizerSession>> {
        Ok(Box::new(SilentSession))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Scripted recognizer session: returns a fixed sequence of outcomes,
    /// one per `accept` call.
    pub struct ScriptedSession {
        outcomes: std::collections::VecDeque<FrameOutcome>,
        last_partial: String,
    }

    impl ScriptedSession {
        pub fn new(outcomes: Vec<FrameOutcome>) -> Self {
            Self {
                outcomes: outcomes.into(),
                last_partial: String::new(),
            }
        }
    }

    #[async_trait]
    impl RecognizerSession for ScriptedSession {
        async fn accept(&mut self, _samples: &[f32]) -> TransflowResult<FrameOutcome> {
            let outcome = self.outcomes.pop_front().unwrap_or(FrameOutcome {
                is_final: false,
                text: self.last_partial.clone(),
            });
            if !outcome.is_final {
                self.last_partial = outcome.text.clone();
            }
            Ok(outcome)
        }

        fn partial(&self) -> String {
            self.last_partial.clone()
        }

        async fn flush(&mut self) -> TransflowResult<Option<String>> {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::ScriptedSession;
    use super::*;

    fn runner_with(outcomes: Vec<FrameOutcome>) -> SessionRunner {
        SessionRunner::new(
            "call-1".to_string(),
            Channel::Inbound,
            "fr".to_string(),
            "streaming-asr".to_string(),
            Box::new(ScriptedSession::new(outcomes)),
        )
    }

    fn partial(text: &str) -> FrameOutcome {
        FrameOutcome {
            is_final: false,
            text: text.to_string(),
        }
    }

    fn finale(text: &str) -> FrameOutcome {
        FrameOutcome {
            is_final: true,
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn growing_partials_then_a_final_emit_in_order() {
        let mut runner = runner_with(vec![partial("bon"), partial("bonjour"), finale("bonjour")]);

        let e1 = runner.feed(&[], 0).await.unwrap();
        assert_eq!(e1.len(), 1);
        assert_eq!(e1[0].text, "bon");
        assert_eq!(e1[0].status, TranscriptStatus::Partial);

        let e2 = runner.feed(&[], 160_000).await.unwrap();
        assert_eq!(e2[0].text, "bonjour");

        let e3 = runner.feed(&[], 320_000).await.unwrap();
        assert_eq!(e3[0].status, TranscriptStatus::Completed);
        assert_eq!(e3[0].text, "bonjour");
        assert_eq!(e3[0].speaker, "client");
    }

    #[tokio::test]
    async fn suppresses_consecutive_duplicate_partials() {
        let mut runner = runner_with(vec![partial("bon"), partial("bon"), partial("bonjour")]);

        assert_eq!(runner.feed(&[], 0).await.unwrap().len(), 1);
        assert_eq!(runner.feed(&[], 1).await.unwrap().len(), 0);
        assert_eq!(runner.feed(&[], 2).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn consolidated_event_emitted_exactly_once() {
        let mut runner = runner_with(vec![finale("bonjour"), finale("au revoir")]);
        runner.feed(&[], 0).await.unwrap();
        runner.feed(&[], 1).await.unwrap();

        let consolidated = runner.stop(2).await.unwrap().expect("one consolidated");
        assert_eq!(consolidated.text, "bonjour au revoir");
        assert_eq!(consolidated.status, TranscriptStatus::Consolidated);
        assert!(consolidated.consolidated);

        assert!(runner.stop(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn stop_with_no_finals_emits_nothing() {
        let mut runner = runner_with(vec![partial("bon")]);
        runner.feed(&[], 0).await.unwrap();
        assert!(runner.stop(1).await.unwrap().is_none());
    }
}
