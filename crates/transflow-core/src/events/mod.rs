//! Transcript event types and the publish-side bus abstraction.
//!
//! This module provides:
//! - [`TranscriptEvent`], the wire schema published to the message bus.
//! - [`EventBus`] (in [`bus`]), decoupling recognizer sessions from the
//!   concrete pub/sub transport.

pub mod bus;

pub use bus::{EventBus, NoopEventBus, Publisher, RecordingEventBus, RedisEventBus};

use serde::Serialize;

use crate::state::CallId;

/// Status of a published [`TranscriptEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptStatus {
    Partial,
    Completed,
    Consolidated,
    Transcribing,
}

/// One transcript message published to the configured pub/sub channel.
///
/// Field layout and casing are fixed, since downstream consumers depend
/// on this exact wire shape.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptEvent {
    #[serde(rename = "callId")]
    pub call_id: CallId,
    #[serde(rename = "tsMs")]
    pub ts_ms: u64,
    pub speaker: &'static str,
    pub lang: String,
    pub confidence: Option<f32>,
    #[serde(rename = "offsetBytes")]
    pub offset_bytes: u64,
    pub status: TranscriptStatus,
    pub text: String,
    #[serde(rename = "processingTimeMs")]
    pub processing_time_ms: u64,
    pub engine: String,
    pub realtime: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub consolidated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_camel_case_field_names() {
        let event = TranscriptEvent {
            call_id: "33600000000-0601020304".to_string(),
            ts_ms: 1_000,
            speaker: "client",
            lang: "fr".to_string(),
            confidence: None,
            offset_bytes: 160_000,
            status: TranscriptStatus::Partial,
            text: "bonjour".to_string(),
            processing_time_ms: 12,
            engine: "streaming-asr".to_string(),
            realtime: true,
            consolidated: false,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["callId"], "33600000000-0601020304");
        assert_eq!(json["status"], "partial");
        assert!(json.get("consolidated").is_none());
    }

    #[test]
    fn consolidated_flag_is_present_when_true() {
        let event = TranscriptEvent {
            call_id: "c".to_string(),
            ts_ms: 0,
            speaker: "agent",
            lang: "fr".to_string(),
            confidence: None,
            offset_bytes: 0,
            status: TranscriptStatus::Consolidated,
            text: "bonjour salut".to_string(),
            processing_time_ms: 0,
            engine: "streaming-asr".to_string(),
            realtime: false,
            consolidated: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["consolidated"], true);
    }
}
