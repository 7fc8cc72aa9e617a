//! Core application state: configuration, the admission set, and the
//! per-call/per-stream records.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// A call identifier: the first two dash-separated fields of an audio
/// filename (timestamp + phone).
pub type CallId = String;

/// Configuration for the Transflow engine.
///
/// All fields have sensible defaults, matched by `TransflowConfig::default()`.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TransflowConfig {
    /// Root directory scanned for audio files.
    pub monitor_dir: PathBuf,

    /// Pub/sub endpoint (e.g. a Redis URL).
    pub bus_url: String,

    /// Pub/sub channel name transcript events are published to.
    pub channel_name: String,

    /// Recognizer model location, passed to the injected recognizer factory.
    pub model_path: PathBuf,

    /// Language tag stamped on every transcript event.
    pub language: String,

    /// Tailer frame length, in seconds.
    pub frame_seconds: u64,

    /// Orchestrator reconciliation loop period, in milliseconds.
    pub scan_interval_ms: u64,

    /// Stream Tailer loop period, in milliseconds.
    pub tail_interval_ms: u64,

    /// Control Plane Watcher poll period, in milliseconds.
    pub control_interval_ms: u64,

    /// Concurrent tailer ceiling.
    pub max_streams: usize,

    /// Seconds of file mtime idleness before a stream is soft-stopped.
    pub idle_timeout_secs: u64,

    /// Seconds to seek backward on admission, to avoid re-transcribing a
    /// long pre-existing file when a call becomes enabled mid-stream.
    pub start_back_seconds: u64,

    /// Sample rate of the recorded audio, in Hz (8 kHz mono is typical for
    /// telephony recordings).
    pub sample_rate_hz: u32,

    /// Whether the recognizer natively accepts 8 kHz audio. When `false`,
    /// frames are upsampled to 16 kHz before being handed to the recognizer.
    pub recognizer_accepts_8k: bool,

    /// Whether to emit a `transcribing` placeholder event when a session
    /// starts. Off by default; downstream reliance on it is unconfirmed.
    pub emit_transcribing_placeholder: bool,

    /// Recency window (seconds) used by the discovery scanner: a file whose
    /// mtime is older than this is ignored.
    pub discovery_recency_secs: u64,

    /// Recognizer family name stamped on events as `engine`.
    pub engine_name: String,
}

impl Default for TransflowConfig {
    fn default() -> Self {
        Self {
            monitor_dir: PathBuf::from("/home/nfs_proxip_monitor"),
            bus_url: "redis://127.0.0.1:6379/0".to_string(),
            channel_name: "transcripts.realtime.v2".to_string(),
            model_path: PathBuf::from("/opt/transflow/model"),
            language: "fr".to_string(),
            frame_seconds: 10,
            scan_interval_ms: 500,
            tail_interval_ms: 200,
            control_interval_ms: 2_000,
            max_streams: 100,
            idle_timeout_secs: 30,
            start_back_seconds: 15,
            sample_rate_hz: 8_000,
            recognizer_accepts_8k: true,
            emit_transcribing_placeholder: false,
            discovery_recency_secs: 30,
            engine_name: "streaming-asr".to_string(),
        }
    }
}

impl TransflowConfig {
    /// Number of bytes in one second of audio (16-bit mono PCM).
    #[must_use]
    pub fn bytes_per_second(&self) -> u64 {
        u64::from(self.sample_rate_hz) * 2
    }

    /// Frame size in bytes: `sampleRate * 2 * frameSeconds`.
    #[must_use]
    pub fn frame_bytes(&self) -> u64 {
        self.bytes_per_second() * self.frame_seconds
    }

    /// Tail-start byte count: `startBackSeconds * bytesPerSecond`.
    #[must_use]
    pub fn start_back_bytes(&self) -> u64 {
        self.bytes_per_second() * self.start_back_seconds
    }
}

/// A call's audio channel/direction, derived from the filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Inbound,
    Outbound,
    Mixed,
}

impl Channel {
    /// Classifies a channel from a basename token: contains `in` -> inbound,
    /// contains `out` -> outbound, else `mixed`.
    #[must_use]
    pub fn classify(basename: &str) -> Self {
        let lower = basename.to_lowercase();
        if lower.contains("in") {
            Self::Inbound
        } else if lower.contains("out") {
            Self::Outbound
        } else {
            Self::Mixed
        }
    }

    /// Maps the channel to the speaker label used on published events:
    /// inbound -> client, outbound -> agent, else mixed.
    #[must_use]
    pub fn speaker(self) -> &'static str {
        match self {
            Self::Inbound => "client",
            Self::Outbound => "agent",
            Self::Mixed => "mixed",
        }
    }
}

/// Lifecycle status of a [`CallState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Active,
    Stopped,
}

/// Per-call bookkeeping. Owned by the orchestrator; distinct from the
/// per-stream [`StreamState`], which is private to its tailer worker.
#[derive(Debug, Clone)]
pub struct CallState {
    pub call_id: CallId,
    pub status: CallStatus,
    pub start_time: Instant,
    pub last_audio_time: Instant,
}

impl CallState {
    #[must_use]
    pub fn new(call_id: CallId) -> Self {
        let now = Instant::now();
        Self {
            call_id,
            status: CallStatus::Active,
            start_time: now,
            last_audio_time: now,
        }
    }
}

/// Per-stream state, private to the tailer task that owns it.
///
/// Tracks the monotone read offset, the last-emitted partial (for
/// consecutive-duplicate suppression), the ordered list of committed
/// finals, and the de-dup set of already-fed chunk keys.
pub struct StreamState {
    pub call_id: CallId,
    pub channel: Channel,
    /// Monotone byte offset into the audio file: never decreases.
    pub offset: u64,
    pub last_activity: Instant,
    /// Last partial text emitted for this session, used to suppress
    /// consecutive duplicates.
    pub last_partial: Option<String>,
    /// Ordered committed utterances, joined into one string on session
    /// stop.
    pub finals: Vec<String>,
    /// `(path, start_offset)` pairs already fed to the recognizer.
    seen_chunks: HashSet<(PathBuf, u64)>,
}

impl StreamState {
    #[must_use]
    pub fn new(call_id: CallId, channel: Channel, initial_offset: u64) -> Self {
        Self {
            call_id,
            channel,
            offset: initial_offset,
            last_activity: Instant::now(),
            last_partial: None,
            finals: Vec::new(),
            seen_chunks: HashSet::new(),
        }
    }

    /// Returns `true` and records the key if this chunk has not been seen
    /// before; returns `false` if it's a duplicate.
    pub fn mark_chunk_seen(&mut self, path: &std::path::Path, start_offset: u64) -> bool {
        self.seen_chunks.insert((path.to_path_buf(), start_offset))
    }
}

/// The admission set: CallIds currently permitted for transcription.
///
/// Implemented as a snapshot behind a `RwLock`: the Control Plane Watcher
/// is the sole writer (replaces the whole set atomically on every poll);
/// the Orchestrator and every tailer are readers that take a cheap cloned
/// snapshot or a single `contains` check per iteration.
#[derive(Debug, Default, Clone)]
pub struct EnabledSet {
    inner: std::sync::Arc<RwLock<HashSet<CallId>>>,
}

impl EnabledSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `call_id` is currently enabled.
    #[must_use]
    pub fn contains(&self, call_id: &str) -> bool {
        self.inner.read().contains(call_id)
    }

    /// Returns a cloned snapshot of the full set.
    #[must_use]
    pub fn snapshot(&self) -> HashSet<CallId> {
        self.inner.read().clone()
    }

    /// Replaces the set wholesale, returning `(newly_enabled, newly_disabled)`.
    pub fn replace(&self, new_set: HashSet<CallId>) -> (Vec<CallId>, Vec<CallId>) {
        let mut guard = self.inner.write();
        let newly_enabled: Vec<CallId> = new_set.difference(&guard).cloned().collect();
        let newly_disabled: Vec<CallId> = guard.difference(&new_set).cloned().collect();
        *guard = new_set;
        (newly_enabled, newly_disabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_classifies_in_out_mixed() {
        assert_eq!(Channel::classify("20260101-555-call-in.raw"), Channel::Inbound);
        assert_eq!(Channel::classify("20260101-555-call-out.raw"), Channel::Outbound);
        assert_eq!(Channel::classify("20260101-555-call.raw"), Channel::Mixed);
    }

    #[test]
    fn channel_speaker_labels() {
        assert_eq!(Channel::Inbound.speaker(), "client");
        assert_eq!(Channel::Outbound.speaker(), "agent");
        assert_eq!(Channel::Mixed.speaker(), "mixed");
    }

    #[test]
    fn enabled_set_replace_computes_deltas() {
        let set = EnabledSet::new();
        let (enabled, disabled) = set.replace(["a".to_string(), "b".to_string()].into());
        assert_eq!(enabled.len(), 2);
        assert!(disabled.is_empty());

        let (enabled, disabled) = set.replace(["b".to_string(), "c".to_string()].into());
        assert_eq!(enabled, vec!["c".to_string()]);
        assert_eq!(disabled, vec!["a".to_string()]);
        assert!(set.contains("b"));
        assert!(!set.contains("a"));
    }

    #[test]
    fn stream_state_dedups_chunks() {
        let mut stream = StreamState::new("call-1".to_string(), Channel::Inbound, 0);
        let path = PathBuf::from("/tmp/call-1-in.raw");
        assert!(stream.mark_chunk_seen(&path, 0));
        assert!(!stream.mark_chunk_seen(&path, 0));
        assert!(stream.mark_chunk_seen(&path, 16_000));
    }

    #[test]
    fn config_frame_and_tail_start_byte_math() {
        let config = TransflowConfig::default();
        assert_eq!(config.bytes_per_second(), 16_000);
        assert_eq!(config.frame_bytes(), 160_000);
        assert_eq!(config.start_back_bytes(), 240_000);
    }
}
