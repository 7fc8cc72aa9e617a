//! Stream Tailer: one worker per `(CallId, Channel)`, tracking a monotone
//! byte offset into an append-only audio file and feeding fixed-duration
//! frames to a [`SessionRunner`].
//!
//! Structured as a long-running worker polling a shared [`EnabledSet`] and
//! reacting to a [`CancellationToken`].

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;

use crate::audio::{decodable_sample_bytes, decode_pcm_i16, upsample_8k_to_16k, wav_payload_offset};
use crate::discovery::is_recent;
use crate::error::TransflowResult;
use crate::events::Publisher;
use crate::recognizer::SessionRunner;
use crate::state::{CallId, Channel, EnabledSet, StreamState};

/// Parameters a [`StreamTailer`] needs that don't change across iterations.
pub struct TailerConfig {
    pub frame_bytes: u64,
    pub tail_interval: Duration,
    pub idle_timeout: Duration,
    pub sample_rate_hz: u32,
    pub recognizer_accepts_8k: bool,
}

/// Drives one `(CallId, Channel)` stream end-to-end: gating, idle-timeout,
/// incremental reads, frame chunking, de-dup, and recognizer feeding.
pub struct StreamTailer {
    path: PathBuf,
    payload_offset: Option<u64>,
    config: TailerConfig,
    enabled: EnabledSet,
    publisher: std::sync::Arc<Publisher>,
    channel_name: String,
}

impl StreamTailer {
    #[must_use]
    pub fn new(
        path: PathBuf,
        config: TailerConfig,
        enabled: EnabledSet,
        publisher: std::sync::Arc<Publisher>,
        channel_name: String,
    ) -> Self {
        Self {
            path,
            payload_offset: None,
            config,
            enabled,
            publisher,
            channel_name,
        }
    }

    /// Runs the tailer loop to completion: exits when the call is no longer
    /// enabled, on idle timeout, on cancellation, or on an unrecoverable IO
    /// error. Always runs the consolidate step on the way out, so the
    /// recognizer session's committed text is flushed exactly once
    /// regardless of which exit path was taken.
    ///
    /// `initial_offset` should already reflect the tail-start policy
    /// (`max(0, size - startBackSeconds * bytesPerSecond)`), computed by
    /// the caller since it requires the file size at admission time, which
    /// the Orchestrator already has from its discovery scan.
    pub async fn run(
        mut self,
        call_id: CallId,
        channel: Channel,
        mut runner: SessionRunner,
        mut stream: StreamState,
        initial_offset: u64,
        cancel: CancellationToken,
    ) {
        stream.offset = stream.offset.max(initial_offset);

        loop {
            if !self.enabled.contains(&call_id) {
                tracing::debug!(call_id = %call_id, ?channel, "call no longer enabled, stopping tailer");
                break;
            }
            if cancel.is_cancelled() {
                tracing::debug!(call_id = %call_id, ?channel, "cancellation requested, stopping tailer");
                break;
            }

            match self.tick(&call_id, &mut runner, &mut stream).await {
                Ok(TickOutcome::Continue) => {}
                Ok(TickOutcome::Idle) => {
                    tracing::debug!(call_id = %call_id, ?channel, "file idle, stopping tailer");
                    break;
                }
                Err(err) => {
                    tracing::debug!(call_id = %call_id, ?channel, error = %err, "transient tailer IO error, retrying");
                }
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.config.tail_interval) => {}
            }
        }

        if let Ok(Some(event)) = runner.stop(stream.offset).await {
            self.publisher.publish(&event).await;
        }
    }

    async fn tick(
        &mut self,
        call_id: &CallId,
        runner: &mut SessionRunner,
        stream: &mut StreamState,
    ) -> TransflowResult<TickOutcome> {
        let metadata = std::fs::metadata(&self.path)?;
        let mtime = metadata.modified()?;
        if !is_recent(mtime, SystemTime::now(), self.config.idle_timeout) {
            return Ok(TickOutcome::Idle);
        }

        let size = metadata.len();
        let payload_offset = *self
            .payload_offset
            .get_or_insert_with(|| detect_payload_offset(&self.path).unwrap_or(0));
        stream.offset = stream.offset.max(payload_offset);

        if size <= stream.offset {
            return Ok(TickOutcome::Continue);
        }

        let new_bytes = read_range(&self.path, stream.offset, size)?;
        let usable = decodable_sample_bytes(&new_bytes) as u64;
        let frame_bytes = self.config.frame_bytes;
        let mut consumed = 0u64;

        while consumed + frame_bytes <= usable {
            let frame_start_offset = stream.offset + consumed;
            let frame_bytes_slice =
                &new_bytes[consumed as usize..(consumed + frame_bytes) as usize];

            if stream.mark_chunk_seen(&self.path, frame_start_offset) {
                let samples = decode_to_f32(
                    frame_bytes_slice,
                    self.config.sample_rate_hz,
                    self.config.recognizer_accepts_8k,
                );
                if let Ok(events) = runner.feed(&samples, frame_start_offset).await {
                    for event in events {
                        if self.enabled.contains(call_id) {
                            self.publisher.publish(&event).await;
                        }
                    }
                }
            }

            consumed += frame_bytes;
        }

        stream.offset += consumed;
        stream.last_activity = std::time::Instant::now();
        Ok(TickOutcome::Continue)
    }
}

enum TickOutcome {
    Continue,
    Idle,
}

/// Detects where PCM payload begins: 0 for headerless raw/pcm files, past
/// the RIFF header for `.wav` files.
fn detect_payload_offset(path: &Path) -> std::io::Result<u64> {
    use std::io::Read;
    let mut file = std::fs::File::open(path)?;
    let mut header = [0u8; 64];
    let read = file.read(&mut header)?;
    Ok(wav_payload_offset(&header[..read]) as u64)
}

fn read_range(path: &Path, start: u64, end: u64) -> std::io::Result<Vec<u8>> {
    use std::io::{Read, Seek, SeekFrom};
    let mut file = std::fs::File::open(path)?;
    file.seek(SeekFrom::Start(start))?;
    let mut buf = vec![0u8; (end - start) as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

fn decode_to_f32(bytes: &[u8], sample_rate_hz: u32, recognizer_accepts_8k: bool) -> Vec<f32> {
    let samples_i16 = decode_pcm_i16(bytes);
    let samples_i16 = if sample_rate_hz == 8_000 && !recognizer_accepts_8k {
        upsample_8k_to_16k(&samples_i16)
    } else {
        samples_i16
    };
    samples_i16
        .into_iter()
        .map(|s| f32::from(s) / 32_768.0)
        .collect()
}

/// Computes the tail-start offset for a newly admitted stream:
/// `max(0, size - startBackSeconds * bytesPerSecond)`.
#[must_use]
pub fn tail_start_offset(file_size: u64, start_back_bytes: u64) -> u64 {
    file_size.saturating_sub(start_back_bytes)
}
