//! Orchestrator: the top-level reconciliation loop.
//!
//! Reconciles `{enabled calls} × {discovered files}` against
//! `{running tailers}`, starting and stopping tailer workers accordingly.
//! The Orchestrator is the only component that creates or destroys
//! sessions — tailers never start peers, and own no cleanup guarantees
//! beyond their own exit.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::discovery::{self, DiscoveredFile};
use crate::error::TransflowResult;
use crate::events::Publisher;
use crate::recognizer::{RecognizerFactory, SessionRunner};
use crate::runtime::TaskSpawner;
use crate::state::{CallId, CallState, CallStatus, Channel, EnabledSet, StreamState, TransflowConfig};
use crate::tailer::{tail_start_offset, StreamTailer, TailerConfig};

/// Key identifying one running tailer worker.
type StreamKey = (CallId, Channel);

/// A running tailer's handle, held so the Orchestrator can cancel it and
/// reap it once finished.
///
/// Uses a completion oneshot rather than a `JoinHandle` because
/// [`TaskSpawner::spawn`] deliberately doesn't expose one (runtime
/// independence, see `runtime.rs`); the tailer signals its own exit.
struct RunningStream {
    cancel: CancellationToken,
    done: tokio::sync::oneshot::Receiver<()>,
}

/// The Orchestrator's reconciliation state: which `(CallId, Channel)`
/// streams currently have a live tailer worker, and which calls have been
/// admitted (one [`CallState`] per `callId`, independent of how many of its
/// channel tailers are currently live).
pub struct Orchestrator<S: TaskSpawner> {
    config: TransflowConfig,
    enabled: EnabledSet,
    recognizer_factory: Arc<dyn RecognizerFactory>,
    publisher: Arc<Publisher>,
    spawner: S,
    running: DashMap<StreamKey, RunningStream>,
    calls: DashMap<CallId, CallState>,
}

impl<S: TaskSpawner> Orchestrator<S> {
    #[must_use]
    pub fn new(
        config: TransflowConfig,
        enabled: EnabledSet,
        recognizer_factory: Arc<dyn RecognizerFactory>,
        publisher: Arc<Publisher>,
        spawner: S,
    ) -> Self {
        Self {
            config,
            enabled,
            recognizer_factory,
            publisher,
            spawner,
            running: DashMap::new(),
            calls: DashMap::new(),
        }
    }

    /// Number of tailers currently running.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Number of calls currently admitted (a [`CallState`] exists for them).
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.len()
    }

    /// Runs one reconciliation tick: reap finished tailers, start
    /// newly-admitted streams, stop newly-disabled ones.
    pub async fn tick(&self) -> TransflowResult<()> {
        let enabled_snapshot = self.enabled.snapshot();
        let discovered = discovery::scan(
            &self.config.monitor_dir,
            Duration::from_secs(self.config.discovery_recency_secs),
            SystemTime::now(),
        )?;

        self.reap_finished();
        self.start_missing_tailers(&enabled_snapshot, &discovered).await;
        self.stop_disabled_tailers(&enabled_snapshot);
        self.teardown_stopped_calls(&enabled_snapshot);

        Ok(())
    }

    async fn start_missing_tailers(
        &self,
        enabled: &std::collections::HashSet<CallId>,
        discovered: &HashMap<CallId, Vec<DiscoveredFile>>,
    ) {
        for call_id in enabled {
            let Some(files) = discovered.get(call_id) else {
                continue;
            };

            self.calls
                .entry(call_id.clone())
                .and_modify(|call_state| call_state.last_audio_time = std::time::Instant::now())
                .or_insert_with(|| CallState::new(call_id.clone()));

            for file in files {
                let key = (call_id.clone(), file.channel);
                if self.running.contains_key(&key) {
                    continue;
                }
                if self.running.len() >= self.config.max_streams {
                    tracing::debug!(
                        call_id = %call_id,
                        "max_streams reached, deferring new tailer"
                    );
                    continue;
                }

                let Ok(metadata) = std::fs::metadata(&file.path) else {
                    continue;
                };
                let Ok(mtime) = metadata.modified() else {
                    continue;
                };
                if !discovery::is_recent(
                    mtime,
                    SystemTime::now(),
                    Duration::from_secs(self.config.discovery_recency_secs),
                ) {
                    continue;
                }

                self.spawn_tailer(call_id.clone(), file.channel, file.path.clone(), metadata.len())
                    .await;
            }
        }
    }

    async fn spawn_tailer(&self, call_id: CallId, channel: Channel, path: std::path::PathBuf, size: u64) {
        let Ok(session) = self
            .recognizer_factory
            .new_session(self.config.sample_rate_hz)
            .await
        else {
            tracing::warn!(call_id = %call_id, ?channel, "recognizer session creation failed");
            return;
        };

        let runner = SessionRunner::new(
            call_id.clone(),
            channel,
            self.config.language.clone(),
            self.config.engine_name.clone(),
            session,
        );

        if self.config.emit_transcribing_placeholder {
            self.publisher.publish(&runner.transcribing_placeholder()).await;
        }

        let initial_offset = tail_start_offset(size, self.config.start_back_bytes());
        let stream_state = StreamState::new(call_id.clone(), channel, initial_offset);

        let tailer_config = TailerConfig {
            frame_bytes: self.config.frame_bytes(),
            tail_interval: Duration::from_millis(self.config.tail_interval_ms),
            idle_timeout: Duration::from_secs(self.config.idle_timeout_secs),
            sample_rate_hz: self.config.sample_rate_hz,
            recognizer_accepts_8k: self.config.recognizer_accepts_8k,
        };

        let tailer = StreamTailer::new(
            path,
            tailer_config,
            self.enabled.clone(),
            Arc::clone(&self.publisher),
            self.config.channel_name.clone(),
        );

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let call_id_for_task = call_id.clone();

        let (tx, rx) = tokio::sync::oneshot::channel();
        self.spawner.spawn(async move {
            tailer
                .run(
                    call_id_for_task,
                    channel,
                    runner,
                    stream_state,
                    initial_offset,
                    task_cancel,
                )
                .await;
            let _ = tx.send(());
        });

        self.running.insert(
            (call_id, channel),
            RunningStream { cancel, done: rx },
        );
    }

    fn stop_disabled_tailers(&self, enabled: &std::collections::HashSet<CallId>) {
        let to_stop: Vec<StreamKey> = self
            .running
            .iter()
            .filter(|entry| !enabled.contains(&entry.key().0))
            .map(|entry| entry.key().clone())
            .collect();

        for key in to_stop {
            if let Some((_, running)) = self.running.remove(&key) {
                running.cancel.cancel();
            }
        }
    }

    /// Tears down the [`CallState`] of every call that has left `enabled`.
    ///
    /// Runs after `stop_disabled_tailers` has already cancelled that call's
    /// tailers; the `CallState` itself holds no audio-processing resources,
    /// so removing it doesn't need to wait for those tailers to finish
    /// draining.
    fn teardown_stopped_calls(&self, enabled: &std::collections::HashSet<CallId>) {
        let stopped: Vec<CallId> = self
            .calls
            .iter()
            .filter(|entry| !enabled.contains(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();

        for call_id in stopped {
            if let Some((_, mut call_state)) = self.calls.remove(&call_id) {
                call_state.status = CallStatus::Stopped;
                tracing::debug!(
                    call_id = %call_id,
                    active_for_ms = call_state.start_time.elapsed().as_millis() as u64,
                    "tearing down call state"
                );
            }
        }
    }

    /// Removes finished tailer handles from the running set.
    fn reap_finished(&self) {
        let finished: Vec<StreamKey> = self
            .running
            .iter_mut()
            .filter(|entry| {
                !matches!(
                    entry.value_mut().done.try_recv(),
                    Err(tokio::sync::oneshot::error::TryRecvError::Empty)
                )
            })
            .map(|entry| entry.key().clone())
            .collect();

        for key in finished {
            self.running.remove(&key);
        }
    }

    /// Cancels every running tailer, for process shutdown.
    pub fn shutdown(&self) {
        for entry in self.running.iter() {
            entry.value().cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_key_equality_is_by_call_and_channel() {
        let a: StreamKey = ("call-1".to_string(), Channel::Inbound);
        let b: StreamKey = ("call-1".to_string(), Channel::Inbound);
        let c: StreamKey = ("call-1".to_string(), Channel::Outbound);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}

/// End-to-end reconciliation tests: real temp files on disk, a real
/// `EnabledSet`, a recording bus, and the silent recognizer factory, driven
/// through `Orchestrator::tick` directly rather than the scan interval.
#[cfg(test)]
mod tick_tests {
    use super::*;
    use crate::events::{Publisher, RecordingEventBus, TranscriptStatus};
    use crate::recognizer::SilentRecognizerFactory;
    use crate::runtime::TokioSpawner;
    use std::collections::HashSet;
    use std::fs;

    fn write_audio_file(dir: &std::path::Path, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    fn test_config(monitor_dir: std::path::PathBuf, max_streams: usize) -> TransflowConfig {
        TransflowConfig {
            monitor_dir,
            max_streams,
            tail_interval_ms: 20,
            ..TransflowConfig::default()
        }
    }

    fn test_orchestrator(
        monitor_dir: std::path::PathBuf,
        max_streams: usize,
        enabled: EnabledSet,
    ) -> Orchestrator<TokioSpawner> {
        let bus = Arc::new(RecordingEventBus::new());
        let publisher = Arc::new(Publisher::new(bus, "transcripts.realtime.v2".to_string()));
        Orchestrator::new(
            test_config(monitor_dir, max_streams),
            enabled,
            Arc::new(SilentRecognizerFactory),
            publisher,
            TokioSpawner::current(),
        )
    }

    #[tokio::test]
    async fn starts_a_tailer_for_an_enabled_discovered_call() {
        let dir = tempfile::tempdir().unwrap();
        write_audio_file(dir.path(), "33600000000-0601020304-in.raw", &[0u8; 3_200]);

        let enabled = EnabledSet::new();
        enabled.replace(["33600000000-0601020304".to_string()].into());

        let orchestrator = test_orchestrator(dir.path().to_path_buf(), 100, enabled);

        orchestrator.tick().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(orchestrator.running_count(), 1);
        orchestrator.shutdown();
    }

    #[tokio::test]
    async fn defers_new_tailers_once_max_streams_is_reached() {
        let dir = tempfile::tempdir().unwrap();
        write_audio_file(dir.path(), "33600000000-0601020304-in.raw", &[0u8; 3_200]);
        write_audio_file(dir.path(), "33600000001-0601020305-in.raw", &[0u8; 3_200]);

        let enabled = EnabledSet::new();
        enabled.replace(
            [
                "33600000000-0601020304".to_string(),
                "33600000001-0601020305".to_string(),
            ]
            .into(),
        );

        let orchestrator = test_orchestrator(dir.path().to_path_buf(), 1, enabled);

        orchestrator.tick().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(orchestrator.running_count(), 1);
        orchestrator.shutdown();
    }

    #[tokio::test]
    async fn stops_tailer_once_call_is_disabled() {
        let dir = tempfile::tempdir().unwrap();
        write_audio_file(dir.path(), "33600000000-0601020304-in.raw", &[0u8; 3_200]);

        let enabled = EnabledSet::new();
        enabled.replace(["33600000000-0601020304".to_string()].into());

        let orchestrator = test_orchestrator(dir.path().to_path_buf(), 100, enabled.clone());

        orchestrator.tick().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(orchestrator.running_count(), 1);

        enabled.replace(HashSet::new());
        orchestrator.tick().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        orchestrator.tick().await.unwrap();

        assert_eq!(orchestrator.running_count(), 0);
    }

    #[tokio::test]
    async fn creates_and_tears_down_call_state_with_enablement() {
        let dir = tempfile::tempdir().unwrap();
        write_audio_file(dir.path(), "33600000000-0601020304-in.raw", &[0u8; 3_200]);

        let enabled = EnabledSet::new();
        enabled.replace(["33600000000-0601020304".to_string()].into());

        let orchestrator = test_orchestrator(dir.path().to_path_buf(), 100, enabled.clone());

        orchestrator.tick().await.unwrap();
        assert_eq!(orchestrator.call_count(), 1);

        enabled.replace(HashSet::new());
        orchestrator.tick().await.unwrap();
        assert_eq!(orchestrator.call_count(), 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        orchestrator.shutdown();
    }

    #[tokio::test]
    async fn publishes_transcribing_placeholder_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        write_audio_file(dir.path(), "33600000000-0601020304-in.raw", &[0u8; 3_200]);

        let enabled = EnabledSet::new();
        enabled.replace(["33600000000-0601020304".to_string()].into());

        let bus = Arc::new(RecordingEventBus::new());
        let publisher = Arc::new(Publisher::new(bus.clone(), "transcripts.realtime.v2".to_string()));
        let mut config = test_config(dir.path().to_path_buf(), 100);
        config.emit_transcribing_placeholder = true;

        let orchestrator = Orchestrator::new(
            config,
            enabled,
            Arc::new(SilentRecognizerFactory),
            publisher,
            TokioSpawner::current(),
        );

        orchestrator.tick().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(bus
            .events()
            .iter()
            .any(|event| event.status == TranscriptStatus::Transcribing));
        orchestrator.shutdown();
    }

    #[tokio::test]
    async fn does_not_start_a_tailer_for_a_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_audio_file(dir.path(), "33600000000-0601020304-in.raw", &[0u8; 3_200]);
        let long_ago = std::time::SystemTime::now() - Duration::from_secs(120);
        fs::File::open(&path).unwrap().set_modified(long_ago).unwrap();

        let enabled = EnabledSet::new();
        enabled.replace(["33600000000-0601020304".to_string()].into());

        let orchestrator = test_orchestrator(dir.path().to_path_buf(), 100, enabled);

        orchestrator.tick().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(orchestrator.running_count(), 0);
    }
}
