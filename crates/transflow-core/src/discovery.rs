//! Call Discovery Scanner: walks the monitored directory, parses filenames
//! into `(CallId, Channel)` groups, and filters to files modified within a
//! recency window.
//!
//! Pure observation: this module never mutates process state. Scanning is
//! a stateless probe; reconciling the result against running work is owned
//! entirely by the caller.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::error::TransflowResult;
use crate::state::Channel;

/// One discovered audio file, classified by channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub channel: Channel,
}

/// Extensions recognized as audio containers.
const RECOGNIZED_EXTENSIONS: &[&str] = &["raw", "pcm", "wav"];

/// Scans `monitor_dir` for audio files modified within `recency` of `now`,
/// grouping them by the CallId parsed from their basename.
///
/// Filenames that don't split into at least two dash-separated fields are
/// skipped silently rather than treated as an error.
pub fn scan(
    monitor_dir: &Path,
    recency: Duration,
    now: SystemTime,
) -> TransflowResult<std::collections::HashMap<String, Vec<DiscoveredFile>>> {
    let mut grouped: std::collections::HashMap<String, Vec<DiscoveredFile>> =
        std::collections::HashMap::new();

    let entries = match std::fs::read_dir(monitor_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(grouped),
        Err(err) => return Err(err.into()),
    };

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        if !has_recognized_extension(&path) {
            continue;
        }

        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(_) => continue,
        };
        let mtime = match metadata.modified() {
            Ok(mtime) => mtime,
            Err(_) => continue,
        };
        if !is_recent(mtime, now, recency) {
            continue;
        }

        let Some(basename) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some(call_id) = parse_call_id(basename) else {
            continue;
        };
        let channel = Channel::classify(basename);

        grouped
            .entry(call_id)
            .or_default()
            .push(DiscoveredFile { path, channel });
    }

    Ok(grouped)
}

/// Returns `true` if `mtime` is no older than `recency` relative to `now`.
/// Shared with the idle-timeout check, which uses the same recency test
/// against a different window.
#[must_use]
pub fn is_recent(mtime: SystemTime, now: SystemTime, recency: Duration) -> bool {
    match now.duration_since(mtime) {
        Ok(age) => age <= recency,
        // mtime is in the future relative to `now` (clock skew); treat as recent.
        Err(_) => true,
    }
}

fn has_recognized_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| RECOGNIZED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Parses `callId = field[0] + "-" + field[1]` from a dash-separated
/// basename. Returns `None` if fewer than two fields exist.
#[must_use]
pub fn parse_call_id(basename: &str) -> Option<String> {
    let mut parts = basename.splitn(3, '-');
    let first = parts.next()?;
    let second = parts.next()?;
    if first.is_empty() || second.is_empty() {
        return None;
    }
    Some(format!("{first}-{second}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    #[test]
    fn parse_call_id_extracts_first_two_fields() {
        assert_eq!(
            parse_call_id("33600000000-0601020304-in"),
            Some("33600000000-0601020304".to_string())
        );
    }

    #[test]
    fn parse_call_id_rejects_single_field() {
        assert_eq!(parse_call_id("onlyonefield"), None);
    }

    #[test]
    fn parse_call_id_rejects_empty_fields() {
        assert_eq!(parse_call_id("-0601020304-in"), None);
    }

    #[test]
    fn is_recent_accepts_within_window() {
        let now = SystemTime::now();
        let mtime = now - Duration::from_secs(10);
        assert!(is_recent(mtime, now, Duration::from_secs(30)));
    }

    #[test]
    fn is_recent_rejects_stale_file() {
        let now = SystemTime::now();
        let mtime = now - Duration::from_secs(120);
        assert!(!is_recent(mtime, now, Duration::from_secs(30)));
    }

    #[test]
    fn scan_groups_by_call_id_and_classifies_channel() {
        let dir = tempfile::tempdir().unwrap();
        let in_path = dir.path().join("33600000000-0601020304-in.raw");
        let out_path = dir.path().join("33600000000-0601020304-out.raw");
        let unrelated = dir.path().join("notes.txt");
        fs::write(&in_path, b"abc").unwrap();
        fs::write(&out_path, b"def").unwrap();
        fs::write(&unrelated, b"ignored").unwrap();

        let grouped = scan(dir.path(), Duration::from_secs(30), SystemTime::now()).unwrap();

        assert_eq!(grouped.len(), 1);
        let files = &grouped["33600000000-0601020304"];
        assert_eq!(files.len(), 2);
        assert!(files.iter().any(|f| f.channel == Channel::Inbound));
        assert!(files.iter().any(|f| f.channel == Channel::Outbound));
    }

    #[test]
    fn scan_skips_stale_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("33600000000-0601020304-in.raw");
        fs::write(&path, b"abc").unwrap();
        let long_ago = SystemTime::now() + Duration::from_secs(200);

        let grouped = scan(dir.path(), Duration::from_secs(30), long_ago).unwrap();
        assert!(grouped.is_empty());
    }

    #[test]
    fn scan_on_missing_directory_returns_empty() {
        let grouped = scan(
            Path::new("/nonexistent/transflow/monitor"),
            Duration::from_secs(30),
            SystemTime::now(),
        )
        .unwrap();
        assert!(grouped.is_empty());
    }
}
