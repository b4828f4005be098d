//! Human-readable rendering of service results.

use chrono::{DateTime, Local, Utc};
use core_runtime::events::{CoreEvent, FilePhase, SyncEvent};
use core_service::{ReplicaStatus, SongStatus, SyncResult, UploadReceipt};

pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

pub fn format_timestamp(at: Option<DateTime<Utc>>) -> String {
    match at {
        Some(at) => at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string(),
        None => "Never".to_string(),
    }
}

/// `[✓] name (Last played: ...)`, with `[✗]` for a missing file.
pub fn song_line(song: &SongStatus) -> String {
    format!(
        "[{}] {} (Last played: {})",
        if song.present { '✓' } else { '✗' },
        song.filename,
        format_timestamp(song.last_played)
    )
}

pub fn status_report(status: &ReplicaStatus) -> String {
    let mut out = format!(
        "Replica: {}\nServer: {}\nLast sync: {}\nSongs: {} ({})\n",
        status.root.display(),
        if status.server_url.is_empty() {
            "-"
        } else {
            &status.server_url
        },
        format_timestamp(status.last_sync),
        status.songs.len(),
        format_size(status.total_bytes)
    );
    if status.cache.files > 0 {
        out.push_str(&format!(
            "Cache: {} files ({})\n",
            status.cache.files,
            format_size(status.cache.bytes)
        ));
    }
    for song in &status.songs {
        out.push_str(&song_line(song));
        out.push('\n');
    }
    out
}

pub fn sync_summary(result: &SyncResult) -> String {
    let mut out = format!(
        "{}: {} added, {} removed, {} failed",
        if result.cancelled {
            "Sync cancelled"
        } else {
            "Sync complete"
        },
        result.added,
        result.removed,
        result.failed
    );
    for failure in &result.failures {
        out.push_str(&format!("\n  ✗ {}: {}", failure.filename, failure.reason));
    }
    out
}

pub fn upload_summary(receipt: &UploadReceipt) -> String {
    let mut out = format!(
        "Uploaded {}",
        receipt.filename.as_deref().unwrap_or("song")
    );
    if let (Some(count), Some(limit)) = (receipt.song_count, receipt.limit) {
        out.push_str(&format!(" ({}/{} songs)", count, limit));
    }
    if let Some(remaining) = receipt.remaining {
        out.push_str(&format!(", {} uploads remaining", remaining));
    }
    out
}

/// One progress line per visible change, `None` for everything else.
pub fn progress_line(event: &CoreEvent) -> Option<String> {
    let CoreEvent::Sync(SyncEvent::FileProgress { filename, phase }) = event else {
        return None;
    };
    match phase {
        FilePhase::Promoted { bytes } => Some(format!("  + {} ({})", filename, format_size(*bytes))),
        FilePhase::ReusedFromCache { bytes } => {
            Some(format!("  + {} ({}, cached)", filename, format_size(*bytes)))
        }
        FilePhase::Removed => Some(format!("  - {}", filename)),
        FilePhase::Failed { reason } => Some(format!("  ✗ {}: {}", filename, reason)),
        _ => None,
    }
}

/// The cycle has finished and no more progress will follow.
pub fn is_terminal(event: &CoreEvent) -> bool {
    matches!(
        event,
        CoreEvent::Sync(
            SyncEvent::Completed { .. } | SyncEvent::Cancelled { .. } | SyncEvent::Failed { .. }
        )
    )
}
