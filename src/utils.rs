//! Utility helpers used across the crate.
//!
//! Chunk planning, filename extraction, and human-readable formatting of
//! speed and remaining time.
use crate::state::Chunk;
use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;
use sanitize_filename::sanitize;
use url::Url;

/// Divides a total size into contiguous, non-overlapping chunks.
///
/// The last chunk expands to cover any remainder bytes. When there are fewer
/// bytes than threads every chunk is a single byte, and an empty resource
/// yields no chunks at all.
pub fn calculate_chunks(total_size: u64, num_threads: u64) -> Vec<Chunk> {
    let num_threads = num_threads.max(1).min(total_size);
    if num_threads == 0 {
        return Vec::new();
    }

    let chunk_size = total_size / num_threads;
    (0..num_threads)
        .map(|i| {
            let start = i * chunk_size;
            let end = if i == num_threads - 1 {
                total_size - 1
            } else {
                (start + chunk_size) - 1
            };
            Chunk::new(i as usize, start, end)
        })
        .collect()
}

/// Extracts a clean filename from a URL.
///
/// Uses the last path segment, URL-decoded and sanitized. Falls back to a
/// timestamped name when the segment is empty or has no extension.
pub fn get_filename_from_url(url: &str) -> String {
    filename_from_url_at(url, Utc::now())
}

pub fn filename_from_url_at(url: &str, now: DateTime<Utc>) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut s| s.next_back().map(str::to_string))
        })
        .filter(|s| s.contains('.'))
        .map(|s| percent_decode_str(&s).decode_utf8_lossy().to_string())
        .map(sanitize)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("download_{}", now.timestamp_millis()))
}

pub fn format_speed(bytes_per_second: f64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    if bytes_per_second < KB {
        format!("{:.1} B/s", bytes_per_second)
    } else if bytes_per_second < MB {
        format!("{:.1} KB/s", bytes_per_second / KB)
    } else if bytes_per_second < GB {
        format!("{:.1} MB/s", bytes_per_second / MB)
    } else {
        format!("{:.1} GB/s", bytes_per_second / GB)
    }
}

pub fn format_time_left(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{}s left", seconds.ceil() as u64)
    } else if seconds < 3600.0 {
        let minutes = (seconds / 60.0).floor() as u64;
        format!("{}m {}s left", minutes, (seconds % 60.0).ceil() as u64)
    } else {
        let hours = (seconds / 3600.0).floor() as u64;
        let minutes = ((seconds % 3600.0) / 60.0).floor() as u64;
        format!("{}h {}m left", hours, minutes)
    }
}
