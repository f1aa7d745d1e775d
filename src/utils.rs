//! Utility functions for URL handling, file naming and human-readable formatting

use crate::error::{Error, Result};
use chrono::{DateTime, Local, TimeZone};
use url::Url;

/// Parse and validate a download URL
///
/// Only absolute URLs with a host are accepted.
///
/// # Examples
///
/// ```
/// use durable_dl::utils::parse_url;
///
/// assert!(parse_url("https://example.com/file.zip").is_ok());
/// assert!(parse_url("not a url").is_err());
/// ```
pub fn parse_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url.trim()).map_err(|_| Error::InvalidUrl(url.to_string()))?;
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(Error::InvalidUrl(url.to_string()));
    }
    Ok(parsed)
}

/// Derive the default file name for a URL: the MD5 of the URL plus the path extension
///
/// # Examples
///
/// ```
/// use durable_dl::utils::default_file_name;
///
/// let name = default_file_name("https://example.com/archive.zip");
/// assert!(name.ends_with(".zip"));
/// assert_eq!(name.len(), 32 + 4);
/// ```
#[must_use]
pub fn default_file_name(url: &str) -> String {
    let digest = format!("{:x}", md5::compute(url.as_bytes()));
    match path_extension(url) {
        Some(ext) => format!("{digest}.{ext}"),
        None => digest,
    }
}

fn path_extension(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    let (stem, ext) = last.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_string())
}

/// Whether an HTTP status code counts as a successful transfer
#[must_use]
pub fn is_acceptable_status_code(code: u16) -> bool {
    (200..300).contains(&code)
}

/// Current wall-clock time as epoch seconds
#[must_use]
pub fn now_timestamp() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Format a byte count with binary units (e.g. "1.50 MB")
///
/// # Examples
///
/// ```
/// use durable_dl::utils::format_bytes;
///
/// assert_eq!(format_bytes(512), "512 B");
/// assert_eq!(format_bytes(1536), "1.50 KB");
/// ```
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["KB", "MB", "GB", "TB", "PB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

/// Format a transfer speed (e.g. "1.50 MB/s")
#[must_use]
pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}

/// Format remaining seconds as `HH:MM:SS` (or `MM:SS` under an hour)
///
/// # Examples
///
/// ```
/// use durable_dl::utils::format_time_remaining;
///
/// assert_eq!(format_time_remaining(75), "01:15");
/// assert_eq!(format_time_remaining(3_725), "01:02:05");
/// ```
#[must_use]
pub fn format_time_remaining(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes:02}:{secs:02}")
    }
}

/// Format an epoch-seconds timestamp in local time (`YYYY-MM-DD HH:MM:SS`)
///
/// Returns `None` for 0 (never set) or out-of-range values.
#[must_use]
pub fn format_timestamp(epoch_seconds: f64) -> Option<String> {
    if epoch_seconds <= 0.0 {
        return None;
    }
    let millis = (epoch_seconds * 1000.0) as i64;
    let time: DateTime<Local> = Local.timestamp_millis_opt(millis).single()?;
    Some(time.format("%Y-%m-%d %H:%M:%S").to_string())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_url_rejects_relative_and_hostless() {
        assert!(matches!(parse_url("/just/a/path"), Err(Error::InvalidUrl(_))));
        assert!(matches!(parse_url(""), Err(Error::InvalidUrl(_))));
        assert!(matches!(
            parse_url("mailto:someone@example.com"),
            Err(Error::InvalidUrl(_))
        ));
        assert_eq!(
            parse_url(" https://example.com/a ").unwrap().as_str(),
            "https://example.com/a"
        );
    }

    #[test]
    fn default_file_name_is_stable_md5_plus_extension() {
        let url = "https://example.com/dir/video.mp4?token=1";
        let a = default_file_name(url);
        let b = default_file_name(url);
        assert_eq!(a, b, "same URL must produce the same name");
        assert_eq!(a, format!("{:x}.mp4", md5::compute(url.as_bytes())));
    }

    #[test]
    fn default_file_name_without_extension_is_bare_digest() {
        let name = default_file_name("https://example.com/download");
        assert_eq!(name.len(), 32);
        assert!(!name.contains('.'));

        let hidden = default_file_name("https://example.com/.profile");
        assert_eq!(hidden.len(), 32, "dotfiles have no extension");
    }

    #[test]
    fn acceptable_status_codes_are_2xx() {
        assert!(is_acceptable_status_code(200));
        assert!(is_acceptable_status_code(206));
        assert!(!is_acceptable_status_code(199));
        assert!(!is_acceptable_status_code(304));
        assert!(!is_acceptable_status_code(404));
    }

    #[test]
    fn format_bytes_scales_units() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(format_speed(2048), "2.00 KB/s");
    }

    #[test]
    fn format_timestamp_handles_unset() {
        assert_eq!(format_timestamp(0.0), None);
        assert!(format_timestamp(1_700_000_000.0).is_some());
    }
}
