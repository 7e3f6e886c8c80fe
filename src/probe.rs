//! Range capability detection.
use crate::error::ProbeError;
use reqwest::Client;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH};
use tracing::debug;

/// What a metadata request revealed about the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReport {
    pub size: u64,
    /// `Accept-Ranges` advertised the `bytes` unit.
    pub accepts_ranges: bool,
}

/// Issues a HEAD request and reads `Content-Length` and `Accept-Ranges`.
///
/// # Errors
///
/// Returns an error if the request fails, the status is not a success, or
/// the server does not report a content length.
pub async fn probe(url: &str, client: &Client) -> Result<ProbeReport, ProbeError> {
    let response = client.head(url).send().await?;

    if !response.status().is_success() {
        return Err(ProbeError::Status(response.status()));
    }

    let headers = response.headers();
    let size = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or(ProbeError::MissingLength)?;

    let accepts_ranges = headers
        .get(ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(',').any(|unit| unit.trim().eq_ignore_ascii_case("bytes")));

    debug!(url, size, accepts_ranges, "probed resource");
    Ok(ProbeReport {
        size,
        accepts_ranges,
    })
}
