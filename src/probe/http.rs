//! HTTP status query.

use std::time::{Duration, Instant};

use super::{ProbeError, RawResponse, RawStatus};

/// Query a status endpoint and parse its JSON payload.
///
/// Timeouts, non-success statuses and payloads that do not match
/// [`RawStatus`] all surface as errors; a partial parse never escapes.
pub async fn fetch_status(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<RawResponse, ProbeError> {
    let start = Instant::now();

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            ProbeError::Timeout(timeout)
        } else {
            ProbeError::Network(e.to_string())
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(ProbeError::Status(status.as_u16()));
    }

    // Read the full body so the interval covers the complete transfer
    let body = response.bytes().await.map_err(|e| {
        if e.is_timeout() {
            ProbeError::Timeout(timeout)
        } else {
            ProbeError::Network(e.to_string())
        }
    })?;

    let elapsed = start.elapsed();
    let status = parse_status(&body)?;

    Ok(RawResponse { status, elapsed })
}

/// Parse a status payload.
pub fn parse_status(body: &[u8]) -> Result<RawStatus, ProbeError> {
    serde_json::from_slice(body).map_err(|e| ProbeError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_invalid_address() {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .unwrap();
        let result = fetch_status(&client, "http://256.256.256.256", Duration::from_millis(100)).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_rejects_missing_online_flag() {
        let err = parse_status(br#"{"players":{"online":3,"max":10}}"#).unwrap_err();
        assert!(matches!(err, ProbeError::Malformed(_)));
    }

    #[test]
    fn test_parse_rejects_non_json() {
        let err = parse_status(b"<html>502 Bad Gateway</html>").unwrap_err();
        assert!(matches!(err, ProbeError::Malformed(_)));
    }
}
