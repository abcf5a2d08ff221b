//! One-shot public IP lookup, logged once at startup. Not on the control path.

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum IpLookupError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected body: {0}")]
    Body(#[from] serde_json::Error),
}

/// Body returned by IP-echo services such as `api.ipify.org?format=json`.
#[derive(Debug, Deserialize)]
struct IpEcho {
    ip: String,
}

pub async fn lookup_public_ip(url: &str) -> Result<String, IpLookupError> {
    let client = reqwest::Client::builder().timeout(LOOKUP_TIMEOUT).build()?;
    let body = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    parse_ip_echo(&body)
}

fn parse_ip_echo(body: &str) -> Result<String, IpLookupError> {
    let echo: IpEcho = serde_json::from_str(body)?;
    Ok(echo.ip)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ip_echo() {
        assert_eq!(
            parse_ip_echo(r#"{"ip":"203.0.113.7"}"#).unwrap(),
            "203.0.113.7"
        );
        assert!(matches!(
            parse_ip_echo("<html>rate limited</html>"),
            Err(IpLookupError::Body(_))
        ));
        assert!(parse_ip_echo(r#"{"address":"203.0.113.7"}"#).is_err());
    }
}
