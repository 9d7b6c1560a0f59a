//! Shared outbound plumbing for the Graph API family.
//!
//! Adapters build a JSON payload, POST it, and normalize the HTTP result
//! into a [`SendOutcome`] here. The mapping is the contract the retry
//! policy depends on: 408/429/5xx are worth another attempt, any other
//! 4xx is not.

use reqwest::StatusCode;

use fanout_core::error::{FanoutError, Result};
use fanout_core::types::SendOutcome;

/// Normalize an HTTP status + body into a send outcome.
/// `message_id` is the platform id extracted from a 2xx body.
pub fn classify_response(status: StatusCode, body: &str, message_id: Option<String>) -> SendOutcome {
    if status.is_success() {
        return SendOutcome::Delivered {
            message_id: message_id.unwrap_or_else(|| "unknown".into()),
        };
    }
    let detail = format!("{status}: {}", truncate(body, 300));
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        SendOutcome::Transient { detail }
    } else {
        SendOutcome::Permanent { detail }
    }
}

/// POST a Graph API payload and normalize the result.
///
/// Transport-level failures (connect, timeout) are transient: the
/// platform never saw the message. Body-decoding failures on a 2xx are
/// faults and bubble up as `Err`.
pub async fn post_graph(
    client: &reqwest::Client,
    url: &str,
    bearer_token: &str,
    payload: &serde_json::Value,
) -> Result<SendOutcome> {
    let response = match client
        .post(url)
        .header("Authorization", format!("Bearer {bearer_token}"))
        .header("Content-Type", "application/json")
        .json(payload)
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => {
            return Ok(SendOutcome::Transient {
                detail: format!("transport: {e}"),
            });
        }
    };

    let status = response.status();
    if status.is_success() {
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| FanoutError::Channel(format!("Invalid Graph API response: {e}")))?;
        let message_id = extract_message_id(&json);
        Ok(classify_response(status, "", message_id))
    } else {
        let body = response.text().await.unwrap_or_default();
        Ok(classify_response(status, &body, None))
    }
}

/// Graph responses carry the id either as `messages[0].id` (WhatsApp)
/// or `message_id` (Messenger/Instagram).
pub fn extract_message_id(json: &serde_json::Value) -> Option<String> {
    json["messages"][0]["id"]
        .as_str()
        .or_else(|| json["message_id"].as_str())
        .map(String::from)
}

/// Verify credentials with a GET against a Graph object.
pub async fn verify_graph_object(
    client: &reqwest::Client,
    url: &str,
    bearer_token: &str,
    channel: &str,
) -> Result<()> {
    let response = client
        .get(url)
        .header("Authorization", format!("Bearer {bearer_token}"))
        .send()
        .await
        .map_err(|e| FanoutError::Channel(format!("{channel} verification failed: {e}")))?;

    if response.status().is_success() {
        Ok(())
    } else {
        let text = response.text().await.unwrap_or_default();
        Err(FanoutError::Channel(format!(
            "{channel} token verification failed: {}",
            truncate(&text, 300)
        )))
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_is_delivered() {
        let out = classify_response(StatusCode::OK, "", Some("wamid.1".into()));
        assert_eq!(
            out,
            SendOutcome::Delivered {
                message_id: "wamid.1".into()
            }
        );
    }

    #[test]
    fn test_rate_limited_is_transient() {
        let out = classify_response(StatusCode::TOO_MANY_REQUESTS, "slow down", None);
        assert!(matches!(out, SendOutcome::Transient { .. }));
    }

    #[test]
    fn test_server_error_is_transient() {
        let out = classify_response(StatusCode::BAD_GATEWAY, "", None);
        assert!(matches!(out, SendOutcome::Transient { .. }));
    }

    #[test]
    fn test_bad_request_is_permanent() {
        let out = classify_response(StatusCode::BAD_REQUEST, "invalid recipient", None);
        match out {
            SendOutcome::Permanent { detail } => assert!(detail.contains("invalid recipient")),
            other => panic!("expected Permanent, got {other:?}"),
        }
    }

    #[test]
    fn test_auth_failure_is_permanent() {
        let out = classify_response(StatusCode::UNAUTHORIZED, "expired token", None);
        assert!(matches!(out, SendOutcome::Permanent { .. }));
    }

    #[test]
    fn test_message_id_extraction_variants() {
        let whatsapp = serde_json::json!({"messages": [{"id": "wamid.X"}]});
        assert_eq!(extract_message_id(&whatsapp).unwrap(), "wamid.X");
        let messenger = serde_json::json!({"recipient_id": "1", "message_id": "m_Y"});
        assert_eq!(extract_message_id(&messenger).unwrap(), "m_Y");
        assert!(extract_message_id(&serde_json::json!({})).is_none());
    }
}
