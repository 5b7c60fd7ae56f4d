use std::time::Duration;

use serde_json::Value;

pub const GEMINI_MODELS_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

fn extract_google_error(payload: &Value) -> Option<String> {
    let err = payload.get("error")?.as_object()?;
    let message = err
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim();
    let status = err
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim();
    match (status.is_empty(), message.is_empty()) {
        (false, false) => Some(format!("{}: {}", status, message)),
        (true, false) => Some(message.to_string()),
        (false, true) => Some(status.to_string()),
        (true, true) => None,
    }
}

/// Probe the generative-model API with the configured key.
///
/// Tries the header-based auth scheme first, then the query-parameter form,
/// and reports the first useful failure. A key flagged as leaked is called
/// out explicitly since it needs rotation, not retries.
pub async fn check_gemini_connectivity(api_key: Option<&str>, timeout: Duration) -> (bool, String) {
    let Some(api_key) = api_key else {
        return (
            false,
            "missing GEMINI_API_KEY (or GOOGLE_API_KEY)".to_string(),
        );
    };

    let http = reqwest::Client::new();
    let attempts: [(String, Option<(&str, &str)>); 2] = [
        (
            GEMINI_MODELS_URL.to_string(),
            Some(("x-goog-api-key", api_key)),
        ),
        (format!("{}?key={}", GEMINI_MODELS_URL, api_key), None),
    ];

    let mut failures: Vec<String> = Vec::new();
    for (url, header) in attempts {
        let mut request = http.get(&url).timeout(timeout);
        if let Some((name, value)) = header {
            request = request.header(name, value);
        }
        let resp = match request.send().await {
            Ok(resp) => resp,
            Err(err) => {
                failures.push(err.to_string());
                continue;
            }
        };

        if resp.status().is_success() {
            return (true, "ok".to_string());
        }

        let status_code = resp.status().as_u16();
        let details = resp
            .json::<Value>()
            .await
            .ok()
            .as_ref()
            .and_then(extract_google_error);
        match details {
            Some(details) => {
                if details.to_lowercase().contains("reported as leaked") {
                    return (
                        false,
                        "PERMISSION_DENIED: key flagged as leaked; rotate GEMINI_API_KEY"
                            .to_string(),
                    );
                }
                failures.push(details);
            }
            None => failures.push(format!("status={}", status_code)),
        }
    }

    match failures.into_iter().next() {
        Some(first) => (false, first),
        None => (false, "unknown error".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn google_error_combines_status_and_message() {
        let payload = serde_json::json!({
            "error": { "status": "PERMISSION_DENIED", "message": "API key invalid" }
        });
        assert_eq!(
            extract_google_error(&payload).as_deref(),
            Some("PERMISSION_DENIED: API key invalid")
        );
    }

    #[test]
    fn google_error_requires_error_object() {
        assert_eq!(extract_google_error(&serde_json::json!({"error": "x"})), None);
        assert_eq!(extract_google_error(&serde_json::json!({})), None);
    }

    #[tokio::test]
    async fn missing_key_short_circuits() {
        let (ok, details) = check_gemini_connectivity(None, Duration::from_secs(1)).await;
        assert!(!ok);
        assert!(details.contains("GEMINI_API_KEY"));
    }
}
