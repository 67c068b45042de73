//! HTTP spec fetching with bounded retries.

use std::time::Duration;

use {rand::Rng, tracing::warn};

use crate::error::SpecError;

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub retries: u32,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            retries: 3,
        }
    }
}

/// Fetch a spec document, retrying transient failures with exponential
/// backoff plus jitter. Non-2xx responses count as failures.
pub async fn fetch_spec(
    client: &reqwest::Client,
    key: &str,
    url: &str,
    options: &FetchOptions,
) -> Result<String, SpecError> {
    let mut delay = Duration::from_millis(200);

    for attempt in 0..=options.retries {
        match try_fetch(client, url, options.timeout).await {
            Ok(body) => return Ok(body),
            Err(message) => {
                warn!(key, url, attempt, %message, "spec fetch failed");
                if attempt == options.retries {
                    break;
                }
                let jitter = rand::rng().random_range(0..=delay.as_millis() as u64 / 2);
                tokio::time::sleep(delay + Duration::from_millis(jitter)).await;
                delay = delay.saturating_mul(2);
            },
        }
    }

    Err(SpecError::Unavailable {
        key: key.to_string(),
    })
}

async fn try_fetch(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<String, String> {
    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| e.to_string())?;
    if !response.status().is_success() {
        return Err(format!("status {}", response.status()));
    }
    response.text().await.map_err(|e| e.to_string())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn fast_options() -> FetchOptions {
        FetchOptions {
            timeout: Duration::from_secs(2),
            retries: 2,
        }
    }

    #[tokio::test]
    async fn fetches_successful_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/spec.json")
            .with_status(200)
            .with_body("{\"ok\":true}")
            .create_async()
            .await;

        let client = reqwest::Client::new();
        let body = fetch_spec(
            &client,
            "k",
            &format!("{}/spec.json", server.url()),
            &fast_options(),
        )
        .await
        .unwrap();
        assert_eq!(body, "{\"ok\":true}");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let mut server = mockito::Server::new_async().await;
        let fail = server
            .mock("GET", "/spec.json")
            .with_status(503)
            .expect(1)
            .create_async()
            .await;
        let ok = server
            .mock("GET", "/spec.json")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let client = reqwest::Client::new();
        let body = fetch_spec(
            &client,
            "k",
            &format!("{}/spec.json", server.url()),
            &fast_options(),
        )
        .await
        .unwrap();
        assert_eq!(body, "{}");
        fail.assert_async().await;
        ok.assert_async().await;
    }

    #[tokio::test]
    async fn persistent_failure_is_unavailable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/spec.json")
            .with_status(500)
            .expect(3)
            .create_async()
            .await;

        let client = reqwest::Client::new();
        let result = fetch_spec(
            &client,
            "k",
            &format!("{}/spec.json", server.url()),
            &fast_options(),
        )
        .await;
        assert!(matches!(result, Err(SpecError::Unavailable { .. })));
    }
}
