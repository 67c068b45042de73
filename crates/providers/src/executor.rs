//! HTTP execution of operation mappings.

use std::time::Duration;

use {
    secrecy::{ExposeSecret, SecretString},
    serde_json::{Map, Value},
    tracing::debug,
};

use crate::{
    error::ProviderError,
    types::{AuthRule, OperationMapping, ProviderDef},
};

/// Default per-call deadline; callers with an inherited deadline pass a
/// tighter one through [`ProviderExecutor::execute_with_timeout`].
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Executes operation mappings against live provider APIs.
pub struct ProviderExecutor {
    client: reqwest::Client,
    /// Overrides the provider's base URL (tests, self-hosted instances).
    base_url_override: Option<String>,
}

impl ProviderExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: crate::shared_http_client().clone(),
            base_url_override: None,
        }
    }

    /// Point every call at a fixed base URL instead of the provider's.
    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: crate::shared_http_client().clone(),
            base_url_override: Some(base_url.into()),
        }
    }

    /// Execute an operation with the default timeout.
    pub async fn execute(
        &self,
        provider: &ProviderDef,
        operation_id: &str,
        params: &Map<String, Value>,
        credential: &SecretString,
    ) -> Result<Value, ProviderError> {
        self.execute_with_timeout(provider, operation_id, params, credential, DEFAULT_TIMEOUT)
            .await
    }

    /// Execute an operation with an explicit deadline.
    pub async fn execute_with_timeout(
        &self,
        provider: &ProviderDef,
        operation_id: &str,
        params: &Map<String, Value>,
        credential: &SecretString,
        timeout: Duration,
    ) -> Result<Value, ProviderError> {
        let operation =
            provider
                .operation(operation_id)
                .ok_or_else(|| ProviderError::UnknownOperation {
                    provider: provider.name.clone(),
                    operation_id: operation_id.to_string(),
                })?;

        for required in &operation.required_params {
            if !params.contains_key(required) {
                return Err(ProviderError::MissingParam(required.clone()));
            }
        }

        let (path, consumed) = render_path(&operation.path_template, params);
        let base = self
            .base_url_override
            .as_deref()
            .unwrap_or(&provider.base_url);
        let url = format!("{}{}", base.trim_end_matches('/'), path);

        let method: reqwest::Method =
            operation
                .http_method
                .parse()
                .map_err(|_| ProviderError::UnknownOperation {
                    provider: provider.name.clone(),
                    operation_id: operation_id.to_string(),
                })?;

        // Parameters not consumed by the path become the query string for
        // reads and the JSON body for writes.
        let rest: Map<String, Value> = params
            .iter()
            .filter(|(name, _)| !consumed.contains(name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        let mut request = self.client.request(method.clone(), &url).timeout(timeout);
        request = apply_auth(request, &provider.auth, credential);
        request = if method == reqwest::Method::GET {
            let query: Vec<(String, String)> = rest
                .iter()
                .map(|(name, value)| (name.clone(), value_to_query(value)))
                .collect();
            request.query(&query)
        } else {
            request.json(&Value::Object(rest))
        };

        debug!(provider = %provider.name, operation_id, %url, "executing provider operation");

        let response = request.send().await.map_err(|e| ProviderError::Transport {
            provider: provider.name.clone(),
            message: e.to_string(),
            timed_out: e.is_timeout(),
        })?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                provider: provider.name.clone(),
                status: status.as_u16(),
                retryable: status.as_u16() == 429 || status.is_server_error(),
                retry_after,
                body: truncate(&body, 512),
            });
        }

        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        response
            .json()
            .await
            .map_err(|e| ProviderError::BadResponse {
                provider: provider.name.clone(),
                message: e.to_string(),
            })
    }
}

impl Default for ProviderExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Substitute `{param}` placeholders; returns the rendered path and the set
/// of consumed parameter names.
fn render_path<'a>(
    template: &'a str,
    params: &Map<String, Value>,
) -> (String, std::collections::HashSet<&'a str>) {
    let mut rendered = String::with_capacity(template.len());
    let mut consumed = std::collections::HashSet::new();
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        rendered.push_str(&rest[..open]);
        let Some(close) = rest[open..].find('}') else {
            rendered.push_str(&rest[open..]);
            rest = "";
            break;
        };
        let name = &rest[open + 1..open + close];
        match params.get(name) {
            Some(value) => rendered.push_str(&urlencode(&value_to_query(value))),
            None => {
                rendered.push('{');
                rendered.push_str(name);
                rendered.push('}');
            },
        }
        consumed.insert(name);
        rest = &rest[open + close + 1..];
    }
    rendered.push_str(rest);
    (rendered, consumed)
}

fn apply_auth(
    request: reqwest::RequestBuilder,
    rule: &AuthRule,
    credential: &SecretString,
) -> reqwest::RequestBuilder {
    match rule {
        AuthRule::Bearer => request.bearer_auth(credential.expose_secret()),
        AuthRule::Token => request.header(
            reqwest::header::AUTHORIZATION,
            format!("token {}", credential.expose_secret()),
        ),
        AuthRule::Basic => {
            let (user, pass) = credential
                .expose_secret()
                .split_once(':')
                .unwrap_or((credential.expose_secret().as_str(), ""));
            request.basic_auth(user, Some(pass))
        },
        AuthRule::Header { name } => request.header(name, credential.expose_secret().as_str()),
    }
}

fn value_to_query(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn urlencode(s: &str) -> String {
    // Conservative path-segment encoding; query values go through reqwest.
    s.chars()
        .flat_map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~') {
                vec![c]
            } else {
                format!("%{:02X}", c as u32).chars().collect()
            }
        })
        .collect()
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut cut = max;
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…", &s[..cut])
}
