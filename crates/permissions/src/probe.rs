//! Scope probing against provider introspection endpoints.

use std::time::Duration;

use {
    secrecy::{ExposeSecret, SecretString},
    tracing::debug,
};

use relay_providers::{AuthRule, IntrospectionRule, ProviderDef};

/// Probes a provider to learn which scopes a credential carries.
pub struct ScopeProbe {
    client: reqwest::Client,
    timeout: Duration,
    base_url_override: Option<String>,
}

impl ScopeProbe {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: relay_providers::shared_http_client().clone(),
            timeout,
            base_url_override: None,
        }
    }

    /// Point probes at a fixed base URL (tests, self-hosted instances).
    #[must_use]
    pub fn with_base_url(timeout: Duration, base_url: impl Into<String>) -> Self {
        Self {
            client: relay_providers::shared_http_client().clone(),
            timeout,
            base_url_override: Some(base_url.into()),
        }
    }

    /// Learn the credential's granted scopes. `Err` carries a short reason
    /// used only for logging and fail-open/closed decisions.
    pub async fn granted_scopes(
        &self,
        provider: &ProviderDef,
        credential: &SecretString,
    ) -> Result<Vec<String>, String> {
        match &provider.introspection {
            IntrospectionRule::Static { scopes } => Ok(scopes.clone()),
            IntrospectionRule::ScopesHeader { path, header } => {
                let response = self.probe(provider, path, credential).await?;
                let scopes = response
                    .headers()
                    .get(header.as_str())
                    .and_then(|v| v.to_str().ok())
                    .map(|v| {
                        v.split(',')
                            .map(|s| s.trim().to_string())
                            .filter(|s| !s.is_empty())
                            .collect()
                    })
                    .unwrap_or_default();
                debug!(provider = %provider.name, ?scopes, "scopes from header");
                Ok(scopes)
            },
            IntrospectionRule::ScopesField { path, field } => {
                let response = self.probe(provider, path, credential).await?;
                let body: serde_json::Value =
                    response.json().await.map_err(|e| e.to_string())?;
                let scopes = body
                    .get(field)
                    .and_then(serde_json::Value::as_array)
                    .map(|values| {
                        values
                            .iter()
                            .filter_map(serde_json::Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                debug!(provider = %provider.name, ?scopes, "scopes from body field");
                Ok(scopes)
            },
        }
    }

    async fn probe(
        &self,
        provider: &ProviderDef,
        path: &str,
        credential: &SecretString,
    ) -> Result<reqwest::Response, String> {
        let base = self
            .base_url_override
            .as_deref()
            .unwrap_or(&provider.base_url);
        let url = format!("{}{}", base.trim_end_matches('/'), path);

        let mut request = self.client.get(&url).timeout(self.timeout);
        request = match &provider.auth {
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
            AuthRule::Header { name } => {
                request.header(name.as_str(), credential.expose_secret().as_str())
            },
        };

        let response = request.send().await.map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("introspection returned {}", response.status()));
        }
        Ok(response)
    }
}
