//! Provider record types.

use serde::{Deserialize, Serialize};

/// How a credential is injected into outbound requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scheme")]
pub enum AuthRule {
    /// `Authorization: Bearer <token>`.
    Bearer,
    /// `Authorization: token <token>` (GitHub PAT style).
    Token,
    /// HTTP basic auth; the credential is `user:password`.
    Basic,
    /// Token in a custom header (GitLab `PRIVATE-TOKEN` style).
    Header { name: String },
}

/// How discovery learns the scopes a credential carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum IntrospectionRule {
    /// Probe an endpoint and read granted scopes from a response header
    /// (GitHub's `X-OAuth-Scopes`).
    ScopesHeader { path: String, header: String },
    /// Probe an endpoint and read scopes from a JSON array field.
    ScopesField { path: String, field: String },
    /// The provider has no introspection surface; discovery grants the
    /// listed default scopes to any credential that authenticates.
    Static { scopes: Vec<String> },
}

/// A declarative binding from a symbolic operation id to an HTTP call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationMapping {
    pub operation_id: String,
    pub http_method: String,
    /// Path with `{param}` placeholders, joined onto the base URL.
    pub path_template: String,
    pub required_params: Vec<String>,
    pub optional_params: Vec<String>,
    pub required_scopes: Vec<String>,
    pub description: String,
}

/// A built-in provider integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDef {
    pub name: String,
    pub base_url: String,
    /// Where the full OpenAPI document lives (spec cache input).
    pub spec_url: String,
    pub auth: AuthRule,
    pub introspection: IntrospectionRule,
    pub operations: Vec<OperationMapping>,
}

impl ProviderDef {
    #[must_use]
    pub fn operation(&self, operation_id: &str) -> Option<&OperationMapping> {
        self.operations
            .iter()
            .find(|op| op.operation_id == operation_id)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_rule_serializes_with_scheme_tag() {
        let json = serde_json::to_value(AuthRule::Header {
            name: "PRIVATE-TOKEN".into(),
        })
        .unwrap();
        assert_eq!(json["scheme"], "header");
        assert_eq!(json["name"], "PRIVATE-TOKEN");
    }
}
