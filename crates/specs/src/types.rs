//! Parsed spec model: the slice of an OpenAPI document the core consumes.

use {serde::{Deserialize, Serialize}, serde_json::Value};

use crate::error::SpecError;

/// One operation extracted from a spec's `paths` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecOperation {
    pub operation_id: String,
    pub http_method: String,
    pub path: String,
    /// OAuth scopes any security requirement demands for this operation.
    pub required_scopes: Vec<String>,
    /// Required parameter names (path + query + required body fields).
    pub required_params: Vec<String>,
    pub optional_params: Vec<String>,
    pub description: Option<String>,
}

/// A fully parsed spec. Immutable once built; shared via `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedSpec {
    pub key: String,
    pub version: String,
    pub operations: Vec<SpecOperation>,
}

impl ParsedSpec {
    /// Parse an OpenAPI 3.x JSON document.
    ///
    /// Operations without an `operationId` are skipped (they cannot be
    /// addressed); a document with no addressable operations is a parse
    /// error, as is anything that isn't an object with `paths`.
    pub fn parse(key: &str, document: &str) -> Result<Self, SpecError> {
        let doc: Value = serde_json::from_str(document).map_err(|e| SpecError::Parse {
            key: key.to_string(),
            message: e.to_string(),
        })?;

        let version = doc
            .get("info")
            .and_then(|i| i.get("version"))
            .and_then(Value::as_str)
            .unwrap_or("0")
            .to_string();

        let paths = doc
            .get("paths")
            .and_then(Value::as_object)
            .ok_or_else(|| SpecError::Parse {
                key: key.to_string(),
                message: "missing paths object".into(),
            })?;

        let mut operations = Vec::new();
        for (path, item) in paths {
            let Some(item) = item.as_object() else {
                continue;
            };
            for (method, op) in item {
                if !matches!(
                    method.as_str(),
                    "get" | "put" | "post" | "delete" | "patch" | "head"
                ) {
                    continue;
                }
                let Some(op) = op.as_object() else { continue };
                let Some(operation_id) = op.get("operationId").and_then(Value::as_str) else {
                    continue;
                };

                let mut required_params = Vec::new();
                let mut optional_params = Vec::new();
                if let Some(params) = op.get("parameters").and_then(Value::as_array) {
                    for param in params {
                        let Some(name) = param.get("name").and_then(Value::as_str) else {
                            continue;
                        };
                        if param
                            .get("required")
                            .and_then(Value::as_bool)
                            .unwrap_or(false)
                        {
                            required_params.push(name.to_string());
                        } else {
                            optional_params.push(name.to_string());
                        }
                    }
                }

                let required_scopes = op
                    .get("security")
                    .and_then(Value::as_array)
                    .map(|reqs| {
                        reqs.iter()
                            .filter_map(Value::as_object)
                            .flat_map(|scheme| scheme.values())
                            .filter_map(Value::as_array)
                            .flatten()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();

                operations.push(SpecOperation {
                    operation_id: operation_id.to_string(),
                    http_method: method.to_uppercase(),
                    path: path.clone(),
                    required_scopes,
                    required_params,
                    optional_params,
                    description: op
                        .get("summary")
                        .or_else(|| op.get("description"))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                });
            }
        }

        if operations.is_empty() {
            return Err(SpecError::Parse {
                key: key.to_string(),
                message: "no addressable operations".into(),
            });
        }

        Ok(Self {
            key: key.to_string(),
            version,
            operations,
        })
    }

    /// Look up one operation by id.
    #[must_use]
    pub fn operation(&self, operation_id: &str) -> Option<&SpecOperation> {
        self.operations
            .iter()
            .find(|op| op.operation_id == operation_id)
    }

    /// Operation ids whose scope requirements are satisfied by `granted`.
    ///
    /// An operation with no scope requirement is always allowed.
    #[must_use]
    pub fn operations_allowed_by(&self, granted: &[String]) -> Vec<String> {
        self.operations
            .iter()
            .filter(|op| {
                op.required_scopes
                    .iter()
                    .all(|scope| granted.iter().any(|g| g == scope))
            })
            .map(|op| op.operation_id.clone())
            .collect()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "openapi": "3.0.0",
        "info": {"title": "t", "version": "1.2.3"},
        "paths": {
            "/repos/{owner}/{repo}": {
                "get": {
                    "operationId": "repos/get",
                    "summary": "Get a repository",
                    "parameters": [
                        {"name": "owner", "in": "path", "required": true},
                        {"name": "repo", "in": "path", "required": true},
                        {"name": "page", "in": "query"}
                    ],
                    "security": [{"oauth": ["repo:read"]}]
                }
            },
            "/repos/{owner}/{repo}/issues": {
                "post": {
                    "operationId": "issues/create",
                    "security": [{"oauth": ["repo:write"]}]
                }
            },
            "/meta": {
                "get": {"operationId": "meta/get"}
            }
        }
    }"#;

    #[test]
    fn parses_operations_params_and_scopes() {
        let spec = ParsedSpec::parse("github", DOC).unwrap();
        assert_eq!(spec.version, "1.2.3");
        assert_eq!(spec.operations.len(), 3);

        let get = spec.operation("repos/get").unwrap();
        assert_eq!(get.http_method, "GET");
        assert_eq!(get.required_params, vec!["owner", "repo"]);
        assert_eq!(get.optional_params, vec!["page"]);
        assert_eq!(get.required_scopes, vec!["repo:read"]);
    }

    #[test]
    fn scope_filtering_is_an_exact_subset_check() {
        let spec = ParsedSpec::parse("github", DOC).unwrap();
        let allowed = spec.operations_allowed_by(&["repo:read".to_string()]);
        assert!(allowed.contains(&"repos/get".to_string()));
        assert!(allowed.contains(&"meta/get".to_string()));
        assert!(!allowed.contains(&"issues/create".to_string()));
    }

    #[test]
    fn document_without_paths_is_fatal() {
        assert!(matches!(
            ParsedSpec::parse("k", r#"{"openapi": "3.0.0"}"#),
            Err(SpecError::Parse { .. })
        ));
    }

    #[test]
    fn document_with_no_operation_ids_is_fatal() {
        let doc = r#"{"paths": {"/a": {"get": {}}}}"#;
        assert!(matches!(
            ParsedSpec::parse("k", doc),
            Err(SpecError::Parse { .. })
        ));
    }

    #[test]
    fn malformed_json_is_fatal() {
        assert!(matches!(
            ParsedSpec::parse("k", "{nope"),
            Err(SpecError::Parse { .. })
        ));
    }
}
