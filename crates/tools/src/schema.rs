//! Input-schema synthesis from operation parameter lists.

use serde_json::{Value, json};

use relay_providers::OperationMapping;

/// Build a JSON schema for an operation's arguments.
///
/// Parameters are strings at this layer; providers coerce further. Unknown
/// properties are rejected so typos fail fast instead of silently dropping.
#[must_use]
pub fn input_schema(operation: &OperationMapping) -> Value {
    let mut properties = serde_json::Map::new();
    for name in &operation.required_params {
        properties.insert(name.clone(), json!({"type": "string"}));
    }
    for name in &operation.optional_params {
        properties.insert(name.clone(), json!({"type": "string"}));
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": operation.required_params,
        "additionalProperties": false,
    })
}

/// Validate call arguments against the operation's parameters.
pub fn validate_args(
    operation: &OperationMapping,
    args: &Value,
) -> Result<serde_json::Map<String, Value>, String> {
    let Some(object) = args.as_object() else {
        return Err("arguments must be an object".into());
    };

    for required in &operation.required_params {
        if !object.contains_key(required) {
            return Err(format!("missing required argument: {required}"));
        }
    }
    for name in object.keys() {
        let known = operation.required_params.iter().any(|p| p == name)
            || operation.optional_params.iter().any(|p| p == name);
        if !known {
            return Err(format!("unknown argument: {name}"));
        }
    }
    Ok(object.clone())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn operation() -> OperationMapping {
        OperationMapping {
            operation_id: "issues/create".into(),
            http_method: "POST".into(),
            path_template: "/repos/{owner}/{repo}/issues".into(),
            required_params: vec!["owner".into(), "repo".into(), "title".into()],
            optional_params: vec!["body".into()],
            required_scopes: vec!["repo:write".into()],
            description: "Create an issue".into(),
        }
    }

    #[test]
    fn schema_lists_required_and_rejects_additional() {
        let schema = input_schema(&operation());
        assert_eq!(schema["required"], json!(["owner", "repo", "title"]));
        assert_eq!(schema["additionalProperties"], json!(false));
        assert_eq!(schema["properties"]["body"]["type"], "string");
    }

    #[test]
    fn validate_accepts_complete_args() {
        let args = json!({"owner": "acme", "repo": "api", "title": "crash", "body": "trace"});
        let map = validate_args(&operation(), &args).unwrap();
        assert_eq!(map.len(), 4);
    }

    #[test]
    fn validate_rejects_missing_required() {
        let args = json!({"owner": "acme", "repo": "api"});
        let err = validate_args(&operation(), &args).unwrap_err();
        assert!(err.contains("title"));
    }

    #[test]
    fn validate_rejects_unknown_argument() {
        let args = json!({"owner": "a", "repo": "r", "title": "t", "labels": "x"});
        let err = validate_args(&operation(), &args).unwrap_err();
        assert!(err.contains("labels"));
    }

    #[test]
    fn validate_rejects_non_object() {
        assert!(validate_args(&operation(), &json!("nope")).is_err());
    }
}
