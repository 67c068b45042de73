//! Specs bundled into the binary as a last-resort fallback when both cache
//! tiers miss and the upstream fetch keeps failing.

/// Return the embedded spec document for a key, if one ships in this build.
#[must_use]
pub fn embedded_spec(key: &str) -> Option<&'static str> {
    match key {
        "github" => Some(include_str!("embedded/github.json")),
        "gitlab" => Some(include_str!("embedded/gitlab.json")),
        "jira" => Some(include_str!("embedded/jira.json")),
        _ => None,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::types::ParsedSpec};

    #[test]
    fn all_embedded_specs_parse() {
        for key in ["github", "gitlab", "jira"] {
            let doc = embedded_spec(key).unwrap();
            let spec = ParsedSpec::parse(key, doc).unwrap();
            assert!(!spec.operations.is_empty(), "{key} has operations");
        }
    }

    #[test]
    fn unknown_key_has_no_fallback() {
        assert!(embedded_spec("bitbucket").is_none());
    }
}
