/// Replace `${ENV_VAR}` placeholders in config string values.
///
/// Unresolvable variables are left as-is so validation can flag them.
pub fn substitute_env(input: &str) -> String {
    substitute_env_with(input, |name| std::env::var(name).ok())
}

/// Replace `${ENV_VAR}` placeholders using a custom lookup function.
///
/// This is the implementation used by [`substitute_env`]; the separate
/// signature makes it testable without mutating the process environment.
fn substitute_env_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                var_name.push(c);
            }
            if closed && !var_name.is_empty() {
                match lookup(&var_name) {
                    Some(val) => result.push_str(&val),
                    None => {
                        // Leave unresolved placeholder as-is.
                        result.push_str("${");
                        result.push_str(&var_name);
                        result.push('}');
                    },
                }
            } else {
                // Malformed — emit literal.
                result.push_str("${");
                result.push_str(&var_name);
            }
        } else {
            result.push(ch);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_var() {
        let lookup = |name: &str| match name {
            "RELAY_MASTER_KEY" => Some("c2VjcmV0".to_string()),
            _ => None,
        };
        assert_eq!(
            substitute_env_with("master_key = \"${RELAY_MASTER_KEY}\"", lookup),
            "master_key = \"c2VjcmV0\""
        );
    }

    #[test]
    fn leaves_unknown_var() {
        let lookup = |_: &str| None;
        assert_eq!(
            substitute_env_with("url = \"${RELAY_REDIS_URL}\"", lookup),
            "url = \"${RELAY_REDIS_URL}\""
        );
    }

    #[test]
    fn ignores_bare_dollar() {
        let lookup = |_: &str| None;
        assert_eq!(substitute_env_with("cost = $5", lookup), "cost = $5");
    }

    #[test]
    fn handles_unclosed_brace() {
        let lookup = |_: &str| None;
        assert_eq!(substitute_env_with("x = ${OOPS", lookup), "x = ${OOPS");
    }
}
