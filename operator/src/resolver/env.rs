use std::collections::HashMap;

use resources::objects::workload::EnvVar;

use crate::error::ScaleError;

/// Expands `$(VAR)` references in `input` against already-resolved
/// variables. `$$(VAR)` escapes to a literal `$(VAR)`; unknown or
/// incomplete references pass through untouched.
pub fn expand(input: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];

        // Escaped reference: $$(VAR) -> $(VAR)
        if let Some(tail) = rest.strip_prefix("$$(") {
            match tail.find(')') {
                Some(end) => {
                    out.push_str(&rest[1..end + 4]);
                    rest = &tail[end + 1..];
                },
                None => {
                    out.push_str("$$(");
                    rest = tail;
                },
            }
            continue;
        }

        if let Some(tail) = rest.strip_prefix("$(") {
            match tail.find(')') {
                Some(end) => {
                    let name = &tail[..end];
                    match vars.get(name) {
                        Some(value) => out.push_str(value),
                        // Unknown reference stays literal.
                        None => out.push_str(&rest[..end + 3]),
                    }
                    rest = &tail[end + 1..];
                },
                None => {
                    // Incomplete reference, emit the remainder as-is.
                    out.push_str(rest);
                    rest = "";
                },
            }
            continue;
        }

        out.push('$');
        rest = &rest[1..];
    }
    out.push_str(rest);
    out
}

/// Materializes a container environment in definition order, expanding
/// each value against the variables defined before it.
pub fn resolve_container_env(env: &[EnvVar]) -> Result<HashMap<String, String>, ScaleError> {
    let mut resolved = HashMap::with_capacity(env.len());
    for var in env {
        if var.value.contains(&format!("$({})", var.name)) {
            return Err(ScaleError::ConfigInvalid(format!(
                "env var {} references itself",
                var.name
            )));
        }
        let value = expand(&var.value, &resolved);
        resolved.insert(var.name.to_owned(), value);
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn expands_known_references() {
        assert_eq!(expand("$(A)-x", &vars(&[("A", "1")])), "1-x");
        assert_eq!(expand("pre$(A)$(B)", &vars(&[("A", "1"), ("B", "2")])), "pre12");
    }

    #[test]
    fn double_dollar_escapes() {
        assert_eq!(expand("$$(A)", &vars(&[])), "$(A)");
        assert_eq!(expand("$$(A)", &vars(&[("A", "1")])), "$(A)");
    }

    #[test]
    fn unknown_reference_stays_literal() {
        assert_eq!(expand("$(UNSET)", &vars(&[])), "$(UNSET)");
    }

    #[test]
    fn incomplete_reference_stays_literal() {
        assert_eq!(expand("$(A", &vars(&[("A", "1")])), "$(A");
        assert_eq!(expand("tail$", &vars(&[])), "tail$");
    }

    #[test]
    fn container_env_resolves_in_definition_order() {
        let env = vec![
            EnvVar {
                name: "HOST".to_string(),
                value: "broker".to_string(),
            },
            EnvVar {
                name: "URL".to_string(),
                value: "amqp://$(HOST):5672".to_string(),
            },
            EnvVar {
                name: "EARLY".to_string(),
                value: "$(LATE)".to_string(),
            },
            EnvVar {
                name: "LATE".to_string(),
                value: "x".to_string(),
            },
        ];
        let resolved = resolve_container_env(&env).unwrap();
        assert_eq!(resolved["URL"], "amqp://broker:5672");
        // Forward references are not visible yet.
        assert_eq!(resolved["EARLY"], "$(LATE)");
    }

    #[test]
    fn self_reference_is_invalid() {
        let env = vec![EnvVar {
            name: "LOOP".to_string(),
            value: "$(LOOP)x".to_string(),
        }];
        assert!(matches!(
            resolve_container_env(&env),
            Err(ScaleError::ConfigInvalid(_))
        ));
    }
}
