//! Hierarchical default resolution for scenario config trees.
//!
//! Scenario trees are nested YAML maps. At any level the reserved key
//! [`DEFAULT_KEY`] holds values that every nested sibling inherits:
//!
//! ```yaml
//! rs1:
//!   _default: {master_weight: 10}
//!   t1: {master: true}
//!   t2: {}
//! ```
//!
//! resolves to `t1: {master_weight: 10, master: true}` and
//! `t2: {master_weight: 10}`. Explicit values always win over inherited ones,
//! and only nested maps inherit: scalar siblings are copied as written.

use serde_yaml::{Mapping, Value};

use crate::error::{ConfigError, Result};

/// Reserved key carrying the defaults of a level.
pub const DEFAULT_KEY: &str = "_default";

/// Resolves `_default` entries in `tree`.
///
/// `outer` holds defaults inherited from the enclosing level. The result
/// starts as a copy of `outer`; every non-reserved key then overrides it. A
/// nested map is resolved recursively with the outer defaults scoped to that
/// key, overlaid by this level's own `_default` map (which wins on
/// collisions). Anything that is not a map is returned unchanged, so this
/// never fails, and resolving an already-resolved tree is a no-op.
pub fn resolve_defaults(tree: &Value, outer: Option<&Mapping>) -> Value {
    let Value::Mapping(level) = tree else {
        return tree.clone();
    };

    let empty = Mapping::new();
    let outer = outer.unwrap_or(&empty);
    let level_defaults = match level.get(DEFAULT_KEY) {
        Some(Value::Mapping(defaults)) => defaults,
        _ => &empty,
    };

    let mut resolved = outer.clone();
    for (key, value) in level {
        if is_default_key(key) {
            continue;
        }

        let value = match value {
            Value::Mapping(_) => {
                let mut scoped = match outer.get(key) {
                    Some(Value::Mapping(inherited)) => inherited.clone(),
                    _ => Mapping::new(),
                };
                for (k, v) in level_defaults {
                    scoped.insert(k.clone(), v.clone());
                }
                resolve_defaults(value, Some(&scoped))
            }
            other => other.clone(),
        };
        resolved.insert(key.clone(), value);
    }
    resolved.remove(DEFAULT_KEY);

    Value::Mapping(resolved)
}

/// Parses indented scenario text and resolves its defaults.
///
/// The text is dedented first so step bodies can be written indented inside
/// a larger document.
pub fn parse_defaulted_yaml(text: &str) -> Result<Value> {
    let tree: Value = serde_yaml::from_str(&dedent(text)).map_err(ConfigError::Parse)?;
    Ok(resolve_defaults(&tree, None))
}

fn is_default_key(key: &Value) -> bool {
    key.as_str() == Some(DEFAULT_KEY)
}

/// Removes the whitespace prefix shared by all non-blank lines.
fn dedent(text: &str) -> String {
    let indent = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);

    text.lines()
        .map(|line| line.get(indent..).unwrap_or_else(|| line.trim_start()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(text: &str) -> Value {
        serde_yaml::from_str(text).unwrap()
    }

    #[test]
    fn test_default_applies_to_nested_siblings() {
        let tree = yaml(
            r#"
rs1:
  _default: {master: false, master_weight: 10}
  t1: {master: true}
  t2: {}
"#,
        );

        let resolved = resolve_defaults(&tree, None);
        let expected = yaml(
            r#"
rs1:
  t1: {master: true, master_weight: 10}
  t2: {master: false, master_weight: 10}
"#,
        );
        assert_eq!(resolved, expected);
    }

    #[test]
    fn test_explicit_value_overrides_default() {
        let tree = yaml("rs1: {_default: {router: true}, t1: {router: false}}");
        let resolved = resolve_defaults(&tree, None);
        assert_eq!(resolved["rs1"]["t1"]["router"], Value::Bool(false));
    }

    #[test]
    fn test_scalars_are_copied_verbatim() {
        let tree = yaml("rs1: {_default: {weight: 5}, weight: 20, t1: {}}");
        let resolved = resolve_defaults(&tree, None);

        // scalar sibling keeps its own value and is not merged with anything
        assert_eq!(resolved["rs1"]["weight"], Value::from(20));
        assert_eq!(resolved["rs1"]["t1"]["weight"], Value::from(5));
    }

    #[test]
    fn test_nearest_default_wins() {
        let tree = yaml(
            r#"
_default:
  t1: {storage: true}
  storage: false
rs1:
  _default: {storage: false}
  t1: {}
"#,
        );

        let resolved = resolve_defaults(&tree, None);
        // the outer default for t1 is inherited through rs1, but rs1's own
        // `_default` is nearer and wins
        assert_eq!(resolved["rs1"]["t1"]["storage"], Value::Bool(false));
        assert_eq!(resolved["rs1"]["storage"], Value::Bool(false));
    }

    #[test]
    fn test_no_reserved_keys_remain() {
        let tree = yaml("_default: {a: 1}\nx: {_default: {b: 2}, y: {}}");
        let resolved = resolve_defaults(&tree, None);

        fn contains_default(value: &Value) -> bool {
            match value {
                Value::Mapping(map) => map
                    .iter()
                    .any(|(k, v)| k.as_str() == Some(DEFAULT_KEY) || contains_default(v)),
                _ => false,
            }
        }
        assert!(!contains_default(&resolved));
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let tree = yaml(
            r#"
_default: {rs1: {weight: 3}}
rs1:
  _default: {router: true, storage: true}
  t1: {automaster: true}
  t2: {router: false}
rs2:
  t3: {nested: {deep: 1}}
"#,
        );

        let once = resolve_defaults(&tree, None);
        let twice = resolve_defaults(&once, None);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_non_mapping_input_is_identity() {
        assert_eq!(resolve_defaults(&Value::from(7), None), Value::from(7));

        let list = yaml("[1, 2, 3]");
        assert_eq!(resolve_defaults(&list, None), list);
    }

    #[test]
    fn test_non_mapping_default_is_ignored() {
        let tree = yaml("_default: 5\nt1: {a: 1}");
        let resolved = resolve_defaults(&tree, None);
        assert_eq!(resolved, yaml("t1: {a: 1}"));
    }

    #[test]
    fn test_parse_defaulted_yaml_dedents() {
        let text = "
            rs1:
              _default: {master: false}
              t1: {master: true}
              t2: {}
        ";

        let resolved = parse_defaulted_yaml(text).unwrap();
        assert_eq!(resolved["rs1"]["t2"]["master"], Value::Bool(false));
        assert_eq!(resolved["rs1"]["t1"]["master"], Value::Bool(true));
    }

    #[test]
    fn test_parse_defaulted_yaml_rejects_garbage() {
        let err = parse_defaulted_yaml("rs1: {t1: [}").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_dedent() {
        assert_eq!(dedent("  a\n    b\n\n  c"), "a\n  b\n\nc");
        assert_eq!(dedent("a\n b"), "a\n b");
    }
}
