//! JSON merge patch (RFC 7396) for `PATCH`-style updates.

use serde_json::{Map, Value};

use crate::error::{FrameworkError, Result};
use crate::field::FieldData;

/// Reshapes the coerced input before it is merged.
pub type PatchPreprocessor = dyn Fn(Map<String, Value>) -> Result<Map<String, Value>> + Send + Sync;

/// Merges the declared, coerced input fields into `resource`.
///
/// Only keys declared in the input's schema are used; each is coerced per its
/// kind. An explicit `null` unsets the key, and `null` members of an object
/// value remove those members from the stored map.
///
/// # Errors
///
/// Fails when the resource does not exist, when an input value does not
/// coerce, or when the preprocessor fails.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use vaultframe::field::{FieldData, FieldKind, FieldMap, FieldSchema};
/// use vaultframe::patch::handle_patch_operation;
/// use serde_json::json;
///
/// let mut schema = FieldMap::new();
/// schema.insert("ttl".into(), FieldSchema::new(FieldKind::DurationSecond));
/// schema.insert("tags".into(), FieldSchema::new(FieldKind::Map));
///
/// let input = FieldData::new(
///     json!({"ttl": "2m", "tags": {"env": null}, "bogus": 1}).as_object().cloned().unwrap(),
///     Arc::new(schema),
/// );
/// let resource = json!({"ttl": 60, "tags": {"env": "prod", "team": "infra"}});
///
/// let merged = handle_patch_operation(&input, resource.as_object(), None).unwrap();
/// assert_eq!(serde_json::Value::Object(merged), json!({"ttl": 120, "tags": {"team": "infra"}}));
/// ```
pub fn handle_patch_operation(
    input: &FieldData,
    resource: Option<&Map<String, Value>>,
    preprocessor: Option<&PatchPreprocessor>,
) -> Result<Map<String, Value>> {
    let resource = resource.ok_or_else(|| FrameworkError::User("resource does not exist".into()))?;

    let mut patch = Map::new();
    for (key, raw) in input.raw() {
        if !input.schema().contains_key(key) {
            continue;
        }
        if raw.is_null() {
            patch.insert(key.clone(), Value::Null);
            continue;
        }
        if let Some(value) = input.get_ok_err(key)? {
            patch.insert(key.clone(), value.to_json());
        }
    }

    if let Some(preprocess) = preprocessor {
        patch = preprocess(patch)?;
    }

    let mut merged = Value::Object(resource.clone());
    merge_patch(&mut merged, &Value::Object(patch));
    match merged {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}

/// Applies `patch` to `target` per RFC 7396.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                merge_patch(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FieldKind, FieldMap, FieldSchema};
    use serde_json::json;
    use std::sync::Arc;

    fn schema() -> Arc<FieldMap> {
        let mut schema = FieldMap::new();
        schema.insert("name".into(), FieldSchema::new(FieldKind::String));
        schema.insert("policies".into(), FieldSchema::new(FieldKind::CommaStringSlice));
        schema.insert("ttl".into(), FieldSchema::new(FieldKind::DurationSecond));
        schema.insert("enabled".into(), FieldSchema::new(FieldKind::Bool));
        Arc::new(schema)
    }

    fn data(raw: Value) -> FieldData {
        FieldData::new(raw.as_object().cloned().unwrap(), schema())
    }

    #[test]
    fn test_merge_patch_rfc_examples() {
        let cases = [
            (json!({"a": "b"}), json!({"a": "c"}), json!({"a": "c"})),
            (json!({"a": "b"}), json!({"b": "c"}), json!({"a": "b", "b": "c"})),
            (json!({"a": "b"}), json!({"a": null}), json!({})),
            (json!({"a": ["b"]}), json!({"a": "c"}), json!({"a": "c"})),
            (json!({"a": {"b": "c"}}), json!({"a": {"b": "d", "c": null}}), json!({"a": {"b": "d"}})),
            (json!(["a", "b"]), json!(["c", "d"]), json!(["c", "d"])),
            (json!({}), json!({"a": {"bb": {"ccc": null}}}), json!({"a": {"bb": {}}})),
        ];
        for (target, patch, expected) in cases {
            let mut merged = target.clone();
            merge_patch(&mut merged, &patch);
            assert_eq!(merged, expected, "{target} + {patch}");
        }
    }

    #[test]
    fn test_patch_coerces_and_unsets() {
        let resource = json!({"name": "web", "policies": ["a"], "ttl": 30, "enabled": true});
        let input = data(json!({"policies": "b, c", "ttl": "1m", "enabled": null, "unknown": "x"}));

        let merged = handle_patch_operation(&input, resource.as_object(), None).unwrap();
        assert_eq!(
            Value::Object(merged),
            json!({"name": "web", "policies": ["b", "c"], "ttl": 60})
        );
    }

    #[test]
    fn test_patch_missing_resource() {
        let err = handle_patch_operation(&data(json!({})), None, None).unwrap_err();
        assert_eq!(err.to_string(), "resource does not exist");
    }

    #[test]
    fn test_patch_bad_input() {
        let resource = json!({});
        let input = data(json!({"enabled": "3false3"}));
        assert!(matches!(
            handle_patch_operation(&input, resource.as_object(), None),
            Err(FrameworkError::FieldConversion { .. })
        ));
    }

    #[test]
    fn test_patch_preprocessor() {
        let resource = json!({"name": "web"});
        let input = data(json!({"name": "api"}));
        let upper = |mut m: Map<String, Value>| -> Result<Map<String, Value>> {
            if let Some(Value::String(s)) = m.get_mut("name") {
                *s = s.to_uppercase();
            }
            Ok(m)
        };

        let merged = handle_patch_operation(&input, resource.as_object(), Some(&upper)).unwrap();
        assert_eq!(merged["name"], "API");
    }
}
