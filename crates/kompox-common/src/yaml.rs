//! YAML parsing utilities using yaml-rust2
//!
//! Compose documents, env files and synthesis configs are parsed with
//! yaml-rust2 and converted to `serde_json::Value` so the rest of the engine
//! works with one value model. Anchors are resolved by the loader; merge keys
//! are not expanded. Generated manifests go the other way for YAML output.

use serde_json::{Map, Number, Value};
use yaml_rust2::yaml::Hash;
use yaml_rust2::{Yaml, YamlEmitter, YamlLoader};

use crate::{Error, Result};

/// Parse a YAML string into a `serde_json::Value`.
///
/// Only the first document is returned. Empty input yields `Value::Null`.
pub fn parse_yaml(input: &str) -> Result<Value> {
    let docs = YamlLoader::load_from_str(input).map_err(|e| Error::serialization(e.to_string()))?;
    match docs.into_iter().next() {
        Some(doc) => yaml_to_json(doc),
        None => Ok(Value::Null),
    }
}

/// Parse a YAML document that must be a mapping at the top level.
///
/// Empty input yields an empty mapping. `kind` names the document in errors.
pub fn parse_yaml_mapping(input: &str, kind: &str) -> Result<Map<String, Value>> {
    match parse_yaml(input).map_err(|e| Error::serialization_for_kind(kind, e.to_string()))? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(Error::serialization_for_kind(
            kind,
            format!("expected a mapping at the top level, got {}", value_kind(&other)),
        )),
    }
}

/// Human readable name of a JSON value's type, used in error messages
pub fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}

/// Emit values as a multi-document YAML stream, one `---` document each.
pub fn emit_yaml_documents(values: &[Value]) -> Result<String> {
    let mut out = String::new();
    for value in values {
        let mut doc = String::new();
        YamlEmitter::new(&mut doc)
            .dump(&json_to_yaml(value))
            .map_err(|e| Error::serialization(e.to_string()))?;
        out.push_str(&doc);
        out.push('\n');
    }
    Ok(out)
}

fn json_to_yaml(value: &Value) -> Yaml {
    match value {
        Value::Null => Yaml::Null,
        Value::Bool(b) => Yaml::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Yaml::Integer(i),
            None => Yaml::Real(n.to_string()),
        },
        Value::String(s) => Yaml::String(s.clone()),
        Value::Array(items) => Yaml::Array(items.iter().map(json_to_yaml).collect()),
        Value::Object(map) => {
            let mut hash = Hash::new();
            for (k, v) in map {
                hash.insert(Yaml::String(k.clone()), json_to_yaml(v));
            }
            Yaml::Hash(hash)
        }
    }
}

fn yaml_to_json(yaml: Yaml) -> Result<Value> {
    match yaml {
        Yaml::Null => Ok(Value::Null),
        Yaml::Boolean(b) => Ok(Value::Bool(b)),
        Yaml::Integer(i) => Ok(Value::Number(i.into())),
        Yaml::Real(s) => {
            let f: f64 = s
                .parse()
                .map_err(|e: std::num::ParseFloatError| Error::serialization(e.to_string()))?;
            // NaN and infinities have no JSON form; keep the literal text
            Ok(Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::String(s)))
        }
        Yaml::String(s) => Ok(Value::String(s)),
        Yaml::Array(arr) => arr
            .into_iter()
            .map(yaml_to_json)
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Yaml::Hash(map) => map
            .into_iter()
            .map(|(k, v)| {
                let key = match k {
                    Yaml::String(s) => s,
                    Yaml::Integer(i) => i.to_string(),
                    Yaml::Real(r) => r,
                    Yaml::Boolean(b) => b.to_string(),
                    Yaml::Null => "null".to_string(),
                    _ => return Err(Error::serialization("unsupported YAML key type")),
                };
                yaml_to_json(v).map(|v| (key, v))
            })
            .collect::<Result<Map<String, Value>>>()
            .map(Value::Object),
        Yaml::Alias(_) => Err(Error::serialization("unresolved YAML alias")),
        Yaml::BadValue => Err(Error::serialization("bad YAML value")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yaml_compose_fragment() {
        let yaml = r#"
services:
  web:
    image: nginx:1.27
    ports:
      - "8080:80"
"#;
        let result = parse_yaml(yaml).unwrap();
        assert_eq!(result["services"]["web"]["image"], "nginx:1.27");
        assert_eq!(result["services"]["web"]["ports"][0], "8080:80");
    }

    #[test]
    fn test_parse_yaml_scalars() {
        let result = parse_yaml("a: 1\nb: true\nc: 1.5\nd: ~").unwrap();
        assert_eq!(result["a"], 1);
        assert_eq!(result["b"], true);
        assert_eq!(result["c"], 1.5);
        assert_eq!(result["d"], Value::Null);
    }

    #[test]
    fn test_parse_yaml_anchors_are_resolved() {
        let yaml = r#"
base: &img nginx
services:
  web:
    image: *img
"#;
        let result = parse_yaml(yaml).unwrap();
        assert_eq!(result["services"]["web"]["image"], "nginx");
    }

    #[test]
    fn test_parse_yaml_empty() {
        assert_eq!(parse_yaml("").unwrap(), Value::Null);
        assert!(parse_yaml_mapping("", "compose").unwrap().is_empty());
    }

    #[test]
    fn test_parse_yaml_invalid() {
        assert!(parse_yaml("not: valid: yaml: {{").is_err());
    }

    #[test]
    fn test_parse_yaml_mapping_rejects_lists() {
        let err = parse_yaml_mapping("- a\n- b", "compose").unwrap_err();
        assert!(err.to_string().contains("expected a mapping"));
        assert!(err.to_string().contains("list"));
    }

    #[test]
    fn test_emit_documents_round_trip() {
        let values = vec![
            serde_json::json!({"kind": "Namespace", "metadata": {"name": "ns"}}),
            serde_json::json!({"kind": "Secret", "data": {"flag": "true"}, "replicas": 1}),
        ];
        let out = emit_yaml_documents(&values).unwrap();
        assert_eq!(out.matches("---").count(), 2);
        let docs = YamlLoader::load_from_str(&out).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1]["data"]["flag"].as_str(), Some("true"));
        assert_eq!(docs[1]["replicas"].as_i64(), Some(1));
    }

    #[test]
    fn test_integer_keys_become_strings() {
        let result = parse_yaml("80: http").unwrap();
        assert_eq!(result["80"], "http");
    }
}
