use super::types::{FieldDefinition, FieldKind, ScalarKind};
use crate::error::{Result, SiteDbError};
use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::OnceLock;

/// `<BaseType>` `[]`? (`->` `<backPopulatesName>`)?
fn type_expression() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*(\[\s*\])?\s*(?:->\s*([A-Za-z_][A-Za-z0-9_-]*))?\s*$")
            .expect("type expression pattern is valid")
    })
}

fn identifier() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid"))
}

/// Whether `name` can be used as a model, field or column name.
pub fn is_identifier(name: &str) -> bool {
    identifier().is_match(name)
}

/// Dashes in field names and record keys are read as underscores.
pub fn underscore(name: &str) -> String {
    name.replace('-', "_")
}

/// Build a field from its compact type expression, e.g. `String`,
/// `Person -> posts` or `Tag[] -> posts`.
pub fn parse_field_type(
    model: &str,
    field: &str,
    expression: &str,
    model_names: &BTreeSet<String>,
) -> Result<FieldDefinition> {
    let caps = type_expression().captures(expression).ok_or_else(|| {
        SiteDbError::field_type(
            model,
            field,
            format!("malformed type expression '{expression}'"),
        )
    })?;

    let base = &caps[1];
    let to_many = caps.get(2).is_some();
    let back_populates = caps.get(3).map(|m| underscore(m.as_str()));

    if let Some(kind) = ScalarKind::from_name(base) {
        if to_many || back_populates.is_some() {
            return Err(SiteDbError::field_type(
                model,
                field,
                format!("primitive type {base} cannot be a relation ('{expression}')"),
            ));
        }
        return Ok(FieldDefinition {
            name: field.to_string(),
            kind: FieldKind::Scalar(kind),
            back_populates: None,
        });
    }

    if !model_names.contains(base) {
        return Err(SiteDbError::field_type(
            model,
            field,
            format!("unsupported field type '{base}' (not a primitive or a known model)"),
        ));
    }

    let kind = if to_many {
        FieldKind::ManyToMany(base.to_string())
    } else {
        FieldKind::ForeignKey(base.to_string())
    };

    Ok(FieldDefinition {
        name: field.to_string(),
        kind,
        back_populates,
    })
}

/// Parse a model file into its ordered `(field, type expression)` pairs.
pub fn parse_model(path: &Path) -> Result<Vec<(String, String)>> {
    let content = std::fs::read_to_string(path)?;
    let model = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    parse_model_str(model, &content)
}

/// Parse model YAML (a mapping of field name to type expression),
/// keeping declaration order.
pub fn parse_model_str(model: &str, content: &str) -> Result<Vec<(String, String)>> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    let value: serde_yaml::Value = serde_yaml::from_str(content)?;
    let mapping = match value {
        serde_yaml::Value::Mapping(m) => m,
        serde_yaml::Value::Null => return Ok(Vec::new()),
        _ => {
            return Err(SiteDbError::Other(format!(
                "Model {model} must be a mapping of field names to types"
            )))
        }
    };

    let mut fields = Vec::with_capacity(mapping.len());
    for (key, value) in mapping {
        let name = match key {
            serde_yaml::Value::String(s) => s,
            other => {
                return Err(SiteDbError::field_type(
                    model,
                    format!("{other:?}"),
                    "field names must be strings",
                ))
            }
        };
        let expression = match value {
            serde_yaml::Value::String(s) => s,
            _ => {
                return Err(SiteDbError::field_type(
                    model,
                    &name,
                    "type expression must be a string",
                ))
            }
        };
        fields.push((name, expression));
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_primitive() {
        let field = parse_field_type("Post", "title", "String", &names(&["Post"])).unwrap();
        assert_eq!(field.kind, FieldKind::Scalar(ScalarKind::String));
        assert_eq!(field.back_populates, None);
    }

    #[test]
    fn test_parse_foreign_key_with_back_populates() {
        let field =
            parse_field_type("Post", "author", "Person -> posts", &names(&["Post", "Person"]))
                .unwrap();
        assert_eq!(field.kind, FieldKind::ForeignKey("Person".into()));
        assert_eq!(field.back_populates.as_deref(), Some("posts"));
    }

    #[test]
    fn test_parse_many_to_many() {
        let field =
            parse_field_type("Tag", "widget_field", "Widget[] -> posts", &names(&["Tag", "Widget"]))
                .unwrap();
        assert_eq!(field.kind, FieldKind::ManyToMany("Widget".into()));
        assert_eq!(field.back_populates.as_deref(), Some("posts"));

        let bare = parse_field_type("Tag", "w", "Widget []", &names(&["Tag", "Widget"])).unwrap();
        assert_eq!(bare.kind, FieldKind::ManyToMany("Widget".into()));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let err = parse_field_type("Post", "author", "Persn", &names(&["Post", "Person"]))
            .unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, SiteDbError::InvalidFieldType { .. }));
        assert!(msg.contains("Post.author"), "{msg}");
        assert!(msg.contains("Persn"), "{msg}");
    }

    #[test]
    fn test_primitive_relation_is_rejected() {
        assert!(parse_field_type("Post", "tags", "String[]", &names(&["Post"])).is_err());
        assert!(parse_field_type("Post", "tags", "String -> x", &names(&["Post"])).is_err());
    }

    #[test]
    fn test_malformed_expression() {
        let err = parse_field_type("Post", "x", "Person ->", &names(&["Person"])).unwrap_err();
        assert!(err.to_string().contains("malformed"));
    }

    #[test]
    fn test_parse_model_keeps_order() {
        let fields = parse_model_str(
            "Post",
            "title: String\npublished: DateTime\nauthor: Person -> posts\nbody: Content\n",
        )
        .unwrap();
        let order: Vec<&str> = fields.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(order, vec!["title", "published", "author", "body"]);
    }

    #[test]
    fn test_parse_model_rejects_non_string_type() {
        assert!(parse_model_str("Post", "title: 3\n").is_err());
        assert!(parse_model_str("Post", "- a\n- b\n").is_err());
    }
}
