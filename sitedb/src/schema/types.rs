use serde::Serialize;

/// Primitive field kinds a model may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ScalarKind {
    String,
    Text,
    Integer,
    Boolean,
    DateTime,
    Content,
}

impl ScalarKind {
    pub const ALL: [ScalarKind; 6] = [
        ScalarKind::String,
        ScalarKind::Text,
        ScalarKind::Integer,
        ScalarKind::Boolean,
        ScalarKind::DateTime,
        ScalarKind::Content,
    ];

    /// Look up a primitive kind by the name used in type expressions.
    pub fn from_name(name: &str) -> Option<Self> {
        ScalarKind::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScalarKind::String => "String",
            ScalarKind::Text => "Text",
            ScalarKind::Integer => "Integer",
            ScalarKind::Boolean => "Boolean",
            ScalarKind::DateTime => "DateTime",
            ScalarKind::Content => "Content",
        }
    }
}

/// The semantic type of a declared field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Scalar(ScalarKind),
    ForeignKey(String),
    ManyToMany(String),
}

impl FieldKind {
    /// The referenced model name, for relation kinds.
    pub fn target(&self) -> Option<&str> {
        match self {
            FieldKind::Scalar(_) => None,
            FieldKind::ForeignKey(target) | FieldKind::ManyToMany(target) => Some(target),
        }
    }
}

/// A field as declared in a model file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDefinition {
    pub name: String,
    #[serde(flatten)]
    pub kind: FieldKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub back_populates: Option<String>,
}

/// Kind of a relationship contributed to a model by another model's
/// back-populates declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedKind {
    /// Inverse of a foreign key: every source row pointing at this row.
    OneToMany,
    /// Inverse of a many-to-many field, sharing its association table.
    ManyToMany,
}

/// A relationship that exists on a model only because another model
/// declared `-> name` on a field pointing at it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DerivedRelation {
    pub name: String,
    pub kind: DerivedKind,
    /// Model that declared the forward field.
    pub source_model: String,
    /// The forward field on `source_model`.
    pub source_field: String,
}

/// A model with its declared fields and, once resolved, its derived
/// relationships.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelDefinition {
    pub name: String,
    pub fields: Vec<FieldDefinition>,
    pub derived: Vec<DerivedRelation>,
}

impl ModelDefinition {
    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn derived_relation(&self, name: &str) -> Option<&DerivedRelation> {
        self.derived.iter().find(|r| r.name == name)
    }

    /// Name of the Content field whose value comes from the record body.
    pub fn content_field(&self) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.kind == FieldKind::Scalar(ScalarKind::Content))
            .map(|f| f.name.as_str())
    }

    /// Whether `name` is taken by a declared field or a derived relation.
    pub fn has_member(&self, name: &str) -> bool {
        self.field(name).is_some() || self.derived_relation(name).is_some()
    }

    /// Models this model points at through foreign keys.
    pub fn foreign_key_targets(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().filter_map(|f| match &f.kind {
            FieldKind::ForeignKey(target) => Some(target.as_str()),
            _ => None,
        })
    }
}
