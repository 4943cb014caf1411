use super::parser::{is_identifier, parse_field_type, underscore};
use super::types::{DerivedKind, DerivedRelation, FieldKind, ModelDefinition, ScalarKind};
use crate::error::{Result, SiteDbError};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Collects model declarations. Every model name must be announced up
/// front so that relation types can be checked while fields are parsed.
#[derive(Debug)]
pub struct ModelRegistry {
    names: BTreeSet<String>,
    models: BTreeMap<String, ModelDefinition>,
}

impl ModelRegistry {
    pub fn new<I, S>(model_names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut names: BTreeSet<String> = BTreeSet::new();
        for name in model_names {
            let name = name.into();
            if !is_identifier(&name) {
                return Err(SiteDbError::Other(format!(
                    "Invalid model name '{name}': model names must be identifiers"
                )));
            }
            // Model names become table names, which SQLite compares
            // case-insensitively.
            if let Some(other) = names.iter().find(|n| n.eq_ignore_ascii_case(&name)) {
                return Err(SiteDbError::Other(format!(
                    "Model names '{other}' and '{name}' differ only in case"
                )));
            }
            names.insert(name);
        }
        Ok(ModelRegistry {
            names,
            models: BTreeMap::new(),
        })
    }

    pub fn model_names(&self) -> &BTreeSet<String> {
        &self.names
    }

    /// Store a model's declared fields, built from `(name, type expression)`
    /// pairs in declaration order.
    pub fn register_model(&mut self, name: &str, fields: &[(String, String)]) -> Result<()> {
        if !self.names.contains(name) {
            return Err(SiteDbError::UnknownModel(name.to_string()));
        }
        if self.models.contains_key(name) {
            return Err(SiteDbError::Other(format!(
                "Model {name} is registered more than once"
            )));
        }

        let mut model = ModelDefinition {
            name: name.to_string(),
            fields: Vec::with_capacity(fields.len()),
            derived: Vec::new(),
        };

        for (raw_name, expression) in fields {
            let field_name = underscore(raw_name);
            if !is_identifier(&field_name) {
                return Err(SiteDbError::field_type(
                    name,
                    raw_name,
                    "field names must be identifiers",
                ));
            }
            if field_name == "pk" {
                return Err(SiteDbError::field_type(
                    name,
                    &field_name,
                    "'pk' is reserved for the primary key",
                ));
            }
            if model.field(&field_name).is_some() {
                return Err(SiteDbError::field_type(
                    name,
                    &field_name,
                    "field is declared more than once",
                ));
            }

            let field = parse_field_type(name, &field_name, expression, &self.names)?;
            if field.kind == FieldKind::Scalar(ScalarKind::Content) {
                if let Some(existing) = model.content_field() {
                    return Err(SiteDbError::field_type(
                        name,
                        &field_name,
                        format!("model already has a Content field '{existing}'"),
                    ));
                }
            }
            model.fields.push(field);
        }

        check_column_collisions(&model)?;

        log::debug!("Registered model {name} with {} field(s)", model.fields.len());
        self.models.insert(name.to_string(), model);
        Ok(())
    }

    /// Add the inverse side of every back-populated relation onto its
    /// target model. Consumes the registry: the returned set is final.
    pub fn resolve_back_references(self) -> Result<ModelSet> {
        let ModelRegistry { names, mut models } = self;

        if let Some(missing) = names.iter().find(|n| !models.contains_key(*n)) {
            return Err(SiteDbError::Other(format!(
                "Model {missing} was announced but never registered"
            )));
        }

        let mut additions: Vec<(String, DerivedRelation)> = Vec::new();
        for model in models.values() {
            log::debug!("Finding back-references for model: {}", model.name);
            for field in &model.fields {
                let (target, kind) = match &field.kind {
                    FieldKind::Scalar(_) => continue,
                    FieldKind::ForeignKey(t) => (t, DerivedKind::OneToMany),
                    FieldKind::ManyToMany(t) => (t, DerivedKind::ManyToMany),
                };
                let Some(back) = &field.back_populates else {
                    continue;
                };

                let target_model = &models[target];
                if let Some(existing) = target_model.field(back) {
                    let reciprocal = kind == DerivedKind::ManyToMany
                        && existing.kind == FieldKind::ManyToMany(model.name.clone())
                        && existing
                            .back_populates
                            .as_ref()
                            .map_or(true, |b| *b == field.name);
                    if reciprocal {
                        continue;
                    }
                    return Err(SiteDbError::field_type(
                        target,
                        back,
                        format!(
                            "back-populates name from {}.{} clashes with a declared field",
                            model.name, field.name
                        ),
                    ));
                }

                additions.push((
                    target.clone(),
                    DerivedRelation {
                        name: back.clone(),
                        kind,
                        source_model: model.name.clone(),
                        source_field: field.name.clone(),
                    },
                ));
            }
        }

        for (target, relation) in additions {
            let target_model = models
                .get_mut(&target)
                .ok_or_else(|| SiteDbError::UnknownModel(target.clone()))?;
            if let Some(existing) = target_model.derived_relation(&relation.name) {
                return Err(SiteDbError::field_type(
                    &target,
                    &relation.name,
                    format!(
                        "back-populated by both {}.{} and {}.{}",
                        existing.source_model,
                        existing.source_field,
                        relation.source_model,
                        relation.source_field
                    ),
                ));
            }
            log::debug!(
                "Adding relationship {}.{} <- {}.{} ({:?})",
                target,
                relation.name,
                relation.source_model,
                relation.source_field,
                relation.kind
            );
            target_model.derived.push(relation);
        }

        for model in models.values() {
            check_column_collisions(model)?;
        }

        Ok(ModelSet { models })
    }
}

/// A scalar named `author_id` would shadow the column of foreign key
/// `author`, and a derived relation may not share a column's name.
fn check_column_collisions(model: &ModelDefinition) -> Result<()> {
    for field in &model.fields {
        if let FieldKind::ForeignKey(_) = field.kind {
            let column = format!("{}_id", field.name);
            if model.has_member(&column) {
                return Err(SiteDbError::field_type(
                    &model.name,
                    &column,
                    format!("name collides with the foreign key column of '{}'", field.name),
                ));
            }
        }
    }
    Ok(())
}

/// The complete, resolved model set. Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct ModelSet {
    models: BTreeMap<String, ModelDefinition>,
}

impl ModelSet {
    pub fn get(&self, name: &str) -> Option<&ModelDefinition> {
        self.models.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    /// Models in name order.
    pub fn iter(&self) -> impl Iterator<Item = &ModelDefinition> {
        self.models.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
