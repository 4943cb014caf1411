use crate::error::{Result, SiteDbError};
use crate::schema::{
    DerivedKind, FieldDefinition, FieldKind, ModelDefinition, ModelSet, ScalarKind,
};
use serde::Serialize;
use std::collections::BTreeMap;

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    Integer,
    Boolean,
    DateTime,
}

impl ColumnType {
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::Integer => "INTEGER",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::DateTime => "DATETIME",
        }
    }
}

impl From<ScalarKind> for ColumnType {
    fn from(kind: ScalarKind) -> Self {
        match kind {
            ScalarKind::String | ScalarKind::Text | ScalarKind::Content => ColumnType::Text,
            ScalarKind::Integer => ColumnType::Integer,
            ScalarKind::Boolean => ColumnType::Boolean,
            ScalarKind::DateTime => ColumnType::DateTime,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub primary_key: bool,
    /// Target table for foreign-key columns (always its `pk`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub references: Option<String>,
}

/// How a relationship is navigated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "via", rename_all = "snake_case")]
pub enum RelationBinding {
    /// Many-to-one: `column` on this table holds the target's pk.
    ForeignKey { column: String },
    /// One-to-many: `column` on the target table holds this row's pk.
    Reverse { column: String },
    /// Many-to-many through an association table.
    Association {
        table: String,
        local_column: String,
        remote_column: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Relationship {
    pub name: String,
    pub target: String,
    #[serde(flatten)]
    pub binding: RelationBinding,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub back_populates: Option<String>,
    /// Contributed by another model's back-populates declaration.
    pub derived: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub relationships: Vec<Relationship>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_field: Option<String>,
    /// The model's declared fields, in declaration order.
    #[serde(skip)]
    pub fields: Vec<FieldDefinition>,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn relationship(&self, name: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Tables this table's foreign keys point at, self excluded.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .filter_map(|c| c.references.as_deref())
            .filter(move |t| *t != self.name)
    }

    pub fn create_sql(&self) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let mut def = format!("{} {}", quote_ident(&c.name), c.column_type.sql_type());
                if c.primary_key {
                    def.push_str(" PRIMARY KEY NOT NULL");
                }
                if let Some(target) = &c.references {
                    def.push_str(&format!(" REFERENCES {}(\"pk\")", quote_ident(target)));
                }
                def
            })
            .collect();
        format!(
            "CREATE TABLE {} (\n    {}\n);",
            quote_ident(&self.name),
            columns.join(",\n    ")
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssociationSide {
    pub model: String,
    pub column: String,
}

/// A junction table for one many-to-many relation between two models.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssociationTable {
    pub name: String,
    pub left: AssociationSide,
    pub right: AssociationSide,
    /// `(model, field)` pairs bound to this table.
    pub endpoints: Vec<(String, String)>,
}

impl AssociationTable {
    pub fn create_sql(&self) -> String {
        let left = quote_ident(&self.left.column);
        let right = quote_ident(&self.right.column);
        format!(
            "CREATE TABLE {name} (\n    {left} TEXT NOT NULL REFERENCES {lm}(\"pk\"),\n    {right} TEXT NOT NULL REFERENCES {rm}(\"pk\"),\n    PRIMARY KEY ({left}, {right})\n);",
            name = quote_ident(&self.name),
            lm = quote_ident(&self.left.model),
            rm = quote_ident(&self.right.model),
        )
    }
}

/// Canonical association table name for an unordered pair of models.
pub fn association_table_name(a: &str, b: &str) -> String {
    let (first, second) = canonical_pair(a, b);
    format!("{}_{}", first.to_lowercase(), second.to_lowercase())
}

fn canonical_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// The compiled relational schema: one table per model plus the shared
/// association tables. Owns everything the loader and query engine look up.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Schema {
    tables: BTreeMap<String, Table>,
    associations: BTreeMap<String, AssociationTable>,
}

impl Schema {
    /// Compile every model of a resolved set.
    pub fn compile(models: &ModelSet) -> Result<Self> {
        let mut schema = Schema::default();
        for model in models.iter() {
            let table = schema.compile_table(model, models)?;
            schema.tables.insert(table.name.clone(), table);
        }

        // Table names are case-insensitive in SQLite.
        for association in schema.associations.values() {
            if let Some(model) = schema
                .tables
                .keys()
                .find(|m| m.eq_ignore_ascii_case(&association.name))
            {
                let (owner, field) = association
                    .endpoints
                    .first()
                    .cloned()
                    .unwrap_or_else(|| (association.left.model.clone(), String::new()));
                return Err(SiteDbError::field_type(
                    owner,
                    field,
                    format!(
                        "association table '{}' collides with model {model}",
                        association.name
                    ),
                ));
            }
        }

        log::debug!(
            "Compiled {} table(s) and {} association table(s)",
            schema.tables.len(),
            schema.associations.len()
        );
        Ok(schema)
    }

    /// Turn one model into a table definition, creating or reusing the
    /// association tables its many-to-many relations need.
    pub fn compile_table(&mut self, model: &ModelDefinition, models: &ModelSet) -> Result<Table> {
        log::debug!("Generating table: {}", model.name);
        let mut table = Table {
            name: model.name.clone(),
            columns: vec![Column {
                name: "pk".to_string(),
                column_type: ColumnType::Text,
                primary_key: true,
                references: None,
            }],
            relationships: Vec::new(),
            content_field: model.content_field().map(str::to_string),
            fields: model.fields.clone(),
        };

        for field in &model.fields {
            if let Some(target) = field.kind.target() {
                if !models.contains(target) {
                    return Err(SiteDbError::field_type(
                        &model.name,
                        &field.name,
                        format!("unsupported field type '{target}' (not a known model)"),
                    ));
                }
            }

            match &field.kind {
                FieldKind::Scalar(kind) => {
                    table.columns.push(Column {
                        name: field.name.clone(),
                        column_type: ColumnType::from(*kind),
                        primary_key: false,
                        references: None,
                    });
                }
                FieldKind::ForeignKey(target) => {
                    let column = format!("{}_id", field.name);
                    table.columns.push(Column {
                        name: column.clone(),
                        column_type: ColumnType::Text,
                        primary_key: false,
                        references: Some(target.clone()),
                    });
                    table.relationships.push(Relationship {
                        name: field.name.clone(),
                        target: target.clone(),
                        binding: RelationBinding::ForeignKey { column },
                        back_populates: field.back_populates.clone(),
                        derived: false,
                    });
                }
                FieldKind::ManyToMany(target) => {
                    let partner = m2m_partner(models, model, &field.name);
                    let owner = is_owner(models, &field.name, partner.as_ref());
                    let binding = self.bind_association(
                        &model.name,
                        &field.name,
                        target,
                        partner,
                        owner,
                    )?;
                    log::debug!(
                        "Creating many-to-many field {}.{} -> {} ({:?})",
                        model.name,
                        field.name,
                        target,
                        binding
                    );
                    table.relationships.push(Relationship {
                        name: field.name.clone(),
                        target: target.clone(),
                        binding,
                        back_populates: field.back_populates.clone(),
                        derived: false,
                    });
                }
            }
        }

        for relation in &model.derived {
            let binding = match relation.kind {
                DerivedKind::OneToMany => RelationBinding::Reverse {
                    column: format!("{}_id", relation.source_field),
                },
                DerivedKind::ManyToMany => self.bind_association(
                    &model.name,
                    &relation.name,
                    &relation.source_model,
                    Some((relation.source_model.clone(), relation.source_field.clone())),
                    false,
                )?,
            };
            log::debug!(
                "Creating additional relationship {}.{} -> {}",
                model.name,
                relation.name,
                relation.source_model
            );
            table.relationships.push(Relationship {
                name: relation.name.clone(),
                target: relation.source_model.clone(),
                binding,
                back_populates: Some(relation.source_field.clone()),
                derived: true,
            });
        }

        Ok(table)
    }

    /// Fetch the association table for `{a, b}`, creating it on first use.
    /// The same table serves both directions of a relation.
    pub fn get_or_create_association_table(&mut self, a: &str, b: &str) -> &mut AssociationTable {
        let name = association_table_name(a, b);
        self.associations.entry(name.clone()).or_insert_with(|| {
            log::debug!("Creating many-to-many association table: {name}");
            let (first, second) = canonical_pair(a, b);
            let left_column = format!("{}_pk", first.to_lowercase());
            let right_column = if first == second {
                format!("{}_related_pk", second.to_lowercase())
            } else {
                format!("{}_pk", second.to_lowercase())
            };
            AssociationTable {
                name,
                left: AssociationSide {
                    model: first.to_string(),
                    column: left_column,
                },
                right: AssociationSide {
                    model: second.to_string(),
                    column: right_column,
                },
                endpoints: Vec::new(),
            }
        })
    }

    fn bind_association(
        &mut self,
        model: &str,
        field: &str,
        target: &str,
        partner: Option<(String, String)>,
        owner: bool,
    ) -> Result<RelationBinding> {
        let association = self.get_or_create_association_table(model, target);
        let (first, second) = canonical_pair(model, target);
        if association.left.model != first || association.right.model != second {
            return Err(SiteDbError::field_type(
                model,
                field,
                format!(
                    "association table '{}' is already used by {} and {}",
                    association.name, association.left.model, association.right.model
                ),
            ));
        }

        let endpoint = (model.to_string(), field.to_string());
        let conflict = association
            .endpoints
            .iter()
            .find(|e| **e != endpoint && Some(*e) != partner.as_ref());
        if let Some((other_model, other_field)) = conflict {
            return Err(SiteDbError::field_type(
                model,
                field,
                format!(
                    "{model} and {target} already share a many-to-many relation through {other_model}.{other_field}; \
                     link the two fields with '->' or remove one"
                ),
            ));
        }
        association.endpoints.push(endpoint);

        let (local_column, remote_column) = if association.left.model == association.right.model {
            if owner {
                (association.left.column.clone(), association.right.column.clone())
            } else {
                (association.right.column.clone(), association.left.column.clone())
            }
        } else if association.left.model == model {
            (association.left.column.clone(), association.right.column.clone())
        } else {
            (association.right.column.clone(), association.left.column.clone())
        };

        Ok(RelationBinding::Association {
            table: association.name.clone(),
            local_column,
            remote_column,
        })
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    pub fn association(&self, name: &str) -> Option<&AssociationTable> {
        self.associations.get(name)
    }

    pub fn associations(&self) -> impl Iterator<Item = &AssociationTable> {
        self.associations.values()
    }

    /// DDL for every table; model tables first, then association tables.
    pub fn create_statements(&self) -> Vec<String> {
        self.tables
            .values()
            .map(Table::create_sql)
            .chain(self.associations.values().map(AssociationTable::create_sql))
            .collect()
    }
}

/// The other end of a declared many-to-many field, if the relation is
/// declared (or derived) on both sides.
fn m2m_partner(models: &ModelSet, model: &ModelDefinition, field: &str) -> Option<(String, String)> {
    let declared = model.field(field)?;
    let FieldKind::ManyToMany(target) = &declared.kind else {
        return None;
    };
    if let Some(back) = &declared.back_populates {
        return Some((target.clone(), back.clone()));
    }
    // The target may name us from its side.
    models.get(target).and_then(|t| {
        t.fields
            .iter()
            .find(|f| {
                f.kind == FieldKind::ManyToMany(model.name.clone())
                    && f.back_populates.as_deref() == Some(field)
            })
            .map(|f| (t.name.clone(), f.name.clone()))
    })
}

/// For self-referencing relations, decides which association column is
/// "ours": a declared field owns the left column unless its partner is
/// also declared and sorts first.
fn is_owner(models: &ModelSet, field: &str, partner: Option<&(String, String)>) -> bool {
    match partner {
        Some((model, other)) => {
            let declared = models.get(model).and_then(|m| m.field(other)).is_some();
            !declared || field <= other.as_str()
        }
        None => true,
    }
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
