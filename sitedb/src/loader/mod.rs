// Content loader - reads per-model content into the database

mod order;

pub use order::load_order;

use crate::compiler::{RelationBinding, Schema, Table};
use crate::convert::{convert_key, convert_scalar, type_name};
use crate::db::{Database, LinkRow};
use crate::document::{list_files, read_document, DOCUMENT_EXTENSIONS};
use crate::error::{Result, SiteDbError};
use crate::schema::{underscore, FieldKind, ScalarKind};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

/// Names of the aggregate file that switches a model to collection mode.
pub const COLLECTION_FILES: [&str; 2] = ["_all.yml", "_all.yaml"];

/// What to do with a reference whose target row does not exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferencePolicy {
    /// Fail the load with `DanglingReference`.
    #[default]
    Strict,
    /// Keep foreign keys as written, drop missing many-to-many keys, warn.
    Lenient,
}

/// Where a raw record came from; used in every load error.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordSource {
    File(PathBuf),
    CollectionEntry { path: PathBuf, index: usize },
    /// Records handed over directly rather than read from disk.
    Inline { model: String, index: usize },
}

impl fmt::Display for RecordSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordSource::File(path) => write!(f, "{}", path.display()),
            RecordSource::CollectionEntry { path, index } => {
                write!(f, "{}[{index}]", path.display())
            }
            RecordSource::Inline { model, index } => write!(f, "{model}[{index}]"),
        }
    }
}

/// One record before resolution: its key, raw attributes and body text.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub pk: String,
    pub data: serde_yaml::Mapping,
    pub body: Option<String>,
    pub source: RecordSource,
}

impl RawRecord {
    /// Build a record from attributes that may carry an explicit `pk`,
    /// falling back to `default_pk`.
    pub fn new(
        model: &str,
        default_pk: Option<String>,
        data: serde_yaml::Mapping,
        body: Option<String>,
        source: RecordSource,
    ) -> Result<Self> {
        let pk = match data.get("pk") {
            Some(value) if !value.is_null() => {
                convert_key(value).map_err(|reason| SiteDbError::InvalidFieldValue {
                    model: model.to_string(),
                    field: "pk".to_string(),
                    record: source.to_string(),
                    reason,
                })?
            }
            _ => default_pk.ok_or_else(|| SiteDbError::InvalidModelCollectionData {
                model: model.to_string(),
                path: source.to_string(),
                reason: "record has no 'pk'".to_string(),
            })?,
        };
        Ok(RawRecord {
            pk,
            data,
            body,
            source,
        })
    }
}

/// Summary of a completed load.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadReport {
    pub order: Vec<String>,
    /// Rows inserted per model.
    pub counts: BTreeMap<String, usize>,
}

/// A reference whose target table was not loaded yet when its record was
/// inserted.
#[derive(Debug, Clone)]
struct PendingReference {
    model: String,
    field: String,
    record: String,
    target: String,
    key: String,
    link: Option<LinkRow>,
}

/// Populates the tables of a compiled schema, one model at a time.
pub struct ContentLoader<'a> {
    schema: &'a Schema,
    db: &'a Database,
    policy: ReferencePolicy,
    loaded: HashSet<String>,
    pending: Vec<PendingReference>,
    counts: BTreeMap<String, usize>,
}

impl<'a> ContentLoader<'a> {
    pub fn new(schema: &'a Schema, db: &'a Database, policy: ReferencePolicy) -> Self {
        ContentLoader {
            schema,
            db,
            policy,
            loaded: HashSet::new(),
            pending: Vec::new(),
            counts: BTreeMap::new(),
        }
    }

    /// Load every model that has a `<content_root>/<Model>/` directory, in
    /// dependency order, then verify deferred references.
    pub fn load_all(mut self, content_root: &Path) -> Result<LoadReport> {
        let order = load_order(self.schema);
        log::info!("Loading content from {} ({} models)", content_root.display(), order.len());

        for model in &order {
            let dir = content_root.join(model);
            if !dir.is_dir() {
                log::debug!("No content directory for {model}");
            } else if let Some(file) = collection_file(&dir) {
                self.load_collection(model, &file)?;
            } else {
                self.load_from_files(model, &dir)?;
            }
            self.mark_loaded(model);
        }

        let counts = self.finish()?;
        Ok(LoadReport { order, counts })
    }

    /// Load a model from one aggregate file holding a list of mappings,
    /// each with a `pk`.
    pub fn load_collection(&mut self, model: &str, path: &Path) -> Result<usize> {
        log::debug!("Loading {model} from collection {}", path.display());
        let invalid = |reason: String| SiteDbError::InvalidModelCollectionData {
            model: model.to_string(),
            path: path.display().to_string(),
            reason,
        };

        let text = std::fs::read_to_string(path)?;
        if text.trim().is_empty() {
            return self.load_records(model, Vec::new());
        }
        let entries = match serde_yaml::from_str::<serde_yaml::Value>(&text)
            .map_err(|e| invalid(e.to_string()))?
        {
            serde_yaml::Value::Sequence(entries) => entries,
            other => {
                return Err(invalid(format!(
                    "expected a list of records, got {}",
                    type_name(&other)
                )))
            }
        };

        let mut records = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            let source = RecordSource::CollectionEntry {
                path: path.to_path_buf(),
                index,
            };
            let data = match entry {
                serde_yaml::Value::Mapping(data) => data,
                other => {
                    return Err(invalid(format!(
                        "entry {index} is a {}, not a mapping",
                        type_name(&other)
                    )))
                }
            };
            records.push(RawRecord::new(model, None, data, None, source)?);
        }

        self.load_records(model, records)
    }

    /// Load a model from one file per record, in file-name order.
    pub fn load_from_files(&mut self, model: &str, dir: &Path) -> Result<usize> {
        log::debug!("Loading {model} from files in {}", dir.display());
        let mut records = Vec::new();
        for path in record_files(dir)? {
            let doc = read_document(&path)?;
            records.push(RawRecord::new(
                model,
                Some(doc.id),
                doc.data,
                doc.content,
                RecordSource::File(path),
            )?);
        }
        self.load_records(model, records)
    }

    /// Resolve and insert records of one model, in the given order.
    pub fn load_records(&mut self, model: &str, records: Vec<RawRecord>) -> Result<usize> {
        let table = self
            .schema
            .table(model)
            .ok_or_else(|| SiteDbError::UnknownModel(model.to_string()))?;

        let mut inserted = 0;
        for record in records {
            self.insert(table, record)?;
            inserted += 1;
        }
        *self.counts.entry(model.to_string()).or_default() += inserted;
        log::debug!("Loaded {inserted} {model} record(s)");
        Ok(inserted)
    }

    /// Mark a model as completely loaded, so references to it are checked
    /// immediately instead of deferred.
    pub fn mark_loaded(&mut self, model: &str) {
        self.loaded.insert(model.to_string());
    }

    /// Verify references deferred past their target's load and insert the
    /// links waiting on them. Returns rows inserted per model.
    pub fn finish(mut self) -> Result<BTreeMap<String, usize>> {
        let pending = std::mem::take(&mut self.pending);
        if !pending.is_empty() {
            log::debug!("Verifying {} deferred reference(s)", pending.len());
        }
        for reference in pending {
            if self.db.contains(&reference.target, &reference.key)? {
                if let Some(link) = &reference.link {
                    self.db.insert_link(link)?;
                }
            } else {
                self.dangling(&reference)?;
            }
        }
        Ok(self.counts)
    }

    fn insert(&mut self, table: &Table, record: RawRecord) -> Result<()> {
        let model = table.name.as_str();
        let record_name = record.source.to_string();

        if self.db.contains(model, &record.pk)? {
            return Err(SiteDbError::DuplicateModelInstance {
                model: model.to_string(),
                pk: record.pk,
                record: record_name,
            });
        }

        let attributes = self.attributes(table, &record, &record_name)?;

        let mut row = vec![("pk".to_string(), Value::String(record.pk.clone()))];
        let mut links = Vec::new();
        let mut deferred = Vec::new();

        for definition in &table.fields {
            let field = definition.name.as_str();
            let raw = attributes.get(field).copied();
            match &definition.kind {
                FieldKind::Scalar(ScalarKind::Content) => {
                    let value = match (&record.body, raw) {
                        (Some(body), _) => Value::String(body.clone()),
                        (None, Some(raw)) if !raw.is_null() => {
                            self.scalar(model, field, &record_name, ScalarKind::Content, raw)?
                        }
                        _ => Value::String(String::new()),
                    };
                    row.push((field.to_string(), value));
                }
                FieldKind::Scalar(kind) => {
                    let value = match raw {
                        Some(raw) => self.scalar(model, field, &record_name, *kind, raw)?,
                        None => Value::Null,
                    };
                    row.push((field.to_string(), value));
                }
                FieldKind::ForeignKey(target) => {
                    let value = match raw {
                        Some(raw) if !raw.is_null() => {
                            let key = self.key(model, field, &record_name, raw)?;
                            let reference = PendingReference {
                                model: model.to_string(),
                                field: field.to_string(),
                                record: record_name.clone(),
                                target: target.clone(),
                                key: key.clone(),
                                link: None,
                            };
                            self.check_reference(reference, &mut links, &mut deferred)?;
                            Value::String(key)
                        }
                        _ => Value::Null,
                    };
                    row.push((format!("{field}_id"), value));
                }
                FieldKind::ManyToMany(target) => {
                    let keys = match raw {
                        None => Vec::new(),
                        Some(serde_yaml::Value::Null) => Vec::new(),
                        Some(serde_yaml::Value::Sequence(items)) => items
                            .iter()
                            .map(|item| self.key(model, field, &record_name, item))
                            .collect::<Result<Vec<_>>>()?,
                        Some(other) => {
                            return Err(SiteDbError::field_type(
                                model,
                                field,
                                format!(
                                    "expected a list of {target} keys in {record_name}, got {}",
                                    type_name(other)
                                ),
                            ))
                        }
                    };
                    let binding = table.relationship(field).map(|r| &r.binding);
                    let Some(RelationBinding::Association {
                        table: link_table,
                        local_column,
                        remote_column,
                    }) = binding
                    else {
                        return Err(SiteDbError::field_type(
                            model,
                            field,
                            "many-to-many field has no association table",
                        ));
                    };
                    for key in keys {
                        let reference = PendingReference {
                            model: model.to_string(),
                            field: field.to_string(),
                            record: record_name.clone(),
                            target: target.clone(),
                            key: key.clone(),
                            link: Some(LinkRow {
                                table: link_table.clone(),
                                local_column: local_column.clone(),
                                remote_column: remote_column.clone(),
                                local_pk: record.pk.clone(),
                                remote_pk: key,
                            }),
                        };
                        self.check_reference(reference, &mut links, &mut deferred)?;
                    }
                }
            }
        }

        self.db.insert_record(table, &row, &links)?;
        self.pending.extend(deferred);
        Ok(())
    }

    /// Raw attributes keyed by normalized field name. Every key must name a
    /// declared field (or be `pk`).
    fn attributes<'r>(
        &self,
        table: &Table,
        record: &'r RawRecord,
        record_name: &str,
    ) -> Result<HashMap<String, &'r serde_yaml::Value>> {
        let mut attributes = HashMap::new();
        for (key, value) in &record.data {
            let key = match key {
                serde_yaml::Value::String(s) => underscore(s),
                other => {
                    return Err(SiteDbError::UnknownField {
                        model: table.name.clone(),
                        field: serde_yaml::to_string(other)
                            .map(|s| s.trim().to_string())
                            .unwrap_or_default(),
                        record: record_name.to_string(),
                    })
                }
            };
            if key == "pk" {
                continue;
            }
            if table.field(&key).is_none() {
                return Err(SiteDbError::UnknownField {
                    model: table.name.clone(),
                    field: key,
                    record: record_name.to_string(),
                });
            }
            if attributes.contains_key(&key) {
                return Err(SiteDbError::InvalidFieldValue {
                    model: table.name.clone(),
                    field: key,
                    record: record_name.to_string(),
                    reason: "field is given more than once".to_string(),
                });
            }
            attributes.insert(key, value);
        }
        Ok(attributes)
    }

    fn scalar(
        &self,
        model: &str,
        field: &str,
        record: &str,
        kind: ScalarKind,
        raw: &serde_yaml::Value,
    ) -> Result<Value> {
        convert_scalar(kind, raw).map_err(|reason| SiteDbError::InvalidFieldValue {
            model: model.to_string(),
            field: field.to_string(),
            record: record.to_string(),
            reason,
        })
    }

    fn key(&self, model: &str, field: &str, record: &str, raw: &serde_yaml::Value) -> Result<String> {
        convert_key(raw).map_err(|reason| SiteDbError::InvalidFieldValue {
            model: model.to_string(),
            field: field.to_string(),
            record: record.to_string(),
            reason,
        })
    }

    /// Check a reference against a loaded target, or defer it until the
    /// target's table is complete.
    fn check_reference(
        &self,
        reference: PendingReference,
        links: &mut Vec<LinkRow>,
        deferred: &mut Vec<PendingReference>,
    ) -> Result<()> {
        if !self.loaded.contains(&reference.target) {
            deferred.push(reference);
            return Ok(());
        }
        if self.db.contains(&reference.target, &reference.key)? {
            links.extend(reference.link);
            return Ok(());
        }
        self.dangling(&reference)
    }

    fn dangling(&self, reference: &PendingReference) -> Result<()> {
        match self.policy {
            ReferencePolicy::Strict => Err(SiteDbError::DanglingReference {
                model: reference.model.clone(),
                field: reference.field.clone(),
                record: reference.record.clone(),
                target: reference.target.clone(),
                key: reference.key.clone(),
            }),
            ReferencePolicy::Lenient => {
                let action = if reference.link.is_some() {
                    "dropping it"
                } else {
                    "keeping it as written"
                };
                log::warn!(
                    "{}.{} in {} refers to missing {} \"{}\"; {}",
                    reference.model,
                    reference.field,
                    reference.record,
                    reference.target,
                    reference.key,
                    action
                );
                Ok(())
            }
        }
    }
}

/// The aggregate file in `dir`, if the model is stored as a collection.
pub fn collection_file(dir: &Path) -> Option<PathBuf> {
    COLLECTION_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

/// Record files directly inside `dir`, sorted by name. Hidden files are
/// skipped.
pub fn record_files(dir: &Path) -> Result<Vec<PathBuf>> {
    list_files(dir, &DOCUMENT_EXTENSIONS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ModelRegistry;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn schema(models: &[(&str, &[(&str, &str)])]) -> Schema {
        let mut registry = ModelRegistry::new(models.iter().map(|(n, _)| *n)).unwrap();
        for (name, fields) in models {
            let fields: Vec<(String, String)> = fields
                .iter()
                .map(|(f, t)| (f.to_string(), t.to_string()))
                .collect();
            registry.register_model(name, &fields).unwrap();
        }
        Schema::compile(&registry.resolve_back_references().unwrap()).unwrap()
    }

    fn database(schema: &Schema) -> Database {
        let db = Database::open_in_memory().unwrap();
        db.create_schema(schema).unwrap();
        db
    }

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn select_one(db: &Database, schema: &Schema, model: &str, pk: &str) -> crate::value::Record {
        let table = schema.table(model).unwrap();
        let columns: Vec<String> = table.columns.iter().map(|c| format!("\"{}\"", c.name)).collect();
        let sql = format!(
            "SELECT {} FROM \"{}\" WHERE \"pk\" = ?1",
            columns.join(", "),
            model
        );
        db.select_records(table, &sql, &[Value::from(pk)])
            .unwrap()
            .pop()
            .unwrap()
    }

    #[test]
    fn test_collection_without_body_leaves_content_empty() {
        let schema = schema(&[("Post", &[("title", "String"), ("body", "Content")])]);
        let db = database(&schema);
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "Post/_all.yml", "- pk: a\n  title: Hello\n");

        let report = ContentLoader::new(&schema, &db, ReferencePolicy::Strict)
            .load_all(tmp.path())
            .unwrap();
        assert_eq!(report.counts.get("Post"), Some(&1));

        let post = select_one(&db, &schema, "Post", "a");
        assert_eq!(post.get("title"), Some(Value::from("Hello")));
        assert_eq!(post.get("body"), Some(Value::from("")));
    }

    #[test]
    fn test_files_mode_uses_stem_and_body() {
        let schema = schema(&[(
            "Post",
            &[("title", "String"), ("published-on", "DateTime"), ("body", "Content")],
        )]);
        let db = database(&schema);
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "Post/hello-world.md",
            "---\ntitle: Hello\npublished-on: 2018-01-02\n---\n\nFirst post.\n",
        );
        write(tmp.path(), "Post/second.yml", "pk: custom\ntitle: Second\n");
        write(tmp.path(), "Post/notes.txt", "ignored");

        ContentLoader::new(&schema, &db, ReferencePolicy::Strict)
            .load_all(tmp.path())
            .unwrap();
        assert_eq!(db.count("Post").unwrap(), 2);

        let post = select_one(&db, &schema, "Post", "hello-world");
        assert_eq!(post.get("body"), Some(Value::from("First post.\n")));
        assert_eq!(
            post.get("published_on").map(|v| v.to_string()),
            Some("2018-01-02T00:00:00".to_string())
        );
        assert!(db.contains("Post", "custom").unwrap());
    }

    #[test]
    fn test_foreign_key_resolution() {
        let schema = schema(&[("Post", &[("author", "Person")]), ("Person", &[("name", "String")])]);
        let db = database(&schema);
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "Person/alice.yml", "name: Alice\n");
        write(tmp.path(), "Post/_all.yml", "- pk: p1\n  author: alice\n");

        let report = ContentLoader::new(&schema, &db, ReferencePolicy::Strict)
            .load_all(tmp.path())
            .unwrap();
        assert_eq!(report.order, vec!["Person", "Post"]);
        let post = select_one(&db, &schema, "Post", "p1");
        assert_eq!(post.get("author_id"), Some(Value::from("alice")));
    }

    #[test]
    fn test_dangling_foreign_key_by_policy() {
        let schema = schema(&[("Post", &[("author", "Person")]), ("Person", &[])]);
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "Person/alice.yml", "");
        write(tmp.path(), "Post/_all.yml", "- pk: p1\n  author: bob\n");

        let db = database(&schema);
        let err = ContentLoader::new(&schema, &db, ReferencePolicy::Strict)
            .load_all(tmp.path())
            .unwrap_err();
        assert!(matches!(err, SiteDbError::DanglingReference { ref key, .. } if key == "bob"), "{err}");
        assert_eq!(db.count("Post").unwrap(), 0);

        let db = database(&schema);
        ContentLoader::new(&schema, &db, ReferencePolicy::Lenient)
            .load_all(tmp.path())
            .unwrap();
        let post = select_one(&db, &schema, "Post", "p1");
        assert_eq!(post.get("author_id"), Some(Value::from("bob")));
    }

    #[test]
    fn test_duplicate_primary_keys() {
        let schema = schema(&[("Post", &[("title", "String")])]);
        let db = database(&schema);
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "Post/dup.md", "---\ntitle: One\n---\n");
        write(tmp.path(), "Post/other.yml", "pk: dup\ntitle: Two\n");

        let err = ContentLoader::new(&schema, &db, ReferencePolicy::Strict)
            .load_all(tmp.path())
            .unwrap_err();
        assert!(matches!(err, SiteDbError::DuplicateModelInstance { .. }));
        let message = err.to_string();
        assert!(message.contains("\"dup\""), "{message}");
        assert!(message.contains("other.yml"), "{message}");
    }

    #[test]
    fn test_duplicate_in_collection() {
        let schema = schema(&[("Tag", &[])]);
        let db = database(&schema);
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "Tag/_all.yaml", "- pk: rust\n- pk: go\n- pk: rust\n");

        let err = ContentLoader::new(&schema, &db, ReferencePolicy::Strict)
            .load_all(tmp.path())
            .unwrap_err();
        assert!(err.to_string().contains("_all.yaml[2]"), "{err}");
    }

    #[test]
    fn test_invalid_collection_data() {
        let schema = schema(&[("Tag", &[("label", "String")])]);
        let tmp = TempDir::new().unwrap();

        write(tmp.path(), "Tag/_all.yml", "label: not a list\n");
        let db = database(&schema);
        let err = ContentLoader::new(&schema, &db, ReferencePolicy::Strict)
            .load_all(tmp.path())
            .unwrap_err();
        assert!(matches!(err, SiteDbError::InvalidModelCollectionData { .. }), "{err}");

        write(tmp.path(), "Tag/_all.yml", "- label: no key\n");
        let db = database(&schema);
        let err = ContentLoader::new(&schema, &db, ReferencePolicy::Strict)
            .load_all(tmp.path())
            .unwrap_err();
        assert!(matches!(err, SiteDbError::InvalidModelCollectionData { .. }), "{err}");
    }

    #[test]
    fn test_many_to_many_links() {
        let schema = schema(&[("Post", &[("tags", "Tag[] -> posts")]), ("Tag", &[])]);
        let db = database(&schema);
        let tmp = TempDir::new().unwrap();
        // Post loads before Tag, so its links wait for the tag table.
        write(tmp.path(), "Post/_all.yml", "- pk: a\n  tags: [rust, go]\n- pk: b\n");
        write(tmp.path(), "Tag/_all.yml", "- pk: rust\n- pk: go\n");

        ContentLoader::new(&schema, &db, ReferencePolicy::Strict)
            .load_all(tmp.path())
            .unwrap();
        assert_eq!(db.count("post_tag").unwrap(), 2);
    }

    #[test]
    fn test_many_to_many_missing_key() {
        let schema = schema(&[("Post", &[("tags", "Tag[]")]), ("Tag", &[])]);
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "Tag/_all.yml", "- pk: rust\n");
        write(tmp.path(), "Post/_all.yml", "- pk: a\n  tags: [rust, cobol]\n");

        let db = database(&schema);
        let err = ContentLoader::new(&schema, &db, ReferencePolicy::Strict)
            .load_all(tmp.path())
            .unwrap_err();
        assert!(err.to_string().contains("cobol"), "{err}");

        let db = database(&schema);
        ContentLoader::new(&schema, &db, ReferencePolicy::Lenient)
            .load_all(tmp.path())
            .unwrap();
        assert_eq!(db.count("post_tag").unwrap(), 1);
    }

    #[test]
    fn test_many_to_many_requires_list() {
        let schema = schema(&[("Post", &[("tags", "Tag[]")]), ("Tag", &[])]);
        let db = database(&schema);
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "Post/_all.yml", "- pk: a\n  tags: rust\n");

        let err = ContentLoader::new(&schema, &db, ReferencePolicy::Strict)
            .load_all(tmp.path())
            .unwrap_err();
        assert!(matches!(err, SiteDbError::InvalidFieldType { .. }), "{err}");
        assert!(err.to_string().contains("_all.yml[0]"), "{err}");
    }

    #[test]
    fn test_conversion_failure_writes_nothing() {
        let schema = schema(&[("Post", &[("views", "Integer"), ("tags", "Tag[]")]), ("Tag", &[])]);
        let db = database(&schema);
        let mut loader = ContentLoader::new(&schema, &db, ReferencePolicy::Strict);
        loader.mark_loaded("Tag");

        let mut data = serde_yaml::Mapping::new();
        data.insert("views".into(), "many".into());
        let record = RawRecord::new(
            "Post",
            Some("a".into()),
            data,
            None,
            RecordSource::Inline {
                model: "Post".into(),
                index: 0,
            },
        )
        .unwrap();

        let err = loader.load_records("Post", vec![record]).unwrap_err();
        assert!(matches!(err, SiteDbError::InvalidFieldValue { ref field, .. } if field == "views"));
        assert_eq!(db.count("Post").unwrap(), 0);
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let schema = schema(&[("Post", &[("title", "String")])]);
        let db = database(&schema);
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "Post/a.yml", "title: A\nsubtitle: B\n");

        let err = ContentLoader::new(&schema, &db, ReferencePolicy::Strict)
            .load_all(tmp.path())
            .unwrap_err();
        assert!(matches!(err, SiteDbError::UnknownField { ref field, .. } if field == "subtitle"));
    }

    #[test]
    fn test_self_reference_is_verified_after_load() {
        let schema = schema(&[("Person", &[("manager", "Person -> reports")])]);
        let db = database(&schema);
        let tmp = TempDir::new().unwrap();
        // "alice" sorts before her manager "zoe".
        write(tmp.path(), "Person/alice.yml", "manager: zoe\n");
        write(tmp.path(), "Person/zoe.yml", "");

        ContentLoader::new(&schema, &db, ReferencePolicy::Strict)
            .load_all(tmp.path())
            .unwrap();
        assert_eq!(db.count("Person").unwrap(), 2);

        write(tmp.path(), "Person/alice.yml", "manager: nobody\n");
        let db = database(&schema);
        let err = ContentLoader::new(&schema, &db, ReferencePolicy::Strict)
            .load_all(tmp.path())
            .unwrap_err();
        assert!(matches!(err, SiteDbError::DanglingReference { .. }), "{err}");
    }

    #[test]
    fn test_foreign_key_cycle_is_verified_after_load() {
        let schema = schema(&[
            ("Author", &[("favorite", "Book")]),
            ("Book", &[("author", "Author")]),
        ]);
        let tmp = TempDir::new().unwrap();
        // Author loads first and points into Book before Book exists.
        write(tmp.path(), "Author/ann.yml", "favorite: dune\n");
        write(tmp.path(), "Book/dune.yml", "author: ann\n");

        let db = database(&schema);
        let report = ContentLoader::new(&schema, &db, ReferencePolicy::Strict)
            .load_all(tmp.path())
            .unwrap();
        assert_eq!(report.order, vec!["Author", "Book"]);
        let ann = select_one(&db, &schema, "Author", "ann");
        assert_eq!(ann.get("favorite_id"), Some(Value::from("dune")));

        write(tmp.path(), "Author/ann.yml", "favorite: emma\n");
        let db = database(&schema);
        let err = ContentLoader::new(&schema, &db, ReferencePolicy::Strict)
            .load_all(tmp.path())
            .unwrap_err();
        assert!(
            matches!(err, SiteDbError::DanglingReference { ref field, ref key, .. } if field == "favorite" && key == "emma"),
            "{err}"
        );
    }

    #[test]
    fn test_same_field_spelled_twice_is_rejected() {
        let schema = schema(&[("Post", &[("published_on", "String")])]);
        let db = database(&schema);
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "Post/a.yml", "published-on: monday\npublished_on: tuesday\n");

        let err = ContentLoader::new(&schema, &db, ReferencePolicy::Strict)
            .load_all(tmp.path())
            .unwrap_err();
        assert!(
            matches!(err, SiteDbError::InvalidFieldValue { ref field, .. } if field == "published_on"),
            "{err}"
        );
        assert!(err.to_string().contains("a.yml"), "{err}");
        assert_eq!(db.count("Post").unwrap(), 0);
    }

    #[test]
    fn test_missing_directories_are_skipped() {
        let schema = schema(&[("Post", &[]), ("Tag", &[])]);
        let db = database(&schema);
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "Tag/rust.yml", "");

        let report = ContentLoader::new(&schema, &db, ReferencePolicy::Strict)
            .load_all(tmp.path())
            .unwrap();
        assert_eq!(report.counts.get("Tag"), Some(&1));
        assert_eq!(report.counts.get("Post"), None);
    }

    #[test]
    fn test_record_files_are_sorted_and_filtered() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "b.md", "");
        write(tmp.path(), "a.YML", "");
        write(tmp.path(), ".hidden.md", "");
        write(tmp.path(), "c.json", "{}");
        let files: Vec<String> = record_files(tmp.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(files, vec!["a.YML", "b.md"]);
    }
}
