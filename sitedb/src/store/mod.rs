use crate::compiler::Schema;
use crate::db::Database;
use crate::error::Result;
use crate::loader::{ContentLoader, LoadReport, ReferencePolicy};
use crate::query::{Query, QueryEngine, QueryResult};
use crate::schema::ModelSet;
use crate::value::Record;
use std::path::Path;

/// A built content store: the compiled schema plus an in-memory database
/// holding every loaded record. Read-only once built.
pub struct Store {
    schema: Schema,
    db: Database,
    report: LoadReport,
}

impl Store {
    /// Compile `models`, create the tables and load everything under
    /// `content_root` (one directory per model).
    pub fn build(models: &ModelSet, content_root: &Path, policy: ReferencePolicy) -> Result<Self> {
        let schema = Schema::compile(models)?;
        Self::from_schema(schema, content_root, policy)
    }

    /// Create the tables of an already compiled schema and load content.
    pub fn from_schema(schema: Schema, content_root: &Path, policy: ReferencePolicy) -> Result<Self> {
        let db = Database::open_in_memory()?;
        db.create_schema(&schema)?;

        let report = ContentLoader::new(&schema, &db, policy).load_all(content_root)?;
        let total: usize = report.counts.values().sum();
        log::info!(
            "Built store: {} model(s), {} record(s)",
            report.order.len(),
            total
        );

        Ok(Store { schema, db, report })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Load order and per-model record counts of the build.
    pub fn report(&self) -> &LoadReport {
        &self.report
    }

    pub fn engine(&self) -> QueryEngine<'_> {
        QueryEngine::new(&self.schema, &self.db)
    }

    /// Run a query expression, e.g. `Post.filter(draft == false).count()`.
    pub fn query(&self, expression: &str) -> Result<QueryResult> {
        self.engine().query(expression)
    }

    pub fn execute(&self, query: &Query) -> Result<QueryResult> {
        self.engine().execute(query)
    }

    /// Follow the relation `field` of `record`.
    pub fn related(&self, record: &Record, field: &str) -> Result<QueryResult> {
        self.engine().related(record, field)
    }

    /// Row counts per table, including association tables.
    pub fn status(&self) -> Result<serde_json::Value> {
        let mut models = serde_json::Map::new();
        for table in self.schema.tables() {
            let count = self.db.count(&table.name)?;
            models.insert(table.name.clone(), serde_json::json!({ "count": count }));
        }

        let mut associations = serde_json::Map::new();
        for association in self.schema.associations() {
            let count = self.db.count(&association.name)?;
            associations.insert(association.name.clone(), serde_json::json!({ "count": count }));
        }

        Ok(serde_json::json!({
            "load_order": self.report.order,
            "models": models,
            "associations": associations,
        }))
    }
}
