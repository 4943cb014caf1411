// Query engine - read-only queries over a loaded store

mod parser;

pub use parser::{ComparisonOp, Condition, Literal, OrderKey, Query, Terminal};

use crate::compiler::{quote_ident, Column, ColumnType, RelationBinding, Schema, Table};
use crate::db::Database;
use crate::error::{Result, SiteDbError};
use crate::value::{parse_datetime, Record, Value};
use serde::Serialize;

/// Result of a query: one optional record, a list, or a scalar.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryResult {
    Record(Option<Record>),
    Records(Vec<Record>),
    Scalar(Value),
}

impl QueryResult {
    /// The records of the result; a single record becomes a list of at
    /// most one, a scalar an empty list.
    pub fn into_records(self) -> Vec<Record> {
        match self {
            QueryResult::Record(record) => record.into_iter().collect(),
            QueryResult::Records(records) => records,
            QueryResult::Scalar(_) => Vec::new(),
        }
    }

    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            QueryResult::Scalar(value) => Some(value),
            _ => None,
        }
    }
}

/// SQL fragments for the row set a query selects.
struct RowSet {
    filter: String,
    order: String,
    window: String,
    params: Vec<Value>,
}

impl RowSet {
    fn select(&self, table: &Table, columns: &str) -> String {
        format!(
            "SELECT {columns} FROM {}{}{}{}",
            quote_ident(&table.name),
            self.filter,
            self.order,
            self.window
        )
    }
}

/// Executes queries against a populated database. Every model and field
/// name is checked against the schema before any SQL is built; literal
/// values are always bound as parameters.
pub struct QueryEngine<'a> {
    schema: &'a Schema,
    db: &'a Database,
}

impl<'a> QueryEngine<'a> {
    pub fn new(schema: &'a Schema, db: &'a Database) -> Self {
        QueryEngine { schema, db }
    }

    /// Parse and run a query expression.
    pub fn query(&self, expression: &str) -> Result<QueryResult> {
        let query = Query::parse(expression)?;
        log::debug!("Query: {expression}");
        self.execute(&query)
    }

    pub fn execute(&self, query: &Query) -> Result<QueryResult> {
        let table = self.table(&query.model)?;

        let mut filters = query.filters.clone();
        if let Terminal::Get(key) = &query.terminal {
            filters.push(Condition::Compare {
                field: "pk".to_string(),
                op: ComparisonOp::Eq,
                value: key.clone(),
            });
        }

        let limit = match query.terminal {
            Terminal::First | Terminal::Get(_) => Some(query.limit.map_or(1, |l| l.min(1))),
            _ => query.limit,
        };
        let rows = self.row_set(table, &filters, &query.order, limit, query.offset)?;

        match &query.terminal {
            Terminal::All => {
                let sql = rows.select(table, &select_list(table));
                Ok(QueryResult::Records(
                    self.db.select_records(table, &sql, &rows.params)?,
                ))
            }
            Terminal::First | Terminal::Get(_) => {
                let sql = rows.select(table, &select_list(table));
                let record = self.db.select_records(table, &sql, &rows.params)?.into_iter().next();
                Ok(QueryResult::Record(record))
            }
            Terminal::Count => {
                let sql = format!("SELECT COUNT(*) FROM ({})", rows.select(table, "\"pk\""));
                Ok(QueryResult::Scalar(self.db.select_scalar(
                    &sql,
                    &rows.params,
                    Some(ColumnType::Integer),
                )?))
            }
            Terminal::Exists => {
                let sql = format!("SELECT COUNT(*) > 0 FROM ({})", rows.select(table, "\"pk\""));
                Ok(QueryResult::Scalar(self.db.select_scalar(
                    &sql,
                    &rows.params,
                    Some(ColumnType::Boolean),
                )?))
            }
            Terminal::Min(field) | Terminal::Max(field) => {
                let column = resolve_column(table, field)?;
                let function = if matches!(query.terminal, Terminal::Min(_)) {
                    "MIN"
                } else {
                    "MAX"
                };
                let name = quote_ident(&column.name);
                let sql = format!(
                    "SELECT {function}({name}) FROM ({})",
                    rows.select(table, &name)
                );
                Ok(QueryResult::Scalar(self.db.select_scalar(
                    &sql,
                    &rows.params,
                    Some(column.column_type),
                )?))
            }
        }
    }

    /// Follow a relationship from `record`. Foreign keys yield one optional
    /// record; one-to-many and many-to-many relations a list ordered by `pk`.
    pub fn related(&self, record: &Record, field: &str) -> Result<QueryResult> {
        let table = self.table(&record.model)?;
        let relationship = table.relationship(field).ok_or_else(|| {
            SiteDbError::Query(format!("{} has no relation '{field}'", table.name))
        })?;
        let target = self.table(&relationship.target)?;
        let columns = select_list(target);

        match &relationship.binding {
            RelationBinding::ForeignKey { column } => {
                let key = record.get(column).unwrap_or(Value::Null);
                if key.is_null() {
                    return Ok(QueryResult::Record(None));
                }
                let sql = format!(
                    "SELECT {columns} FROM {} WHERE \"pk\" = ?1",
                    quote_ident(&target.name)
                );
                let found = self.db.select_records(target, &sql, &[key])?.into_iter().next();
                Ok(QueryResult::Record(found))
            }
            RelationBinding::Reverse { column } => {
                let sql = format!(
                    "SELECT {columns} FROM {} WHERE {} = ?1 ORDER BY \"pk\" ASC",
                    quote_ident(&target.name),
                    quote_ident(column)
                );
                let records = self
                    .db
                    .select_records(target, &sql, &[Value::String(record.pk.clone())])?;
                Ok(QueryResult::Records(records))
            }
            RelationBinding::Association {
                table: link_table,
                local_column,
                remote_column,
            } => {
                let sql = format!(
                    "SELECT {columns} FROM {} WHERE \"pk\" IN (SELECT {} FROM {} WHERE {} = ?1) ORDER BY \"pk\" ASC",
                    quote_ident(&target.name),
                    quote_ident(remote_column),
                    quote_ident(link_table),
                    quote_ident(local_column)
                );
                let records = self
                    .db
                    .select_records(target, &sql, &[Value::String(record.pk.clone())])?;
                Ok(QueryResult::Records(records))
            }
        }
    }

    fn table(&self, model: &str) -> Result<&'a Table> {
        self.schema
            .table(model)
            .ok_or_else(|| SiteDbError::Query(format!("Unknown model '{model}'")))
    }

    fn row_set(
        &self,
        table: &Table,
        filters: &[Condition],
        order: &[OrderKey],
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<RowSet> {
        let mut params = Vec::new();
        let mut clauses = Vec::with_capacity(filters.len());
        for condition in filters {
            clauses.push(self.condition(table, condition, &mut params)?);
        }
        let filter = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let mut keys = Vec::with_capacity(order.len() + 1);
        for key in order {
            let column = resolve_column(table, &key.field)?;
            let direction = if key.descending { "DESC" } else { "ASC" };
            keys.push(format!("{} {direction}", quote_ident(&column.name)));
        }
        keys.push("\"pk\" ASC".to_string());
        let order = format!(" ORDER BY {}", keys.join(", "));

        let window = match (limit, offset) {
            (None, None) => String::new(),
            (limit, offset) => format!(" LIMIT {} OFFSET {}", limit.unwrap_or(-1), offset.unwrap_or(0)),
        };

        Ok(RowSet {
            filter,
            order,
            window,
            params,
        })
    }

    fn condition(&self, table: &Table, condition: &Condition, params: &mut Vec<Value>) -> Result<String> {
        match condition {
            Condition::Compare { field, op, value } => {
                let column = resolve_column(table, field)?;
                let name = quote_ident(&column.name);
                if *value == Literal::Null {
                    return match op {
                        ComparisonOp::Eq => Ok(format!("{name} IS NULL")),
                        ComparisonOp::Ne => Ok(format!("{name} IS NOT NULL")),
                        _ => Err(SiteDbError::Query(format!(
                            "null can only be compared with == or != ({}.{field})",
                            table.name
                        ))),
                    };
                }
                params.push(literal_value(table, field, column, value)?);
                Ok(format!("{name} {} ?{}", op.sql(), params.len()))
            }
            Condition::In { field, values } => {
                let column = resolve_column(table, field)?;
                let mut placeholders = Vec::with_capacity(values.len());
                for value in values {
                    params.push(literal_value(table, field, column, value)?);
                    placeholders.push(format!("?{}", params.len()));
                }
                Ok(format!(
                    "{} IN ({})",
                    quote_ident(&column.name),
                    placeholders.join(", ")
                ))
            }
            Condition::Contains { field, value } => {
                let relationship = table.relationship(field).ok_or_else(|| {
                    SiteDbError::Query(format!("{} has no relation '{field}'", table.name))
                })?;
                let target = self.table(&relationship.target)?;
                let target_pk = resolve_column(target, "pk")?;
                params.push(literal_value(target, "pk", target_pk, value)?);
                let placeholder = format!("?{}", params.len());

                match &relationship.binding {
                    RelationBinding::Association {
                        table: link_table,
                        local_column,
                        remote_column,
                    } => Ok(format!(
                        "\"pk\" IN (SELECT {} FROM {} WHERE {} = {placeholder})",
                        quote_ident(local_column),
                        quote_ident(link_table),
                        quote_ident(remote_column)
                    )),
                    RelationBinding::Reverse { column } => Ok(format!(
                        "\"pk\" IN (SELECT {} FROM {} WHERE \"pk\" = {placeholder})",
                        quote_ident(column),
                        quote_ident(&target.name)
                    )),
                    RelationBinding::ForeignKey { .. } => Err(SiteDbError::Query(format!(
                        "{}.{field} holds a single reference; compare it with == instead of contains",
                        table.name
                    ))),
                }
            }
        }
    }
}

fn select_list(table: &Table) -> String {
    table
        .columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// The column a field name filters and sorts on. Foreign-key fields use
/// their `<field>_id` column.
fn resolve_column<'t>(table: &'t Table, field: &str) -> Result<&'t Column> {
    if let Some(column) = table.column(field) {
        return Ok(column);
    }
    match table.relationship(field).map(|r| &r.binding) {
        Some(RelationBinding::ForeignKey { column }) => table.column(column).ok_or_else(|| {
            SiteDbError::Query(format!("{}.{field} has no column", table.name))
        }),
        Some(_) => Err(SiteDbError::Query(format!(
            "{}.{field} is a relation; use 'contains' to filter on it",
            table.name
        ))),
        None => Err(SiteDbError::Query(format!(
            "Unknown field '{field}' for model {}",
            table.name
        ))),
    }
}

/// Convert a literal to a value of the column's type, or reject it.
fn literal_value(table: &Table, field: &str, column: &Column, literal: &Literal) -> Result<Value> {
    let is_key = column.primary_key || column.references.is_some();
    let value = match (column.column_type, literal) {
        (ColumnType::Text, Literal::String(s)) => Some(Value::String(s.clone())),
        (ColumnType::Text, Literal::Integer(i)) if is_key => Some(Value::String(i.to_string())),
        (ColumnType::Integer, Literal::Integer(i)) => Some(Value::Integer(*i)),
        (ColumnType::Boolean, Literal::Boolean(b)) => Some(Value::Boolean(*b)),
        (ColumnType::DateTime, Literal::String(s)) => parse_datetime(s).map(Value::DateTime),
        _ => None,
    };
    value.ok_or_else(|| {
        SiteDbError::Query(format!(
            "{literal} is not a valid {} value for {}.{field}",
            column.column_type.sql_type().to_lowercase(),
            table.name
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{ContentLoader, ReferencePolicy};
    use crate::schema::ModelRegistry;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        schema: Schema,
        db: Database,
        _dir: TempDir,
    }

    impl Fixture {
        fn engine(&self) -> QueryEngine<'_> {
            QueryEngine::new(&self.schema, &self.db)
        }

        fn pks(&self, expression: &str) -> Vec<String> {
            self.engine()
                .query(expression)
                .unwrap()
                .into_records()
                .into_iter()
                .map(|r| r.pk)
                .collect()
        }

        fn scalar(&self, expression: &str) -> Value {
            self.engine()
                .query(expression)
                .unwrap()
                .as_scalar()
                .cloned()
                .unwrap()
        }
    }

    fn blog() -> Fixture {
        let mut registry = ModelRegistry::new(["Person", "Post", "Tag"]).unwrap();
        let fields = |pairs: &[(&str, &str)]| -> Vec<(String, String)> {
            pairs.iter().map(|(f, t)| (f.to_string(), t.to_string())).collect()
        };
        registry
            .register_model("Person", &fields(&[("name", "String")]))
            .unwrap();
        registry
            .register_model(
                "Post",
                &fields(&[
                    ("title", "String"),
                    ("views", "Integer"),
                    ("draft", "Boolean"),
                    ("published", "DateTime"),
                    ("author", "Person -> posts"),
                    ("tags", "Tag[] -> posts"),
                    ("body", "Content"),
                ]),
            )
            .unwrap();
        registry.register_model("Tag", &[]).unwrap();
        let schema = Schema::compile(&registry.resolve_back_references().unwrap()).unwrap();

        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("Person")).unwrap();
        fs::create_dir_all(root.join("Post")).unwrap();
        fs::create_dir_all(root.join("Tag")).unwrap();
        fs::write(root.join("Person/_all.yml"), "- pk: alice\n  name: Alice\n- pk: bob\n  name: Bob\n").unwrap();
        fs::write(root.join("Tag/_all.yml"), "- pk: rust\n- pk: go\n").unwrap();
        fs::write(
            root.join("Post/a.md"),
            "---\ntitle: Alpha\nviews: 10\ndraft: false\npublished: 2018-01-01\nauthor: alice\ntags: [rust]\n---\nA",
        )
        .unwrap();
        fs::write(
            root.join("Post/b.md"),
            "---\ntitle: Beta\nviews: 30\ndraft: false\npublished: 2018-03-01\nauthor: bob\ntags: [rust, go]\n---\nB",
        )
        .unwrap();
        fs::write(
            root.join("Post/c.md"),
            "---\ntitle: Gamma\nviews: 20\ndraft: true\npublished: 2018-02-01\nauthor: alice\n---\nC",
        )
        .unwrap();
        fs::write(root.join("Post/d.md"), "---\ntitle: Delta\nviews: 10\n---\nD").unwrap();

        let db = Database::open_in_memory().unwrap();
        db.create_schema(&schema).unwrap();
        ContentLoader::new(&schema, &db, ReferencePolicy::Strict)
            .load_all(root)
            .unwrap();

        Fixture {
            schema,
            db,
            _dir: dir,
        }
    }

    #[test]
    fn test_all_is_ordered_by_pk() {
        let fx = blog();
        assert_eq!(fx.pks("Post.all()"), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_filters() {
        let fx = blog();
        assert_eq!(fx.pks("Post.filter(draft == false).all()"), vec!["a", "b"]);
        assert_eq!(fx.pks("Post.filter(views >= 20).all()"), vec!["b", "c"]);
        assert_eq!(fx.pks("Post.filter(author == 'alice').all()"), vec!["a", "c"]);
        assert_eq!(fx.pks("Post.filter(author_id == 'bob').all()"), vec!["b"]);
        assert_eq!(fx.pks("Post.filter(title in ['Beta', 'Delta']).all()"), vec!["b", "d"]);
        assert_eq!(fx.pks("Post.filter(draft == null).all()"), vec!["d"]);
        assert_eq!(fx.pks("Post.filter(author != null, views == 10).all()"), vec!["a"]);
        assert_eq!(
            fx.pks("Post.filter(published > '2018-01-15').all()"),
            vec!["b", "c"]
        );
    }

    #[test]
    fn test_contains() {
        let fx = blog();
        assert_eq!(fx.pks("Post.filter(tags contains 'rust').all()"), vec!["a", "b"]);
        assert_eq!(fx.pks("Post.filter(tags contains 'go').all()"), vec!["b"]);
        assert_eq!(fx.pks("Tag.filter(posts contains 'b').all()"), vec!["go", "rust"]);
        assert_eq!(fx.pks("Person.filter(posts contains 'c').all()"), vec!["alice"]);
    }

    #[test]
    fn test_order_limit_offset() {
        let fx = blog();
        assert_eq!(fx.pks("Post.order_by(-views).all()"), vec!["b", "c", "a", "d"]);
        assert_eq!(fx.pks("Post.order_by(views, -title).limit(2).all()"), vec!["d", "a"]);
        assert_eq!(fx.pks("Post.offset(3).all()"), vec!["d"]);
        assert_eq!(fx.pks("Post.slice(1, 3).all()"), vec!["b", "c"]);
    }

    #[test]
    fn test_single_record_terminals() {
        let fx = blog();
        let engine = fx.engine();

        let QueryResult::Record(Some(post)) = engine.query("Post.order_by(-published).first()").unwrap() else {
            panic!("expected a record");
        };
        assert_eq!(post.pk, "b");
        assert_eq!(post.get("body"), Some(Value::from("B")));

        let QueryResult::Record(Some(post)) = engine.query("Post.get('c')").unwrap() else {
            panic!("expected a record");
        };
        assert_eq!(post.get("title"), Some(Value::from("Gamma")));
        assert_eq!(post.get("draft"), Some(Value::Boolean(true)));

        assert_eq!(engine.query("Post.get('zzz')").unwrap(), QueryResult::Record(None));
        assert_eq!(
            engine.query("Post.filter(draft == true).get('a')").unwrap(),
            QueryResult::Record(None)
        );
    }

    #[test]
    fn test_scalar_terminals() {
        let fx = blog();
        assert_eq!(fx.scalar("Post.count()"), Value::Integer(4));
        assert_eq!(fx.scalar("Post.filter(draft == false).count()"), Value::Integer(2));
        assert_eq!(fx.scalar("Post.limit(3).count()"), Value::Integer(3));
        assert_eq!(fx.scalar("Post.filter(views > 100).exists()"), Value::Boolean(false));
        assert_eq!(fx.scalar("Tag.exists()"), Value::Boolean(true));
        assert_eq!(fx.scalar("Post.max(views)"), Value::Integer(30));
        assert_eq!(fx.scalar("Post.filter(draft == false).min(views)"), Value::Integer(10));
        assert_eq!(
            fx.scalar("Post.max(published)").to_string(),
            "2018-03-01T00:00:00"
        );
        assert_eq!(fx.scalar("Post.filter(views > 100).max(views)"), Value::Null);
    }

    #[test]
    fn test_related() {
        let fx = blog();
        let engine = fx.engine();
        let post = engine.query("Post.get('b')").unwrap().into_records().remove(0);

        let QueryResult::Record(Some(author)) = engine.related(&post, "author").unwrap() else {
            panic!("expected the author");
        };
        assert_eq!(author.pk, "bob");

        let tags: Vec<String> = engine
            .related(&post, "tags")
            .unwrap()
            .into_records()
            .into_iter()
            .map(|r| r.pk)
            .collect();
        assert_eq!(tags, vec!["go", "rust"]);

        let alice = engine.query("Person.get('alice')").unwrap().into_records().remove(0);
        let posts: Vec<String> = engine
            .related(&alice, "posts")
            .unwrap()
            .into_records()
            .into_iter()
            .map(|r| r.pk)
            .collect();
        assert_eq!(posts, vec!["a", "c"]);

        let rust = engine.query("Tag.get('rust')").unwrap().into_records().remove(0);
        assert_eq!(engine.related(&rust, "posts").unwrap().into_records().len(), 2);

        let orphan = engine.query("Post.get('d')").unwrap().into_records().remove(0);
        assert_eq!(engine.related(&orphan, "author").unwrap(), QueryResult::Record(None));
        assert!(engine.related(&orphan, "nope").is_err());
    }

    #[test]
    fn test_invalid_queries_are_rejected() {
        let fx = blog();
        let engine = fx.engine();
        for expression in [
            "Nope.all()",
            "Post.filter(nope == 1).all()",
            "Post.filter(views == 'ten').all()",
            "Post.filter(draft == 1).all()",
            "Post.filter(published == 'soon').all()",
            "Post.filter(views > null).all()",
            "Post.filter(tags == 'rust').all()",
            "Post.filter(title contains 'x').all()",
            "Post.filter(author contains 'alice').all()",
            "Post.order_by(tags).all()",
            "Post.max(tags)",
        ] {
            let err = engine.query(expression).unwrap_err();
            assert!(matches!(err, SiteDbError::Query(_)), "{expression}: {err}");
        }
    }

    #[test]
    fn test_results_serialize_flat() {
        let fx = blog();
        let result = fx.engine().query("Tag.all()").unwrap();
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            serde_json::json!([{ "pk": "go" }, { "pk": "rust" }])
        );
        let count = fx.engine().query("Tag.count()").unwrap();
        assert_eq!(serde_json::to_value(&count).unwrap(), serde_json::json!(2));
    }
}
