pub mod compiler;
pub mod config;
pub mod convert;
pub mod db;
pub mod document;
pub mod error;
pub mod loader;
pub mod project;
pub mod query;
pub mod schema;
pub mod store;
pub mod value;

pub use compiler::Schema;
pub use config::ProjectConfig;
pub use error::{Result, SiteDbError};
pub use loader::{ContentLoader, ReferencePolicy};
pub use project::Project;
pub use query::{Query, QueryEngine, QueryResult};
pub use schema::{ModelRegistry, ModelSet};
pub use store::Store;
pub use value::{Record, Value};
