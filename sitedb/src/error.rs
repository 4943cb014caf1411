use thiserror::Error;

#[derive(Error, Debug)]
pub enum SiteDbError {
    #[error("Invalid field type for {model}.{field}: {reason}")]
    InvalidFieldType {
        model: String,
        field: String,
        reason: String,
    },

    #[error("Invalid field value for {model}.{field} in {record}: {reason}")]
    InvalidFieldValue {
        model: String,
        field: String,
        record: String,
        reason: String,
    },

    #[error("Unknown field '{field}' for model {model} in {record}")]
    UnknownField {
        model: String,
        field: String,
        record: String,
    },

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Invalid collection data for model {model} in {path}: {reason}")]
    InvalidModelCollectionData {
        model: String,
        path: String,
        reason: String,
    },

    #[error("More than one entry with the primary key \"{pk}\" exists for model {model} (second one in {record})")]
    DuplicateModelInstance {
        model: String,
        pk: String,
        record: String,
    },

    #[error("Dangling reference {model}.{field} in {record}: no {target} with pk \"{key}\"")]
    DanglingReference {
        model: String,
        field: String,
        record: String,
        target: String,
        key: String,
    },

    #[error("Project is missing its {folder} folder: {path}")]
    MissingProjectFolder { folder: String, path: String },

    #[error("Query error: {0}")]
    Query(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, SiteDbError>;

impl SiteDbError {
    pub(crate) fn field_type(
        model: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        SiteDbError::InvalidFieldType {
            model: model.into(),
            field: field.into(),
            reason: reason.into(),
        }
    }
}
