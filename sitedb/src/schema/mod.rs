mod parser;
mod registry;
mod types;

pub use parser::{is_identifier, parse_field_type, parse_model, parse_model_str, underscore};
pub use registry::{ModelRegistry, ModelSet};
pub use types::*;
