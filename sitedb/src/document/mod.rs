// Document I/O - read Markdown with YAML front matter, or plain YAML

use crate::error::{Result, SiteDbError};
use std::path::{Path, PathBuf};

/// File extensions that hold one record each.
pub const DOCUMENT_EXTENSIONS: [&str; 3] = ["md", "yml", "yaml"];

/// A content file split into its attribute map and body text.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// The file's base name, used as the primary key unless the
    /// attributes carry an explicit `pk`.
    pub id: String,
    pub data: serde_yaml::Mapping,
    pub content: Option<String>,
}

/// Read a record file. `.md` files may open with `---` delimited front
/// matter; `.yml`/`.yaml` files are a single mapping with no body.
pub fn read_document(path: &Path) -> Result<Document> {
    let text = std::fs::read_to_string(path)?;
    let id = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| SiteDbError::Other(format!("Cannot derive a key from {}", path.display())))?
        .to_string();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let (data, content) = if extension == "md" {
        let (data, body) = split_front_matter(&text)
            .map_err(|e| SiteDbError::Other(format!("{}: {e}", path.display())))?;
        (data, Some(body))
    } else {
        let data = parse_mapping(&text)
            .map_err(|e| SiteDbError::Other(format!("{}: {e}", path.display())))?;
        (data, None)
    };

    Ok(Document { id, data, content })
}

/// Files directly inside `dir` with one of `extensions` (compared
/// case-insensitively), sorted by name. Hidden files are skipped.
pub fn list_files(dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>> {
    let pattern = format!("{}/*", glob::Pattern::escape(&dir.to_string_lossy()));
    let options = glob::MatchOptions {
        require_literal_leading_dot: true,
        ..Default::default()
    };
    let mut files: Vec<PathBuf> = glob::glob_with(&pattern, options)
        .map_err(|e| SiteDbError::Other(format!("Glob error: {e}")))?
        .filter_map(|r| r.ok())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| extensions.contains(&e.to_ascii_lowercase().as_str()))
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Split Markdown text into front matter and body.
pub fn split_front_matter(text: &str) -> std::result::Result<(serde_yaml::Mapping, String), String> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut lines = text.split_inclusive('\n');
    let Some(first) = lines.next() else {
        return Ok((serde_yaml::Mapping::new(), String::new()));
    };
    if first.trim_end() != "---" {
        return Ok((serde_yaml::Mapping::new(), text.to_string()));
    }

    let mut front = String::new();
    let mut consumed = first.len();
    let mut closed = false;
    for line in lines {
        consumed += line.len();
        let trimmed = line.trim_end();
        if trimmed == "---" || trimmed == "..." {
            closed = true;
            break;
        }
        front.push_str(line);
    }
    if !closed {
        return Err("front matter is not terminated by '---'".to_string());
    }

    let data = parse_mapping(&front)?;
    let body = text[consumed..].trim_start_matches(['\r', '\n']).to_string();
    Ok((data, body))
}

fn parse_mapping(text: &str) -> std::result::Result<serde_yaml::Mapping, String> {
    if text.trim().is_empty() {
        return Ok(serde_yaml::Mapping::new());
    }
    match serde_yaml::from_str::<serde_yaml::Value>(text).map_err(|e| e.to_string())? {
        serde_yaml::Value::Mapping(m) => Ok(m),
        serde_yaml::Value::Null => Ok(serde_yaml::Mapping::new()),
        other => Err(format!(
            "expected a mapping of fields, got {}",
            crate::convert::type_name(&other)
        )),
    }
}
