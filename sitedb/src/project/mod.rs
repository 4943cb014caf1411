// Project front-end - models/, data/ and config.yml in one directory

use crate::config::ProjectConfig;
use crate::document::list_files;
use crate::error::{Result, SiteDbError};
use crate::schema::{parse_model, ModelRegistry, ModelSet};
use crate::store::Store;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const MODELS_DIR: &str = "models";
pub const DATA_DIR: &str = "data";
pub const CONFIG_FILE: &str = "config.yml";

const MODEL_EXTENSIONS: [&str; 2] = ["yml", "yaml"];

/// A site project on disk.
pub struct Project {
    root: PathBuf,
    config: ProjectConfig,
}

impl Project {
    /// Open the project at `path` and read its `config.yml`, if any.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root = path.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(SiteDbError::MissingProjectFolder {
                folder: "project".to_string(),
                path: root.display().to_string(),
            });
        }
        log::info!("Using project source directory: {}", root.display());
        let config = ProjectConfig::load(&root.join(CONFIG_FILE))?;
        Ok(Project { root, config })
    }

    /// Use an explicit configuration instead of `config.yml`.
    pub fn with_config(mut self, config: ProjectConfig) -> Self {
        self.config = config;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    /// Parse every `models/<Model>.yml` and resolve their relations.
    pub fn load_models(&self) -> Result<ModelSet> {
        let models_path = self.folder(MODELS_DIR)?;
        log::debug!("Loading models from: {}", models_path.display());

        let mut files: BTreeMap<String, PathBuf> = BTreeMap::new();
        for path in list_files(&models_path, &MODEL_EXTENSIONS)? {
            let name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            if let Some(previous) = files.insert(name.clone(), path.clone()) {
                return Err(SiteDbError::Other(format!(
                    "Model {name} is defined twice: {} and {}",
                    previous.display(),
                    path.display()
                )));
            }
        }
        log::debug!("Found {} model(s) in project", files.len());

        let mut registry = ModelRegistry::new(files.keys())?;
        for (name, path) in &files {
            let fields = parse_model(path)?;
            registry.register_model(name, &fields)?;
        }
        registry.resolve_back_references()
    }

    /// Load the models and all content under `data/`.
    pub fn build(&self) -> Result<Store> {
        let models = self.load_models()?;
        let data_path = self.folder(DATA_DIR)?;
        log::debug!("Loading data from: {}", data_path.display());
        Store::build(&models, &data_path, self.config.references)
    }

    /// The values shared by every page: the static context, `project_name`,
    /// `base_path`, and each dynamic query's result.
    pub fn context(&self, store: &Store) -> Result<serde_json::Map<String, serde_json::Value>> {
        let mut context: serde_json::Map<String, serde_json::Value> = self
            .config
            .context
            .static_values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        context.insert(
            "project_name".to_string(),
            serde_json::Value::String(self.config.project_name.clone()),
        );
        context.insert(
            "base_path".to_string(),
            serde_json::Value::String(self.config.base_path.clone()),
        );

        for (name, expression) in &self.config.context.dynamic {
            let result = store.query(expression).map_err(|e| {
                SiteDbError::Query(format!("context variable '{name}': {e}"))
            })?;
            context.insert(name.clone(), serde_json::to_value(&result)?);
        }
        Ok(context)
    }

    fn folder(&self, name: &str) -> Result<PathBuf> {
        let path = self.root.join(name);
        if !path.is_dir() {
            return Err(SiteDbError::MissingProjectFolder {
                folder: name.to_string(),
                path: path.display().to_string(),
            });
        }
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn blog_project() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(
            root,
            "config.yml",
            r#"
project-name: Test Blog
base-path: /blog/
context:
  static:
    tagline: Hello
  dynamic:
    post_count: "Post.count()"
    latest: "Post.order_by(-published).first()"
    authors: "Person.all()"
"#,
        );
        write(root, "models/Person.yml", "name: String\n");
        write(
            root,
            "models/Post.yaml",
            "title: String\npublished: DateTime\nauthor: Person -> posts\ncontent: Content\n",
        );
        write(root, "data/Person/alice.yml", "name: Alice\n");
        write(
            root,
            "data/Post/first.md",
            "---\ntitle: First\npublished: 2018-01-01 10:00\nauthor: alice\n---\nHello!\n",
        );
        write(
            root,
            "data/Post/second.md",
            "---\ntitle: Second\npublished: 2018-02-01 10:00\nauthor: alice\n---\nAgain.\n",
        );
        tmp
    }

    #[test]
    fn test_build_project() {
        let tmp = blog_project();
        let project = Project::open(tmp.path()).unwrap();
        assert_eq!(project.config().project_name, "Test Blog");

        let models = project.load_models().unwrap();
        assert_eq!(models.names().collect::<Vec<_>>(), vec!["Person", "Post"]);
        assert!(models.get("Person").unwrap().derived_relation("posts").is_some());

        let store = project.build().unwrap();
        assert_eq!(store.report().order, vec!["Person", "Post"]);
        assert_eq!(store.report().counts.get("Post"), Some(&2));
    }

    #[test]
    fn test_context() {
        let tmp = blog_project();
        let project = Project::open(tmp.path()).unwrap();
        let store = project.build().unwrap();
        let context = project.context(&store).unwrap();

        assert_eq!(context["tagline"], serde_json::json!("Hello"));
        assert_eq!(context["project_name"], serde_json::json!("Test Blog"));
        assert_eq!(context["base_path"], serde_json::json!("/blog/"));
        assert_eq!(context["post_count"], serde_json::json!(2));
        assert_eq!(
            context["latest"],
            serde_json::json!({
                "pk": "second",
                "title": "Second",
                "published": "2018-02-01T10:00:00",
                "author_id": "alice",
                "content": "Again.\n",
            })
        );
        assert_eq!(context["authors"], serde_json::json!([{ "pk": "alice", "name": "Alice" }]));
    }

    #[test]
    fn test_bad_context_query_names_variable() {
        let tmp = blog_project();
        write(
            tmp.path(),
            "config.yml",
            "context:\n  dynamic:\n    broken: \"Nope.all()\"\n",
        );
        let project = Project::open(tmp.path()).unwrap();
        let store = project.build().unwrap();
        let err = project.context(&store).unwrap_err();
        assert!(err.to_string().contains("broken"), "{err}");
    }

    #[test]
    fn test_missing_folders() {
        let tmp = TempDir::new().unwrap();
        let project = Project::open(tmp.path()).unwrap();
        let err = project.load_models().unwrap_err();
        assert!(
            matches!(err, SiteDbError::MissingProjectFolder { ref folder, .. } if folder == "models"),
            "{err}"
        );

        write(tmp.path(), "models/Post.yml", "title: String\n");
        let err = project.build().err().unwrap();
        assert!(
            matches!(err, SiteDbError::MissingProjectFolder { ref folder, .. } if folder == "data"),
            "{err}"
        );

        let err = Project::open(tmp.path().join("nope")).err().unwrap();
        assert!(
            matches!(err, SiteDbError::MissingProjectFolder { ref folder, .. } if folder == "project"),
            "{err}"
        );
    }

    #[test]
    fn test_unknown_model_type_fails() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "models/Post.yml", "author: Author\n");
        let project = Project::open(tmp.path()).unwrap();
        let err = project.load_models().unwrap_err();
        assert!(matches!(err, SiteDbError::InvalidFieldType { .. }), "{err}");
        assert!(err.to_string().contains("Post.author"), "{err}");
    }
}
