//! Agent definitions on disk.
//!
//! Each agent lives in `<dir>/<agent_id>.json`. Parsed definitions are
//! cached until reloaded or cleared; the cache hands out `Arc`s so callers
//! never observe a definition changing underneath them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use flowhost_core::definition::AgentDefinition;
use flowhost_core::error::{FlowhostError, Result};

/// Source of agent definitions for the runtime.
pub trait AgentResolver: Send + Sync + 'static {
    fn resolve<'a>(&'a self, agent_id: &'a str) -> BoxFuture<'a, Result<Arc<AgentDefinition>>>;
}

/// Validation status of one definition file.
#[derive(Debug, Clone, Serialize)]
pub struct DefinitionStatus {
    pub id: String,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Valid/invalid partition of a directory of definitions.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ValidationReport {
    pub valid: Vec<String>,
    pub invalid: Vec<(String, String)>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.invalid.is_empty()
    }
}

pub struct DefinitionStore {
    dir: PathBuf,
    cache: RwLock<HashMap<String, Arc<AgentDefinition>>>,
}

fn check_id(agent_id: &str) -> Result<()> {
    let ok = !agent_id.is_empty()
        && agent_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(FlowhostError::InvalidDefinition(format!("invalid agent id '{agent_id}'")))
    }
}

/// Agent id for a definition path: the file stem of a `.json` file.
fn id_for(path: &Path) -> Option<String> {
    if path.extension().and_then(|e| e.to_str()) != Some("json") {
        return None;
    }
    path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
}

/// Parse and validate a single definition file.
pub async fn validate_file(path: &Path) -> Result<(String, AgentDefinition)> {
    let id = id_for(path).ok_or_else(|| {
        FlowhostError::InvalidDefinition(format!("{} is not a .json file", path.display()))
    })?;
    let text = tokio::fs::read_to_string(path).await?;
    let def = AgentDefinition::from_json(&id, &text)?;
    Ok((id, def))
}

/// Validate every `.json` file in `dir`.
pub async fn validate_dir(dir: &Path) -> Result<ValidationReport> {
    let mut report = ValidationReport::default();
    for path in json_files(dir).await? {
        match validate_file(&path).await {
            Ok((id, _)) => report.valid.push(id),
            Err(e) => {
                let id = id_for(&path).unwrap_or_else(|| path.display().to_string());
                report.invalid.push((id, e.to_string()));
            }
        }
    }
    Ok(report)
}

async fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(dir = %dir.display(), "Agents directory does not exist");
            return Ok(files);
        }
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if id_for(&path).is_some() && entry.file_type().await?.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

impl DefinitionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, agent_id: &str) -> PathBuf {
        self.dir.join(format!("{agent_id}.json"))
    }

    /// Definition for `agent_id`, from the cache unless `force_reload`.
    pub async fn load(&self, agent_id: &str, force_reload: bool) -> Result<Arc<AgentDefinition>> {
        check_id(agent_id).map_err(|_| FlowhostError::AgentNotFound(agent_id.to_string()))?;

        if !force_reload {
            if let Some(def) = self.cache.read().await.get(agent_id) {
                return Ok(def.clone());
            }
        }

        let path = self.path_for(agent_id);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FlowhostError::AgentNotFound(agent_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let def = Arc::new(AgentDefinition::from_json(agent_id, &text)?);
        self.cache.write().await.insert(agent_id.to_string(), def.clone());
        debug!(agent_id, path = %path.display(), force_reload, "Loaded agent definition");
        Ok(def)
    }

    pub async fn get(&self, agent_id: &str) -> Result<Arc<AgentDefinition>> {
        self.load(agent_id, false).await
    }

    /// Every definition file with its validation status, sorted by id.
    pub async fn list(&self) -> Result<Vec<DefinitionStatus>> {
        let mut out = Vec::new();
        for path in json_files(&self.dir).await? {
            let Some(id) = id_for(&path) else { continue };
            let status = match self.load(&id, false).await {
                Ok(_) => DefinitionStatus {
                    id,
                    valid: true,
                    error: None,
                },
                Err(e) => DefinitionStatus {
                    id,
                    valid: false,
                    error: Some(e.to_string()),
                },
            };
            out.push(status);
        }
        Ok(out)
    }

    /// Ids of valid definitions only.
    pub async fn ids(&self) -> Result<Vec<String>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|s| s.valid)
            .map(|s| s.id)
            .collect())
    }

    /// Drop one cached definition, or all of them.
    pub async fn clear_cache(&self, agent_id: Option<&str>) {
        let mut cache = self.cache.write().await;
        match agent_id {
            Some(id) => {
                cache.remove(id);
            }
            None => cache.clear(),
        }
    }

    /// Validate `def` and write it as pretty JSON.
    pub async fn save(&self, agent_id: &str, def: &AgentDefinition) -> Result<()> {
        check_id(agent_id)?;
        def.validate(agent_id)?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_string_pretty(def)?;
        tokio::fs::write(self.path_for(agent_id), json).await?;

        self.cache
            .write()
            .await
            .insert(agent_id.to_string(), Arc::new(def.clone()));
        info!(agent_id, "Saved agent definition");
        Ok(())
    }

    /// Remove a definition file. Returns `false` if it did not exist.
    pub async fn delete(&self, agent_id: &str) -> Result<bool> {
        check_id(agent_id)?;
        self.cache.write().await.remove(agent_id);
        match tokio::fs::remove_file(self.path_for(agent_id)).await {
            Ok(()) => {
                info!(agent_id, "Deleted agent definition");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

impl AgentResolver for DefinitionStore {
    fn resolve<'a>(&'a self, agent_id: &'a str) -> BoxFuture<'a, Result<Arc<AgentDefinition>>> {
        Box::pin(self.get(agent_id))
    }
}

#[cfg(test)]
mod tests {
    use flowhost_test_utils::fixtures;

    use super::*;

    #[tokio::test]
    async fn test_load_caches_until_reload() {
        let dir = tempfile::tempdir().unwrap();
        fixtures::write_definitions(dir.path(), &[("travel", &fixtures::travel_assistant())]);
        let store = DefinitionStore::new(dir.path());

        let first = store.get("travel").await.unwrap();
        assert!(first.flow_template.is_some());

        let mut edited = fixtures::travel_assistant();
        edited.persona = "You are a terse travel assistant.".into();
        fixtures::write_definitions(dir.path(), &[("travel", &edited)]);

        let cached = store.get("travel").await.unwrap();
        assert!(Arc::ptr_eq(&first, &cached));

        let reloaded = store.load("travel", true).await.unwrap();
        assert_eq!(reloaded.persona, "You are a terse travel assistant.");
    }

    #[tokio::test]
    async fn test_missing_agent_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = DefinitionStore::new(dir.path());
        assert!(matches!(store.get("ghost").await, Err(FlowhostError::AgentNotFound(_))));
        assert!(matches!(store.get("../etc/passwd").await, Err(FlowhostError::AgentNotFound(_))));
    }

    #[tokio::test]
    async fn test_list_partitions_valid_and_invalid() {
        let dir = tempfile::tempdir().unwrap();
        fixtures::write_definitions(
            dir.path(),
            &[("travel", &fixtures::travel_assistant()), ("support", &fixtures::customer_service())],
        );
        std::fs::write(dir.path().join("broken.json"), r#"{"persona": "x", "flow_template": {"nodes": []}}"#).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let store = DefinitionStore::new(dir.path());
        let listed = store.list().await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["broken", "support", "travel"]);
        assert!(!listed[0].valid);
        assert!(listed[0].error.as_deref().unwrap().contains("no nodes"));

        assert_eq!(store.ids().await.unwrap(), ["support", "travel"]);

        let report = validate_dir(dir.path()).await.unwrap();
        assert_eq!(report.valid, ["support", "travel"]);
        assert_eq!(report.invalid.len(), 1);
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn test_save_validates_then_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = DefinitionStore::new(dir.path().join("agents"));

        let mut bad = fixtures::coordinator(&["helper"]);
        bad.delegates.push("writer".into());
        bad.delegates.push("writer".into());
        assert!(store.save("writer", &bad).await.is_err());
        assert!(!dir.path().join("agents/writer.json").exists());

        store.save("travel", &fixtures::travel_assistant()).await.unwrap();
        let (id, def) = validate_file(&dir.path().join("agents/travel.json")).await.unwrap();
        assert_eq!(id, "travel");
        assert_eq!(def.tool_names(), ["get_weather"]);

        assert!(store.delete("travel").await.unwrap());
        assert!(!store.delete("travel").await.unwrap());
        assert!(matches!(store.get("travel").await, Err(FlowhostError::AgentNotFound(_))));
    }

    #[tokio::test]
    async fn test_clear_cache_forgets_entries() {
        let dir = tempfile::tempdir().unwrap();
        fixtures::write_definitions(dir.path(), &[("travel", &fixtures::travel_assistant())]);
        let store = DefinitionStore::new(dir.path());
        store.get("travel").await.unwrap();

        std::fs::remove_file(dir.path().join("travel.json")).unwrap();
        assert!(store.get("travel").await.is_ok());

        store.clear_cache(Some("travel")).await;
        assert!(matches!(store.get("travel").await, Err(FlowhostError::AgentNotFound(_))));
    }
}
