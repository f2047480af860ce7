//! Project and Blob Stores
//!
//! Interfaces to the backend that keeps projects and their uploaded or
//! exported files. Blobs are content-addressed by SHA-256, so storing the
//! same bytes twice yields the same id. The in-memory implementations back
//! tests and single-process use.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::error::{EngineError, Result};

/// A saved editing project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Blob ids, in the order they were attached
    pub files: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A change to an existing project
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectUpdate {
    Rename(String),
    Describe(String),
    AddFile(String),
    RemoveFile(String),
}

pub trait ProjectStore: Send {
    /// Create a project and return its id
    fn create(&mut self, name: &str, description: &str) -> Result<String>;

    fn get(&self, id: &str) -> Result<Option<Project>>;

    /// Every project, oldest first
    fn list(&self) -> Result<Vec<Project>>;

    /// Apply `update`, bumping the modification time
    ///
    /// # Errors
    /// * `NotFound` - no project with `id`
    fn update(&mut self, id: &str, update: ProjectUpdate) -> Result<Project>;
}

pub trait BlobStore: Send {
    /// Store `bytes`, returning their content id
    fn put(&mut self, bytes: &[u8]) -> Result<String>;

    fn get(&self, id: &str) -> Result<Option<Arc<[u8]>>>;
}

/// SHA-256 hex digest used as a blob id
pub fn content_id(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

// ============================================================================
// In-memory Implementations
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryProjectStore {
    projects: HashMap<String, Project>,
}

impl MemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProjectStore for MemoryProjectStore {
    fn create(&mut self, name: &str, description: &str) -> Result<String> {
        if name.trim().is_empty() {
            return Err(EngineError::invalid_parameter(
                "name",
                "\"\"",
                "a non-empty project name",
            ));
        }
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        self.projects.insert(
            id.clone(),
            Project {
                id: id.clone(),
                name: name.to_string(),
                description: description.to_string(),
                files: Vec::new(),
                created_at: now,
                updated_at: now,
            },
        );
        debug!("[STORE] Created project {} ({})", name, id);
        Ok(id)
    }

    fn get(&self, id: &str) -> Result<Option<Project>> {
        Ok(self.projects.get(id).cloned())
    }

    fn list(&self) -> Result<Vec<Project>> {
        let mut projects: Vec<Project> = self.projects.values().cloned().collect();
        projects.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(projects)
    }

    fn update(&mut self, id: &str, update: ProjectUpdate) -> Result<Project> {
        let project = self.projects.get_mut(id).ok_or_else(|| EngineError::NotFound {
            what: format!("project {}", id),
        })?;
        match update {
            ProjectUpdate::Rename(name) => project.name = name,
            ProjectUpdate::Describe(description) => project.description = description,
            ProjectUpdate::AddFile(blob) => project.files.push(blob),
            ProjectUpdate::RemoveFile(blob) => project.files.retain(|file| *file != blob),
        }
        project.updated_at = Utc::now();
        Ok(project.clone())
    }
}

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: HashMap<String, Arc<[u8]>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&mut self, bytes: &[u8]) -> Result<String> {
        let id = content_id(bytes);
        self.blobs
            .entry(id.clone())
            .or_insert_with(|| Arc::from(bytes));
        debug!("[STORE] Blob {} ({} bytes)", id, bytes.len());
        Ok(id)
    }

    fn get(&self, id: &str) -> Result<Option<Arc<[u8]>>> {
        Ok(self.blobs.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_lifecycle() {
        let mut store = MemoryProjectStore::new();
        let id = store.create("Demo", "first take").unwrap();
        let created = store.get(&id).unwrap().unwrap();
        assert_eq!(created.name, "Demo");
        assert!(created.files.is_empty());

        let renamed = store.update(&id, ProjectUpdate::Rename("Final".into())).unwrap();
        assert_eq!(renamed.name, "Final");
        assert!(renamed.updated_at >= created.updated_at);

        store.update(&id, ProjectUpdate::AddFile("abc".into())).unwrap();
        store.update(&id, ProjectUpdate::AddFile("def".into())).unwrap();
        let project = store.update(&id, ProjectUpdate::RemoveFile("abc".into())).unwrap();
        assert_eq!(project.files, vec!["def".to_string()]);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_project() {
        let mut store = MemoryProjectStore::new();
        assert!(store.get("missing").unwrap().is_none());
        assert!(matches!(
            store.update("missing", ProjectUpdate::Describe(String::new())),
            Err(EngineError::NotFound { .. })
        ));
        assert!(store.create("  ", "").is_err());
    }

    #[test]
    fn test_blobs_are_content_addressed() {
        let mut blobs = MemoryBlobStore::new();
        let a = blobs.put(b"RIFF").unwrap();
        let b = blobs.put(b"RIFF").unwrap();
        assert_eq!(a, b);
        assert_eq!(blobs.len(), 1);
        assert_eq!(a.len(), 64);
        assert_eq!(&*blobs.get(&a).unwrap().unwrap(), b"RIFF");
        assert!(blobs.get("0000").unwrap().is_none());
    }
}
