//! Persistent agent memory: a flat tree of markdown files under
//! `<data_dir>/memory/`, with a simple grep-style search.
//!
//! Grounded on the original reference implementation's `MemoryStore`: no
//! embeddings or vector search (explicitly out of scope), just confined
//! file read/write plus a case-insensitive substring search over `.md`
//! files, capped at 3 matching lines per file.

use std::path::{Path, PathBuf};

use crate::session::SessionStore;

pub struct MemoryStore {
    memory_dir: PathBuf,
}

const MAX_MATCHES_PER_FILE: usize = 3;

impl MemoryStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { memory_dir: data_dir.join("memory") }
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, String> {
        SessionStore::resolve_confined(&self.memory_dir, relative)
    }

    pub async fn read(&self, relative: &str) -> Result<String, String> {
        let path = self.resolve(relative)?;
        tokio::fs::read_to_string(&path).await.map_err(|e| format!("could not read '{relative}': {e}"))
    }

    pub async fn write(&self, relative: &str, content: &str) -> Result<(), String> {
        let path = self.resolve(relative)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| e.to_string())?;
        }
        tokio::fs::write(&path, content).await.map_err(|e| format!("could not write '{relative}': {e}"))
    }

    /// List every `.md` file under the memory tree, relative to its root.
    pub async fn list_files(&self) -> Result<Vec<String>, String> {
        let mut files = Vec::new();
        if self.memory_dir.exists() {
            collect_markdown_files(&self.memory_dir, &self.memory_dir, &mut files)
                .await
                .map_err(|e| e.to_string())?;
        }
        files.sort();
        Ok(files)
    }

    /// Case-insensitive substring search over every `.md` file, returning up
    /// to [`MAX_MATCHES_PER_FILE`] matching lines per file as `(path, line)`.
    pub async fn search(&self, query: &str) -> Result<Vec<(String, String)>, String> {
        let query_lower = query.to_lowercase();
        let mut results = Vec::new();

        for file in self.list_files().await? {
            let path = self.memory_dir.join(&file);
            let Ok(content) = tokio::fs::read_to_string(&path).await else { continue };

            let mut matches = 0;
            for line in content.lines() {
                if matches >= MAX_MATCHES_PER_FILE {
                    break;
                }
                if line.to_lowercase().contains(&query_lower) {
                    results.push((file.clone(), line.to_string()));
                    matches += 1;
                }
            }
        }

        Ok(results)
    }
}

fn collect_markdown_files<'a>(
    root: &'a Path,
    dir: &'a Path,
    out: &'a mut Vec<String>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = std::io::Result<()>> + 'a>> {
    Box::pin(async move {
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                collect_markdown_files(root, &path, out).await?;
            } else if path.extension().and_then(|e| e.to_str()) == Some("md") {
                if let Ok(relative) = path.strip_prefix(root) {
                    out.push(relative.to_string_lossy().into_owned());
                }
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn write_then_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(dir.path().to_path_buf());
        store.write("notes/idea.md", "hello world").await.unwrap();
        assert_eq!(store.read("notes/idea.md").await.unwrap(), "hello world");
    }

    #[tokio::test]
    async fn search_is_case_insensitive_and_capped() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(dir.path().to_path_buf());
        let body = "Alpha\nalpha again\nALPHA three\nalpha four\nbeta";
        store.write("CORE.md", body).await.unwrap();

        let results = store.search("alpha").await.unwrap();
        assert_eq!(results.len(), MAX_MATCHES_PER_FILE);
    }

    #[tokio::test]
    async fn rejects_path_escape() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(dir.path().to_path_buf());
        assert!(store.write("../outside.md", "x").await.is_err());
    }
}
