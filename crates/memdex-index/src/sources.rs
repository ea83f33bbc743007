// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Discovery and reading of source documents.
//!
//! Memory sources are `MEMORY.md`/`memory.md`, every `*.md` below the memory
//! directory and any configured extra paths. Session sources are the
//! `*.jsonl` transcripts of the sessions directory, rendered as plain
//! `User:`/`Assistant:` lines before chunking.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use memdex_config::model::SourcesConfig;
use memdex_core::{MemdexError, SOURCE_MEMORY, SOURCE_SESSIONS};
use serde_json::Value;
use tracing::{debug, warn};

const ROOT_MEMORY_FILES: &[&str] = &["MEMORY.md", "memory.md"];

/// A document found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    /// Logical path, workspace-relative with `/` separators.
    pub path: String,
    pub source: String,
    pub abs_path: PathBuf,
    /// Milliseconds since the Unix epoch.
    pub mtime: i64,
    pub size: i64,
}

/// Resolved on-disk layout of the sources.
#[derive(Debug, Clone)]
pub struct SourceLayout {
    workspace: PathBuf,
    config: SourcesConfig,
}

impl SourceLayout {
    pub fn new(workspace: impl Into<PathBuf>, config: SourcesConfig) -> Self {
        Self {
            workspace: workspace.into(),
            config,
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn memory_dir(&self) -> PathBuf {
        self.workspace.join(&self.config.memory_dir)
    }

    pub fn sessions_dir(&self) -> PathBuf {
        match &self.config.sessions_dir {
            Some(dir) => self.workspace.join(dir),
            None => self.workspace.join(SOURCE_SESSIONS),
        }
    }

    pub fn sessions_enabled(&self) -> bool {
        self.config.sessions
    }

    fn extra_paths(&self) -> impl Iterator<Item = PathBuf> + '_ {
        self.config.extra_paths.iter().map(|p| self.workspace.join(p))
    }

    /// Existing memory roots worth watching for changes.
    pub fn watch_roots(&self) -> Vec<PathBuf> {
        if !self.config.memory {
            return Vec::new();
        }
        let mut roots: Vec<PathBuf> = ROOT_MEMORY_FILES.iter().map(|name| self.workspace.join(name)).collect();
        roots.push(self.memory_dir());
        roots.extend(self.extra_paths());
        roots.retain(|path| path.exists());
        roots.dedup();
        roots
    }

    /// Every document of every enabled source, sorted by source then path.
    pub async fn list_all(&self) -> Result<Vec<SourceDocument>, MemdexError> {
        let mut docs = Vec::new();
        if self.config.memory {
            docs.extend(self.list_memory().await?);
        }
        if self.config.sessions {
            docs.extend(self.list_sessions().await?);
        }
        Ok(docs)
    }

    /// Markdown memory files. Duplicates reached through several roots are
    /// listed once.
    pub async fn list_memory(&self) -> Result<Vec<SourceDocument>, MemdexError> {
        let mut found: BTreeMap<String, SourceDocument> = BTreeMap::new();
        for name in ROOT_MEMORY_FILES {
            let path = self.workspace.join(name);
            if let Some(doc) = self.document(&path, SOURCE_MEMORY).await? {
                found.entry(doc.path.clone()).or_insert(doc);
            }
        }
        let mut roots = vec![self.memory_dir()];
        roots.extend(self.extra_paths());
        for root in roots {
            for path in markdown_files(&root).await? {
                if let Some(doc) = self.document(&path, SOURCE_MEMORY).await? {
                    found.entry(doc.path.clone()).or_insert(doc);
                }
            }
        }
        Ok(found.into_values().collect())
    }

    /// Session transcripts (`*.jsonl`, not recursive).
    pub async fn list_sessions(&self) -> Result<Vec<SourceDocument>, MemdexError> {
        let dir = self.sessions_dir();
        let mut docs = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(docs),
            Err(e) => return Err(MemdexError::io(&dir, e)),
        };
        while let Some(entry) = entries.next_entry().await.map_err(|e| MemdexError::io(&dir, e))? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            if let Some(doc) = self.session_document(&path).await? {
                docs.push(doc);
            }
        }
        docs.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(docs)
    }

    /// Describes one session transcript, `None` if it is not a regular file.
    pub async fn session_document(&self, path: &Path) -> Result<Option<SourceDocument>, MemdexError> {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return Ok(None);
        };
        let mut doc = match self.document(path, SOURCE_SESSIONS).await? {
            Some(doc) => doc,
            None => return Ok(None),
        };
        doc.path = format!("{SOURCE_SESSIONS}/{name}");
        Ok(Some(doc))
    }

    async fn document(&self, path: &Path, source: &str) -> Result<Option<SourceDocument>, MemdexError> {
        let meta = match tokio::fs::symlink_metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(MemdexError::io(path, e)),
        };
        if !meta.is_file() {
            return Ok(None);
        }
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();
        Ok(Some(SourceDocument {
            path: self.logical_path(path),
            source: source.to_string(),
            abs_path: path.to_path_buf(),
            mtime,
            size: meta.len() as i64,
        }))
    }

    /// Workspace-relative path with `/` separators; absolute outside it.
    pub fn logical_path(&self, path: &Path) -> String {
        let relative = path.strip_prefix(&self.workspace).unwrap_or(path);
        relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                Component::RootDir => Some(String::new()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Maps a logical memory path back to its file, rejecting anything that
    /// is not a markdown file inside a memory source.
    pub fn resolve_memory_path(&self, rel_path: &str) -> Result<PathBuf, MemdexError> {
        let rel = rel_path.trim().trim_start_matches("./");
        let candidate = Path::new(rel);
        if rel.is_empty()
            || candidate.is_absolute()
            || candidate.components().any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(MemdexError::Config(format!("invalid memory path: {rel_path}")));
        }
        if candidate.extension().and_then(|e| e.to_str()) != Some("md") {
            return Err(MemdexError::Config(format!("not a markdown file: {rel_path}")));
        }
        let abs = self.workspace.join(candidate);
        let allowed = ROOT_MEMORY_FILES.contains(&rel)
            || abs.starts_with(self.memory_dir())
            || self.extra_paths().any(|extra| abs == extra || abs.starts_with(&extra));
        if !allowed {
            return Err(MemdexError::Config(format!(
                "path is outside the memory sources: {rel_path}"
            )));
        }
        Ok(abs)
    }
}

/// Recursively lists `*.md` files below `root` (or `root` itself if it is
/// one). Symlinks are skipped.
async fn markdown_files(root: &Path) -> Result<Vec<PathBuf>, MemdexError> {
    let meta = match tokio::fs::symlink_metadata(root).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(MemdexError::io(root, e)),
    };
    if meta.is_file() {
        return Ok(if is_markdown(root) {
            vec![root.to_path_buf()]
        } else {
            Vec::new()
        });
    }
    if !meta.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "skipping unreadable memory directory");
                continue;
            }
        };
        while let Some(entry) = entries.next_entry().await.map_err(|e| MemdexError::io(&dir, e))? {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| MemdexError::io(entry.path(), e))?;
            let path = entry.path();
            if file_type.is_symlink() {
                debug!(path = %path.display(), "skipping symlink");
            } else if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() && is_markdown(&path) {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

fn is_markdown(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("md")
}

/// Reads a document as indexable text.
pub async fn read_document(doc: &SourceDocument) -> Result<String, MemdexError> {
    let raw = tokio::fs::read_to_string(&doc.abs_path)
        .await
        .map_err(|e| MemdexError::io(&doc.abs_path, e))?;
    if doc.source == SOURCE_SESSIONS {
        Ok(session_transcript_text(&raw))
    } else {
        Ok(raw)
    }
}

/// Renders a JSONL transcript as `User: ...` / `Assistant: ...` lines.
///
/// Records are either `{role, content}` or wrap one in `message`; content
/// is a string or an array of `{type: "text", text}` parts. Anything else,
/// including malformed lines, is skipped.
pub fn session_transcript_text(raw: &str) -> String {
    raw.lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() {
                return None;
            }
            let record: Value = serde_json::from_str(line).ok()?;
            let message = record.get("message").unwrap_or(&record);
            let speaker = match message.get("role")?.as_str()? {
                "user" => "User",
                "assistant" => "Assistant",
                _ => return None,
            };
            let text = collapse_whitespace(&content_text(message.get("content")?));
            (!text.is_empty()).then(|| format!("{speaker}: {text}"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn content_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter(|part| part.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(" "),
        _ => String::new(),
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(root: &Path) -> SourceLayout {
        SourceLayout::new(
            root,
            SourcesConfig {
                sessions: true,
                extra_paths: vec!["notes/extra.md".into()],
                ..SourcesConfig::default()
            },
        )
    }

    #[test]
    fn transcript_rendering() {
        let raw = r#"{"role":"user","content":"What is the   refund policy?"}
{"type":"session","id":"x"}
{"message":{"role":"assistant","content":[{"type":"text","text":"Thirty days."},{"type":"image"}]}}
not json
{"role":"system","content":"ignored"}
{"role":"user","content":"   "}"#;
        assert_eq!(
            session_transcript_text(raw),
            "User: What is the refund policy?\nAssistant: Thirty days."
        );
    }

    #[tokio::test]
    async fn lists_memory_and_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("MEMORY.md"), "# Root").unwrap();
        std::fs::create_dir_all(root.join("memory/deep")).unwrap();
        std::fs::write(root.join("memory/a.md"), "a").unwrap();
        std::fs::write(root.join("memory/deep/b.md"), "b").unwrap();
        std::fs::write(root.join("memory/skip.txt"), "x").unwrap();
        std::fs::create_dir_all(root.join("notes")).unwrap();
        std::fs::write(root.join("notes/extra.md"), "e").unwrap();
        std::fs::create_dir_all(root.join("sessions")).unwrap();
        std::fs::write(root.join("sessions/s1.jsonl"), "{}").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink(root.join("memory/a.md"), root.join("memory/link.md")).unwrap();

        let docs = layout(root).list_all().await.unwrap();
        let paths: Vec<(&str, &str)> = docs.iter().map(|d| (d.source.as_str(), d.path.as_str())).collect();
        assert_eq!(
            paths,
            vec![
                ("memory", "MEMORY.md"),
                ("memory", "memory/a.md"),
                ("memory", "memory/deep/b.md"),
                ("memory", "notes/extra.md"),
                ("sessions", "sessions/s1.jsonl"),
            ]
        );
    }

    #[tokio::test]
    async fn missing_directories_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(layout(dir.path()).list_all().await.unwrap().is_empty());
    }

    #[test]
    fn memory_paths_are_confined() {
        let dir = tempfile::tempdir().unwrap();
        let layout = layout(dir.path());
        assert!(layout.resolve_memory_path("MEMORY.md").is_ok());
        assert!(layout.resolve_memory_path("memory/deep/b.md").is_ok());
        assert!(layout.resolve_memory_path("notes/extra.md").is_ok());
        assert!(layout.resolve_memory_path("../etc/passwd.md").is_err());
        assert!(layout.resolve_memory_path("memory/a.txt").is_err());
        assert!(layout.resolve_memory_path("other/x.md").is_err());
        assert!(layout.resolve_memory_path("/abs/x.md").is_err());
    }
}
