//! Studio files on disk.
//!
//! Layout:
//! ```text
//! {state_dir}/studios/
//! ├── My Studio.json
//! ├── My Studio.sessions/  # JACK session state, one directory per app
//! ├── %2Ehidden.json       # escaped name
//! └── .rooms/              # room templates
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use ladishproto::{AppLevel, PortFlags, PortType, RoomTemplateInfo, StudioSummary};

use crate::dict::Dict;
use crate::escape::{escape_name, unescape_name};

const EXTENSION: &str = "json";
const SESSIONS_EXTENSION: &str = "sessions";
const ROOM_TEMPLATE_DIR: &str = ".rooms";

/// Bumped when the document layout changes incompatibly.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("studio '{0}' not found")]
    NotFound(String),

    #[error("studio '{0}' already exists")]
    AlreadyExists(String),

    #[error("invalid studio name '{0}'")]
    InvalidName(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed studio file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("room template '{0}' not found")]
    TemplateNotFound(String),

    #[error("room template '{0}' already exists")]
    TemplateExists(String),

    #[error("studio '{name}' is inconsistent: {message}")]
    Corrupt { name: String, message: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;

// ============================================================================
// Document
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudioFile {
    pub format: u32,
    pub name: String,
    #[serde(default)]
    pub jack: JackSection,
    #[serde(default)]
    pub studio: StudioSection,
    #[serde(default)]
    pub apps: Vec<AppEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rooms: Vec<RoomEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JackSection {
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub clients: Vec<ClientEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudioSection {
    #[serde(default)]
    pub dict: Dict,
    #[serde(default)]
    pub clients: Vec<ClientEntry>,
    #[serde(default)]
    pub connections: Vec<ConnectionEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientEntry {
    pub uuid: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<Uuid>,
    #[serde(default)]
    pub ports: Vec<PortEntry>,
    #[serde(default, skip_serializing_if = "Dict::is_empty")]
    pub dict: Dict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortEntry {
    pub uuid: Uuid,
    pub name: String,
    pub port_type: PortType,
    pub flags: PortFlags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_override_uuid: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Dict::is_empty")]
    pub dict: Dict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionEntry {
    pub port1: Uuid,
    pub port2: Uuid,
    #[serde(default, skip_serializing_if = "Dict::is_empty")]
    pub dict: Dict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppEntry {
    pub name: String,
    pub uuid: Uuid,
    pub commandline: String,
    #[serde(default)]
    pub terminal: bool,
    #[serde(default)]
    pub level: AppLevel,
    #[serde(default)]
    pub autorun: bool,
}

/// A room and the ports of its own graph. The studio side of each port is
/// the studio port whose link override is the port's uuid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomEntry {
    pub uuid: Uuid,
    pub name: String,
    pub template: String,
    #[serde(default)]
    pub ports: Vec<RoomPortEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomPortEntry {
    pub uuid: Uuid,
    pub name: String,
    pub port_type: PortType,
    pub flags: PortFlags,
}

impl StudioFile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            format: FORMAT_VERSION,
            name: name.into(),
            jack: JackSection::default(),
            studio: StudioSection::default(),
            apps: Vec::new(),
            rooms: Vec::new(),
        }
    }
}

// ============================================================================
// Store
// ============================================================================

#[derive(Debug, Clone)]
pub struct StudioStore {
    dir: PathBuf,
}

impl StudioStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File a studio called `name` is stored in.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", escape_name(name), EXTENSION))
    }

    /// Directory the JACK session state of a studio's apps lives in.
    pub fn session_dir_for(&self, name: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{}", escape_name(name), SESSIONS_EXTENSION))
    }

    pub fn room_templates(&self) -> RoomTemplateStore {
        RoomTemplateStore::new(self.dir.join(ROOM_TEMPLATE_DIR))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name).is_file()
    }

    /// Every stored studio, sorted by name.
    pub fn list(&self) -> Result<Vec<StudioSummary>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut studios = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(time) => DateTime::<Utc>::from(time),
                Err(e) => {
                    warn!(path = %path.display(), "cannot stat studio file: {}", e);
                    continue;
                }
            };
            studios.push(StudioSummary {
                name: unescape_name(stem),
                modified,
            });
        }
        studios.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(studios)
    }

    pub fn load(&self, name: &str) -> Result<StudioFile> {
        let path = self.path_for(name);
        let contents = fs::read_to_string(&path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                StoreError::NotFound(name.to_string())
            } else {
                StoreError::Io {
                    path: path.clone(),
                    source,
                }
            }
        })?;
        let mut doc: StudioFile =
            serde_json::from_str(&contents).map_err(|source| StoreError::Json {
                path: path.clone(),
                source,
            })?;
        if doc.format > FORMAT_VERSION {
            return Err(StoreError::Corrupt {
                name: name.to_string(),
                message: format!("unsupported format version {}", doc.format),
            });
        }
        // The file name is authoritative
        doc.name = name.to_string();
        debug!(path = %path.display(), "studio loaded");
        Ok(doc)
    }

    /// Write `doc` under its name: temporary file first, then rename. When
    /// `previous` points at another file (the studio was renamed), that file is
    /// removed afterwards.
    pub fn save(&self, doc: &StudioFile, previous: Option<&Path>) -> Result<PathBuf> {
        if doc.name.trim().is_empty() {
            return Err(StoreError::InvalidName(doc.name.clone()));
        }
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: io::Error| StoreError::Io { path, source }
        };

        fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))?;
        let path = self.path_for(&doc.name);
        let json = serde_json::to_string_pretty(doc).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;

        let temp_path = path.with_extension(format!("{}.tmp", EXTENSION));
        fs::write(&temp_path, json).map_err(io_err(&temp_path))?;
        fs::rename(&temp_path, &path).map_err(io_err(&path))?;
        info!(studio = %doc.name, path = %path.display(), "studio saved");

        if let Some(old) = previous.filter(|old| *old != path.as_path()) {
            match fs::remove_file(old) {
                Ok(()) => debug!(path = %old.display(), "removed file of renamed studio"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(StoreError::Io {
                        path: old.to_path_buf(),
                        source,
                    })
                }
            }
        }
        Ok(path)
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        let path = self.path_for(name);
        fs::remove_file(&path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                StoreError::NotFound(name.to_string())
            } else {
                StoreError::Io { path, source }
            }
        })?;
        let sessions = self.session_dir_for(name);
        match fs::remove_dir_all(&sessions) {
            Ok(()) => debug!(path = %sessions.display(), "removed session directory"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %sessions.display(), "cannot remove session directory: {}", e),
        }
        info!(studio = name, "studio deleted");
        Ok(())
    }

    /// Move the session directory that belongs to the studio file `previous`
    /// over to `name`, after a rename. Returns the directory for `name`.
    pub fn adopt_sessions(&self, previous: Option<&Path>, name: &str) -> Result<PathBuf> {
        let target = self.session_dir_for(name);
        let Some(old) = previous.map(|p| p.with_extension(SESSIONS_EXTENSION)) else {
            return Ok(target);
        };
        if old == target || !old.is_dir() || target.exists() {
            return Ok(target);
        }
        fs::rename(&old, &target).map_err(|source| StoreError::Io {
            path: old.clone(),
            source,
        })?;
        info!(from = %old.display(), to = %target.display(), "session directory moved");
        Ok(target)
    }

    /// Check that `old` may be renamed to `new` and return the new file path.
    /// Files are not touched: the old one goes away on the next save.
    pub fn rename(&self, old: &str, new: &str) -> Result<PathBuf> {
        if new.trim().is_empty() {
            return Err(StoreError::InvalidName(new.to_string()));
        }
        if old != new && self.exists(new) {
            return Err(StoreError::AlreadyExists(new.to_string()));
        }
        Ok(self.path_for(new))
    }
}

// ============================================================================
// Room templates
// ============================================================================

#[derive(Debug, Clone)]
pub struct RoomTemplateStore {
    dir: PathBuf,
}

impl RoomTemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", escape_name(name), EXTENSION))
    }

    /// Every template, sorted by name. Unreadable files are skipped.
    pub fn list(&self) -> Result<Vec<RoomTemplateInfo>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut templates = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.load(&unescape_name(stem)) {
                Ok(template) => templates.push(template),
                Err(e) => warn!(path = %path.display(), "skipping room template: {}", e),
            }
        }
        templates.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(templates)
    }

    pub fn load(&self, name: &str) -> Result<RoomTemplateInfo> {
        let path = self.path_for(name);
        let contents = fs::read_to_string(&path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                StoreError::TemplateNotFound(name.to_string())
            } else {
                StoreError::Io {
                    path: path.clone(),
                    source,
                }
            }
        })?;
        let mut template: RoomTemplateInfo =
            serde_json::from_str(&contents).map_err(|source| StoreError::Json { path, source })?;
        template.name = name.to_string();
        Ok(template)
    }

    /// Store a new template. Port names must be unique.
    pub fn create(&self, template: &RoomTemplateInfo) -> Result<()> {
        if template.name.trim().is_empty() {
            return Err(StoreError::InvalidName(template.name.clone()));
        }
        for (i, port) in template.ports.iter().enumerate() {
            if port.name.trim().is_empty()
                || template.ports[..i].iter().any(|p| p.name == port.name)
            {
                return Err(StoreError::InvalidName(port.name.clone()));
            }
        }
        let path = self.path_for(&template.name);
        if path.exists() {
            return Err(StoreError::TemplateExists(template.name.clone()));
        }

        fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let json = serde_json::to_string_pretty(template).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, json).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        info!(template = %template.name, ports = template.ports.len(), "room template created");
        Ok(())
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        let path = self.path_for(name);
        fs::remove_file(&path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                StoreError::TemplateNotFound(name.to_string())
            } else {
                StoreError::Io { path, source }
            }
        })?;
        info!(template = name, "room template deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample(name: &str) -> StudioFile {
        let mut doc = StudioFile::new(name);
        doc.jack.params.insert("driver".to_string(), "alsa".to_string());
        let port = Uuid::new_v4();
        doc.studio.clients.push(ClientEntry {
            uuid: Uuid::new_v4(),
            name: "synth".to_string(),
            app: None,
            ports: vec![PortEntry {
                uuid: port,
                name: "out".to_string(),
                port_type: PortType::Midi,
                flags: PortFlags::OUTPUT,
                link_override_uuid: None,
                dict: Dict::new(),
            }],
            dict: Dict::new(),
        });
        doc.apps.push(AppEntry {
            name: "synth".to_string(),
            uuid: Uuid::new_v4(),
            commandline: "synth --midi".to_string(),
            terminal: false,
            level: AppLevel::L1,
            autorun: true,
        });
        doc
    }

    #[test]
    fn test_save_load_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = StudioStore::new(dir.path().join("studios"));
        assert!(store.list().unwrap().is_empty());

        let doc = sample("a/b");
        let path = store.save(&doc, None).unwrap();
        assert_eq!(path.file_name().unwrap(), "a%2Fb.json");
        assert!(store.exists("a/b"));
        assert_eq!(store.load("a/b").unwrap(), doc);

        let names: Vec<String> = store.list().unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["a/b"]);

        store.delete("a/b").unwrap();
        assert!(matches!(store.delete("a/b"), Err(StoreError::NotFound(_))));
        assert!(matches!(store.load("a/b"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_save_after_rename_removes_old_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = StudioStore::new(dir.path());
        let old_path = store.save(&sample("old"), None).unwrap();
        store.save(&sample("taken"), None).unwrap();

        assert!(matches!(store.rename("old", "taken"), Err(StoreError::AlreadyExists(_))));
        store.rename("old", "new").unwrap();
        assert!(store.exists("old"));

        store.save(&sample("new"), Some(&old_path)).unwrap();
        assert!(!store.exists("old"));
        assert!(store.exists("new"));
    }

    #[test]
    fn test_malformed_file_is_json_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = StudioStore::new(dir.path());
        fs::write(store.path_for("bad"), "{ not json").unwrap();
        assert!(matches!(store.load("bad"), Err(StoreError::Json { .. })));
    }

    #[test]
    fn test_future_format_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = StudioStore::new(dir.path());
        let mut doc = sample("future");
        doc.format = FORMAT_VERSION + 1;
        store.save(&doc, None).unwrap();
        assert!(matches!(store.load("future"), Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn test_sessions_follow_rename_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = StudioStore::new(dir.path());
        let old_path = store.save(&sample("old"), None).unwrap();
        let old_sessions = store.session_dir_for("old");
        assert_eq!(old_sessions.file_name().unwrap(), "old.sessions");
        fs::create_dir_all(old_sessions.join("app")).unwrap();
        fs::write(old_sessions.join("app/state"), "x").unwrap();

        let moved = store.adopt_sessions(Some(&old_path), "new").unwrap();
        assert_eq!(moved, store.session_dir_for("new"));
        assert!(moved.join("app/state").is_file());
        assert!(!old_sessions.exists());

        // Session directories are not listed as studios
        store.save(&sample("new"), Some(&old_path)).unwrap();
        let names: Vec<String> = store.list().unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["new"]);

        store.delete("new").unwrap();
        assert!(!moved.exists());
    }

    #[test]
    fn test_room_templates() {
        let dir = tempfile::tempdir().unwrap();
        let studios = StudioStore::new(dir.path());
        let store = studios.room_templates();
        assert!(store.list().unwrap().is_empty());

        let port = |name: &str, flags| ladishproto::RoomPort {
            name: name.to_string(),
            port_type: PortType::Audio,
            flags,
        };
        let template = RoomTemplateInfo {
            name: "Stereo/Bus".to_string(),
            ports: vec![port("in_l", PortFlags::INPUT), port("in_r", PortFlags::INPUT)],
        };
        store.create(&template).unwrap();
        assert!(matches!(store.create(&template), Err(StoreError::TemplateExists(_))));
        assert!(matches!(
            store.create(&RoomTemplateInfo {
                name: "dup".to_string(),
                ports: vec![port("a", PortFlags::INPUT), port("a", PortFlags::OUTPUT)],
            }),
            Err(StoreError::InvalidName(_))
        ));

        assert_eq!(store.load("Stereo/Bus").unwrap(), template);
        assert_eq!(store.list().unwrap(), vec![template]);
        // Templates do not show up as studios
        assert!(studios.list().unwrap().is_empty());

        store.delete("Stereo/Bus").unwrap();
        assert!(matches!(
            store.load("Stereo/Bus"),
            Err(StoreError::TemplateNotFound(_))
        ));
    }
}
