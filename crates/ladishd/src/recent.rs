//! Most-recently-used studio names.

use std::fs;
use std::io;
use std::path::PathBuf;

use tracing::{debug, warn};

/// Names live one per line, newest first.
#[derive(Debug)]
pub struct RecentStore {
    path: PathBuf,
    max_items: usize,
    names: Vec<String>,
}

impl RecentStore {
    /// Open the list at `path`. A missing or unreadable file is an empty list.
    pub fn open(path: impl Into<PathBuf>, max_items: usize) -> Self {
        let path = path.into();
        let names = match fs::read_to_string(&path) {
            Ok(contents) => contents
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .take(max_items)
                .map(String::from)
                .collect(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!(path = %path.display(), "cannot read recent studios: {}", e);
                Vec::new()
            }
        };
        Self {
            path,
            max_items,
            names,
        }
    }

    /// Up to `max` names, newest first.
    pub fn get(&self, max: usize) -> Vec<String> {
        self.names.iter().take(max).cloned().collect()
    }

    /// Move `name` to the front.
    pub fn touch(&mut self, name: &str) -> io::Result<()> {
        if self.names.first().map(String::as_str) == Some(name) {
            return Ok(());
        }
        self.names.retain(|n| n != name);
        self.names.insert(0, name.to_string());
        self.names.truncate(self.max_items);
        self.write()
    }

    pub fn remove(&mut self, name: &str) -> io::Result<()> {
        let before = self.names.len();
        self.names.retain(|n| n != name);
        if self.names.len() == before {
            return Ok(());
        }
        self.write()
    }

    /// Replace `old` with `new` in place.
    pub fn rename(&mut self, old: &str, new: &str) -> io::Result<()> {
        let Some(pos) = self.names.iter().position(|n| n == old) else {
            return Ok(());
        };
        self.names[pos] = new.to_string();
        let mut idx = 0;
        self.names.retain(|n| {
            let keep = idx == pos || n != new;
            idx += 1;
            keep
        });
        self.write()
    }

    fn write(&self) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut contents = self.names.join("\n");
        contents.push('\n');
        fs::write(&self.path, contents)?;
        debug!(path = %self.path.display(), count = self.names.len(), "recent studios written");
        Ok(())
    }
}
