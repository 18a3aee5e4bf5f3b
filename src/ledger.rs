//! Per-album manifest of already-downloaded item URLs.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

const LEDGER_FILE: &str = "already_downloaded.txt";
const EXPORT_FILE: &str = "url_list.txt";

/// Append-only, line-delimited URL set backed by `already_downloaded.txt`.
///
/// Entries are recorded only after a verified successful download; a URL
/// present here is never fetched again. Creation is lazy: the file appears
/// on the first record.
pub struct Ledger {
    path: PathBuf,
    seen: HashSet<String>,
}

impl Ledger {
    /// Load the manifest for an album directory, empty if none exists yet.
    pub fn load(album_dir: &Path) -> std::io::Result<Self> {
        let path = album_dir.join(LEDGER_FILE);
        let seen = match std::fs::read_to_string(&path) {
            Ok(content) => content.lines().map(str::to_string).collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => return Err(e),
        };
        Ok(Self { path, seen })
    }

    pub fn contains(&self, url: &str) -> bool {
        self.seen.contains(url)
    }

    /// Append a verified URL. A repeat record is a no-op.
    pub fn record(&mut self, url: &str) -> std::io::Result<()> {
        if !self.seen.insert(url.to_string()) {
            return Ok(());
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{url}")?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Append one URL to the export list used by `--export` mode.
pub fn export_url(album_dir: &Path, url: &str) -> std::io::Result<PathBuf> {
    let path = album_dir.join(EXPORT_FILE);
    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
    writeln!(file, "{url}")?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creation_is_lazy() {
        let dir = tempdir().unwrap();
        let ledger = Ledger::load(dir.path()).unwrap();
        assert!(ledger.is_empty());
        assert!(!dir.path().join(LEDGER_FILE).exists());
    }

    #[test]
    fn recording_twice_writes_one_line() {
        let dir = tempdir().unwrap();
        let mut ledger = Ledger::load(dir.path()).unwrap();
        ledger.record("https://cdn.example.net/a.mp4").unwrap();
        ledger.record("https://cdn.example.net/a.mp4").unwrap();
        assert_eq!(ledger.len(), 1);

        let content = std::fs::read_to_string(dir.path().join(LEDGER_FILE)).unwrap();
        assert_eq!(content, "https://cdn.example.net/a.mp4\n");
    }

    #[test]
    fn entries_survive_a_reload() {
        let dir = tempdir().unwrap();
        let mut ledger = Ledger::load(dir.path()).unwrap();
        ledger.record("https://cdn.example.net/a.mp4").unwrap();
        ledger.record("https://cdn.example.net/b.jpg").unwrap();

        let reloaded = Ledger::load(dir.path()).unwrap();
        assert!(reloaded.contains("https://cdn.example.net/a.mp4"));
        assert!(reloaded.contains("https://cdn.example.net/b.jpg"));
        assert!(!reloaded.contains("https://cdn.example.net/c.bin"));
    }

    #[test]
    fn export_appends_to_url_list() {
        let dir = tempdir().unwrap();
        export_url(dir.path(), "https://cdn.example.net/a.mp4").unwrap();
        let path = export_url(dir.path(), "https://cdn.example.net/b.jpg").unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
