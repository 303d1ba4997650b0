use std::collections::BTreeSet;
use std::io::Result;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

pub type Entries = BTreeSet<Entry>;

#[derive(Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Entry {
    /// Path relative to the walked directory.
    pub path: PathBuf,
    pub len: u64,
    pub modified: SystemTime,
}

/// Lists every gzip export under `path`, recursively.
pub fn read_dir(path: &Path) -> Result<Entries> {
    let mut set = BTreeSet::new();
    for entry in WalkDir::new(path).follow_links(true) {
        let entry = entry?;
        let gzip = entry.path().extension().map_or(false, |ext| ext == "gz");
        if !entry.file_type().is_file() || !gzip {
            continue;
        }
        let metadata = entry.metadata()?;
        set.insert(Entry {
            path: entry
                .path()
                .strip_prefix(path)
                .unwrap_or_else(|_| entry.path())
                .to_path_buf(),
            len: metadata.len(),
            modified: metadata.modified()?,
        });
    }
    Ok(set)
}

#[cfg(test)]
#[test]
fn test_read_dir() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir(dir.path().join("2024")).unwrap();
    std::fs::write(dir.path().join("2024").join("results.json.gz"), b"x").unwrap();
    std::fs::write(dir.path().join("sessions.json.gz"), b"xyz").unwrap();
    std::fs::write(dir.path().join("README"), b"ignored").unwrap();

    let entries = read_dir(dir.path()).unwrap();
    let paths: Vec<_> = entries.iter().map(|e| e.path.clone()).collect();
    assert_eq!(
        paths,
        vec![
            Path::new("2024").join("results.json.gz"),
            PathBuf::from("sessions.json.gz"),
        ]
    );
    assert_eq!(entries.iter().map(|e| e.len).sum::<u64>(), 4);
}
