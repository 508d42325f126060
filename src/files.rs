use std::{
    cell::RefCell,
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    rc::Rc,
};

/// Source of included and `INCBIN`'d files.
pub trait FileProvider {
    /// Resolved name and contents of `path`, searched relative to `requesting_file` when not
    /// found as given. The name identifies the file from then on, and is the requester for
    /// its own includes. `binary` is set for `INCBIN`; text callers expect UTF-8.
    fn retrieve(
        &mut self,
        path: &str,
        requesting_file: &str,
        binary: bool,
    ) -> Option<(String, Vec<u8>)>;
}

/// Shared provider, so the caller can inspect it once the assembler is done.
impl<F: FileProvider> FileProvider for Rc<RefCell<F>> {
    fn retrieve(
        &mut self,
        path: &str,
        requesting_file: &str,
        binary: bool,
    ) -> Option<(String, Vec<u8>)> {
        self.borrow_mut().retrieve(path, requesting_file, binary)
    }
}

/// Files on disk, searched like a C preprocessor: as given, beside the including file,
/// then in each include directory in order.
#[derive(Debug, Default)]
pub struct DiskFiles {
    include_dirs: Vec<PathBuf>,
    /// Every file successfully read, for `-M` dependency output.
    pub resolved: Vec<PathBuf>,
}

impl DiskFiles {
    pub fn new(include_dirs: Vec<PathBuf>) -> Self {
        Self {
            include_dirs,
            resolved: Vec::new(),
        }
    }

    fn resolve(&self, path: &str, requesting_file: &str) -> Option<PathBuf> {
        if let Ok(found) = fs::canonicalize(path) {
            return Some(found);
        }
        let mut base = PathBuf::from(requesting_file);
        base.pop();
        base.push(path);
        if let Ok(found) = fs::canonicalize(&base) {
            return Some(found);
        }
        self.include_dirs
            .iter()
            .find_map(|dir| fs::canonicalize(dir.join(path)).ok())
    }
}

impl FileProvider for DiskFiles {
    fn retrieve(
        &mut self,
        path: &str,
        requesting_file: &str,
        binary: bool,
    ) -> Option<(String, Vec<u8>)> {
        let found = self.resolve(path, requesting_file)?;
        let bytes = match fs::read(&found) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!("cant read {}: {e}", found.display());
                return None;
            }
        };
        tracing::debug!(
            "retrieved {} ({} bytes{})",
            found.display(),
            bytes.len(),
            if binary { ", binary" } else { "" }
        );
        let name = found.to_string_lossy().into_owned();
        if !self.resolved.contains(&found) {
            self.resolved.push(found);
        }
        Some((name, bytes))
    }
}

/// In-memory files keyed by path; the requesting file's directory is tried as a prefix.
#[derive(Debug, Default, Clone)]
pub struct MemoryFiles {
    files: HashMap<String, Vec<u8>>,
}

impl MemoryFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, contents: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), contents.into());
    }

    pub fn with(mut self, path: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.insert(path, contents);
        self
    }
}

impl FileProvider for MemoryFiles {
    fn retrieve(
        &mut self,
        path: &str,
        requesting_file: &str,
        _binary: bool,
    ) -> Option<(String, Vec<u8>)> {
        if let Some(contents) = self.files.get(path) {
            return Some((path.to_string(), contents.clone()));
        }
        let sibling = Path::new(requesting_file).parent()?.join(path);
        let sibling = sibling.to_str()?;
        let contents = self.files.get(sibling)?;
        Some((sibling.to_string(), contents.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_files_search_beside_the_requester() {
        let mut files = MemoryFiles::new()
            .with("src/inc/hw.inc", "rLY EQU $FF44")
            .with("top.asm", "");
        assert_eq!(
            files.retrieve("inc/hw.inc", "src/main.asm", false),
            Some(("src/inc/hw.inc".to_string(), b"rLY EQU $FF44".to_vec()))
        );
        assert!(files.retrieve("top.asm", "src/main.asm", false).is_some());
        assert!(files.retrieve("missing.inc", "src/main.asm", false).is_none());
    }

    #[test]
    fn disk_files_report_missing_paths() {
        let mut files = DiskFiles::new(Vec::new());
        assert!(files
            .retrieve("definitely/not/here.inc", "nowhere.asm", false)
            .is_none());
        assert!(files.resolved.is_empty());
    }

    #[test]
    fn shared_provider_forwards_lookups() {
        let files = Rc::new(RefCell::new(MemoryFiles::new().with("a.inc", "x")));
        let mut handle = Rc::clone(&files);
        assert_eq!(
            handle.retrieve("a.inc", "", false),
            Some(("a.inc".to_string(), b"x".to_vec()))
        );
    }
}
