//! Classpath entries: directories and `.jar` archives, searched in order.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use zip::ZipArchive;

/// Relative path of a class inside a directory or archive.
fn class_file_path(binary_name: &str) -> String {
    format!("{binary_name}.class")
}

enum Entry {
    Directory(PathBuf),
    Jar(ZipArchive<File>),
}

/// An ordered list of classpath entries.
#[derive(Default)]
pub struct ClassPath {
    entries: Vec<Entry>,
}

impl ClassPath {
    pub fn new() -> ClassPath {
        ClassPath::default()
    }

    pub fn add_directory(&mut self, path: impl Into<PathBuf>) {
        self.entries.push(Entry::Directory(path.into()));
    }

    /// Adds a jar entry; a missing or unreadable archive is skipped with a
    /// warning, matching how the JDK treats bad classpath entries.
    pub fn add_jar(&mut self, path: impl AsRef<Path>) {
        match open_archive(path.as_ref()) {
            Some(archive) => self.entries.push(Entry::Jar(archive)),
            None => warn!("ignoring unreadable classpath entry {}", path.as_ref().display()),
        }
    }

    /// Adds an entry, deciding directory vs. jar from the file type.
    pub fn add_entry(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        if path.is_dir() {
            self.add_directory(path);
        } else {
            self.add_jar(path);
        }
    }

    /// Finds the class file bytes of `binary_name`, first match wins.
    pub fn search(&mut self, binary_name: &str) -> Option<Vec<u8>> {
        let relative = class_file_path(binary_name);
        for entry in &mut self.entries {
            match entry {
                Entry::Directory(dir) => {
                    let full = dir.join(&relative);
                    if let Ok(mut file) = File::open(&full) {
                        debug!("found {binary_name} at {}", full.display());
                        let mut bytes = Vec::new();
                        if file.read_to_end(&mut bytes).is_ok() {
                            return Some(bytes);
                        }
                    }
                }
                Entry::Jar(archive) => {
                    if let Some(bytes) = read_archive_entry(archive, &relative) {
                        debug!("found {binary_name} in archive");
                        return Some(bytes);
                    }
                }
            }
        }
        None
    }
}

/// The bootstrap archive: the single jar holding `java/`, `sun/` and `jdk/`
/// classes, named by the `RT_JAR_PATH` environment variable.
pub struct BootstrapArchive {
    archive: Option<ZipArchive<File>>,
}

impl BootstrapArchive {
    /// Opens the archive named by `RT_JAR_PATH`, if the variable is set and
    /// points at a readable zip.
    pub fn from_env() -> BootstrapArchive {
        let archive = std::env::var_os("RT_JAR_PATH")
            .and_then(|path| open_archive(Path::new(&path)));
        BootstrapArchive { archive }
    }

    pub fn contains(&mut self, binary_name: &str) -> bool {
        let relative = class_file_path(binary_name);
        match &mut self.archive {
            Some(archive) => archive.by_name(&relative).is_ok(),
            None => false,
        }
    }

    pub fn read_as_binary(&mut self, binary_name: &str) -> Option<Vec<u8>> {
        let relative = class_file_path(binary_name);
        read_archive_entry(self.archive.as_mut()?, &relative)
    }
}

fn open_archive(path: &Path) -> Option<ZipArchive<File>> {
    let file = File::open(path).ok()?;
    ZipArchive::new(file).ok()
}

fn read_archive_entry(archive: &mut ZipArchive<File>, name: &str) -> Option<Vec<u8>> {
    let mut entry = archive.by_name(name).ok()?;
    let mut bytes = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut bytes).ok()?;
    Some(bytes)
}
