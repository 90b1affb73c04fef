use std::collections::HashMap;
use std::io;
use std::io::{Cursor, Error, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use path_clean::PathClean;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use walkdir::WalkDir;
use zip::ZipArchive;
use crate::error::Result;
use crate::SceneSourceError;

#[derive(Clone)]
enum Container {
    Dir(PathBuf),
    Zip(ZipArchive<Cursor<ZipData>>),
}

#[derive(Clone)]
pub struct ZipData {
    data: Arc<Vec<u8>>,
}

impl AsRef<[u8]> for ZipData {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

/// A read-only view over a scene, either a directory on disk or a zip archive.
///
/// All lookups take paths relative to the scene root and are case insensitive.
pub struct Filesystem {
    lookup: HashMap<PathKey, PathBuf>,
    container: Container,
}

impl Filesystem {
    pub fn from_dir(root: impl Into<PathBuf>) -> Result<Filesystem> {
        let root = root.into();
        let mut paths = vec![];
        for entry in WalkDir::new(&root).follow_links(true) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&root)
                .map(Path::to_path_buf)
                .map_err(|_| SceneSourceError::InvalidPath(entry.path().to_path_buf()))?;
            paths.push(rel);
        }

        Ok(Self {
            lookup: lookup_from_paths(&paths)?,
            container: Container::Dir(root),
        })
    }

    pub async fn from_reader(reader: impl AsyncRead + Unpin) -> Result<Filesystem> {
        let mut data = BufReader::new(reader);
        let peek = read_at_most(&mut data, 64).await?;
        let mut reader = AsyncReadExt::chain(Cursor::new(peek.clone()), data);

        if peek.starts_with(b"PK") {
            let mut bytes = vec![];
            reader.read_to_end(&mut bytes).await?;
            let archive = ZipArchive::new(Cursor::new(ZipData {
                data: Arc::new(bytes),
            }))?;
            // Zip files report directories as entries with no extension, so only keep
            // entries that look like files.
            let file_names: Vec<_> = archive
                .file_names()
                .map(PathBuf::from)
                .filter(|p| p.extension().is_some())
                .collect();
            Ok(Self {
                lookup: lookup_from_paths(&file_names)?,
                container: Container::Zip(archive),
            })
        } else {
            Err(SceneSourceError::UnknownSource)
        }
    }

    /// Directory backing this filesystem, if it lives on disk.
    pub fn root_dir(&self) -> Option<&Path> {
        match &self.container {
            Container::Dir(root) => Some(root),
            Container::Zip(_) => None,
        }
    }

    /// Location on disk a file at `path` would be written to. `None` for archives.
    pub fn writable_path(&self, path: &Path) -> Option<PathBuf> {
        self.root_dir().map(|root| root.join(path))
    }

    pub fn files_with_extension<'a>(
        &'a self,
        extension: &'a str,
    ) -> impl Iterator<Item = PathBuf> + 'a {
        let extension = extension.to_lowercase();

        self.lookup.values().filter_map(move |path| {
            let ext = path
                .extension()
                .and_then(|ext| ext.to_str())?
                .to_lowercase();
            (ext == extension).then(|| path.clone())
        })
    }

    pub fn files_ending_in<'a>(&'a self, end_path: &'a str) -> impl Iterator<Item = PathBuf> + 'a {
        let end_keyed = PathKey::from_path(Path::new(end_path)).0;

        self.lookup
            .iter()
            .filter(move |kv| kv.0.0.ends_with(&end_keyed))
            .map(|kv| kv.1.clone())
    }

    pub fn files_with_stem<'a>(&'a self, filestem: &'a str) -> impl Iterator<Item = PathBuf> + 'a {
        let filestem = filestem.to_lowercase();
        self.lookup.values().filter_map(move |path| {
            let stem = path
                .file_stem()
                .and_then(|stem| stem.to_str())?
                .to_lowercase();
            (stem == filestem).then(|| path.clone())
        })
    }

    /// Files directly inside `dir`, sorted by path.
    pub fn files_in_dir(&self, dir: &Path) -> Vec<PathBuf> {
        let dir_key = PathKey::from_path(dir).0;
        let mut files: Vec<_> = self
            .lookup
            .iter()
            .filter(|(key, _)| {
                key.0
                    .strip_prefix(&dir_key)
                    .and_then(|rest| rest.strip_prefix('/'))
                    .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
            })
            .map(|(_, path)| path.clone())
            .collect();
        files.sort();
        files
    }

    pub fn exists(&self, path: &Path) -> bool {
        if self.lookup.contains_key(&PathKey::from_path(path)) {
            return true;
        }
        // Directories pick up files written after the lookup was built.
        match &self.container {
            Container::Dir(root) => root.join(path).is_file(),
            Container::Zip(_) => false,
        }
    }

    pub fn dir_exists(&self, dir: &Path) -> bool {
        if let Container::Dir(root) = &self.container {
            if root.join(dir).is_dir() {
                return true;
            }
        }
        let prefix = PathKey::from_path(dir).0 + "/";
        self.lookup.keys().any(|key| key.0.starts_with(&prefix))
    }

    pub async fn reader_at_path(&self, path: &Path) -> io::Result<Box<dyn AsyncRead + Unpin + Send>> {
        let key = PathKey::from_path(path);
        let stored = self.lookup.get(&key);

        match &self.container {
            Container::Dir(root) => {
                let full = root.join(stored.map(PathBuf::as_path).unwrap_or(path));
                let file = tokio::fs::File::open(&full).await.map_err(|e| {
                    Error::new(e.kind(), format!("File not found: {}", full.display()))
                })?;
                Ok(Box::new(BufReader::new(file)))
            }
            Container::Zip(archive) => {
                let stored = stored.ok_or_else(|| {
                    Error::new(
                        io::ErrorKind::NotFound,
                        format!("File not found: {}", path.display()),
                    )
                })?;
                let name = stored
                    .to_str()
                    .ok_or_else(|| Error::new(io::ErrorKind::InvalidInput, "Invalid UTF-8 in zip file"))?
                    .replace('\\', "/");
                let mut buffer = vec![];
                archive
                    .clone()
                    .by_name(&name)
                    .map_err(|e| Error::new(io::ErrorKind::NotFound, e))?
                    .read_to_end(&mut buffer)?;
                Ok(Box::new(Cursor::new(buffer)))
            }
        }
    }

    pub async fn read_to_end(&self, path: &Path) -> io::Result<Vec<u8>> {
        let mut bytes = vec![];
        self.reader_at_path(path).await?.read_to_end(&mut bytes).await?;
        Ok(bytes)
    }
}

async fn read_at_most<R: AsyncRead + Unpin>(reader: &mut R, limit: usize) -> io::Result<Vec<u8>> {
    let mut buffer = vec![0; limit];
    let bytes_read = reader.read(&mut buffer).await?;
    buffer.truncate(bytes_read);
    Ok(buffer)
}

#[derive(Debug, Eq, PartialEq, Hash)]
struct PathKey(String);

impl PathKey {
    fn from_path(path: &Path) -> Self {
        let key = path
            .clean()
            .to_string_lossy()
            .to_lowercase()
            .replace('\\', "/");
        let key = key.trim_end_matches('/');
        let key = if key.starts_with('/') {
            key.to_owned()
        } else {
            format!("/{key}")
        };
        Self(key)
    }
}

fn lookup_from_paths(paths: &[PathBuf]) -> Result<HashMap<PathKey, PathBuf>> {
    let mut result = HashMap::new();
    for path in paths {
        let path = path.clean();
        if path.components().any(|c| c.as_os_str() == "__MACOSX") {
            continue;
        }
        let key = PathKey::from_path(&path);
        if result.insert(key, path.clone()).is_some() {
            return Err(SceneSourceError::DuplicatePath(path));
        }
    }
    Ok(result)
}
