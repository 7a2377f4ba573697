//! Source file reading
//!
//! Script and module sources are fetched through a [`FileReader`]. A process-wide
//! reader can be installed with [`set_file_reader`]; an environment may also
//! carry its own override. Without either, [`DefaultFileReader`] reads from disk.

use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use crate::core::FileReadError;

/// Fetches source bytes for a path.
pub trait FileReader: Send + Sync {
    fn read(&self, path: &Path) -> Result<Vec<u8>, FileReadError>;
}

impl<F> FileReader for F
where
    F: Fn(&Path) -> Result<Vec<u8>, FileReadError> + Send + Sync,
{
    fn read(&self, path: &Path) -> Result<Vec<u8>, FileReadError> {
        self(path)
    }
}

/// Filesystem reader. Each failing step has its own error variant.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultFileReader;

impl FileReader for DefaultFileReader {
    fn read(&self, path: &Path) -> Result<Vec<u8>, FileReadError> {
        let meta = fs::metadata(path).map_err(|source| FileReadError::Stat {
            path: path.to_path_buf(),
            source,
        })?;
        let size = meta.len();
        if size == 0 {
            return Err(FileReadError::Empty {
                path: path.to_path_buf(),
            });
        }

        let mut content = Vec::new();
        usize::try_from(size)
            .ok()
            .and_then(|n| content.try_reserve_exact(n).ok())
            .ok_or_else(|| FileReadError::Alloc {
                path: path.to_path_buf(),
                size,
            })?;

        let mut file = File::open(path).map_err(|source| FileReadError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        file.read_to_end(&mut content)
            .map_err(|source| FileReadError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(content)
    }
}

static FILE_READER: RwLock<Option<Arc<dyn FileReader>>> = RwLock::new(None);

/// Replace the process-wide reader used by every environment without an override.
pub fn set_file_reader(reader: impl FileReader + 'static) {
    let mut slot = FILE_READER.write().unwrap_or_else(PoisonError::into_inner);
    *slot = Some(Arc::new(reader));
}

/// Go back to [`DefaultFileReader`].
pub fn reset_file_reader() {
    let mut slot = FILE_READER.write().unwrap_or_else(PoisonError::into_inner);
    *slot = None;
}

fn global_reader() -> Option<Arc<dyn FileReader>> {
    FILE_READER
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Read `path` as UTF-8 source text, preferring `local` over the process-wide reader.
pub(crate) fn read_source(
    local: Option<&Arc<dyn FileReader>>,
    path: &Path,
) -> Result<String, FileReadError> {
    let bytes = match local.cloned().or_else(global_reader) {
        Some(reader) => reader.read(path)?,
        None => DefaultFileReader.read(path)?,
    };
    String::from_utf8(bytes).map_err(|_| FileReadError::Utf8 {
        path: path.to_path_buf(),
    })
}
