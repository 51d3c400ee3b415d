use std::fs;
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::Path;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use super::StoreBackend;
use crate::BackendError;
use crate::Error;
use crate::Key;
use crate::Result;

const OBJECT_SUFFIX: &str = "json";

/// File-tree backend storing one JSON document per object.
///
/// Layout: `root/<namespace>/<name>.json` for namespaced keys,
/// `root/<name>.json` for cluster-scoped ones. Iteration walks that
/// two-level tree; undecodable documents are logged and skipped so one
/// corrupt file cannot abort a full scan.
pub struct FileBackend<T> {
    root: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> FileBackend<T> {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| BackendError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self {
            root,
            _marker: PhantomData,
        })
    }

    fn object_path(
        &self,
        key: &Key,
    ) -> PathBuf {
        let file_name = format!("{}.{}", key.name, OBJECT_SUFFIX);
        match &key.namespace {
            Some(namespace) => self.root.join(namespace).join(file_name),
            None => self.root.join(file_name),
        }
    }
}

impl<T> FileBackend<T>
where T: DeserializeOwned
{
    fn decode_file(
        &self,
        key: &Key,
        path: &Path,
    ) -> Result<T> {
        let content = fs::read(path).map_err(|source| {
            if source.kind() == ErrorKind::NotFound {
                Error::NotFound(key.clone())
            } else {
                Error::Backend(BackendError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        })?;
        serde_json::from_slice(&content).map_err(|source| {
            Error::Backend(BackendError::Decode {
                key: key.to_string(),
                source,
            })
        })
    }
}

fn key_from_entry(
    namespace: Option<&str>,
    path: &Path,
) -> Option<Key> {
    if path.extension().and_then(|ext| ext.to_str()) != Some(OBJECT_SUFFIX) {
        return None;
    }
    let name = path.file_stem()?.to_str()?.to_string();
    Some(match namespace {
        Some(namespace) => Key::new(namespace, name),
        None => Key::cluster_scoped(name),
    })
}

impl<T> StoreBackend<T> for FileBackend<T>
where T: Serialize + DeserializeOwned + Send + Sync + 'static
{
    fn read(
        &self,
        key: &Key,
    ) -> Result<T> {
        self.decode_file(key, &self.object_path(key))
    }

    fn exists(
        &self,
        key: &Key,
    ) -> bool {
        self.object_path(key).is_file()
    }

    fn write(
        &self,
        key: &Key,
        obj: T,
    ) -> Result<()> {
        let path = self.object_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| BackendError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let content = serde_json::to_vec_pretty(&obj).map_err(|source| BackendError::Encode {
            key: key.to_string(),
            source,
        })?;
        fs::write(&path, content).map_err(|source| {
            Error::Backend(BackendError::Io {
                path,
                source,
            })
        })
    }

    fn remove(
        &self,
        key: &Key,
    ) -> Result<()> {
        let path = self.object_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            // already absent is non-fatal at this layer
            Err(source) if source.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(Error::Backend(BackendError::Io {
                path,
                source,
            })),
        }
    }

    fn iterate(
        &self,
        visitor: &mut dyn FnMut(&Key, T),
    ) -> Result<()> {
        let entries = fs::read_dir(&self.root).map_err(|source| BackendError::Io {
            path: self.root.clone(),
            source,
        })?;
        for entry in entries {
            let entry = entry.map_err(|source| BackendError::Io {
                path: self.root.clone(),
                source,
            })?;
            let path = entry.path();
            if path.is_dir() {
                let Some(namespace) = path.file_name().and_then(|n| n.to_str()).map(String::from)
                else {
                    continue;
                };
                let namespaced = fs::read_dir(&path).map_err(|source| BackendError::Io {
                    path: path.clone(),
                    source,
                })?;
                for entry in namespaced {
                    let entry = entry.map_err(|source| BackendError::Io {
                        path: path.clone(),
                        source,
                    })?;
                    self.visit_file(Some(&namespace), &entry.path(), visitor);
                }
            } else {
                self.visit_file(None, &path, visitor);
            }
        }
        Ok(())
    }
}

impl<T> FileBackend<T>
where T: DeserializeOwned
{
    fn visit_file(
        &self,
        namespace: Option<&str>,
        path: &Path,
        visitor: &mut dyn FnMut(&Key, T),
    ) {
        let Some(key) = key_from_entry(namespace, path) else {
            return;
        };
        match self.decode_file(&key, path) {
            Ok(obj) => visitor(&key, obj),
            Err(error) => {
                warn!(key = %key, %error, "skipping undecodable object during scan");
            }
        }
    }
}
