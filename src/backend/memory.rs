use std::collections::HashMap;

use parking_lot::RwLock;

use super::StoreBackend;
use crate::Error;
use crate::Key;
use crate::Result;

/// In-memory map backend. Objects are cloned on the way out.
#[derive(Debug)]
pub struct MemoryBackend<T> {
    db: RwLock<HashMap<Key, T>>,
}

impl<T> MemoryBackend<T> {
    pub fn new() -> Self {
        Self {
            db: RwLock::new(HashMap::new()),
        }
    }
}

impl<T> Default for MemoryBackend<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> StoreBackend<T> for MemoryBackend<T>
where T: Clone + Send + Sync + 'static
{
    fn read(
        &self,
        key: &Key,
    ) -> Result<T> {
        self.db
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(key.clone()))
    }

    fn exists(
        &self,
        key: &Key,
    ) -> bool {
        self.db.read().contains_key(key)
    }

    fn write(
        &self,
        key: &Key,
        obj: T,
    ) -> Result<()> {
        self.db.write().insert(key.clone(), obj);
        Ok(())
    }

    fn remove(
        &self,
        key: &Key,
    ) -> Result<()> {
        self.db.write().remove(key);
        Ok(())
    }

    fn iterate(
        &self,
        visitor: &mut dyn FnMut(&Key, T),
    ) -> Result<()> {
        for (key, obj) in self.db.read().iter() {
            visitor(key, obj.clone());
        }
        Ok(())
    }
}
