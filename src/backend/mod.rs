mod file;
mod memory;


pub use file::*;
pub use memory::*;

use crate::Key;
use crate::Result;

/// Raw keyed persistence consumed by [`Store`](crate::Store).
///
/// A backend supplies point lookup, existence check, create-or-replace
/// write, removal and full-set iteration. Diff computation, notification
/// and admission control all live above this trait; a backend's encoding
/// format and layout are its own business.
pub trait StoreBackend<T: 'static>: Send + Sync + 'static {
    /// Point lookup. Fails with `NotFound` when the key is absent, or a
    /// backend error on a decode failure.
    fn read(
        &self,
        key: &Key,
    ) -> Result<T>;

    fn exists(
        &self,
        key: &Key,
    ) -> bool;

    /// Create-or-replace write.
    fn write(
        &self,
        key: &Key,
        obj: T,
    ) -> Result<()>;

    /// Removal. Absence is not an error at this layer; the store handles
    /// idempotent delete itself.
    fn remove(
        &self,
        key: &Key,
    ) -> Result<()>;

    /// Full scan in backend-defined (typically arbitrary) order.
    fn iterate(
        &self,
        visitor: &mut dyn FnMut(&Key, T),
    ) -> Result<()>;
}

// `automock` cannot handle `iterate`'s `&mut dyn FnMut` argument
// (https://github.com/asomers/mockall/issues/139), so the mock is built
// manually: the four mockable methods go through `mock!`, and `iterate`
// panics like any mock method called without an expectation.
#[cfg(test)]
mockall::mock! {
    pub StoreBackend<T: Send + Sync + 'static> {
        pub fn read(&self, key: &Key) -> Result<T>;
        pub fn exists(&self, key: &Key) -> bool;
        pub fn write(&self, key: &Key, obj: T) -> Result<()>;
        pub fn remove(&self, key: &Key) -> Result<()>;
    }
}

#[cfg(test)]
impl<T: Send + Sync + 'static> StoreBackend<T> for MockStoreBackend<T> {
    fn read(
        &self,
        key: &Key,
    ) -> Result<T> {
        MockStoreBackend::read(self, key)
    }

    fn exists(
        &self,
        key: &Key,
    ) -> bool {
        MockStoreBackend::exists(self, key)
    }

    fn write(
        &self,
        key: &Key,
        obj: T,
    ) -> Result<()> {
        MockStoreBackend::write(self, key, obj)
    }

    fn remove(
        &self,
        key: &Key,
    ) -> Result<()> {
        MockStoreBackend::remove(self, key)
    }

    fn iterate(
        &self,
        _visitor: &mut dyn FnMut(&Key, T),
    ) -> Result<()> {
        panic!("MockStoreBackend::iterate: expectations cannot be set for Fn-object arguments")
    }
}
