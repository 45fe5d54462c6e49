//! Read-only stores of bundled native libraries.
//!
//! Entries are addressed by resource path (`/natives/linux-x86-64/libvad.so`).
//! The leading slash is optional; stores strip it before lookup.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

/// Addressable, read-only resource bundle shipped with the application.
pub trait ResourceStore: Send + Sync {
    /// Contents of the resource at `path`.
    ///
    /// `Ok(None)` means the entry does not exist. `Err` is reserved for entries
    /// that exist but cannot be read.
    fn get(&self, path: &str) -> io::Result<Option<Cow<'static, [u8]>>>;
}

impl<T: ResourceStore + ?Sized> ResourceStore for Arc<T> {
    fn get(&self, path: &str) -> io::Result<Option<Cow<'static, [u8]>>> {
        (**self).get(path)
    }
}

fn relative(path: &str) -> &str {
    path.strip_prefix('/').unwrap_or(path)
}

/// Resources compiled into the binary with `rust-embed`.
///
/// ```ignore
/// #[derive(rust_embed::Embed)]
/// #[folder = "natives/"]
/// #[prefix = "natives/"]
/// struct Natives;
///
/// let loader = natload::Loader::builder(EmbeddedResources::<Natives>::new()).build();
/// ```
#[cfg(feature = "embedded")]
pub struct EmbeddedResources<E> {
    _marker: std::marker::PhantomData<fn() -> E>,
}

#[cfg(feature = "embedded")]
impl<E: rust_embed::Embed> EmbeddedResources<E> {
    pub fn new() -> Self {
        Self {
            _marker: std::marker::PhantomData,
        }
    }

    /// List all embedded entries (for debugging).
    pub fn list(&self) -> Vec<String> {
        E::iter().map(|s| s.to_string()).collect()
    }
}

#[cfg(feature = "embedded")]
impl<E: rust_embed::Embed> Default for EmbeddedResources<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "embedded")]
impl<E: rust_embed::Embed> ResourceStore for EmbeddedResources<E> {
    fn get(&self, path: &str) -> io::Result<Option<Cow<'static, [u8]>>> {
        Ok(E::get(relative(path)).map(|file| file.data))
    }
}

/// Resources laid out under a directory on disk.
#[derive(Debug, Clone)]
pub struct DirectoryResources {
    root: PathBuf,
}

impl DirectoryResources {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ResourceStore for DirectoryResources {
    fn get(&self, path: &str) -> io::Result<Option<Cow<'static, [u8]>>> {
        match fs::read(self.root.join(relative(path))) {
            Ok(bytes) => Ok(Some(Cow::Owned(bytes))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Resources held in memory, e.g. from `include_bytes!`.
#[derive(Debug, Clone, Default)]
pub struct MemoryResources {
    entries: HashMap<String, Cow<'static, [u8]>>,
}

impl MemoryResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: &str, bytes: impl Into<Cow<'static, [u8]>>) -> Self {
        self.insert(path, bytes);
        self
    }

    pub fn insert(&mut self, path: &str, bytes: impl Into<Cow<'static, [u8]>>) {
        self.entries.insert(relative(path).to_string(), bytes.into());
    }
}

impl ResourceStore for MemoryResources {
    fn get(&self, path: &str) -> io::Result<Option<Cow<'static, [u8]>>> {
        Ok(self.entries.get(relative(path)).cloned())
    }
}
