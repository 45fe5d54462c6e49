//! Load contexts and context-bound loading.
//!
//! A [`LoadContext`] is an isolation boundary inside the process, typically a
//! plugin. Loading a library *into* a context means the context owns the
//! resulting module: its private library directories are searched first and,
//! where the platform allows it, the module's symbols stay scoped to the
//! context's handle instead of joining the global namespace.
//!
//! Binding is a privileged, platform-specific operation. A [`ContextBinder`]
//! that cannot bind reports [`BindError::Unavailable`]; the loader then falls
//! back to an ordinary process-global load.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::Library;
use thiserror::Error;

use crate::linker::{LinkFailure, LoadTarget};

/// An isolation boundary that can own native modules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadContext {
    id: String,
    library_dirs: Vec<PathBuf>,
}

impl LoadContext {
    /// Create a context with no private library directories.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            library_dirs: Vec::new(),
        }
    }

    /// Add a directory searched before the system path on context-bound loads.
    pub fn with_library_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.library_dirs.push(dir.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn library_dirs(&self) -> &[PathBuf] {
        &self.library_dirs
    }

    /// First file in the context's directories matching the OS-native name
    /// for `name`.
    pub fn locate(&self, name: &str) -> Option<PathBuf> {
        let file_name = libloading::library_filename(name);
        self.library_dirs
            .iter()
            .map(|dir| dir.join(&file_name))
            .find(|candidate| candidate.is_file())
    }
}

/// Why a context-bound load did not produce a module.
#[derive(Debug, Error)]
pub enum BindError {
    /// Binding is not possible here; the caller should load unconditionally.
    #[error("context binding unavailable: {0}")]
    Unavailable(&'static str),

    /// Binding was attempted and the native load failed.
    #[error(transparent)]
    Link(#[from] LinkFailure),
}

/// Loads a module with a [`LoadContext`] as its owner.
pub trait ContextBinder: Send + Sync {
    fn load_in(&self, context: &LoadContext, target: LoadTarget<'_>) -> Result<Library, BindError>;
}

impl<T: ContextBinder + ?Sized> ContextBinder for Arc<T> {
    fn load_in(&self, context: &LoadContext, target: LoadTarget<'_>) -> Result<Library, BindError> {
        (**self).load_in(context, target)
    }
}

/// Binds by opening with local symbol scope after probing the context's
/// library directories.
///
/// Unix only; elsewhere every call is [`BindError::Unavailable`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalScopeBinder;

impl ContextBinder for LocalScopeBinder {
    #[cfg(unix)]
    fn load_in(&self, context: &LoadContext, target: LoadTarget<'_>) -> Result<Library, BindError> {
        let file = match target {
            LoadTarget::Name(name) => context
                .locate(name)
                .map(PathBuf::into_os_string)
                .unwrap_or_else(|| target.file_name()),
            LoadTarget::Path(_) => target.file_name(),
        };

        tracing::trace!("dlopen {:?} (local to context {})", file, context.id());
        open_local(Path::new(&file))
            .map_err(|e| BindError::Link(LinkFailure::classify(e, &file)))
    }

    #[cfg(not(unix))]
    fn load_in(&self, _context: &LoadContext, _target: LoadTarget<'_>) -> Result<Library, BindError> {
        Err(BindError::Unavailable("no scoped symbol visibility on this platform"))
    }
}

#[cfg(unix)]
fn open_local(file: &Path) -> Result<Library, libloading::Error> {
    use libloading::os::unix::{Library as UnixLibrary, RTLD_LOCAL, RTLD_NOW};

    // SAFETY: as for the global load, initialisers of trusted libraries run here.
    unsafe { UnixLibrary::open(Some(file), RTLD_NOW | RTLD_LOCAL) }.map(Library::from)
}

/// Binder for deployments where context binding is not permitted.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableBinder;

impl ContextBinder for UnavailableBinder {
    fn load_in(&self, _context: &LoadContext, _target: LoadTarget<'_>) -> Result<Library, BindError> {
        Err(BindError::Unavailable("context binding disabled"))
    }
}
