//! Process-wide native loading primitive.
//!
//! [`Linker`] is the unconditional load: a library opened through it becomes
//! visible to the whole process. [`SystemLinker`] backs it with `libloading`,
//! which defers to `dlopen` on Unix and `LoadLibraryExW` on Windows, so by-name
//! loads honour whatever search path the host has configured
//! (`LD_LIBRARY_PATH`, `DYLD_LIBRARY_PATH`, `PATH`, ...).

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;

use libloading::Library;
use thiserror::Error;

/// `ERROR_MOD_NOT_FOUND` from `LoadLibraryExW`.
const ERROR_MOD_NOT_FOUND: i32 = 126;

/// `dlerror` fragments meaning a file was found but refused. macOS lists every
/// candidate it tried, so one message can carry both a rejection and a
/// "no such file" for some other candidate.
const REJECTION_MARKERS: &[&str] = &[
    "library not loaded",
    "not a mach-o file",
    "incompatible architecture",
    "invalid elf header",
    "wrong elf class",
    "file too short",
];

/// What to load: a logical name resolved by the search mechanism, or an
/// explicit file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadTarget<'a> {
    Name(&'a str),
    Path(&'a Path),
}

impl LoadTarget<'_> {
    /// The string handed to the OS loader (`libvad.so` for `Name("vad")`).
    pub fn file_name(&self) -> OsString {
        match self {
            Self::Name(name) => libloading::library_filename(name),
            Self::Path(path) => path.as_os_str().to_owned(),
        }
    }
}

impl fmt::Display for LoadTarget<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "`{}`", name),
            Self::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Failure of a single native load.
#[derive(Debug, Error)]
pub enum LinkFailure {
    /// The requested file could not be located.
    #[error("not found: {}", describe(.0))]
    NotFound(#[source] libloading::Error),

    /// The file was found but could not be mapped.
    #[error("{}", describe(.0))]
    Failed(#[source] libloading::Error),
}

impl LinkFailure {
    /// Sort a loader error into not-found or hard failure.
    ///
    /// `requested` is what was passed to the OS loader. A missing transitive
    /// dependency is reported under a different file name and therefore lands
    /// in [`LinkFailure::Failed`].
    pub fn classify(error: libloading::Error, requested: &OsStr) -> Self {
        if is_not_found(&error, requested) {
            Self::NotFound(error)
        } else {
            Self::Failed(error)
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn into_source(self) -> libloading::Error {
        match self {
            Self::NotFound(source) | Self::Failed(source) => source,
        }
    }
}

fn is_not_found(error: &libloading::Error, requested: &OsStr) -> bool {
    match error {
        libloading::Error::LoadLibraryExW { .. } => {
            describe(error) == io::Error::from_raw_os_error(ERROR_MOD_NOT_FOUND).to_string()
        }
        libloading::Error::DlOpen { .. } => dlerror_names_missing(&describe(error), requested),
        _ => false,
    }
}

/// True if a `dlerror` message says the requested file itself is missing.
///
/// The file must be the subject of the message: glibc and musl lead with it
/// (`libvad.so: cannot open shared object file: ...`), macOS wraps it in
/// `dlopen(libvad.dylib, 0x0009): ...`. A missing dependency leads with the
/// dependency's name instead.
fn dlerror_names_missing(message: &str, requested: &OsStr) -> bool {
    let message = message.to_lowercase();
    let requested = requested.to_string_lossy().to_lowercase();

    let missing = message.contains("no such file") || message.contains("image not found");
    let rejected = REJECTION_MARKERS.iter().any(|marker| message.contains(marker));
    let subject = message.starts_with(&format!("{}: ", requested))
        || message.starts_with(&format!("error loading shared library {}: ", requested))
        || message.starts_with(&format!("dlopen({}, ", requested));

    missing && !rejected && subject
}

/// Most specific text of a loader error.
///
/// `libloading` keeps the `dlerror`/`GetLastError` text in the error's source
/// and displays only a generic summary itself.
pub(crate) fn describe(error: &libloading::Error) -> String {
    match std::error::Error::source(error) {
        Some(source) => source.to_string(),
        None => error.to_string(),
    }
}

/// Unconditional, process-global load.
pub trait Linker: Send + Sync {
    fn load(&self, target: LoadTarget<'_>) -> Result<Library, LinkFailure>;
}

impl<T: Linker + ?Sized> Linker for Arc<T> {
    fn load(&self, target: LoadTarget<'_>) -> Result<Library, LinkFailure> {
        (**self).load(target)
    }
}

/// [`Linker`] backed by the operating system's dynamic loader.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLinker;

impl Linker for SystemLinker {
    fn load(&self, target: LoadTarget<'_>) -> Result<Library, LinkFailure> {
        let file = target.file_name();
        tracing::trace!("dlopen {:?} (global)", file);
        open_global(&file).map_err(|e| LinkFailure::classify(e, &file))
    }
}

#[cfg(unix)]
fn open_global(file: &OsStr) -> Result<Library, libloading::Error> {
    use libloading::os::unix::{Library as UnixLibrary, RTLD_GLOBAL, RTLD_NOW};

    // SAFETY: running the library's initialisers is the point of loading it;
    // callers only ask for libraries they trust.
    unsafe { UnixLibrary::open(Some(file), RTLD_NOW | RTLD_GLOBAL) }.map(Library::from)
}

#[cfg(not(unix))]
fn open_global(file: &OsStr) -> Result<Library, libloading::Error> {
    // SAFETY: see the Unix variant.
    unsafe { Library::new(file) }
}
