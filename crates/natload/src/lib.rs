//! Layered loading of native dynamic libraries.
//!
//! A [`Loader`] turns a logical library name (`"vad"`) into a mapped module,
//! trying in order:
//! - the system library search path
//! - a by-name load bound to a [`LoadContext`] (when one is given)
//! - a copy bundled in the application's [`ResourceStore`], extracted to a
//!   temp file, loaded, then cleaned up
//!
//! Loaded modules are recorded in a process-wide [`ModuleRegistry`] and stay
//! mapped until the process exits.
//!
//! ```ignore
//! use natload::{DirectoryResources, LoadContext, Loader};
//!
//! let loader = Loader::new(DirectoryResources::new("resources"));
//! let vad = loader.load_in("vad", &LoadContext::new("pluginA"))?;
//! let init: libloading::Symbol<unsafe extern "C" fn() -> i32> = unsafe { vad.get(b"vad_init\0")? };
//! ```

pub mod context;
pub mod error;
pub mod extract;
pub mod linker;
pub mod loader;
pub mod platform;
pub mod registry;
pub mod resources;

pub use context::{BindError, ContextBinder, LoadContext, LocalScopeBinder, UnavailableBinder};
pub use error::{Error, Result};
pub use extract::{Cleanup, ExtractError, TempArtifact, extract_resource};
pub use linker::{LinkFailure, Linker, LoadTarget, SystemLinker};
pub use loader::{Loader, LoaderBuilder, LoaderConfig};
pub use platform::{Arch, Os, Platform, ResourcePath};
pub use registry::{ModuleRegistry, ResolvedLibrary, Strategy};
#[cfg(feature = "embedded")]
pub use resources::EmbeddedResources;
pub use resources::{DirectoryResources, MemoryResources, ResourceStore};
