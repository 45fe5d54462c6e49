//! The fallback loading chain.
//!
//! ```text
//! load_with(name, context)
//!     │
//!     ├── registry hit ──────────────────────────────► done
//!     │
//!     └── TrySystemPath ── found ────────────────────► done
//!             │ not found, no context ───────────────► NotFoundInSearchPath
//!             │ not found, context
//!             ▼
//!         TryContextName ── found ───────────────────► done
//!             │ not found
//!             ▼
//!         TryExtractAndLoad ── no bundled copy ──────► preceding not-found error
//!             │ extracted to temp file
//!             └── load file, clean up temp file ─────► done | NativeLoadFailed
//! ```
//!
//! Any error other than not-found aborts the chain where it happens.

use std::path::PathBuf;
use std::sync::Arc;

use libloading::Library;

use crate::context::{BindError, ContextBinder, LoadContext, LocalScopeBinder};
use crate::error::{Error, Result};
use crate::extract::extract_resource;
use crate::linker::{describe, LinkFailure, Linker, LoadTarget, SystemLinker};
use crate::platform::{DEFAULT_RESOURCE_ROOT, Platform, ResourcePath};
use crate::registry::{ModuleRegistry, ResolvedLibrary, Strategy};
use crate::resources::ResourceStore;

/// Configuration for a [`Loader`].
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Root marker of bundled libraries inside the resource store.
    pub resource_root: String,

    /// Directory extracted libraries are written to.
    pub temp_dir: PathBuf,

    /// Platform whose naming rules are applied.
    pub platform: Platform,

    /// Also extract bundled copies when no context is given.
    ///
    /// Off by default: without a context, a search-path miss is final.
    pub extract_without_context: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            resource_root: DEFAULT_RESOURCE_ROOT.to_string(),
            temp_dir: std::env::temp_dir(),
            platform: Platform::current(),
            extract_without_context: false,
        }
    }
}

impl LoaderConfig {
    /// Default config with bundled libraries under `root`.
    pub fn with_root(root: impl Into<String>) -> Self {
        Self {
            resource_root: root.into(),
            ..Default::default()
        }
    }

    /// Resource path of the bundled copy of `name`.
    pub fn resource_path(&self, name: &str) -> ResourcePath {
        ResourcePath::for_library(&self.resource_root, &self.platform, name)
    }
}

/// One `load_with` call.
struct LoadRequest<'a> {
    name: &'a str,
    context: Option<&'a LoadContext>,
}

enum State<'a> {
    TrySystemPath,
    TryContextName(&'a LoadContext),
    /// Carries the not-found error reported if extraction is impossible.
    TryExtractAndLoad(Error),
    Done(Result<ResolvedLibrary>),
}

/// Resolves logical library names to mapped native modules.
pub struct Loader {
    config: LoaderConfig,
    store: Box<dyn ResourceStore>,
    linker: Box<dyn Linker>,
    binder: Box<dyn ContextBinder>,
    registry: Arc<ModuleRegistry>,
}

impl Loader {
    /// Loader with default settings reading bundled copies from `store`.
    pub fn new(store: impl ResourceStore + 'static) -> Self {
        Self::builder(store).build()
    }

    pub fn builder(store: impl ResourceStore + 'static) -> LoaderBuilder {
        LoaderBuilder {
            config: LoaderConfig::default(),
            store: Box::new(store),
            linker: Box::new(SystemLinker),
            binder: Box::new(LocalScopeBinder),
            registry: ModuleRegistry::global(),
        }
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Load `name` without a context.
    pub fn load(&self, name: &str) -> Result<ResolvedLibrary> {
        self.load_with(name, None)
    }

    /// Load `name` on behalf of `context`.
    pub fn load_in(&self, name: &str, context: &LoadContext) -> Result<ResolvedLibrary> {
        self.load_with(name, Some(context))
    }

    /// Run the fallback chain for `name`.
    pub fn load_with(&self, name: &str, context: Option<&LoadContext>) -> Result<ResolvedLibrary> {
        let request = LoadRequest { name, context };

        if let Some(existing) = self.registry.lookup(name, context.map(LoadContext::id)) {
            tracing::debug!("Library `{}` already loaded ({:?})", name, existing.strategy());
            return Ok(existing);
        }

        let mut state = State::TrySystemPath;
        loop {
            state = match state {
                State::TrySystemPath => self.try_system_path(&request),
                State::TryContextName(context) => self.try_context_name(&request, context),
                State::TryExtractAndLoad(not_found) => self.try_extract_and_load(&request, not_found),
                State::Done(result) => {
                    return result.map(|loaded| {
                        tracing::info!(
                            "Loaded native library `{}` ({:?})",
                            loaded.name(),
                            loaded.strategy()
                        );
                        self.registry.insert_if_absent(loaded)
                    });
                }
            };
        }
    }

    fn try_system_path<'a>(&self, request: &LoadRequest<'a>) -> State<'a> {
        let name = request.name;
        match self.linker.load(LoadTarget::Name(name)) {
            Ok(library) => State::Done(Ok(ResolvedLibrary::by_name(
                name,
                None,
                Strategy::SearchPath,
                library,
            ))),
            Err(LinkFailure::NotFound(source)) => {
                tracing::debug!("Library `{}` not on the search path: {}", name, describe(&source));
                let not_found = Error::NotFoundInSearchPath {
                    name: name.to_string(),
                    source,
                };
                match request.context {
                    Some(context) => State::TryContextName(context),
                    None if self.config.extract_without_context => State::TryExtractAndLoad(not_found),
                    None => State::Done(Err(not_found)),
                }
            }
            Err(LinkFailure::Failed(source)) => State::Done(Err(Error::NativeLoadFailed {
                target: name.to_string(),
                source,
            })),
        }
    }

    fn try_context_name<'a>(&self, request: &LoadRequest<'a>, context: &'a LoadContext) -> State<'a> {
        let name = request.name;
        match self.load_bound(context, LoadTarget::Name(name)) {
            Ok((library, bound)) => State::Done(Ok(ResolvedLibrary::by_name(
                name,
                bound.then(|| context.id()),
                Strategy::Context,
                library,
            ))),
            Err(LinkFailure::NotFound(source)) => {
                tracing::debug!(
                    "Library `{}` not found for context {}: {}",
                    name,
                    context.id(),
                    describe(&source)
                );
                State::TryExtractAndLoad(Error::NotFoundInContext {
                    name: name.to_string(),
                    context: context.id().to_string(),
                    source,
                })
            }
            Err(LinkFailure::Failed(source)) => State::Done(Err(Error::NativeLoadFailed {
                target: name.to_string(),
                source,
            })),
        }
    }

    fn try_extract_and_load<'a>(&self, request: &LoadRequest<'a>, not_found: Error) -> State<'a> {
        let name = request.name;
        let resource = self.config.resource_path(name);

        let artifact = match extract_resource(&*self.store, &resource, &self.config.temp_dir) {
            Ok(artifact) => artifact,
            Err(e) => {
                tracing::debug!("No usable bundled copy of `{}`: {}", name, e);
                return State::Done(Err(not_found));
            }
        };
        let path = artifact.path().to_path_buf();

        let loaded = match request.context {
            Some(context) => self
                .load_bound(context, LoadTarget::Path(&path))
                .map(|(library, bound)| {
                    ResolvedLibrary::extracted(name, bound.then(|| context.id()), &path, library)
                }),
            None => self
                .linker
                .load(LoadTarget::Path(&path))
                .map(|library| ResolvedLibrary::extracted(name, None, &path, library)),
        };

        let cleanup = artifact.cleanup();
        tracing::debug!("Extracted copy {} cleanup: {:?}", path.display(), cleanup);

        State::Done(loaded.map_err(|failure| Error::NativeLoadFailed {
            target: path.display().to_string(),
            source: failure.into_source(),
        }))
    }

    /// Load bound to `context`, degrading to an unconditional load when the
    /// binder cannot bind. The flag reports whether binding happened.
    fn load_bound(
        &self,
        context: &LoadContext,
        target: LoadTarget<'_>,
    ) -> std::result::Result<(Library, bool), LinkFailure> {
        match self.binder.load_in(context, target) {
            Ok(library) => Ok((library, true)),
            Err(BindError::Link(failure)) => Err(failure),
            Err(BindError::Unavailable(reason)) => {
                tracing::debug!(
                    "Binding to context {} unavailable ({}); loading {} unconditionally",
                    context.id(),
                    reason,
                    target
                );
                self.linker.load(target).map(|library| (library, false))
            }
        }
    }
}

/// Builder for [`Loader`].
pub struct LoaderBuilder {
    config: LoaderConfig,
    store: Box<dyn ResourceStore>,
    linker: Box<dyn Linker>,
    binder: Box<dyn ContextBinder>,
    registry: Arc<ModuleRegistry>,
}

impl LoaderBuilder {
    pub fn config(mut self, config: LoaderConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the process-global load primitive.
    pub fn linker(mut self, linker: impl Linker + 'static) -> Self {
        self.linker = Box::new(linker);
        self
    }

    /// Replace the context binding primitive.
    pub fn binder(mut self, binder: impl ContextBinder + 'static) -> Self {
        self.binder = Box::new(binder);
        self
    }

    /// Use a private registry instead of the process-wide one.
    pub fn registry(mut self, registry: Arc<ModuleRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn build(self) -> Loader {
        Loader {
            config: self.config,
            store: self.store,
            linker: self.linker,
            binder: self.binder,
            registry: self.registry,
        }
    }
}
