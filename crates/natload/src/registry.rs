//! Process-wide record of mapped native modules.
//!
//! A native module cannot be meaningfully unmapped once other code may hold
//! pointers into it, so the registry only ever grows: entries are inserted if
//! absent and live until the process exits. There is no removal API.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use libloading::{Library, Symbol};

/// Which step of the fallback chain produced a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Found by logical name on the system search path.
    SearchPath,
    /// Found by logical name while bound to a load context.
    Context,
    /// Extracted from the resource store into a temp file.
    Extracted,
}

/// A successfully loaded native module.
///
/// Cloning is cheap; all clones share the same handle.
#[derive(Debug, Clone)]
pub struct ResolvedLibrary {
    name: String,
    context: Option<String>,
    strategy: Strategy,
    physical_path: Option<PathBuf>,
    is_temporary: bool,
    handle: Arc<Library>,
}

impl ResolvedLibrary {
    /// Module found through a by-name strategy.
    pub(crate) fn by_name(
        name: &str,
        context: Option<&str>,
        strategy: Strategy,
        library: Library,
    ) -> Self {
        Self {
            name: name.to_string(),
            context: context.map(str::to_string),
            strategy,
            physical_path: None,
            is_temporary: false,
            handle: Arc::new(library),
        }
    }

    /// Module loaded from an extracted temp file.
    pub(crate) fn extracted(
        name: &str,
        context: Option<&str>,
        path: &Path,
        library: Library,
    ) -> Self {
        Self {
            name: name.to_string(),
            context: context.map(str::to_string),
            strategy: Strategy::Extracted,
            physical_path: Some(path.to_path_buf()),
            is_temporary: true,
            handle: Arc::new(library),
        }
    }

    /// Logical name the module was requested under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id of the owning context, if the module is context-bound.
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// File the module was loaded from; only known for extracted modules.
    pub fn physical_path(&self) -> Option<&Path> {
        self.physical_path.as_deref()
    }

    /// Whether the module was loaded from a temp file owned by the loader.
    pub fn is_temporary(&self) -> bool {
        self.is_temporary
    }

    pub fn library(&self) -> &Library {
        &self.handle
    }

    /// Look up a symbol in the module.
    ///
    /// # Safety
    ///
    /// `T` must match the actual type of the symbol.
    pub unsafe fn get<T>(&self, symbol: &[u8]) -> Result<Symbol<'_, T>, libloading::Error> {
        unsafe { self.handle.get(symbol) }
    }
}

type ModuleKey = (String, Option<String>);

/// Insert-only map from `(logical name, context id)` to mapped modules.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: Mutex<HashMap<ModuleKey, ResolvedLibrary>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by every loader in the process.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<ModuleRegistry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(Self::new())).clone()
    }

    /// Module already mapped for `name` in `context`, or globally.
    pub fn lookup(&self, name: &str, context: Option<&str>) -> Option<ResolvedLibrary> {
        let modules = self.modules.lock().unwrap_or_else(PoisonError::into_inner);
        context
            .and_then(|ctx| modules.get(&(name.to_string(), Some(ctx.to_string()))))
            .or_else(|| modules.get(&(name.to_string(), None)))
            .cloned()
    }

    /// Record a freshly loaded module unless one is already registered under
    /// the same key; returns whichever entry is registered afterwards.
    pub fn insert_if_absent(&self, library: ResolvedLibrary) -> ResolvedLibrary {
        let key = (library.name.clone(), library.context.clone());
        let mut modules = self.modules.lock().unwrap_or_else(PoisonError::into_inner);
        modules.entry(key).or_insert(library).clone()
    }

    pub fn len(&self) -> usize {
        self.modules
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
