//! Integration tests for the fallback loading chain.
//!
//! The host's dynamic loader is replaced by [`Host`], which resolves a fixed
//! set of names and records every call, so each strategy can be exercised
//! without real shared objects.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;

use libloading::Library;
use natload::{
    Arch, BindError, ContextBinder, Error, LinkFailure, Linker, LoadContext, LoadTarget, Loader,
    LoaderConfig, MemoryResources, ModuleRegistry, Os, Platform, Strategy,
};
use tempfile::TempDir;

const VAD_RESOURCE: &str = "/natives/linux-x86-64/libvad.so";

fn this_process() -> Library {
    #[cfg(unix)]
    {
        libloading::os::unix::Library::this().into()
    }
    #[cfg(windows)]
    {
        libloading::os::windows::Library::this()
            .expect("handle to current process")
            .into()
    }
}

/// Stand-in for the native loader and the context binding primitive.
#[derive(Default)]
struct Host {
    on_search_path: Vec<&'static str>,
    in_context: Vec<&'static str>,
    broken: Vec<&'static str>,
    binding_unavailable: bool,
    calls: Mutex<Vec<String>>,
    /// Files handed to path loads; each existed at the time of the call.
    loaded_files: Mutex<Vec<PathBuf>>,
}

impl Host {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn loaded_files(&self) -> Vec<PathBuf> {
        self.loaded_files.lock().unwrap().clone()
    }

    fn open(&self, known: &[&str], target: LoadTarget<'_>) -> Result<Library, LinkFailure> {
        match target {
            LoadTarget::Name(name) if self.broken.iter().any(|b| *b == name) => {
                Err(LinkFailure::Failed(libloading::Error::DlOpenUnknown))
            }
            LoadTarget::Name(name) if known.iter().any(|k| *k == name) => Ok(this_process()),
            LoadTarget::Name(_) => Err(LinkFailure::NotFound(libloading::Error::DlOpenUnknown)),
            LoadTarget::Path(path) if path.is_file() => {
                self.loaded_files.lock().unwrap().push(path.to_path_buf());
                if fs::read(path).unwrap() == b"corrupt" {
                    Err(LinkFailure::Failed(libloading::Error::DlOpenUnknown))
                } else {
                    Ok(this_process())
                }
            }
            LoadTarget::Path(_) => Err(LinkFailure::NotFound(libloading::Error::DlOpenUnknown)),
        }
    }
}

impl Linker for Host {
    fn load(&self, target: LoadTarget<'_>) -> Result<Library, LinkFailure> {
        self.calls.lock().unwrap().push(format!("global:{}", target));
        self.open(&self.on_search_path, target)
    }
}

impl ContextBinder for Host {
    fn load_in(&self, context: &LoadContext, target: LoadTarget<'_>) -> Result<Library, BindError> {
        if self.binding_unavailable {
            return Err(BindError::Unavailable("test host"));
        }
        self.calls
            .lock()
            .unwrap()
            .push(format!("bound:{}:{}", context.id(), target));
        Ok(self.open(&self.in_context, target)?)
    }
}

struct Fixture {
    host: Arc<Host>,
    temp: TempDir,
    loader: Loader,
}

impl Fixture {
    fn new(host: Host, store: MemoryResources) -> Self {
        Self::with_config(host, store, |_| {})
    }

    fn with_config(host: Host, store: MemoryResources, tweak: impl FnOnce(&mut LoaderConfig)) -> Self {
        let host = Arc::new(host);
        let temp = TempDir::new().unwrap();
        let mut config = LoaderConfig {
            temp_dir: temp.path().to_path_buf(),
            platform: Platform::new(Os::Linux, Arch::X86_64),
            ..Default::default()
        };
        tweak(&mut config);

        let loader = Loader::builder(store)
            .config(config)
            .linker(host.clone())
            .binder(host.clone())
            .registry(Arc::new(ModuleRegistry::new()))
            .build();

        Self { host, temp, loader }
    }

    fn temp_files(&self) -> Vec<PathBuf> {
        fs::read_dir(self.temp.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect()
    }
}

fn vad_store() -> MemoryResources {
    MemoryResources::new().with(VAD_RESOURCE, &b"\x7fELF fake"[..])
}

fn plugin() -> LoadContext {
    LoadContext::new("pluginA")
}

#[test]
fn test_search_path_hit_never_touches_temp_area() {
    let fixture = Fixture::new(
        Host {
            on_search_path: vec!["vad"],
            ..Default::default()
        },
        vad_store(),
    );

    let loaded = fixture.loader.load_in("vad", &plugin()).unwrap();

    assert_eq!(loaded.strategy(), Strategy::SearchPath);
    assert!(loaded.physical_path().is_none());
    assert!(!loaded.is_temporary());
    assert_eq!(fixture.host.calls(), vec!["global:`vad`"]);
    assert!(fixture.host.loaded_files().is_empty());
    assert!(fixture.temp_files().is_empty());
}

#[test]
fn test_context_name_hit() {
    let fixture = Fixture::new(
        Host {
            in_context: vec!["vad"],
            ..Default::default()
        },
        vad_store(),
    );

    let loaded = fixture.loader.load_in("vad", &plugin()).unwrap();

    assert_eq!(loaded.strategy(), Strategy::Context);
    assert_eq!(loaded.context(), Some("pluginA"));
    assert_eq!(
        fixture.host.calls(),
        vec!["global:`vad`", "bound:pluginA:`vad`"]
    );
    assert!(fixture.temp_files().is_empty());
}

#[test]
fn test_extracts_bundled_copy_for_context() {
    let fixture = Fixture::new(Host::default(), vad_store());

    let loaded = fixture.loader.load_in("vad", &plugin()).unwrap();

    assert_eq!(loaded.strategy(), Strategy::Extracted);
    assert!(loaded.is_temporary());
    assert_eq!(loaded.context(), Some("pluginA"));

    // The extracted file existed while it was loaded...
    let files = fixture.host.loaded_files();
    assert_eq!(files.len(), 1);
    let file_name = files[0].file_name().unwrap().to_str().unwrap();
    assert!(file_name.starts_with("libvad-"), "{}", file_name);
    assert!(file_name.ends_with(".so"), "{}", file_name);
    assert_eq!(files[0].parent(), Some(fixture.temp.path()));
    assert_eq!(loaded.physical_path(), Some(files[0].as_path()));

    // ...through the context binder, and is gone afterwards.
    let calls = fixture.host.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[2], format!("bound:pluginA:{}", files[0].display()));
    assert!(!files[0].exists());
    assert!(fixture.temp_files().is_empty());
}

#[test]
fn test_absent_everywhere_with_context() {
    let fixture = Fixture::new(Host::default(), MemoryResources::new());

    let err = fixture.loader.load_in("missing", &plugin()).unwrap_err();

    assert!(err.is_not_found());
    assert!(
        matches!(err, Error::NotFoundInContext { ref name, ref context, .. } if name == "missing" && context == "pluginA"),
        "{:?}",
        err
    );
    assert!(fixture.temp_files().is_empty());
}

#[test]
fn test_absent_everywhere_without_context() {
    let fixture = Fixture::new(Host::default(), MemoryResources::new());

    let err = fixture.loader.load("missing").unwrap_err();

    assert!(matches!(err, Error::NotFoundInSearchPath { ref name, .. } if name == "missing"));
    assert_eq!(fixture.host.calls(), vec!["global:`missing`"]);
    assert!(fixture.temp_files().is_empty());
}

#[test]
fn test_no_context_skips_extraction() {
    let fixture = Fixture::new(Host::default(), vad_store());

    let err = fixture.loader.load("vad").unwrap_err();

    assert!(matches!(err, Error::NotFoundInSearchPath { .. }));
    assert_eq!(fixture.host.calls(), vec!["global:`vad`"]);
    assert!(fixture.host.loaded_files().is_empty());
    assert!(fixture.temp_files().is_empty());
}

#[test]
fn test_extract_without_context_when_enabled() {
    let fixture = Fixture::with_config(Host::default(), vad_store(), |config| {
        config.extract_without_context = true;
    });

    let loaded = fixture.loader.load("vad").unwrap();

    assert_eq!(loaded.strategy(), Strategy::Extracted);
    assert_eq!(loaded.context(), None);
    let files = fixture.host.loaded_files();
    assert_eq!(
        fixture.host.calls(),
        vec!["global:`vad`".to_string(), format!("global:{}", files[0].display())]
    );
    assert!(fixture.temp_files().is_empty());
}

#[test]
fn test_extract_without_context_reports_search_path_miss() {
    let fixture = Fixture::with_config(Host::default(), MemoryResources::new(), |config| {
        config.extract_without_context = true;
    });

    let err = fixture.loader.load("vad").unwrap_err();
    assert!(matches!(err, Error::NotFoundInSearchPath { .. }));
}

#[test]
fn test_second_load_reuses_mapped_module() {
    let fixture = Fixture::new(Host::default(), vad_store());

    let first = fixture.loader.load_in("vad", &plugin()).unwrap();
    let calls_after_first = fixture.host.calls().len();
    let second = fixture.loader.load_in("vad", &plugin()).unwrap();

    assert_eq!(second.strategy(), Strategy::Extracted);
    assert_eq!(first.physical_path(), second.physical_path());
    assert_eq!(fixture.host.calls().len(), calls_after_first);
    assert_eq!(fixture.host.loaded_files().len(), 1);
    assert_eq!(fixture.loader.registry().len(), 1);
}

#[test]
fn test_hard_failure_on_search_path_aborts_chain() {
    let fixture = Fixture::new(
        Host {
            broken: vec!["vad"],
            ..Default::default()
        },
        vad_store(),
    );

    let err = fixture.loader.load_in("vad", &plugin()).unwrap_err();

    assert!(matches!(err, Error::NativeLoadFailed { ref target, .. } if target == "vad"));
    assert_eq!(fixture.host.calls(), vec!["global:`vad`"]);
    assert!(fixture.temp_files().is_empty());
}

#[test]
fn test_corrupt_bundled_copy_fails_and_is_cleaned_up() {
    let store = MemoryResources::new().with(VAD_RESOURCE, &b"corrupt"[..]);
    let fixture = Fixture::new(Host::default(), store);

    let err = fixture.loader.load_in("vad", &plugin()).unwrap_err();

    let files = fixture.host.loaded_files();
    assert_eq!(files.len(), 1);
    assert!(
        matches!(err, Error::NativeLoadFailed { ref target, .. } if Path::new(target) == files[0]),
        "{:?}",
        err
    );
    assert!(fixture.temp_files().is_empty());
    assert!(fixture.loader.registry().is_empty());
}

#[test]
fn test_unavailable_binding_degrades_to_global_load() {
    let fixture = Fixture::new(
        Host {
            binding_unavailable: true,
            ..Default::default()
        },
        vad_store(),
    );

    let loaded = fixture.loader.load_in("vad", &plugin()).unwrap();

    assert_eq!(loaded.strategy(), Strategy::Extracted);
    assert_eq!(loaded.context(), None);
    let files = fixture.host.loaded_files();
    assert_eq!(
        fixture.host.calls(),
        vec![
            "global:`vad`".to_string(),
            "global:`vad`".to_string(),
            format!("global:{}", files[0].display()),
        ]
    );
    assert!(fixture.temp_files().is_empty());
}

#[test]
fn test_concurrent_loads_of_different_names() {
    let names = ["alpha", "beta", "gamma", "delta"];
    let mut store = MemoryResources::new();
    for name in names {
        store.insert(&format!("/natives/linux-x86-64/lib{}.so", name), &b"\x7fELF"[..]);
    }
    let fixture = Fixture::new(Host::default(), store);
    let loader = Arc::new(fixture.loader);

    let handles: Vec<_> = names
        .iter()
        .map(|&name| {
            let loader = Arc::clone(&loader);
            thread::spawn(move || loader.load_in(name, &LoadContext::new(format!("ctx-{}", name))))
        })
        .collect();

    for handle in handles {
        let loaded = handle.join().unwrap().unwrap();
        assert_eq!(loaded.strategy(), Strategy::Extracted);
    }
    assert_eq!(loader.registry().len(), names.len());
    assert_eq!(fs::read_dir(fixture.temp.path()).unwrap().count(), 0);
}
