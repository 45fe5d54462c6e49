//! Platform naming rules.
//!
//! Turns a logical library name (`vad`) into the physical filename the host
//! platform uses (`libvad.so`, `vad.dll`, ...) and into the path under which a
//! bundled copy is expected in the embedded resource store
//! (`/natives/linux-x86-64/libvad.so`).
//!
//! Everything here is pure string computation. Malformed names are not
//! rejected; they simply never match a library or a resource.

use std::fmt;

/// Default root marker for bundled native libraries.
pub const DEFAULT_RESOURCE_ROOT: &str = "natives";

/// Operating system family, as far as library naming is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
    Linux,
    Android,
    MacOs,
    Windows,
    FreeBsd,
    OpenBsd,
    NetBsd,
    Other,
}

impl Os {
    /// The operating system this crate was compiled for.
    pub fn current() -> Self {
        #[cfg(target_os = "android")]
        {
            Self::Android
        }
        #[cfg(target_os = "linux")]
        {
            Self::Linux
        }
        #[cfg(target_os = "macos")]
        {
            Self::MacOs
        }
        #[cfg(target_os = "windows")]
        {
            Self::Windows
        }
        #[cfg(target_os = "freebsd")]
        {
            Self::FreeBsd
        }
        #[cfg(target_os = "openbsd")]
        {
            Self::OpenBsd
        }
        #[cfg(target_os = "netbsd")]
        {
            Self::NetBsd
        }
        #[cfg(not(any(
            target_os = "android",
            target_os = "linux",
            target_os = "macos",
            target_os = "windows",
            target_os = "freebsd",
            target_os = "openbsd",
            target_os = "netbsd",
        )))]
        {
            Self::Other
        }
    }

    /// Segment used in resource paths (`linux`, `darwin`, `win32`, ...).
    pub fn resource_name(self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Android => "android",
            Self::MacOs => "darwin",
            Self::Windows => "win32",
            Self::FreeBsd => "freebsd",
            Self::OpenBsd => "openbsd",
            Self::NetBsd => "netbsd",
            Self::Other => "unknown",
        }
    }

    /// OS-native dynamic library prefix.
    pub fn dylib_prefix(self) -> &'static str {
        match self {
            Self::Windows => "",
            _ => "lib",
        }
    }

    /// OS-native dynamic library extension.
    pub fn dylib_extension(self) -> &'static str {
        match self {
            Self::Windows => "dll",
            Self::MacOs => "dylib",
            _ => "so",
        }
    }

    /// Extension used for bundled copies of loadable native modules.
    ///
    /// Identical to [`dylib_extension`](Self::dylib_extension) everywhere
    /// except macOS, where bundles carry `.jnilib` instead of `.dylib`.
    pub fn packaged_extension(self) -> &'static str {
        match self {
            Self::MacOs => "jnilib",
            other => other.dylib_extension(),
        }
    }
}

/// CPU architecture, as far as library naming is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    X86,
    X86_64,
    Arm,
    Aarch64,
    Riscv64,
    Other,
}

impl Arch {
    /// The architecture this crate was compiled for.
    pub fn current() -> Self {
        #[cfg(target_arch = "x86")]
        {
            Self::X86
        }
        #[cfg(target_arch = "x86_64")]
        {
            Self::X86_64
        }
        #[cfg(target_arch = "arm")]
        {
            Self::Arm
        }
        #[cfg(target_arch = "aarch64")]
        {
            Self::Aarch64
        }
        #[cfg(target_arch = "riscv64")]
        {
            Self::Riscv64
        }
        #[cfg(not(any(
            target_arch = "x86",
            target_arch = "x86_64",
            target_arch = "arm",
            target_arch = "aarch64",
            target_arch = "riscv64",
        )))]
        {
            Self::Other
        }
    }

    /// Segment used in resource paths. Underscores become dashes (`x86-64`).
    pub fn resource_name(self) -> &'static str {
        match self {
            Self::X86 => "x86",
            Self::X86_64 => "x86-64",
            Self::Arm => "arm",
            Self::Aarch64 => "aarch64",
            Self::Riscv64 => "riscv64",
            Self::Other => "unknown",
        }
    }
}

/// An operating system and architecture pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Platform {
    pub os: Os,
    pub arch: Arch,
}

impl Platform {
    pub fn new(os: Os, arch: Arch) -> Self {
        Self { os, arch }
    }

    /// The platform this crate was compiled for.
    pub fn current() -> Self {
        Self::new(Os::current(), Arch::current())
    }

    /// Physical filename of a bundled library (`libvad.so`, `vad.dll`,
    /// `libvad.jnilib`).
    pub fn library_filename(&self, name: &str) -> String {
        format!(
            "{}{}.{}",
            self.os.dylib_prefix(),
            name,
            self.os.packaged_extension()
        )
    }

    /// Filename the OS loader itself would look for (`libvad.dylib` on macOS).
    pub fn native_library_filename(&self, name: &str) -> String {
        format!(
            "{}{}.{}",
            self.os.dylib_prefix(),
            name,
            self.os.dylib_extension()
        )
    }

    /// Platform and architecture discriminator, e.g. `linux-x86-64`.
    pub fn resource_prefix(&self) -> String {
        format!("{}-{}", self.os.resource_name(), self.arch.resource_name())
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::current()
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.resource_prefix())
    }
}

/// Location of a bundled library inside the resource store:
/// `/{root}/{platform prefix}/{filename}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourcePath(String);

impl ResourcePath {
    pub fn new(root: &str, platform: &Platform, filename: &str) -> Self {
        let root = root.trim_matches('/');
        let prefix = platform.resource_prefix();
        if root.is_empty() {
            Self(format!("/{}/{}", prefix, filename))
        } else {
            Self(format!("/{}/{}/{}", root, prefix, filename))
        }
    }

    /// Resource path for a logical library name.
    pub fn for_library(root: &str, platform: &Platform, name: &str) -> Self {
        Self::new(root, platform, &platform.library_filename(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment, i.e. the physical filename.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ResourcePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
