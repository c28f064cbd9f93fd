//! Resource sources: where bundled files are looked up.
//!
//! A resource path is an absolute, `/`-separated name such as
//! `/native/macos/libwebview.dylib`. It is abstract: it names an entry of a
//! bundle, not a file on the host. A [`ResourceSource`] maps such names to
//! readable byte streams.
//!
//! Two sources are provided:
//!
//! - [`EmbeddedResources`]: byte slices compiled into the binary with
//!   `include_bytes!`. This is the default scope of the calling crate (see
//!   [`crate::extract_embedded_file!`]).
//! - [`DirectoryResources`]: files under a bundle root directory, e.g. the
//!   `Contents/Resources` directory of an application bundle.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

/// Locates bundled resources by absolute resource path.
pub trait ResourceSource {
    /// Opens the resource at `path`.
    ///
    /// Returns `Ok(None)` when the source has no such resource, and `Err`
    /// when it exists but cannot be opened.
    ///
    /// # Errors
    ///
    /// Propagates the I/O error raised while opening an existing resource.
    fn open(&self, path: &str) -> io::Result<Option<Box<dyn Read + '_>>>;

    /// Human-readable name used in diagnostics.
    fn describe(&self) -> String;
}

/// Resources compiled into the binary.
///
/// # Example
///
/// ```
/// use objclink_native::EmbeddedResources;
/// use objclink_native::ResourceSource;
///
/// static TABLE: &[(&str, &[u8])] = &[("/native/libdemo.so", b"\x7fELF...".as_slice())];
/// let resources = EmbeddedResources::new(TABLE);
///
/// assert!(resources.open("/native/libdemo.so").unwrap().is_some());
/// assert!(resources.open("/native/libother.so").unwrap().is_none());
/// ```
#[derive(Clone, Copy)]
pub struct EmbeddedResources<'a> {
    entries: &'a [(&'a str, &'a [u8])],
}

impl<'a> EmbeddedResources<'a> {
    /// Wraps a table of `(resource path, bytes)` pairs.
    #[must_use]
    pub const fn new(entries: &'a [(&'a str, &'a [u8])]) -> Self {
        Self { entries }
    }

    /// Returns the bytes registered under `path`.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&'a [u8]> {
        self.entries
            .iter()
            .find(|(name, _)| *name == path)
            .map(|(_, bytes)| *bytes)
    }

    /// Number of entries in the table.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the table is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ResourceSource for EmbeddedResources<'_> {
    fn open(&self, path: &str) -> io::Result<Option<Box<dyn Read + '_>>> {
        Ok(self.get(path).map(|bytes| Box::new(bytes) as Box<dyn Read + '_>))
    }

    fn describe(&self) -> String {
        format!("embedded resources ({} entries)", self.entries.len())
    }
}

impl fmt::Debug for EmbeddedResources<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(name, bytes)| (name, bytes.len())))
            .finish()
    }
}

/// Resources stored as files under a bundle root.
///
/// The resource path `/a/b.so` maps to `<root>/a/b.so`. Paths that try to
/// escape the root with `..` are treated as missing.
#[derive(Debug, Clone)]
pub struct DirectoryResources {
    root: PathBuf,
}

impl DirectoryResources {
    /// Creates a source rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The bundle root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        Some(self.root.join(relative))
    }
}

impl ResourceSource for DirectoryResources {
    fn open(&self, path: &str) -> io::Result<Option<Box<dyn Read + '_>>> {
        let Some(file_path) = self.resolve(path) else {
            return Ok(None);
        };
        if !file_path.is_file() {
            return Ok(None);
        }
        match File::open(&file_path) {
            Ok(file) => Ok(Some(Box::new(file))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn describe(&self) -> String {
        format!("bundle directory {}", self.root.display())
    }
}

impl<T: ResourceSource + ?Sized> ResourceSource for &T {
    fn open(&self, path: &str) -> io::Result<Option<Box<dyn Read + '_>>> {
        (**self).open(path)
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
