//! Copying bundled resources to temp files and loading them.
//!
//! Extraction is a four step affair:
//!
//! 1. Validate the resource path: it must be absolute (`/`-rooted) and its
//!    file name must have a prefix of at least [`MIN_PREFIX_LEN`] characters
//!    before the first `.`.
//! 2. Open the resource through a [`ResourceSource`]. A missing resource is
//!    reported before any file is created.
//! 3. Stream the bytes into a uniquely named temp file carrying the same
//!    suffix, using a fixed [`COPY_BUFFER_SIZE`] buffer.
//! 4. Hand the temp path to the exit registry, which deletes it when the
//!    process exits normally.
//!
//! [`Extractor::load`] adds a fifth step and passes the absolute temp path to
//! the dynamic loader.

use crate::error::{Error, Result};
use crate::resources::ResourceSource;
use objclink_log::{debug, info, warn};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, Once, PoisonError};
use tempfile::TempPath;

/// Minimum number of characters before the first `.` of the file name.
pub const MIN_PREFIX_LEN: usize = 3;

/// Size of the buffer used to copy a resource into its temp file.
pub const COPY_BUFFER_SIZE: usize = 1024;

/// Temp files waiting to be deleted when the process exits.
static PENDING: Mutex<Vec<TempPath>> = Mutex::new(Vec::new());

static EXIT_HOOK: Once = Once::new();

extern "C" fn delete_pending_at_exit() {
    let pending = std::mem::take(&mut *PENDING.lock().unwrap_or_else(PoisonError::into_inner));
    for temp in pending {
        let path = temp.to_path_buf();
        if let Err(err) = temp.close() {
            warn!("could not delete {} at exit: {err}", path.display());
        }
    }
}

fn schedule_deletion(temp: TempPath) {
    EXIT_HOOK.call_once(|| {
        // SAFETY: `delete_pending_at_exit` is a plain `extern "C"` function
        // that never unwinds and only touches `PENDING`, which is a static.
        let rc = unsafe { libc::atexit(delete_pending_at_exit) };
        if rc != 0 {
            warn!("atexit registration failed, extracted files will be left behind");
        }
    });
    PENDING
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(temp);
}

/// Number of extracted files currently queued for deletion at exit.
#[must_use]
pub fn pending_deletions() -> usize {
    PENDING.lock().unwrap_or_else(PoisonError::into_inner).len()
}

/// A resource path split into what the temp file name needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceName<'a> {
    /// Full resource path, e.g. `/native/libfoo.so.1`.
    pub path: &'a str,
    /// Part of the file name before the first `.`, e.g. `libfoo`.
    pub prefix: &'a str,
    /// The first `.` and everything after it, e.g. `.so.1`.
    pub suffix: Option<&'a str>,
}

impl<'a> ResourceName<'a> {
    /// Validates `path` and splits its file name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `path` does not start with `/`,
    /// has no file name, or if the file name prefix is shorter than
    /// [`MIN_PREFIX_LEN`] characters.
    pub fn parse(path: &'a str) -> Result<Self> {
        if !path.starts_with('/') {
            return Err(Error::InvalidArgument(format!(
                "the path has to be absolute (start with '/'): {path:?}"
            )));
        }

        let file_name = path.rsplit('/').next().unwrap_or_default();
        let (prefix, suffix) = match file_name.find('.') {
            Some(dot) => (&file_name[..dot], Some(&file_name[dot..])),
            None => (file_name, None),
        };

        if prefix.chars().count() < MIN_PREFIX_LEN {
            return Err(Error::InvalidArgument(format!(
                "the file name has to be at least {MIN_PREFIX_LEN} characters long: {path:?}"
            )));
        }

        Ok(Self { path, prefix, suffix })
    }
}

/// A resource copied to disk and queued for deletion at exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFile {
    path: PathBuf,
}

impl ExtractedFile {
    /// Location of the temp file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true while the file is still queued for exit-time deletion.
    #[must_use]
    pub fn is_pending_deletion(&self) -> bool {
        PENDING
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|temp| **temp == *self.path)
    }
}

/// A library loaded from an extracted temp file.
#[derive(Debug)]
pub struct LoadedLibrary {
    library: libloading::Library,
    path: PathBuf,
}

impl LoadedLibrary {
    /// Absolute path the library was loaded from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Looks up a symbol by name.
    ///
    /// # Safety
    ///
    /// `T` must match the actual type of the symbol.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Symbol`] if the library does not export `name`.
    pub unsafe fn symbol<T>(&self, name: &str) -> Result<libloading::Symbol<'_, T>> {
        // SAFETY: forwarded to the caller.
        unsafe { self.library.get(name.as_bytes()) }.map_err(|source| Error::Symbol {
            name: name.to_string(),
            source,
        })
    }

    /// Returns the underlying handle. Dropping it unloads the library.
    #[must_use]
    pub fn into_library(self) -> libloading::Library {
        self.library
    }
}

/// Extraction settings.
///
/// The default writes into the system temp directory.
#[derive(Debug, Clone, Default)]
pub struct Extractor {
    temp_dir: Option<PathBuf>,
}

impl Extractor {
    /// Creates an extractor with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes temp files into `dir` instead of the system temp directory.
    #[must_use]
    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Copies the resource at `path` into a new temp file.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `path` is malformed (no I/O happens).
    /// - [`Error::NotFound`] if `source` has no such resource (no temp file
    ///   is created).
    /// - [`Error::Io`] if the temp file cannot be created or the copy fails;
    ///   the partial temp file is removed.
    pub fn extract(&self, path: &str, source: &dyn ResourceSource) -> Result<ExtractedFile> {
        let name = ResourceName::parse(path)?;

        let mut input = source.open(path)?.ok_or_else(|| Error::NotFound {
            path: path.to_string(),
            source_name: source.describe(),
        })?;

        let mut builder = tempfile::Builder::new();
        builder.prefix(name.prefix);
        if let Some(suffix) = name.suffix {
            builder.suffix(suffix);
        }
        let mut output = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };

        // On error `output` is dropped, which closes and removes it.
        let copied = copy_stream(&mut input, output.as_file_mut())?;
        output.as_file_mut().flush()?;
        drop(input);

        let (file, temp_path) = output.into_parts();
        drop(file);

        let extracted = ExtractedFile {
            path: temp_path.to_path_buf(),
        };
        debug!(
            "copied {path} ({copied} bytes) to {}",
            extracted.path.display()
        );
        schedule_deletion(temp_path);
        Ok(extracted)
    }

    /// Extracts the resource at `path` and loads it as a native library.
    ///
    /// # Safety
    ///
    /// Loading a library runs its initialisers. The caller must trust the
    /// resource.
    ///
    /// # Errors
    ///
    /// Everything [`Extractor::extract`] returns, plus [`Error::Load`] if the
    /// dynamic loader rejects the file.
    pub unsafe fn load(&self, path: &str, source: &dyn ResourceSource) -> Result<LoadedLibrary> {
        let extracted = self.extract(path, source)?;
        let absolute = std::path::absolute(extracted.path())?;

        // SAFETY: forwarded to the caller.
        let library = unsafe { libloading::Library::new(&absolute) }.map_err(|source| {
            Error::Load {
                path: absolute.clone(),
                source,
            }
        })?;

        info!("loaded {path} from {}", absolute.display());
        Ok(LoadedLibrary {
            library,
            path: absolute,
        })
    }
}

fn copy_stream(input: &mut dyn Read, output: &mut dyn Write) -> io::Result<u64> {
    let mut buffer = [0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let read = match input.read(&mut buffer) {
            Ok(0) => return Ok(total),
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        output.write_all(&buffer[..read])?;
        total += read as u64;
    }
}

/// Copies the resource at `path` into a temp file in the system temp
/// directory.
///
/// # Errors
///
/// See [`Extractor::extract`].
pub fn extract_file(path: &str, source: &dyn ResourceSource) -> Result<ExtractedFile> {
    Extractor::default().extract(path, source)
}

/// Extracts the resource at `path` to the system temp directory and loads
/// it.
///
/// # Safety
///
/// See [`Extractor::load`].
///
/// # Errors
///
/// See [`Extractor::load`].
pub unsafe fn load_library(path: &str, source: &dyn ResourceSource) -> Result<LoadedLibrary> {
    // SAFETY: forwarded to the caller.
    unsafe { Extractor::default().load(path, source) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::EmbeddedResources;

    struct FailingReader {
        remaining: usize,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.remaining == 0 {
                return Err(io::Error::other("archive truncated"));
            }
            let n = self.remaining.min(buf.len());
            buf[..n].fill(0xAB);
            self.remaining -= n;
            Ok(n)
        }
    }

    struct FailingSource;

    impl ResourceSource for FailingSource {
        fn open(&self, _path: &str) -> io::Result<Option<Box<dyn Read + '_>>> {
            Ok(Some(Box::new(FailingReader { remaining: 3000 })))
        }

        fn describe(&self) -> String {
            "failing source".into()
        }
    }

    fn entries_in(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn test_parse_splits_prefix_and_suffix() {
        let name = ResourceName::parse("/native/libfoo.so.1").unwrap();
        assert_eq!(name.prefix, "libfoo");
        assert_eq!(name.suffix, Some(".so.1"));

        let name = ResourceName::parse("/plain").unwrap();
        assert_eq!(name.prefix, "plain");
        assert_eq!(name.suffix, None);
    }

    #[test]
    fn test_parse_rejects_relative_path() {
        let err = ResourceName::parse("native/libfoo.so").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_parse_rejects_short_prefix() {
        for path in ["/ab.so", "/native/x", "/native/", "/", "/.hidden"] {
            assert!(
                matches!(ResourceName::parse(path), Err(Error::InvalidArgument(_))),
                "{path} should be rejected"
            );
        }
        assert!(ResourceName::parse("/abc.so").is_ok());
    }

    #[test]
    fn test_copy_larger_than_buffer() {
        let payload: Vec<u8> = (0..COPY_BUFFER_SIZE * 3 + 17).map(|i| (i % 251) as u8).collect();
        let mut out = Vec::new();
        let copied = copy_stream(&mut payload.as_slice(), &mut out).unwrap();
        assert_eq!(copied, payload.len() as u64);
        assert_eq!(out, payload);
    }

    #[test]
    fn test_extract_keeps_suffix_and_content() {
        let dir = tempfile::tempdir().unwrap();
        let table: &[(&str, &[u8])] = &[("/native/libsample.dylib", b"mach-o bytes".as_slice())];

        let file = Extractor::new()
            .temp_dir(dir.path())
            .extract("/native/libsample.dylib", &EmbeddedResources::new(table))
            .unwrap();

        let file_name = file.path().file_name().unwrap().to_str().unwrap();
        assert!(file_name.starts_with("libsample"));
        assert!(file_name.ends_with(".dylib"));
        assert_eq!(std::fs::read(file.path()).unwrap(), b"mach-o bytes");
        assert!(file.is_pending_deletion());
    }

    #[test]
    fn test_extract_missing_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let table: &[(&str, &[u8])] = &[];

        let err = Extractor::new()
            .temp_dir(dir.path())
            .extract("/native/libmissing.so", &EmbeddedResources::new(table))
            .unwrap_err();

        assert!(matches!(err, Error::NotFound { .. }));
        assert_eq!(entries_in(dir.path()), 0);
    }

    #[test]
    fn test_extract_failed_copy_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let before = pending_deletions();

        let err = Extractor::new()
            .temp_dir(dir.path())
            .extract("/native/libbroken.so", &FailingSource)
            .unwrap_err();

        assert!(matches!(err, Error::Io(_)));
        assert_eq!(entries_in(dir.path()), 0);
        assert!(pending_deletions() >= before);
    }

    #[test]
    fn test_load_rejects_non_library() {
        let dir = tempfile::tempdir().unwrap();
        let table: &[(&str, &[u8])] =
            &[("/native/libbogus.so", b"definitely not a shared object".as_slice())];

        let result = unsafe {
            Extractor::new()
                .temp_dir(dir.path())
                .load("/native/libbogus.so", &EmbeddedResources::new(table))
        };

        assert!(matches!(result, Err(Error::Load { .. })));
    }
}
