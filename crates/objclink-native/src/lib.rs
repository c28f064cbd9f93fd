//! Load native libraries that ship inside a bundle.
//!
//! A dynamic loader needs a real file path, but an application often carries
//! its native helpers as embedded bytes or as entries of a bundle that is not
//! a plain library search path. This crate copies such a resource to a
//! uniquely named temp file, loads it with [`libloading`], and deletes the
//! temp file when the process exits.
//!
//! # Example
//!
//! ```no_run
//! use objclink_native::{DirectoryResources, load_library};
//!
//! let bundle = DirectoryResources::new("/Applications/Demo.app/Contents/Resources");
//! let library = unsafe { load_library("/native/libdemo.dylib", &bundle) }?;
//! let init = unsafe { library.symbol::<unsafe extern "C" fn() -> i32>("demo_init") }?;
//! assert_eq!(unsafe { init() }, 0);
//! # Ok::<(), objclink_native::Error>(())
//! ```
//!
//! Resources of the calling crate itself are embedded at compile time with
//! [`extract_embedded_file!`] and [`load_embedded_library!`].

pub mod error;
pub mod extract;
pub mod resources;

pub use error::{Error, Result};
pub use extract::{
    COPY_BUFFER_SIZE, ExtractedFile, Extractor, LoadedLibrary, MIN_PREFIX_LEN, ResourceName,
    extract_file, load_library, pending_deletions,
};
pub use resources::{DirectoryResources, EmbeddedResources, ResourceSource};

/// Extracts a file of the calling crate to a temp file.
///
/// The path is relative to the calling crate's `CARGO_MANIFEST_DIR` and must
/// start with `/`. The bytes are embedded with `include_bytes!`.
///
/// ```ignore
/// let file = objclink_native::extract_embedded_file!("/native/libhelper.so")?;
/// println!("{}", file.path().display());
/// ```
#[macro_export]
macro_rules! extract_embedded_file {
    ($path:literal) => {
        $crate::extract_file(
            $path,
            &$crate::EmbeddedResources::new(&[(
                $path,
                include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), $path)) as &[u8],
            )]),
        )
    };
}

/// Extracts and loads a library of the calling crate.
///
/// Expands to a call of the `unsafe` [`load_library`], so it must be used
/// inside an `unsafe` block.
///
/// ```ignore
/// let library = unsafe { objclink_native::load_embedded_library!("/native/libhelper.so") }?;
/// ```
#[macro_export]
macro_rules! load_embedded_library {
    ($path:literal) => {
        $crate::load_library(
            $path,
            &$crate::EmbeddedResources::new(&[(
                $path,
                include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), $path)) as &[u8],
            )]),
        )
    };
}
