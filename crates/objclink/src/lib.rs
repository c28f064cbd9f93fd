//! `objclink`: message sending into the Objective-C runtime.
//!
//! `objclink` sends Objective-C messages from Rust with optional automatic
//! conversion of arguments and results:
//!
//! - **Dispatch** by class name, selector name, raw handle or any
//!   [`Peerable`] host object
//! - **Coercion** of host values (text, numbers, booleans, structs) to native
//!   objects and back, driven by method type encodings
//! - **Proxies** wrapping native objects, and message lists for
//!   `[[Class alloc] init]` style chains
//! - **C ABI calls** of `objc_msgSend` through `libffi`, with structures
//!   of any size passed and returned by value
//!
//! # Architecture
//!
//! - [`Client`]: resolves targets, marshals arguments, dispatches, coerces
//!   results
//! - [`Runtime`]: the seam to a native runtime. [`ObjcRuntime`] on Apple
//!   targets, [`SimRuntime`] everywhere
//! - [`abi`]: native argument values and foreign call interfaces
//!
//! # Example
//!
//! ```rust
//! use objclink::{Client, SimRuntime, Value};
//! use std::sync::Arc;
//!
//! let client = Client::coercing(Arc::new(SimRuntime::new()));
//!
//! let array = unsafe { client.send_proxy("NSMutableArray", "array", &[]) }?;
//! unsafe { array.send("addObject:", &["Test String".into()]) }?;
//!
//! assert_eq!(unsafe { array.send_int("count", &[]) }?, 1);
//! assert_eq!(
//!     unsafe { array.send("lastObject", &[]) }?,
//!     Value::from("Test String")
//! );
//! # Ok::<(), objclink::Error>(())
//! ```

pub mod abi;
pub mod client;
mod coerce;
pub mod error;
pub mod message;
pub mod proxy;
pub mod runtime;
pub mod value;

pub use abi::{ForeignCall, NativeArg, RawReturn, ReturnKind, StructValue};
pub use client::{Client, Coercion};
pub use error::{Error, Lookup, Result};
pub use message::{Message, Target};
pub use proxy::{AutoreleasePool, BoxError, Peerable, Proxy, Recipient};
#[cfg(target_vendor = "apple")]
pub use runtime::ObjcRuntime;
pub use runtime::{Encoding, Handle, Runtime, Scalar, Signature, SimRuntime};
pub use value::Value;
