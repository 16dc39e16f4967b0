//! # Tessera Codec
//!
//! Host value model and key ordering for Tessera.
//!
//! This crate provides:
//! - [`Value`], the dynamic value type records are made of, with a
//!   structured clone that preserves aliasing and cycles
//! - [`Key`], the totally ordered key type used by stores and indexes
//! - Conversion from values to keys with full validity checking
//!
//! ## Key Ordering
//!
//! - number < date < binary < string < array
//! - Numbers and dates compare numerically, `-0` equals `0`
//! - Binary compares byte-wise, a shorter prefix sorts first
//! - Text compares by UTF-16 code units
//! - Arrays compare element-wise, a shorter prefix sorts first
//!
//! ## Usage
//!
//! ```
//! use tessera_codec::{compare, Key, Value};
//! use std::cmp::Ordering;
//!
//! let key = Key::from_value(&Value::from("alice")).unwrap();
//! assert_eq!(key, Key::from("alice"));
//!
//! assert_eq!(
//!     compare(&Value::from(10), &Value::from("a")).unwrap(),
//!     Ordering::Less
//! );
//! assert!(Key::from_value(&Value::Number(f64::NAN)).is_err());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod key;
mod value;

pub use error::{CodecError, CodecResult};
pub use key::{compare, Key};
pub use value::{Array, Buffer, Object, Value};
