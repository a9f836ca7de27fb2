//! reagg Core - Document, value and error types for reagg.
//!
//! This crate provides the foundational types shared by the store interfaces
//! and the reactive engine:
//!
//! - `Value`: a dynamically typed field value (scalars, arrays, sub-documents)
//! - `Document`: a map of field name to value
//! - `DocumentId`: the identity used to match result documents across iterations
//! - `Error`: error types for configuration, execution and watch failures
//!
//! # Example
//!
//! ```rust
//! use reagg_core::{doc, DocumentId, Value};
//!
//! let user = doc! { "_id" => 1, "name" => "Alice" };
//!
//! assert_eq!(user.identity("_id").unwrap(), DocumentId::Int(1));
//! assert_eq!(user.get("name"), Some(&Value::String("Alice".into())));
//! ```

mod document;
mod error;
mod value;

pub use document::{Document, DocumentId, DEFAULT_ID_FIELD};
pub use error::{Error, Result};
pub use value::Value;
