//! relcat Client - Catalog service access
//!
//! Everything the engine knows about the catalog goes through the
//! [`CatalogApi`] trait. Two implementations are provided:
//!
//! - [`HttpCatalog`]: talks to a catalog service over HTTP
//! - [`InMemoryCatalog`]: keeps the catalog in process, for tests and dry runs

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod api;
pub mod error;
pub mod http;
pub mod memory;

pub use api::{CatalogApi, ComponentParent, Lookup};
pub use error::{CatalogError, ErrorKind, Result};
pub use http::HttpCatalog;
pub use memory::InMemoryCatalog;
