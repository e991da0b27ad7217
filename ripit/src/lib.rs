//! ripit library crate.
//!
//! Task execution and media pipeline engine: two task lanes, the extractor/transcoder
//! pipeline and the persisted media queue.

pub mod config;
pub mod domain;
pub mod error;
pub mod extractor;
pub mod logging;
pub mod pipeline;
pub mod services;
pub mod settings;
pub mod store;
pub mod tasks;
pub mod utils;

pub use error::{Error, Result};
