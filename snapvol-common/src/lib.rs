//! # snapvol Common
//!
//! Shared utilities for the snapvol binaries.
//!
//! ## Logging
//!
//! ```rust,ignore
//! use snapvol_common::{init_logging, LogFormat};
//!
//! LogFormat::Json.init("info").unwrap();
//! // or
//! init_logging("debug").unwrap();
//! ```

pub mod logging;

pub use logging::{init_logging, init_logging_json, LogFormat};
