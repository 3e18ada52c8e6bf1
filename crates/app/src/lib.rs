#![deny(unsafe_code)]

//! Terminal chat client for the citation-backed answer service.

pub mod app;
pub mod cli;
pub mod error;
/// Plain-text transcript output.
pub mod render;
/// Settings persistence.
pub mod settings;

pub use app::run;
pub use error::AppError;
