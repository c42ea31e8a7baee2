//! Language detection and per-language server-launch/install strategies.
//!
//! Knows nothing about LSP sessions or pools — it maps a workspace or file
//! to a canonical language id and a launch recipe, and exposes the
//! [`provider::Provider`] capability set for availability/install.

pub mod detector;
pub mod error;
pub mod provider;
pub mod recipe;
pub mod table;

pub use detector::Detector;
pub use error::{Error, Result};
pub use provider::{running_in_container, InstallOptions, Provider};
pub use recipe::{ConnectionKey, DetectedLanguage, LanguageRecipe};
pub use table::LanguageTable;
