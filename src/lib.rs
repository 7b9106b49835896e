//! # Modwrap
//!
//! A CLI tool that bootstraps wrapper configurations for remote
//! infrastructure modules: it resolves a module source URL, inspects the
//! variables the module declares, and renders a ready-to-edit wrapper into a
//! target directory.
//!
//! ## Usage
//!
//! ```bash
//! modwrap <MODULE_URL> [--template <TEMPLATE_URL>] [--var Name=value] [--output DIR]
//! ```
//!
//! ## Modules
//!
//! - `error` - The error taxonomy of the scaffolding pipeline
//! - `scaffold` - Source resolution, variable classification, and rendering
//! - `subprocess` - Unified subprocess abstraction layer for testing
pub mod error;
pub mod scaffold;
pub mod subprocess;
