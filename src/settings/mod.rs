//! TOML-based settings for engram.
//!
//! Settings are loaded from `~/.engram/settings.toml` with environment variable
//! interpolation support. Values left unset can still come from the
//! environment through the `get_with_env_fallback` helper.
//!
//! # Usage
//!
//! ```rust,ignore
//! use engram::settings::{SettingsManager, get_with_env_fallback};
//!
//! // Load settings, writing the template on first run
//! let manager = SettingsManager::new();
//! manager.ensure_settings_file().await?;
//! let settings = manager.load().await?;
//!
//! // Get a value with environment variable fallback
//! let api_key = get_with_env_fallback(
//!     &settings.llm.api_key,
//!     &["OPENAI_API_KEY"],
//!     None,
//! );
//! ```

pub mod loader;
pub mod schema;

pub use loader::{get_with_env_fallback, SettingsManager};
pub use schema::EngramSettings;
