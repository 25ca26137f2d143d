//! Layered configuration
//!
//! Four layers, later ones winning:
//! 1. Built-in defaults
//! 2. Host config (`$XDG_CONFIG_HOME/np/np.toml`, else `~/.config/np/np.toml`)
//! 3. Repo config (`./np.toml` or `--config`)
//! 4. CLI flags
//!
//! The merged document is kept with its provenance in [`EffectiveConfig`]
//! and deserialized into the typed [`Settings`] the pipeline runs on.

mod defaults;
mod effective;
mod merge;
mod settings;

pub use defaults::BuiltinDefaults;
pub use effective::{host_config_path, ConfigError, ConfigOrigin, ConfigSource, EffectiveConfig, REPO_CONFIG_FILE};
pub use merge::{deep_merge, merge_layers};
pub use settings::{BuildSettings, DriverSpec, KernelSettings, ReferenceSettings, Settings, SourceSettings};
