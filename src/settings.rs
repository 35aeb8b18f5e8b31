//! Configuration loading for the directory.
//!
//! Values are layered: built-in defaults, then an optional `stowage.toml`
//! next to the working directory, then environment variables prefixed with
//! `STOWAGE_` (e.g. `STOWAGE_DATABASE_PATH`).

use std::path::PathBuf;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::construct::PersistenceMode;
use crate::error::{Result, StowageError};

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Path of the SQLite database file.
    pub database_path: String,
    /// When set, the database file is ignored and nothing survives the
    /// process.
    pub in_memory: bool,
}

impl Settings {
    pub fn load() -> Result<Settings> {
        let loaded = Config::builder()
            .set_default("database_path", "stowage.db")
            .map_err(cfg_err)?
            .set_default("in_memory", false)
            .map_err(cfg_err)?
            .add_source(File::new("stowage", FileFormat::Toml).required(false))
            .add_source(Environment::with_prefix("STOWAGE"))
            .build()
            .map_err(cfg_err)?;
        loaded.try_deserialize().map_err(cfg_err)
    }

    pub fn persistence_mode(&self) -> PersistenceMode {
        if self.in_memory {
            PersistenceMode::InMemory
        } else {
            PersistenceMode::File(PathBuf::from(&self.database_path))
        }
    }
}

fn cfg_err(error: config::ConfigError) -> StowageError {
    StowageError::Config(error.to_string())
}
