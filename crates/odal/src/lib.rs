//! Layered configuration files.
//!
//! Every config type lives in its own toml file inside a main config directory. A second,
//! optional overlay directory can override individual keys, which lets a deployment change
//! a single threshold without copying the whole file.

mod error;


use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Serialize, de::DeserializeOwned};
use toml::{Table, Value};
use tracing::debug;

pub use error::{Error, Result};

/// A configuration struct that is stored as a toml file.
///
/// ```no_run
/// use odal::Config;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Deserialize, Serialize)]
/// struct MeowConfig {
///     count: u32,
/// }
///
/// impl Config for MeowConfig {
///     const PATH: &'static str = "meow.toml";
/// }
///
/// // reads `./config/meow.toml`
/// let config = MeowConfig::load("./config").unwrap();
/// ```
pub trait Config: Serialize + DeserializeOwned {
    /// Path of the config file, relative to a config directory.
    const PATH: &'static str;

    /// Load the config from `dir`.
    fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let path = dir.as_ref().join(Self::PATH);
        let table = read_table(&path)?;

        from_table(table, path)
    }

    /// Load the config from `main_dir`, with the keys in `overlay_dir` taking precedence.
    ///
    /// A missing overlay file is not an error, the main config is used as is.
    fn load_with_overlay(
        main_dir: impl AsRef<Path>,
        overlay_dir: impl AsRef<Path>,
    ) -> Result<Self> {
        let main_path = main_dir.as_ref().join(Self::PATH);
        let overlay_path = overlay_dir.as_ref().join(Self::PATH);

        let main = read_table(&main_path)?;
        let table = if overlay_path.is_file() {
            debug!(path = %overlay_path.display(), "applying config overlay");
            merge_tables(main, read_table(&overlay_path)?, false)
        } else {
            debug!(path = %overlay_path.display(), "no config overlay found");
            main
        };

        from_table(table, main_path)
    }

    /// Store the config as `dir/PATH`.
    fn store(&self, dir: impl AsRef<Path>) -> Result<()> {
        let path = dir.as_ref().join(Self::PATH);
        let contents = toml::to_string_pretty(self).map_err(|source| Error::Serialize {
            name: Self::PATH,
            source,
        })?;

        fs::write(&path, contents).map_err(|source| Error::Io { path, source })
    }
}

/// Merge `overlay` into `main`.
///
/// Nested tables are merged recursively, any other value in the overlay replaces the value in
/// main. Keys that only exist in the overlay are added when `add_key` is set, and dropped
/// otherwise.
#[must_use]
pub fn merge_tables(mut main: Table, overlay: Table, add_key: bool) -> Table {
    for (key, overlay_value) in overlay {
        match (main.remove(&key), overlay_value) {
            (Some(Value::Table(main_table)), Value::Table(overlay_table)) => {
                let merged = merge_tables(main_table, overlay_table, add_key);
                main.insert(key, Value::Table(merged));
            }
            (Some(_), overlay_value) => {
                main.insert(key, overlay_value);
            }
            (None, overlay_value) if add_key => {
                main.insert(key, overlay_value);
            }
            (None, _) => debug!(key = %key, "ignoring overlay key that is not in the main config"),
        }
    }

    main
}

fn read_table(path: &Path) -> Result<Table> {
    let contents = fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;

    contents.parse::<Table>().map_err(|source| Error::Deserialize {
        path: path.to_path_buf(),
        source,
    })
}

fn from_table<T: DeserializeOwned>(table: Table, path: PathBuf) -> Result<T> {
    Value::Table(table)
        .try_into()
        .map_err(|source| Error::Deserialize { path, source })
}
