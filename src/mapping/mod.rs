//! Keycode to device command lookup.
//!
//! The [`KeyMapper`] is built once at startup from the default Sony keymap plus
//! any `[mapping]` overrides in the config file and is read-only afterwards.
//! Lookups never fail: an unmapped keycode is `None`, which the bridge reports
//! on the unmapped-key channel instead of dispatching.

pub mod error;
pub mod ircc;

pub use error::MappingError;

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, info};

/// Abstract command identifier, e.g. `volumeup`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct CommandId(&'static str);

impl CommandId {
    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// A command together with the payload the device expects for it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Command {
    pub id: CommandId,
    pub ircc_code: &'static str,
}

impl Command {
    /// Resolves a command by name from the IRCC catalog
    pub fn from_catalog(name: &str) -> Option<Self> {
        ircc::lookup(name).map(|(id, ircc_code)| Self {
            id: CommandId(id),
            ircc_code,
        })
    }
}

/// Static keycode → command table
#[derive(Clone, Debug)]
pub struct KeyMapper {
    table: HashMap<u16, Command>,
}

impl KeyMapper {
    /// Builds the default FLIRC → Bravia keymap
    pub fn sony_default() -> Self {
        let table = ircc::DEFAULT_KEYMAP
            .iter()
            .filter_map(|(keycode, name)| Command::from_catalog(name).map(|c| (*keycode, c)))
            .collect();
        Self { table }
    }

    /// Builds the default keymap and applies config overrides on top of it.
    ///
    /// Keys are keycodes as strings (TOML table keys), values are catalog command
    /// names. An empty value removes the default binding for that keycode.
    pub fn with_overrides(overrides: &BTreeMap<String, String>) -> Result<Self, MappingError> {
        let mut mapper = Self::sony_default();

        for (raw_keycode, name) in overrides {
            let keycode: u16 = raw_keycode
                .trim()
                .parse()
                .map_err(|_| MappingError::InvalidKeycode(raw_keycode.clone()))?;

            if name.is_empty() {
                debug!("Removing default binding for keycode {}", keycode);
                mapper.table.remove(&keycode);
                continue;
            }

            let command = Command::from_catalog(name).ok_or_else(|| MappingError::UnknownCommand {
                keycode,
                command: name.clone(),
            })?;
            debug!("Binding keycode {} to {}", keycode, command.id);
            mapper.table.insert(keycode, command);
        }

        if !overrides.is_empty() {
            info!("Applied {} keymap overrides", overrides.len());
        }
        Ok(mapper)
    }

    pub fn map(&self, keycode: u16) -> Option<CommandId> {
        self.table.get(&keycode).map(|command| command.id)
    }

    pub fn command(&self, keycode: u16) -> Option<Command> {
        self.table.get(&keycode).copied()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
