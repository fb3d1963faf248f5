//! Error definitions for the key mapping module

use thiserror::Error;

/// Errors raised while building a key map
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MappingError {
    /// A mapping entry names a command the IRCC catalog does not know
    #[error("Unknown command '{command}' for keycode {keycode}")]
    UnknownCommand { keycode: u16, command: String },

    /// A mapping entry key is not a valid keycode
    #[error("Invalid keycode '{0}' in mapping table")]
    InvalidKeycode(String),
}
