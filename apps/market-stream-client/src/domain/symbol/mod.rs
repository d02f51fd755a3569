//! Instrument Symbols
//!
//! A `Symbol` is the canonical, uppercase form of a ticker. Two symbols
//! are equal iff their canonical forms are equal, so `"aapl"` and `"AAPL"`
//! name the same instrument.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Canonical instrument identifier.
///
/// # Example
///
/// ```rust
/// use market_stream_client::Symbol;
///
/// let symbol = Symbol::parse(" aapl ").unwrap();
/// assert_eq!(symbol.as_str(), "AAPL");
/// assert_eq!(symbol, Symbol::parse("AAPL").unwrap());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Canonicalize raw user input into a symbol.
    ///
    /// Surrounding whitespace is trimmed and ASCII letters are uppercased.
    ///
    /// # Errors
    ///
    /// Returns `SymbolError` if the input is empty after trimming or
    /// contains anything other than printable ASCII.
    pub fn parse(raw: &str) -> Result<Self, SymbolError> {
        let trimmed = raw.trim();

        if trimmed.is_empty() {
            return Err(SymbolError::Empty);
        }

        if let Some(bad) = trimmed
            .chars()
            .find(|c| !c.is_ascii_graphic())
        {
            return Err(SymbolError::InvalidCharacter {
                symbol: trimmed.to_string(),
                character: bad,
            });
        }

        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    /// The canonical uppercase form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Symbol {
    type Error = SymbolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for Symbol {
    type Error = SymbolError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

/// Rejected symbol input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolError {
    /// Input was empty or only whitespace.
    #[error("symbol cannot be empty")]
    Empty,
    /// Input contained a character that cannot appear in a ticker.
    #[error("symbol {symbol:?} contains invalid character {character:?}")]
    InvalidCharacter {
        /// The offending input (trimmed).
        symbol: String,
        /// The first rejected character.
        character: char,
    },
}
