//! The in-memory command table

use serde::{Deserialize, Serialize};

use crate::prelude::*;

/// An error arising from a table operation
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    /// No command with the given name exists
    #[error("Command {0:?} does not exist")]
    NotFound(String),
    /// A command was given no source code
    #[error("Command {0:?} has no source code")]
    EmptySource(String),
}

/// Mapping from command name to snippet source
///
/// Names are case-sensitive.  A name present in the table always maps to a
/// non-empty source string.  Persisted as a flat JSON object of name to
/// source.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandTable(BTreeMap<String, String>);

impl CommandTable {
    /// Construct an empty table
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Insert or overwrite a command, returning the source it replaced
    ///
    /// # Errors
    /// Returns [`TableError::EmptySource`] if `source` is empty.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        source: impl Into<String>,
    ) -> Result<Option<String>, TableError> {
        let name = name.into();
        let source = source.into();

        if source.is_empty() {
            return Err(TableError::EmptySource(name));
        }

        Ok(self.0.insert(name, source))
    }

    /// Remove a command, returning its source
    ///
    /// # Errors
    /// Returns [`TableError::NotFound`] if no such command exists.
    pub fn remove(&mut self, name: &str) -> Result<String, TableError> {
        self.0
            .remove(name)
            .ok_or_else(|| TableError::NotFound(name.to_owned()))
    }

    /// Look up the source of a command
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> { self.0.get(name).map(String::as_str) }

    /// Returns true if a command with this name exists
    #[must_use]
    pub fn contains(&self, name: &str) -> bool { self.0.contains_key(name) }

    /// Returns true if the table holds no commands
    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// The number of commands in the table
    #[must_use]
    pub fn len(&self) -> usize { self.0.len() }

    /// All command names, in ascending lexicographic order
    pub fn names(&self) -> impl Iterator<Item = &str> { self.0.keys().map(String::as_str) }

    /// Serialize the table for persistence
    ///
    /// # Errors
    /// Fails only if JSON serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Error serializing command table")
    }

    /// Deserialize a persisted table
    ///
    /// Entries with an empty source are dropped with a warning.
    ///
    /// # Errors
    /// Returns an error if `json` is not an object of strings.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut table: Self = serde_json::from_str(json).context("Error parsing command table")?;

        table.0.retain(|name, source| {
            let keep = !source.is_empty();
            if !keep {
                warn!(%name, "Dropping stored command with empty source");
            }
            keep
        });

        Ok(table)
    }
}
