//! Sizing of the storage tables.

use crate::storage::{StoreError, StoreResult};

/// Table sizes and tree layout for a store.
///
/// Every table is allocated up front from these exponents; a run that needs
/// more aborts (see [`crate::fatal`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// log2 of the number of root entries (root index / root tables).
    pub root_log2: u32,
    /// log2 of the content table slots (flat store) or sub-state tables
    /// (tree chunks, tree nodes).
    pub data_log2: u32,
    /// log2 of the arena capacity, in slots.
    pub arena_log2: u32,
    /// Slots at the front of a state kept verbatim in the root tuple.
    pub header_len: usize,
    /// Slots per tree chunk.
    pub chunk_len: usize,
    /// Length every root state must have, when the model declares one.
    pub fixed_length: Option<usize>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root_log2: 20,
            data_log2: 21,
            arena_log2: 24,
            header_len: 0,
            chunk_len: 4,
            fixed_length: None,
        }
    }
}

impl StoreConfig {
    /// Small tables, for tests and tiny models.
    pub fn small() -> Self {
        Self {
            root_log2: 12,
            data_log2: 13,
            arena_log2: 18,
            ..Self::default()
        }
    }

    pub fn with_fixed_length(mut self, length: usize) -> Self {
        self.fixed_length = if length == 0 { None } else { Some(length) };
        self
    }

    pub fn with_chunks(mut self, header_len: usize, chunk_len: usize) -> Self {
        self.header_len = header_len;
        self.chunk_len = chunk_len;
        self
    }

    pub fn validate(&self) -> StoreResult<()> {
        let check = |name: &str, v: u32, lo: u32, hi: u32| {
            if (lo..=hi).contains(&v) {
                Ok(())
            } else {
                Err(StoreError::InvalidConfig(format!(
                    "{name} = {v} outside {lo}..={hi}"
                )))
            }
        };
        check("root_log2", self.root_log2, 4, 31)?;
        check("data_log2", self.data_log2, 4, 31)?;
        check("arena_log2", self.arena_log2, 8, 36)?;
        if self.chunk_len == 0 {
            return Err(StoreError::InvalidConfig("chunk_len must be at least 1".into()));
        }
        if self.fixed_length.is_some_and(|len| len > crate::id::MAX_LENGTH) {
            return Err(StoreError::InvalidConfig(format!(
                "fixed length exceeds {} slots",
                crate::id::MAX_LENGTH
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(StoreConfig::default().validate().is_ok());
        assert!(StoreConfig::small().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        let cfg = StoreConfig {
            root_log2: 2,
            ..StoreConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(StoreError::InvalidConfig(_))));

        let cfg = StoreConfig::default().with_chunks(0, 0);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_fixed_length_zero_means_variable() {
        assert_eq!(StoreConfig::default().with_fixed_length(0).fixed_length, None);
        assert_eq!(StoreConfig::default().with_fixed_length(6).fixed_length, Some(6));
    }
}
