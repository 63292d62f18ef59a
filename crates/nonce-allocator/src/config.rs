//! Settings of the nonce allocator.

use std::path::Path;

use crate::completed::DEFAULT_COMPLETED_CAPACITY;

/// Configuration for [`NonceAllocator`](crate::NonceAllocator).
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct NonceAllocatorConfig {
    /// Maximum number of finalized `(address, nonce)` pairs remembered before
    /// the least recently used one is evicted.
    pub completed_capacity: u32,
}

impl NonceAllocatorConfig {
    /// Parses [`NonceAllocatorConfig`] from a toml formatted file at `path`.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file_contents = std::fs::read_to_string(path)?;
        Self::from_toml(&file_contents)
    }

    /// Parses [`NonceAllocatorConfig`] from a toml string.
    pub fn from_toml(contents: &str) -> Result<Self, Error> {
        let this: Self = toml::from_str(contents)?;
        this.validate()?;
        Ok(this)
    }

    /// Checks the settings for values the allocator can't work with.
    pub fn validate(&self) -> Result<(), Error> {
        if self.completed_capacity == 0 {
            return Err(Error::InvalidCapacity);
        }
        Ok(())
    }

    /// Sets the capacity of the completed nonce cache.
    pub const fn with_completed_capacity(mut self, completed_capacity: u32) -> Self {
        self.completed_capacity = completed_capacity;
        self
    }
}

impl Default for NonceAllocatorConfig {
    fn default() -> Self {
        Self {
            completed_capacity: DEFAULT_COMPLETED_CAPACITY,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to open file for reading")]
    OpenFile(#[from] std::io::Error),
    #[error("failed parsing file contents")]
    Parse(#[from] toml::de::Error),
    #[error("completed nonce capacity must be greater than zero")]
    InvalidCapacity,
}
