//! Topic naming and validation.
//!
//! A topic is the delivery scope for one logistics entity, formed as
//! `scope:id` (e.g. `package:TRK-1`). Topics come into existence on first
//! join and vanish when their last member leaves.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maximum entity id length.
pub const MAX_ENTITY_ID_LENGTH: usize = 128;

/// Errors from topic construction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopicError {
    /// Scope is not one of the known entity kinds.
    #[error("Unknown scope: {0}")]
    UnknownScope(String),

    /// Entity id failed validation.
    #[error("Invalid entity id: {0}")]
    InvalidId(&'static str),
}

/// The entity kinds a client can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicScope {
    /// A single package, keyed by tracking number.
    Package,
    /// A hub, keyed by hub id.
    Hub,
    /// A delivery batch, keyed by batch id.
    Batch,
}

impl TopicScope {
    /// Wire name of the scope.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TopicScope::Package => "package",
            TopicScope::Hub => "hub",
            TopicScope::Batch => "batch",
        }
    }
}

impl FromStr for TopicScope {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "package" => Ok(TopicScope::Package),
            "hub" => Ok(TopicScope::Hub),
            "batch" => Ok(TopicScope::Batch),
            other => Err(TopicError::UnknownScope(other.to_string())),
        }
    }
}

impl fmt::Display for TopicScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validate an entity id.
///
/// # Errors
///
/// Returns an error if the id is empty, too long, or contains
/// non-printable characters.
pub fn validate_entity_id(id: &str) -> Result<(), TopicError> {
    if id.is_empty() {
        return Err(TopicError::InvalidId("entity id cannot be empty"));
    }
    if id.len() > MAX_ENTITY_ID_LENGTH {
        return Err(TopicError::InvalidId("entity id too long"));
    }
    if !id.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err(TopicError::InvalidId("entity id contains invalid characters"));
    }
    Ok(())
}

/// A validated topic name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic(String);

impl Topic {
    /// Create a topic from a scope and entity id.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity id is invalid.
    pub fn new(scope: TopicScope, entity_id: &str) -> Result<Self, TopicError> {
        validate_entity_id(entity_id)?;
        Ok(Self(format!("{}:{}", scope.as_str(), entity_id)))
    }

    /// Create a topic from wire strings, resolving the scope first.
    ///
    /// # Errors
    ///
    /// Returns an error if the scope is unknown or the entity id invalid.
    pub fn resolve(scope: &str, entity_id: &str) -> Result<Self, TopicError> {
        Self::new(scope.parse()?, entity_id)
    }

    /// Topic for a package's status updates.
    ///
    /// # Errors
    ///
    /// Returns an error if the tracking number is invalid.
    pub fn package(tracking_number: &str) -> Result<Self, TopicError> {
        Self::new(TopicScope::Package, tracking_number)
    }

    /// Topic for a hub's updates.
    ///
    /// # Errors
    ///
    /// Returns an error if the hub id is invalid.
    pub fn hub(hub_id: &str) -> Result<Self, TopicError> {
        Self::new(TopicScope::Hub, hub_id)
    }

    /// Topic for a batch's updates.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch id is invalid.
    pub fn batch(batch_id: &str) -> Result<Self, TopicError> {
        Self::new(TopicScope::Batch, batch_id)
    }

    /// The topic name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
