use super::super::ConfigurationError;
use std::fmt;

const DEAD_LETTER_SUFFIX: &str = ":dead-letter";

/// Name of an event stream
///
/// By convention subjects follow a `domain:action` pattern (e.g. `ticket:created`),
/// however, this is not enforced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subject(String);

impl Subject {
    /// Creates a new instance, rejecting empty names
    pub fn new(name: impl Into<String>) -> Result<Self, ConfigurationError> {
        let name = name.into();

        if name.trim().is_empty() {
            return Err(ConfigurationError::EmptySubject);
        }

        Ok(Self(name))
    }

    /// Subject onto which messages are moved that could not be processed on this one
    pub fn dead_letter(&self) -> Subject {
        Subject(format!("{}{}", self.0, DEAD_LETTER_SUFFIX))
    }

    /// Raw name of the subject
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Subject {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of a durable consumer group
///
/// All listeners declaring the same group on the same [`Subject`] share one persistent cursor
/// and compete for messages. The name has to be stable across deployments, changing it causes
/// a full replay for the new name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DurableGroup(String);

impl DurableGroup {
    /// Creates a new instance, rejecting empty names
    pub fn new(name: impl Into<String>) -> Result<Self, ConfigurationError> {
        let name = name.into();

        if name.trim().is_empty() {
            return Err(ConfigurationError::EmptyGroup);
        }

        Ok(Self(name))
    }

    /// Raw name of the group
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for DurableGroup {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DurableGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
