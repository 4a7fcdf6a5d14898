//! Remote channel directory: record model and client effect trait
//!
//! The directory stores one [`Channel`] per name. Each channel carries a list of
//! [`Property`] values, each with its own owner. Four properties are managed by
//! this crate (see [`MANAGED_PROPERTIES`]); everything else on a record belongs to
//! other writers and is preserved on update.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DirectoryError;

pub mod memory;

pub use memory::MemoryDirectory;

/// Property holding the producer's host name
pub const HOST_NAME: &str = "hostName";
/// Property holding the producer (IOC) name
pub const IOC_NAME: &str = "iocName";
/// Property holding [`PvStatus`]
pub const PV_STATUS: &str = "pvStatus";
/// Property holding the last change timestamp
pub const TIME: &str = "time";

/// Properties written by the reconciler and required in the directory schema.
pub const MANAGED_PROPERTIES: [&str; 4] = [HOST_NAME, IOC_NAME, PV_STATUS, TIME];

/// Liveness of a channel as recorded in the directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PvStatus {
    /// Some producer currently claims the channel
    Active,
    /// No producer claims the channel
    Inactive,
}

impl PvStatus {
    /// Wire value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Inactive => "Inactive",
        }
    }
}

impl fmt::Display for PvStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named property, either as a schema definition (no value) or attached to a channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    /// Property name
    pub name: String,
    /// Owner of this property value
    pub owner: String,
    /// Value; `None` for schema definitions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Property {
    /// Schema definition of a property
    pub fn definition(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            value: None,
        }
    }

    /// Property with a value
    pub fn with_value(
        name: impl Into<String>,
        owner: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            value: Some(value.into()),
        }
    }
}

/// A channel record as stored in the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Channel name, unique in the directory
    pub name: String,
    /// Record owner
    pub owner: String,
    /// Attached properties
    #[serde(default)]
    pub properties: Vec<Property>,
}

impl Channel {
    /// Channel with no properties
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            properties: Vec::new(),
        }
    }

    /// Look up a property by name
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Value of a property, if present and set
    pub fn property_value(&self, name: &str) -> Option<&str> {
        self.property(name).and_then(|p| p.value.as_deref())
    }

    /// Replace (or add) a single property, keeping the others in place
    pub fn set_property(&mut self, property: Property) {
        match self.properties.iter_mut().find(|p| p.name == property.name) {
            Some(existing) => *existing = property,
            None => self.properties.push(property),
        }
    }
}

/// One predicate of a directory search. Predicates are combined with AND.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Property `name` is present with a value matching `value`
    Property {
        /// Property name
        name: String,
        /// Value pattern
        value: String,
    },
    /// Channel name matches the pattern (`*` and `?` wildcards)
    Name(String),
}

impl Query {
    /// Property predicate
    pub fn property(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Property {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Name predicate
    pub fn name(pattern: impl Into<String>) -> Self {
        Self::Name(pattern.into())
    }

    /// Whether `channel` satisfies this predicate
    pub fn matches(&self, channel: &Channel) -> bool {
        match self {
            Self::Property { name, value } => channel
                .property_value(name)
                .is_some_and(|v| glob_match(value, v)),
            Self::Name(pattern) => glob_match(pattern, &channel.name),
        }
    }
}

/// Match `text` against a pattern where `*` is any run and `?` any single char.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((sp, st)) = star {
            p = sp + 1;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|c| *c == '*')
}

/// Client operations the engine needs from the remote directory.
///
/// Implementations report outages as [`DirectoryError::Unavailable`]; the
/// engine retries those and propagates everything else.
#[async_trait]
pub trait DirectoryEffects: Send + Sync {
    /// All channels satisfying every predicate
    async fn find_by_attributes(&self, query: &[Query]) -> Result<Vec<Channel>, DirectoryError>;

    /// Schema definition of a property, if it exists
    async fn find_property(&self, name: &str) -> Result<Option<Property>, DirectoryError>;

    /// Create or replace a property definition
    async fn set_property(&self, property: Property) -> Result<(), DirectoryError>;

    /// Create or replace the given channels
    async fn set_channels(&self, channels: Vec<Channel>) -> Result<(), DirectoryError>;

    /// Set one property on every named channel, leaving their other properties alone
    async fn update_property(
        &self,
        property: Property,
        channel_names: &[String],
    ) -> Result<(), DirectoryError>;
}
