//! In-process directory
//!
//! A complete [`DirectoryEffects`] implementation backed by ordered maps. It never
//! fails, which makes it the base for fault-injecting wrappers in tests and a
//! usable directory when the engine is embedded without a remote service.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{Channel, DirectoryEffects, Property, Query};
use crate::error::DirectoryError;

#[derive(Debug, Default)]
struct DirectoryState {
    channels: BTreeMap<String, Channel>,
    properties: BTreeMap<String, Property>,
    /// Every `set_channels` payload, in call order, when recording
    writes: Option<Vec<Vec<Channel>>>,
}

/// Directory held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    state: RwLock<DirectoryState>,
}

impl MemoryDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty directory that logs every `set_channels` payload.
    ///
    /// The log is never trimmed; use this only where the payloads are inspected.
    pub fn recording() -> Self {
        Self {
            state: RwLock::new(DirectoryState {
                writes: Some(Vec::new()),
                ..DirectoryState::default()
            }),
        }
    }

    /// Insert a channel directly, bypassing the write log
    pub fn insert_channel(&self, channel: Channel) {
        self.state
            .write()
            .channels
            .insert(channel.name.clone(), channel);
    }

    /// Current record for `name`
    pub fn channel(&self, name: &str) -> Option<Channel> {
        self.state.read().channels.get(name).cloned()
    }

    /// All records ordered by name
    pub fn channels(&self) -> Vec<Channel> {
        self.state.read().channels.values().cloned().collect()
    }

    /// All property definitions ordered by name
    pub fn property_definitions(&self) -> Vec<Property> {
        self.state.read().properties.values().cloned().collect()
    }

    /// Payloads of every `set_channels` call so far; empty unless recording
    pub fn writes(&self) -> Vec<Vec<Channel>> {
        self.state.read().writes.clone().unwrap_or_default()
    }
}

#[async_trait]
impl DirectoryEffects for MemoryDirectory {
    async fn find_by_attributes(&self, query: &[Query]) -> Result<Vec<Channel>, DirectoryError> {
        let state = self.state.read();
        Ok(state
            .channels
            .values()
            .filter(|ch| query.iter().all(|q| q.matches(ch)))
            .cloned()
            .collect())
    }

    async fn find_property(&self, name: &str) -> Result<Option<Property>, DirectoryError> {
        Ok(self.state.read().properties.get(name).cloned())
    }

    async fn set_property(&self, property: Property) -> Result<(), DirectoryError> {
        self.state
            .write()
            .properties
            .insert(property.name.clone(), property);
        Ok(())
    }

    async fn set_channels(&self, channels: Vec<Channel>) -> Result<(), DirectoryError> {
        let mut state = self.state.write();
        for channel in &channels {
            if let Some(undefined) = channel
                .properties
                .iter()
                .find(|p| !state.properties.contains_key(&p.name))
            {
                return Err(DirectoryError::rejected(format!(
                    "property {} is not defined",
                    undefined.name
                )));
            }
        }
        for channel in &channels {
            state.channels.insert(channel.name.clone(), channel.clone());
        }
        if let Some(writes) = state.writes.as_mut() {
            writes.push(channels);
        }
        Ok(())
    }

    async fn update_property(
        &self,
        property: Property,
        channel_names: &[String],
    ) -> Result<(), DirectoryError> {
        let mut state = self.state.write();
        if !state.properties.contains_key(&property.name) {
            return Err(DirectoryError::rejected(format!(
                "property {} is not defined",
                property.name
            )));
        }
        for name in channel_names {
            if let Some(channel) = state.channels.get_mut(name) {
                channel.set_property(property.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{HOST_NAME, IOC_NAME, PV_STATUS};

    fn record(name: &str, host: &str, ioc: &str, status: &str) -> Channel {
        let mut ch = Channel::new(name, "cfstore");
        ch.set_property(Property::with_value(HOST_NAME, "cfstore", host));
        ch.set_property(Property::with_value(IOC_NAME, "cfstore", ioc));
        ch.set_property(Property::with_value(PV_STATUS, "cfstore", status));
        ch
    }

    #[tokio::test]
    async fn find_by_attributes_combines_predicates() {
        let dir = MemoryDirectory::new();
        dir.insert_channel(record("A", "h1", "ioc1", "Active"));
        dir.insert_channel(record("B", "h1", "ioc2", "Active"));
        dir.insert_channel(record("C", "h2", "ioc1", "Inactive"));

        let found = dir
            .find_by_attributes(&[Query::property(HOST_NAME, "h1"), Query::property(IOC_NAME, "ioc1")])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "A");

        let active = dir
            .find_by_attributes(&[Query::property(PV_STATUS, "Active")])
            .await
            .unwrap();
        assert_eq!(active.len(), 2);

        let by_name = dir.find_by_attributes(&[Query::name("C")]).await.unwrap();
        assert_eq!(by_name[0].name, "C");
    }

    #[tokio::test]
    async fn set_channels_requires_defined_properties() {
        let dir = MemoryDirectory::recording();
        let err = dir
            .set_channels(vec![record("A", "h1", "ioc1", "Active")])
            .await
            .unwrap_err();
        assert!(!err.is_transient());
        assert!(dir.channel("A").is_none());
        assert!(dir.writes().is_empty());
    }

    #[tokio::test]
    async fn write_log_is_kept_only_when_recording() {
        let plain = MemoryDirectory::new();
        let recording = MemoryDirectory::recording();
        for dir in [&plain, &recording] {
            for name in [HOST_NAME, IOC_NAME, PV_STATUS] {
                dir.set_property(Property::definition(name, "cfstore")).await.unwrap();
            }
            for _ in 0..3 {
                dir.set_channels(vec![record("A", "h1", "ioc1", "Active")])
                    .await
                    .unwrap();
            }
        }

        assert!(plain.writes().is_empty());
        assert!(plain.channel("A").is_some());
        assert_eq!(recording.writes().len(), 3);
    }

    #[tokio::test]
    async fn update_property_touches_only_named_channels() {
        let dir = MemoryDirectory::new();
        for name in [HOST_NAME, IOC_NAME, PV_STATUS] {
            dir.set_property(Property::definition(name, "cfstore")).await.unwrap();
        }
        let mut a = record("A", "h1", "ioc1", "Active");
        a.set_property(Property::with_value("archive", "ops", "yes"));
        dir.insert_channel(a);
        dir.insert_channel(record("B", "h1", "ioc1", "Active"));

        dir.update_property(
            Property::with_value(PV_STATUS, "cfstore", "Inactive"),
            &["A".to_string(), "missing".to_string()],
        )
        .await
        .unwrap();

        let a = dir.channel("A").unwrap();
        assert_eq!(a.property_value(PV_STATUS), Some("Inactive"));
        assert_eq!(a.property_value("archive"), Some("yes"));
        assert_eq!(dir.channel("B").unwrap().property_value(PV_STATUS), Some("Active"));
        assert!(dir.channel("missing").is_none());
    }
}
