//! Local ownership registry
//!
//! Tracks which producers claim which channels. Each channel maps to the ordered
//! list of its claimants; the last one is the current owner. Each producer keeps a
//! count of the channels it appears in, and the entry is dropped when the count
//! reaches zero.
//!
//! The registry is owned by the commit worker and mutated only there.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::transaction::{ProducerId, ProducerIdentity, RecordId, TransactionRecord};

/// What the registry knows about a producer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProducerEntry {
    /// Producer name written to `iocName`
    pub ioc_name: String,
    /// Host name written to `hostName`
    pub host_name: String,
    /// Owner of directory writes made on its behalf
    pub owner: String,
    /// Number of channels whose claimant list contains this producer
    pub channel_count: usize,
}

impl ProducerEntry {
    fn fresh(identity: &ProducerIdentity) -> Self {
        Self {
            ioc_name: identity.ioc_name.clone(),
            host_name: identity.host_name.clone(),
            owner: identity.owner.clone(),
            channel_count: 0,
        }
    }
}

/// Channel names touched by one transaction, handed to the reconciler
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Claimed names, in announcement order, without duplicates
    pub new_names: Vec<String>,
    /// Withdrawn names
    pub removed_names: BTreeSet<String>,
}

impl ChangeSet {
    /// True when the transaction neither claimed nor withdrew anything
    pub fn is_empty(&self) -> bool {
        self.new_names.is_empty() && self.removed_names.is_empty()
    }
}

/// Point-in-time copy of the registry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistrySnapshot {
    /// Claimant lists by channel
    pub channels: BTreeMap<String, Vec<ProducerId>>,
    /// Producers by id
    pub producers: BTreeMap<ProducerId, ProducerEntry>,
}

impl RegistrySnapshot {
    /// Current owner of a channel
    pub fn owner_of(&self, channel: &str) -> Option<&ProducerId> {
        self.channels.get(channel).and_then(|c| c.last())
    }
}

/// Channel ownership table plus producer registry
#[derive(Debug, Default)]
pub struct LocalRegistry {
    channels: BTreeMap<String, Vec<ProducerId>>,
    producers: BTreeMap<ProducerId, ProducerEntry>,
    /// Record id to channel name, per producer, for resolving withdrawals
    records: BTreeMap<ProducerId, BTreeMap<RecordId, String>>,
}

impl LocalRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the producer if this is its first transaction on the connection.
    pub fn register_producer_if_initial(
        &mut self,
        record: &TransactionRecord,
        identity: &ProducerIdentity,
    ) {
        if record.initial {
            self.register_producer(identity);
        }
    }

    /// Insert a fresh entry with a zero count, replacing any previous one
    pub fn register_producer(&mut self, identity: &ProducerIdentity) {
        let previous = self
            .producers
            .insert(identity.id.clone(), ProducerEntry::fresh(identity));
        if let Some(stale) = previous.filter(|e| e.channel_count > 0) {
            tracing::warn!(
                producer = %identity.id,
                stale_count = stale.channel_count,
                "re-registered producer still held claims; its count restarts at zero"
            );
        }
    }

    /// Add `producer` as the newest claimant of `channel`.
    ///
    /// A producer that already claims the channel is moved to the end without
    /// changing its count. Returns false if the producer is not registered.
    pub fn claim(&mut self, channel: &str, producer: &ProducerId) -> bool {
        let Some(entry) = self.producers.get_mut(producer) else {
            tracing::error!(%producer, %channel, "claim from unregistered producer ignored");
            return false;
        };

        let claimants = self.channels.entry(channel.to_string()).or_default();
        match claimants.iter().position(|p| p == producer) {
            Some(pos) => {
                let id = claimants.remove(pos);
                claimants.push(id);
            }
            None => {
                claimants.push(producer.clone());
                entry.channel_count += 1;
            }
        }
        true
    }

    /// Remove `producer` from the claimants of `channel`.
    ///
    /// Returns false if the producer did not claim the channel.
    pub fn withdraw(&mut self, channel: &str, producer: &ProducerId) -> bool {
        let Some(claimants) = self.channels.get_mut(channel) else {
            return false;
        };
        let Some(pos) = claimants.iter().position(|p| p == producer) else {
            return false;
        };
        claimants.remove(pos);
        if claimants.is_empty() {
            self.channels.remove(channel);
        }

        match self.producers.get_mut(producer) {
            Some(entry) if entry.channel_count == 0 => {
                tracing::error!(
                    %producer,
                    %channel,
                    "channel count negative; registry is inconsistent"
                );
            }
            Some(entry) => {
                entry.channel_count -= 1;
                if entry.channel_count == 0 {
                    self.producers.remove(producer);
                    self.records.remove(producer);
                }
            }
            None => {
                tracing::error!(%producer, %channel, "withdrawal from unregistered producer");
            }
        }
        true
    }

    /// Apply one transaction: register if initial, then claims, then withdrawals.
    pub fn apply(&mut self, record: &TransactionRecord, identity: &ProducerIdentity) -> ChangeSet {
        let producer = &identity.id;
        self.register_producer_if_initial(record, identity);
        if !record.addrec.is_empty() && !self.producers.contains_key(producer) {
            tracing::warn!(%producer, "claims from a producer without an initial transaction");
            self.register_producer(identity);
        }

        // Withdrawals are resolved against the state before this transaction's claims.
        let mut removed_names = BTreeSet::new();
        let index = self.records.entry(producer.clone()).or_default();
        for rid in &record.delrec {
            match index.remove(rid) {
                Some(name) => {
                    removed_names.insert(name);
                }
                None => tracing::warn!(%producer, record = rid, "withdrawal of unknown record"),
            }
        }
        if !record.connected {
            removed_names.extend(self.channels_of(producer));
        }

        let mut new_names = Vec::with_capacity(record.addrec.len());
        let mut seen = BTreeSet::new();
        for (rid, addition) in &record.addrec {
            self.records
                .entry(producer.clone())
                .or_default()
                .insert(*rid, addition.name.clone());
            self.claim(&addition.name, producer);
            if seen.insert(addition.name.as_str()) {
                new_names.push(addition.name.clone());
            }
        }

        for name in &removed_names {
            self.withdraw(name, producer);
        }
        if !record.connected {
            self.records.remove(producer);
        }
        if self.records.get(producer).is_some_and(BTreeMap::is_empty) {
            self.records.remove(producer);
        }

        ChangeSet {
            new_names,
            removed_names,
        }
    }

    /// Channels whose claimant list contains `producer`
    pub fn channels_of(&self, producer: &ProducerId) -> Vec<String> {
        self.channels
            .iter()
            .filter(|(_, claimants)| claimants.contains(producer))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Current owner of a channel and its registry entry
    pub fn current_claimant(&self, channel: &str) -> Option<(&ProducerId, &ProducerEntry)> {
        let id = self.channels.get(channel)?.last()?;
        self.producers.get(id).map(|entry| (id, entry))
    }

    /// Claimants of a channel, oldest first
    pub fn claimants(&self, channel: &str) -> &[ProducerId] {
        self.channels.get(channel).map_or(&[], Vec::as_slice)
    }

    /// Registry entry for a producer
    pub fn producer(&self, producer: &ProducerId) -> Option<&ProducerEntry> {
        self.producers.get(producer)
    }

    /// Number of claimed channels
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of registered producers
    pub fn producer_count(&self) -> usize {
        self.producers.len()
    }

    /// Iterate claimed channels with their claimants
    pub fn iter_channels(&self) -> impl Iterator<Item = (&str, &[ProducerId])> {
        self.channels
            .iter()
            .map(|(name, claimants)| (name.as_str(), claimants.as_slice()))
    }

    /// Copy the current state
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            channels: self.channels.clone(),
            producers: self.producers.clone(),
        }
    }

    /// Producers whose stored count disagrees with the ownership table
    pub fn count_violations(&self) -> Vec<ProducerId> {
        self.producers
            .iter()
            .filter(|(id, entry)| entry.channel_count != self.channels_of(id).len())
            .map(|(id, _)| id.clone())
            .collect()
    }
}
