//! Incoming ownership transactions
//!
//! A [`TransactionRecord`] is one batch of claims and withdrawals announced by a
//! single producer connection. Records are decoded elsewhere and handed to the
//! engine unchanged.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CfStoreError, CfStoreResult};

/// Producer-local identifier of a record
pub type RecordId = u64;

/// Info key carrying the owner override, checked first
pub const INFO_CF_USERNAME: &str = "CF_USERNAME";
/// Info key carrying the owner override, checked second
pub const INFO_ENGINEER: &str = "ENGINEER";
/// Info key overriding the reported host name
pub const INFO_HOSTNAME: &str = "HOSTNAME";
/// Info key carrying the producer name
pub const INFO_IOCNAME: &str = "IOCNAME";

/// Address of the producer connection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceAddress {
    /// Remote host
    pub host: String,
    /// Remote port
    pub port: u16,
}

impl SourceAddress {
    /// Create a source address
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// Key of a producer in the local registry: `host:port` of its connection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProducerId(String);

impl ProducerId {
    /// Identifier from its string form
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier for a connection
    pub fn from_source(source: &SourceAddress) -> Self {
        Self(format!("{}:{}", source.host, source.port))
    }

    /// String form
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProducerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A record being claimed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordAddition {
    /// Channel name
    pub name: String,
    /// Record type, e.g. `ai`
    pub record_type: String,
}

/// One batch of ownership changes from a producer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Connection the batch arrived on
    pub source: SourceAddress,
    /// Records claimed in this batch
    #[serde(default)]
    pub addrec: BTreeMap<RecordId, RecordAddition>,
    /// Records withdrawn in this batch
    #[serde(default)]
    pub delrec: BTreeSet<RecordId>,
    /// Client-supplied metadata
    #[serde(default)]
    pub infos: BTreeMap<String, String>,
    /// First batch on this connection
    #[serde(default)]
    pub initial: bool,
    /// False once the producer has disconnected
    #[serde(default = "connected_default")]
    pub connected: bool,
}

fn connected_default() -> bool {
    true
}

impl TransactionRecord {
    /// Empty, connected, non-initial transaction from `source`
    pub fn new(source: SourceAddress) -> Self {
        Self {
            source,
            addrec: BTreeMap::new(),
            delrec: BTreeSet::new(),
            infos: BTreeMap::new(),
            initial: false,
            connected: true,
        }
    }

    /// Registry key of the sending producer
    pub fn producer_id(&self) -> ProducerId {
        ProducerId::from_source(&self.source)
    }

    fn info(&self, key: &str) -> Option<&str> {
        self.infos
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Host name to record in the directory
    pub fn host_name(&self) -> Option<&str> {
        self.info(INFO_HOSTNAME)
            .or_else(|| Some(self.source.host.trim()).filter(|h| !h.is_empty()))
    }

    /// Producer name to record in the directory; falls back to the port
    pub fn ioc_name(&self) -> String {
        self.info(INFO_IOCNAME)
            .map(str::to_string)
            .unwrap_or_else(|| self.source.port.to_string())
    }

    /// Owner for this transaction's writes
    pub fn owner(&self, default_owner: &str) -> String {
        self.info(INFO_CF_USERNAME)
            .or_else(|| self.info(INFO_ENGINEER))
            .unwrap_or(default_owner)
            .to_string()
    }

    /// Resolve who sent this transaction, rejecting it if the producer is unnamed
    pub fn identity(&self, default_owner: &str) -> CfStoreResult<ProducerIdentity> {
        let host_name = self.host_name().ok_or_else(|| {
            CfStoreError::malformed(format!("missing host name from {}", self.producer_id()))
        })?;
        Ok(ProducerIdentity {
            id: self.producer_id(),
            host_name: host_name.to_string(),
            ioc_name: self.ioc_name(),
            owner: self.owner(default_owner),
        })
    }
}

/// Resolved identity of the producer behind a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerIdentity {
    /// Registry key
    pub id: ProducerId,
    /// Reported host name
    pub host_name: String,
    /// Producer name
    pub ioc_name: String,
    /// Owner of this producer's directory writes
    pub owner: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tr(host: &str, port: u16) -> TransactionRecord {
        TransactionRecord::new(SourceAddress::new(host, port))
    }

    #[test]
    fn producer_id_is_host_and_port() {
        assert_eq!(tr("h1", 1).producer_id().as_str(), "h1:1");
    }

    #[test]
    fn owner_prefers_cf_username_then_engineer() {
        let mut record = tr("h1", 1);
        assert_eq!(record.owner("cfstore"), "cfstore");

        record.infos.insert(INFO_ENGINEER.into(), "bob".into());
        assert_eq!(record.owner("cfstore"), "bob");

        record.infos.insert(INFO_CF_USERNAME.into(), "alice".into());
        assert_eq!(record.owner("cfstore"), "alice");

        record.infos.insert(INFO_CF_USERNAME.into(), "".into());
        assert_eq!(record.owner("cfstore"), "bob");
    }

    #[test]
    fn names_fall_back_to_connection() {
        let mut record = tr("h1", 5064);
        assert_eq!(record.host_name(), Some("h1"));
        assert_eq!(record.ioc_name(), "5064");

        record.infos.insert(INFO_HOSTNAME.into(), "h1.example".into());
        record.infos.insert(INFO_IOCNAME.into(), "ioc1".into());
        assert_eq!(record.host_name(), Some("h1.example"));
        assert_eq!(record.ioc_name(), "ioc1");
    }

    #[test]
    fn identity_rejects_missing_host() {
        let err = tr("  ", 1).identity("cfstore").unwrap_err();
        assert!(matches!(err, CfStoreError::MalformedTransaction(_)));
    }

    #[test]
    fn deserializes_with_defaults() {
        let record: TransactionRecord =
            serde_json::from_str(r#"{"source":{"host":"h1","port":1}}"#).unwrap();
        assert!(record.connected);
        assert!(!record.initial);
        assert!(record.addrec.is_empty());
    }
}
