//! Transaction builders

use cfstore::transaction::{
    RecordAddition, RecordId, SourceAddress, TransactionRecord, INFO_CF_USERNAME, INFO_HOSTNAME,
    INFO_IOCNAME,
};

/// Fluent construction of [`TransactionRecord`] values
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    record: TransactionRecord,
}

impl TransactionBuilder {
    /// Connected, non-initial transaction from `host:port`
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            record: TransactionRecord::new(SourceAddress::new(host, port)),
        }
    }

    /// Set the producer name
    pub fn ioc_name(mut self, name: &str) -> Self {
        self.record.infos.insert(INFO_IOCNAME.to_string(), name.to_string());
        self
    }

    /// Override the reported host name
    pub fn host_name(mut self, name: &str) -> Self {
        self.record.infos.insert(INFO_HOSTNAME.to_string(), name.to_string());
        self
    }

    /// Set the owner override
    pub fn owner(mut self, owner: &str) -> Self {
        self.record
            .infos
            .insert(INFO_CF_USERNAME.to_string(), owner.to_string());
        self
    }

    /// Mark as the first transaction on the connection
    pub fn initial(mut self) -> Self {
        self.record.initial = true;
        self
    }

    /// Mark the producer as disconnected
    pub fn disconnected(mut self) -> Self {
        self.record.connected = false;
        self
    }

    /// Claim `name` under record id `rid`
    pub fn claim(mut self, rid: RecordId, name: &str) -> Self {
        self.record.addrec.insert(
            rid,
            RecordAddition {
                name: name.to_string(),
                record_type: "ai".to_string(),
            },
        );
        self
    }

    /// Withdraw record id `rid`
    pub fn withdraw(mut self, rid: RecordId) -> Self {
        self.record.delrec.insert(rid);
        self
    }

    /// Finish
    pub fn build(self) -> TransactionRecord {
        self.record
    }
}
