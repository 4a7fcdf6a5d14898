//! Reconciliation of one producer's changes into the directory
//!
//! Given the names a producer just claimed and withdrew, and the local registry
//! after the transaction was applied, the reconciler rewrites every directory
//! record that mentions this producer plus every newly claimed name, then
//! pushes them in a single bulk write.
//!
//! Only the managed properties (`hostName`, `iocName`, `pvStatus`, `time`) are
//! rewritten; other properties on a record are carried over untouched.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::directory::{
    Channel, DirectoryEffects, Property, PvStatus, Query, HOST_NAME, IOC_NAME,
    MANAGED_PROPERTIES, PV_STATUS, TIME,
};
use crate::error::{CfStoreError, CfStoreResult};
use crate::registry::LocalRegistry;

/// Values written to the managed properties of one record
#[derive(Debug, Clone, Copy)]
pub struct ManagedValues<'a> {
    /// Owner of the written properties
    pub owner: &'a str,
    /// `hostName` value
    pub host_name: &'a str,
    /// `iocName` value
    pub ioc_name: &'a str,
    /// `pvStatus` value
    pub status: PvStatus,
    /// `time` value
    pub time: &'a str,
}

impl ManagedValues<'_> {
    fn properties(&self) -> [Property; 4] {
        [
            Property::with_value(HOST_NAME, self.owner, self.host_name),
            Property::with_value(IOC_NAME, self.owner, self.ioc_name),
            Property::with_value(PV_STATUS, self.owner, self.status.as_str()),
            Property::with_value(TIME, self.owner, self.time),
        ]
    }
}

/// Replace the managed properties of `channel`, keeping all others.
pub fn update_channel(mut channel: Channel, values: &ManagedValues<'_>) -> Channel {
    channel
        .properties
        .retain(|p| !MANAGED_PROPERTIES.iter().any(|m| *m == p.name));
    channel.properties.extend(values.properties());
    channel
}

/// New record carrying only the managed properties
pub fn create_channel(name: &str, values: &ManagedValues<'_>) -> Channel {
    let mut channel = Channel::new(name, values.owner);
    channel.properties.extend(values.properties());
    channel
}

/// One producer's changes, as seen by the reconciler
#[derive(Debug, Clone)]
pub struct ReconcileRequest<'a> {
    /// Host name of the producer; required
    pub host_name: Option<&'a str>,
    /// Producer name; required
    pub ioc_name: Option<&'a str>,
    /// Names claimed in this transaction
    pub new_names: &'a [String],
    /// Names withdrawn in this transaction
    pub removed_names: &'a BTreeSet<String>,
    /// Owner of this transaction's writes
    pub owner: &'a str,
    /// Timestamp of this transaction
    pub time: &'a str,
}

/// Counts of what a reconciliation wrote
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Records created for names the directory did not know
    pub created: usize,
    /// Existing records marked active under their current claimant
    pub updated: usize,
    /// Records marked inactive with no remaining claimant
    pub orphaned: usize,
    /// Whether a bulk write was issued
    pub written: bool,
}

/// Pushes local ownership changes to the directory
#[derive(Clone)]
pub struct Reconciler {
    directory: Arc<dyn DirectoryEffects>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("directory", &"<Arc<dyn DirectoryEffects>>")
            .finish()
    }
}

impl Reconciler {
    /// Create a reconciler writing to `directory`
    pub fn new(directory: Arc<dyn DirectoryEffects>) -> Self {
        Self { directory }
    }

    /// Create any missing managed property definition, owned by `owner`.
    pub async fn ensure_properties(&self, owner: &str) -> CfStoreResult<()> {
        for name in MANAGED_PROPERTIES {
            if self.directory.find_property(name).await?.is_some() {
                continue;
            }
            tracing::info!(property = name, %owner, "creating directory property");
            if let Err(e) = self
                .directory
                .set_property(Property::definition(name, owner))
                .await
            {
                tracing::error!(property = name, error = %e, "failed to create directory property");
                return Err(CfStoreError::SchemaBootstrap {
                    property: name.to_string(),
                    source: e,
                });
            }
        }
        Ok(())
    }

    /// Bring the directory in line with `registry` for one producer's changes.
    pub async fn reconcile(
        &self,
        request: &ReconcileRequest<'_>,
        registry: &LocalRegistry,
    ) -> CfStoreResult<ReconcileReport> {
        let (host_name, ioc_name) = match (request.host_name, request.ioc_name) {
            (Some(host), Some(ioc)) if !host.is_empty() && !ioc.is_empty() => (host, ioc),
            _ => {
                tracing::error!(
                    host = ?request.host_name,
                    ioc = ?request.ioc_name,
                    "missing hostName or iocName"
                );
                return Err(CfStoreError::malformed("missing hostName or iocName"));
            }
        };

        self.ensure_properties(request.owner).await?;

        let current = ManagedValues {
            owner: request.owner,
            host_name,
            ioc_name,
            status: PvStatus::Active,
            time: request.time,
        };
        let mut remaining: Vec<&str> = request.new_names.iter().map(String::as_str).collect();
        let mut handled = BTreeSet::new();
        let mut report = ReconcileReport::default();
        let mut channels = Vec::new();

        let old = self
            .directory
            .find_by_attributes(&[
                Query::property(HOST_NAME, host_name),
                Query::property(IOC_NAME, ioc_name),
            ])
            .await?;

        for ch in &old {
            let name = ch.name.as_str();
            if request.new_names.is_empty() || request.removed_names.contains(name) {
                match registry.current_claimant(name) {
                    Some((_, entry)) => {
                        channels.push(update_channel(
                            ch.clone(),
                            &ManagedValues {
                                owner: &entry.owner,
                                host_name: &entry.host_name,
                                ioc_name: &entry.ioc_name,
                                status: PvStatus::Active,
                                time: request.time,
                            },
                        ));
                        report.updated += 1;
                    }
                    None => {
                        tracing::debug!(channel = name, "orphaning channel");
                        channels.push(update_channel(
                            ch.clone(),
                            &ManagedValues {
                                owner: request.owner,
                                host_name: ch.property_value(HOST_NAME).unwrap_or(host_name),
                                ioc_name: ch.property_value(IOC_NAME).unwrap_or(ioc_name),
                                status: PvStatus::Inactive,
                                time: ch.property_value(TIME).unwrap_or(request.time),
                            },
                        ));
                        report.orphaned += 1;
                    }
                }
                handled.insert(name);
            } else if let Some(pos) = remaining.iter().position(|n| *n == name) {
                remaining.remove(pos);
                let values = match registry.current_claimant(name) {
                    Some((_, entry)) => ManagedValues {
                        owner: &entry.owner,
                        host_name: &entry.host_name,
                        ioc_name: &entry.ioc_name,
                        status: PvStatus::Active,
                        time: request.time,
                    },
                    None => current,
                };
                channels.push(update_channel(ch.clone(), &values));
                report.updated += 1;
                handled.insert(name);
            }
        }

        // Names new to this producer: create them, or take them over from another.
        for name in remaining {
            if handled.contains(name) {
                continue;
            }
            let existing = self
                .directory
                .find_by_attributes(&[Query::name(name)])
                .await?
                .into_iter()
                .find(|ch| ch.name == name);
            match existing {
                None => {
                    channels.push(create_channel(name, &current));
                    report.created += 1;
                }
                Some(ch) => {
                    tracing::debug!(
                        channel = name,
                        previous_host = ?ch.property_value(HOST_NAME),
                        previous_ioc = ?ch.property_value(IOC_NAME),
                        "channel moved between producers"
                    );
                    channels.push(update_channel(ch, &current));
                    report.updated += 1;
                }
            }
            handled.insert(name);
        }

        // Some directories fail when a search returned records and no write follows.
        if !channels.is_empty() || !old.is_empty() {
            tracing::debug!(
                host = host_name,
                ioc = ioc_name,
                channels = channels.len(),
                "writing channels"
            );
            self.directory.set_channels(channels).await?;
            report.written = true;
        }
        Ok(report)
    }
}
