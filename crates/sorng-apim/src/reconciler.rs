//! Tag reconciliation – create-or-update, read, delete, import.
//!
//! A [`TagReconciler`] holds no state beyond its injected client, the
//! subscription it addresses and its deadlines. Every operation runs its
//! remote calls in strict order and either returns a complete result or
//! fails; a timed-out or dropped operation never hands back an identity.
//!
//! Not-found from the client is interpreted per operation: it lets a create
//! proceed, turns a read into [`RemoteResource::absent`], and makes a delete
//! succeed.

use std::future::Future;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::client::{ArmTagClient, TagClient};
use crate::tag_id::ResourceIdentity;
use crate::types::{
    ArmError, DesiredConfig, Operation, RemoteResource, TagCreateUpdateParameters, TagError,
    TagResult, Timeouts,
};

/// What [`TagReconciler::reconcile`] did to converge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileAction {
    Created,
    Updated,
    Replaced,
    Unchanged,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub action: ReconcileAction,
    pub identity: ResourceIdentity,
}

pub struct TagReconciler<C> {
    client: C,
    subscription_id: String,
    timeouts: Timeouts,
}

impl<C: TagClient> TagReconciler<C> {
    pub fn new(client: C, subscription_id: impl Into<String>) -> Self {
        Self {
            client,
            subscription_id: subscription_id.into(),
            timeouts: Timeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Parse `handle`, which must name this reconciler's subscription. The
    /// client addresses tags by (resource group, service, name) only.
    fn own_identity(&self, handle: &str) -> TagResult<ResourceIdentity> {
        let id = ResourceIdentity::parse(handle)?;
        if !id.subscription_id().eq_ignore_ascii_case(&self.subscription_id) {
            return Err(TagError::invalid_config(format!(
                "{id} belongs to subscription {:?}, but this provider manages subscription {:?}",
                id.subscription_id(),
                self.subscription_id
            )));
        }
        Ok(id)
    }

    // ── Create / Update ──────────────────────────────────────────────

    /// Create the tag (no `existing_handle`) or update it in place, returning
    /// the identity to persist as the durable handle.
    pub async fn create_or_update(
        &self,
        desired: &DesiredConfig,
        existing_handle: Option<&str>,
    ) -> TagResult<ResourceIdentity> {
        desired.validate()?;
        let limit = match existing_handle {
            None => self.timeouts.create(),
            Some(_) => self.timeouts.update(),
        };
        bounded(
            limit,
            Operation::CreateOrUpdate,
            &desired.resource_group,
            &desired.service_name,
            &desired.name,
            self.write(desired, existing_handle),
        )
        .await
    }

    async fn write(
        &self,
        desired: &DesiredConfig,
        existing_handle: Option<&str>,
    ) -> TagResult<ResourceIdentity> {
        let rg = desired.resource_group.as_str();
        let svc = desired.service_name.as_str();
        let name = desired.name.as_str();

        match existing_handle {
            None => match self.client.get(rg, svc, name).await {
                Ok(existing) => {
                    if let Some(id) = existing.resource_id() {
                        return Err(TagError::already_exists(id));
                    }
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(TagError::remote(Operation::CheckExisting, rg, svc, name, e)),
            },
            Some(handle) => {
                let current = self.own_identity(handle)?;
                if !current.same_resource(&desired.identity(&self.subscription_id)?) {
                    return Err(TagError::invalid_config(format!(
                        "{current} cannot be updated in place to address Tag {name:?} (Resource Group {rg:?} / API Management Service {svc:?}); it must be replaced"
                    )));
                }
            }
        }

        let parameters = TagCreateUpdateParameters::with_display_name(&desired.display_name);
        debug!(
            "Creating/updating Tag {:?} (API Management Service {:?} / Resource Group {:?})",
            name, svc, rg
        );
        self.client
            .create_or_update(rg, svc, name, &parameters)
            .await
            .map_err(|e| TagError::remote(Operation::CreateOrUpdate, rg, svc, name, e))?;

        let confirmed = self
            .client
            .get(rg, svc, name)
            .await
            .map_err(|e| TagError::remote(Operation::ConfirmWrite, rg, svc, name, e))?;
        let id = confirmed
            .resource_id()
            .ok_or_else(|| TagError::empty_identity(rg, svc, name))?;

        ResourceIdentity::parse(id)
    }

    // ── Read ─────────────────────────────────────────────────────────

    pub async fn read(&self, handle: &str) -> TagResult<RemoteResource> {
        let id = self.own_identity(handle)?;
        let (rg, svc, name) = (id.resource_group(), id.service_name(), id.name());

        let result = bounded(self.timeouts.read(), Operation::Read, rg, svc, name, async {
            match self.client.get(rg, svc, name).await {
                Ok(contract) => Ok(Some(contract)),
                Err(e) if e.is_not_found() => Ok(None),
                Err(e) => Err(TagError::remote(Operation::Read, rg, svc, name, e)),
            }
        })
        .await?;

        match result {
            Some(contract) => Ok(RemoteResource {
                display_name: contract.properties.and_then(|p| p.display_name),
                identity: Some(id),
            }),
            None => {
                warn!("{} was not found - removing from state", id);
                Ok(RemoteResource::absent())
            }
        }
    }

    pub async fn exists(&self, handle: &str) -> TagResult<bool> {
        Ok(self.read(handle).await?.exists())
    }

    /// Validate `handle` as a tag ID and read the tag it names, which must exist.
    pub async fn import(&self, handle: &str) -> TagResult<RemoteResource> {
        let remote = self.read(handle).await?;
        if !remote.exists() {
            return Err(TagError::import_target_missing(handle));
        }
        Ok(remote)
    }

    // ── Delete ───────────────────────────────────────────────────────

    pub async fn delete(&self, handle: &str) -> TagResult<()> {
        let id = self.own_identity(handle)?;
        let (rg, svc, name) = (id.resource_group(), id.service_name(), id.name());

        debug!("Deleting {}", id);
        bounded(self.timeouts.delete(), Operation::Delete, rg, svc, name, async {
            match self.client.delete(rg, svc, name).await {
                Ok(()) => Ok(()),
                Err(e) if e.is_not_found() => {
                    debug!("{} was already gone", id);
                    Ok(())
                }
                Err(e) => Err(TagError::remote(Operation::Delete, rg, svc, name, e)),
            }
        })
        .await
    }

    // ── Converge ─────────────────────────────────────────────────────

    /// Read the current state behind `handle` and drive it to `desired`.
    pub async fn reconcile(
        &self,
        desired: &DesiredConfig,
        handle: Option<&str>,
    ) -> TagResult<ReconcileOutcome> {
        let Some(handle) = handle else {
            let identity = self.create_or_update(desired, None).await?;
            info!("Created {}", identity);
            return Ok(ReconcileOutcome {
                action: ReconcileAction::Created,
                identity,
            });
        };

        let remote = self.read(handle).await?;
        let Some(current) = remote.identity.clone() else {
            let identity = self.create_or_update(desired, None).await?;
            info!("Re-created {} after it vanished", identity);
            return Ok(ReconcileOutcome {
                action: ReconcileAction::Created,
                identity,
            });
        };

        let drifted = remote.drift(desired);
        if drifted.is_empty() {
            return Ok(ReconcileOutcome {
                action: ReconcileAction::Unchanged,
                identity: current,
            });
        }
        debug!("{} drifted in {:?}", current, drifted);

        if drifted.iter().any(|field| *field != "display_name") {
            self.delete(handle).await?;
            let identity = self.create_or_update(desired, None).await?;
            info!("Replaced {} with {}", current, identity);
            return Ok(ReconcileOutcome {
                action: ReconcileAction::Replaced,
                identity,
            });
        }

        let identity = self.create_or_update(desired, Some(handle)).await?;
        info!("Updated {}", identity);
        Ok(ReconcileOutcome {
            action: ReconcileAction::Updated,
            identity,
        })
    }
}

/// Run `fut` under `limit`; an elapsed deadline drops it and reports a timeout.
async fn bounded<T>(
    limit: Duration,
    operation: Operation,
    resource_group: &str,
    service_name: &str,
    name: &str,
    fut: impl Future<Output = TagResult<T>>,
) -> TagResult<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(TagError::remote(
            operation,
            resource_group,
            service_name,
            name,
            ArmError::timeout(limit),
        )),
    }
}

impl TagReconciler<ArmTagClient> {
    /// Reconciler over `client`, in its subscription and with its configured deadlines.
    pub fn from_arm(client: ArmTagClient) -> Self {
        let subscription_id = client.subscription_id().to_string();
        let timeouts = client.config().timeouts.clone();
        Self::new(client, subscription_id).with_timeouts(timeouts)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
