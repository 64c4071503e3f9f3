//! API Management tag resource ID.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::resource_id::ResourceId;
use crate::types::{TagError, TagResult};

pub const PROVIDER_NAMESPACE: &str = "Microsoft.ApiManagement";
const SERVICE_SEGMENT: &str = "service";
const TAG_SEGMENT: &str = "tags";

/// Identity of one tag under an API Management service.
///
/// Every part is non-empty and free of `/`, so [`id`](Self::id) always
/// parses back to an equal identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "IdentityParts")]
pub struct ResourceIdentity {
    subscription_id: String,
    resource_group: String,
    service_name: String,
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityParts {
    subscription_id: String,
    resource_group: String,
    service_name: String,
    name: String,
}

impl TryFrom<IdentityParts> for ResourceIdentity {
    type Error = TagError;

    fn try_from(p: IdentityParts) -> TagResult<Self> {
        Self::new(p.subscription_id, p.resource_group, p.service_name, p.name)
    }
}

impl ResourceIdentity {
    pub fn new(
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
        service_name: impl Into<String>,
        name: impl Into<String>,
    ) -> TagResult<Self> {
        let identity = Self {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            service_name: service_name.into(),
            name: name.into(),
        };
        let parts = [
            ("subscription_id", &identity.subscription_id),
            ("resource_group", &identity.resource_group),
            ("service_name", &identity.service_name),
            ("name", &identity.name),
        ];
        for (part, value) in parts {
            if value.is_empty() || value.contains('/') {
                return Err(TagError::malformed(format!(
                    "{part} {value:?} must be non-empty and cannot contain '/'"
                )));
            }
        }
        Ok(identity)
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    pub fn resource_group(&self) -> &str {
        &self.resource_group
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Canonical ID string, persisted by callers as the durable handle.
    pub fn id(&self) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/{}/{}/{}/{}/{}",
            self.subscription_id,
            self.resource_group,
            PROVIDER_NAMESPACE,
            SERVICE_SEGMENT,
            self.service_name,
            TAG_SEGMENT,
            self.name,
        )
    }

    /// Whether both identities address the same remote tag. ARM resolves
    /// names without regard to ASCII case.
    pub fn same_resource(&self, other: &ResourceIdentity) -> bool {
        self.subscription_id.eq_ignore_ascii_case(&other.subscription_id)
            && self.resource_group.eq_ignore_ascii_case(&other.resource_group)
            && self.service_name.eq_ignore_ascii_case(&other.service_name)
            && self.name.eq_ignore_ascii_case(&other.name)
    }

    /// Parse a tag ID, rejecting IDs of other resource kinds or with extra nesting.
    pub fn parse(input: &str) -> TagResult<Self> {
        let mut id = ResourceId::parse(input)?;

        if id.subscription_id.is_empty() {
            return Err(TagError::malformed("ID was missing the 'subscriptions' element"));
        }
        let resource_group = id
            .resource_group
            .take()
            .filter(|rg| !rg.is_empty())
            .ok_or_else(|| TagError::malformed("ID was missing the 'resourceGroups' element"))?;

        match id.provider.as_deref() {
            Some(ns) if ns.eq_ignore_ascii_case(PROVIDER_NAMESPACE) => {}
            Some(ns) => {
                return Err(TagError::malformed(format!(
                    "ID has provider {ns:?}, expected {PROVIDER_NAMESPACE:?}: {input:?}"
                )))
            }
            None => return Err(TagError::malformed("ID was missing the 'providers' element")),
        }

        let service_name = id.pop_segment(SERVICE_SEGMENT)?;
        let name = id.pop_segment(TAG_SEGMENT)?;
        id.ensure_consumed(input)?;

        Self::new(id.subscription_id, resource_group, service_name, name)
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tag: (Name {:?} / Service Name {:?} / Resource Group {:?})",
            self.name, self.service_name, self.resource_group
        )
    }
}

/// Parse `input` as an identity; the free-function form of [`ResourceIdentity::parse`].
pub fn parse(input: &str) -> TagResult<ResourceIdentity> {
    ResourceIdentity::parse(input)
}

/// Render the canonical ID string of `identity`.
pub fn render(identity: &ResourceIdentity) -> String {
    identity.id()
}

/// Validation-function form of the parser: one message per problem, empty when valid.
pub fn validate_tag_id(input: &str) -> Vec<String> {
    match ResourceIdentity::parse(input) {
        Ok(_) => Vec::new(),
        Err(e) => vec![e.message],
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
