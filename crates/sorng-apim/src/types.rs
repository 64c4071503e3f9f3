//! Core types for the API Management tag integration.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::tag_id::ResourceIdentity;

// ─── Transport errors ────────────────────────────────────────────────

/// How a call to the management API went wrong.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArmErrorKind {
    /// No usable bearer token was configured.
    NotAuthenticated,
    /// HTTP 404: the tag, its service or its resource group is gone.
    NotFound,
    /// HTTP 429 that outlasted the retry budget.
    Throttled,
    /// Any other 4xx. `status_code` says which.
    Rejected,
    /// 5xx that outlasted the retry budget.
    Unavailable,
    /// The call did not finish before its deadline.
    Timeout,
    /// The request never produced a response.
    Transport,
    /// The response body was not a tag contract.
    Decode,
    /// The configured management endpoint cannot address a tag.
    Endpoint,
}

impl fmt::Display for ArmErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotAuthenticated => "not authenticated",
            Self::NotFound => "not found",
            Self::Throttled => "throttled",
            Self::Rejected => "rejected",
            Self::Unavailable => "service unavailable",
            Self::Timeout => "timed out",
            Self::Transport => "transport",
            Self::Decode => "decode",
            Self::Endpoint => "endpoint",
        })
    }
}

/// Error returned by a [`TagClient`](crate::client::TagClient).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArmError {
    pub kind: ArmErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

impl ArmError {
    pub fn new(kind: ArmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status_code: None,
        }
    }

    /// Classify a non-success response; `body` is kept as the message.
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            404 => ArmErrorKind::NotFound,
            429 => ArmErrorKind::Throttled,
            500..=599 => ArmErrorKind::Unavailable,
            _ => ArmErrorKind::Rejected,
        };
        Self {
            status_code: Some(status),
            ..Self::new(kind, body)
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::from_status(404, &message.into())
    }

    pub fn not_authenticated() -> Self {
        Self::new(ArmErrorKind::NotAuthenticated, "no bearer token set")
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            ArmErrorKind::Timeout,
            format!("operation did not complete within {}s", after.as_secs()),
        )
    }

    /// The one transport outcome the reconciler treats as a signal, not a failure.
    pub fn is_not_found(&self) -> bool {
        self.kind == ArmErrorKind::NotFound
    }
}

impl fmt::Display for ArmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(status) => write!(f, "{} (HTTP {}): {}", self.kind, status, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for ArmError {}

pub type ArmResult<T> = Result<T, ArmError>;

// ─── Reconciliation errors ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TagErrorKind {
    MalformedIdentifier,
    InvalidConfig,
    AlreadyExists,
    RemoteCallFailed,
    EmptyIdentity,
    ImportTargetMissing,
}

impl fmt::Display for TagErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedIdentifier => write!(f, "Malformed identifier"),
            Self::InvalidConfig => write!(f, "Invalid configuration"),
            Self::AlreadyExists => write!(f, "Resource already exists"),
            Self::RemoteCallFailed => write!(f, "Remote call failed"),
            Self::EmptyIdentity => write!(f, "Empty identity"),
            Self::ImportTargetMissing => write!(f, "Import target missing"),
        }
    }
}

/// Remote call a [`TagError`] originated from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    CheckExisting,
    CreateOrUpdate,
    ConfirmWrite,
    Read,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CheckExisting => write!(f, "checking for presence of existing"),
            Self::CreateOrUpdate => write!(f, "creating or updating"),
            Self::ConfirmWrite => write!(f, "retrieving"),
            Self::Read => write!(f, "reading"),
            Self::Delete => write!(f, "deleting"),
        }
    }
}

/// Error returned by the identifier codec and the reconciler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TagError {
    pub kind: TagErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<ArmError>,
}

impl TagError {
    pub fn new(kind: TagErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            operation: None,
            source: None,
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(TagErrorKind::MalformedIdentifier, message)
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(TagErrorKind::InvalidConfig, message)
    }

    pub fn already_exists(id: &str) -> Self {
        Self::new(
            TagErrorKind::AlreadyExists,
            format!("a Tag with the ID {id:?} already exists - it needs to be imported to be managed"),
        )
    }

    pub fn empty_identity(resource_group: &str, service_name: &str, name: &str) -> Self {
        Self::new(
            TagErrorKind::EmptyIdentity,
            format!(
                "cannot read ID for Tag {name:?} (Resource Group {resource_group:?} / API Management Service {service_name:?})"
            ),
        )
    }

    pub fn import_target_missing(id: &str) -> Self {
        Self::new(
            TagErrorKind::ImportTargetMissing,
            format!("cannot import non-existent Tag {id:?}"),
        )
    }

    /// Wrap a transport error with the call and the addressed resource.
    pub fn remote(
        operation: Operation,
        resource_group: &str,
        service_name: &str,
        name: &str,
        source: ArmError,
    ) -> Self {
        Self {
            kind: TagErrorKind::RemoteCallFailed,
            message: format!(
                "{operation} Tag {name:?} (Resource Group {resource_group:?} / API Management Service {service_name:?}): {source}"
            ),
            operation: Some(operation),
            source: Some(source),
        }
    }
}

impl fmt::Display for TagError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::error::Error for TagError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<TagError> for String {
    fn from(e: TagError) -> String {
        e.to_string()
    }
}

pub type TagResult<T> = Result<T, TagError>;

// ─── Auth ────────────────────────────────────────────────────────────

/// Pre-acquired bearer token for the management endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ArmToken {
    pub access_token: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ArmToken {
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(exp) => Utc::now() >= exp,
            None => false,
        }
    }
}

// ─── Wire types ──────────────────────────────────────────────────────

/// Tag contract as returned by the management API.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TagContract {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub properties: Option<TagContractProperties>,
}

impl TagContract {
    /// Remote ID, treating an empty string the same as an absent one.
    pub fn resource_id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TagContractProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// PUT body for create-or-update.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct TagCreateUpdateParameters {
    pub properties: TagContractProperties,
}

impl TagCreateUpdateParameters {
    pub fn with_display_name(display_name: impl Into<String>) -> Self {
        Self {
            properties: TagContractProperties {
                display_name: Some(display_name.into()),
            },
        }
    }
}

// ─── Desired / remote state ──────────────────────────────────────────

/// Caller-supplied intent for one tag.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct DesiredConfig {
    pub name: String,
    pub resource_group: String,
    pub service_name: String,
    pub display_name: String,
}

impl DesiredConfig {
    pub fn new(
        name: impl Into<String>,
        resource_group: impl Into<String>,
        service_name: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            resource_group: resource_group.into(),
            service_name: service_name.into(),
            display_name: display_name.into(),
        }
    }

    /// Reject intent the management API would refuse, or whose rendered ID
    /// would not parse back into the same identity.
    pub fn validate(&self) -> TagResult<()> {
        let fields = [
            ("name", &self.name),
            ("resource_group", &self.resource_group),
            ("service_name", &self.service_name),
            ("display_name", &self.display_name),
        ];
        for (field, value) in fields {
            if value.trim().is_empty() {
                return Err(TagError::invalid_config(format!("{field} must not be empty")));
            }
        }

        if !TAG_NAME.is_match(&self.name) {
            return Err(TagError::invalid_config(format!(
                "name {:?} may not exceed 80 characters in length, and can not contain /*#&+:<>?",
                self.name
            )));
        }
        if !SERVICE_NAME.is_match(&self.service_name) {
            return Err(TagError::invalid_config(format!(
                "service_name {:?} must be 1-50 characters, start with a letter, end with a letter or digit, and contain only letters, digits and hyphens",
                self.service_name
            )));
        }
        if !RESOURCE_GROUP_NAME.is_match(&self.resource_group) || self.resource_group.ends_with('.') {
            return Err(TagError::invalid_config(format!(
                "resource_group {:?} must be 1-90 characters of letters, digits, underscores, parentheses, hyphens and periods, and cannot end in a period",
                self.resource_group
            )));
        }
        Ok(())
    }

    /// Identity this intent addresses within `subscription_id`.
    pub fn identity(&self, subscription_id: &str) -> TagResult<ResourceIdentity> {
        ResourceIdentity::new(
            subscription_id,
            &self.resource_group,
            &self.service_name,
            &self.name,
        )
    }
}

lazy_static! {
    static ref TAG_NAME: Regex = Regex::new(r"^[^/*#&+:<>?]{1,80}$").expect("tag name pattern");
    static ref SERVICE_NAME: Regex =
        Regex::new(r"^[a-zA-Z](?:[a-zA-Z0-9-]{0,48}[a-zA-Z0-9])?$").expect("service name pattern");
    static ref RESOURCE_GROUP_NAME: Regex =
        Regex::new(r"^[-\w.()]{1,90}$").expect("resource group pattern");
}

/// Provider-side view of a tag. `identity: None` means it does not exist.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct RemoteResource {
    pub identity: Option<ResourceIdentity>,
    pub display_name: Option<String>,
}

impl RemoteResource {
    pub fn absent() -> Self {
        Self::default()
    }

    pub fn exists(&self) -> bool {
        self.identity.is_some()
    }

    /// Fields of `desired` that the remote state does not match. Names are
    /// compared the way ARM resolves them, ignoring ASCII case.
    pub fn drift(&self, desired: &DesiredConfig) -> Vec<&'static str> {
        let Some(identity) = &self.identity else {
            return Vec::new();
        };
        let mut drifted = Vec::new();
        if !identity.name().eq_ignore_ascii_case(&desired.name) {
            drifted.push("name");
        }
        if !identity.resource_group().eq_ignore_ascii_case(&desired.resource_group) {
            drifted.push("resource_group");
        }
        if !identity.service_name().eq_ignore_ascii_case(&desired.service_name) {
            drifted.push("service_name");
        }
        if self.display_name.as_deref() != Some(desired.display_name.as_str()) {
            drifted.push("display_name");
        }
        drifted
    }
}

// ─── Configuration ───────────────────────────────────────────────────

/// Per-operation deadlines, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Timeouts {
    pub create_secs: u64,
    pub read_secs: u64,
    pub update_secs: u64,
    pub delete_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create_secs: 30 * 60,
            read_secs: 5 * 60,
            update_secs: 30 * 60,
            delete_secs: 30 * 60,
        }
    }
}

impl Timeouts {
    pub fn create(&self) -> Duration {
        Duration::from_secs(self.create_secs)
    }

    pub fn read(&self) -> Duration {
        Duration::from_secs(self.read_secs)
    }

    pub fn update(&self) -> Duration {
        Duration::from_secs(self.update_secs)
    }

    pub fn delete(&self) -> Duration {
        Duration::from_secs(self.delete_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ApimConfig {
    pub arm_base: String,
    pub api_version: String,
    pub request_timeout_secs: u64,
    /// Extra attempts after a 429 or transient 5xx.
    pub max_retries: u32,
    /// First backoff delay, doubled on each further attempt.
    pub retry_base_delay_ms: u64,
    pub timeouts: Timeouts,
}

impl Default for ApimConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ApimConfig {
    pub fn new() -> Self {
        Self {
            arm_base: ARM_BASE.into(),
            api_version: API_VERSION.into(),
            request_timeout_secs: 30,
            max_retries: 3,
            retry_base_delay_ms: 500,
            timeouts: Timeouts::default(),
        }
    }

    /// Parse a (possibly partial) JSON override on top of the defaults.
    pub fn from_json(json: &str) -> TagResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| TagError::invalid_config(format!("config JSON: {e}")))
    }
}

/// Azure management base URL.
pub const ARM_BASE: &str = "https://management.azure.com";

/// Management API version for `Microsoft.ApiManagement` tags.
pub const API_VERSION: &str = "2020-12-01";

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm_error_display() {
        assert_eq!(
            ArmError::from_status(409, "in use").to_string(),
            "rejected (HTTP 409): in use"
        );
        assert_eq!(
            ArmError::not_authenticated().to_string(),
            "not authenticated: no bearer token set"
        );
    }

    #[test]
    fn arm_error_from_status_codes() {
        assert_eq!(ArmError::from_status(404, "x").kind, ArmErrorKind::NotFound);
        assert_eq!(ArmError::from_status(429, "x").kind, ArmErrorKind::Throttled);
        assert_eq!(ArmError::from_status(503, "x").kind, ArmErrorKind::Unavailable);
        for status in [400, 401, 403, 409, 412] {
            let e = ArmError::from_status(status, "x");
            assert_eq!(e.kind, ArmErrorKind::Rejected);
            assert_eq!(e.status_code, Some(status));
        }
    }

    #[test]
    fn only_404_is_not_found() {
        assert!(ArmError::from_status(404, "").is_not_found());
        assert!(ArmError::not_found("gone").is_not_found());
        assert!(!ArmError::from_status(409, "").is_not_found());
        assert!(!ArmError::timeout(Duration::from_secs(1)).is_not_found());
    }

    #[test]
    fn remote_error_carries_context() {
        let e = TagError::remote(
            Operation::CreateOrUpdate,
            "rg1",
            "svc1",
            "tag1",
            ArmError::from_status(500, "boom"),
        );
        assert_eq!(e.kind, TagErrorKind::RemoteCallFailed);
        assert_eq!(e.operation, Some(Operation::CreateOrUpdate));
        assert!(e.message.starts_with("creating or updating Tag \"tag1\""));
        assert!(e.message.contains("\"rg1\""));
        assert!(e.message.contains("\"svc1\""));
        assert!(e.message.contains("boom"));
        assert!(std::error::Error::source(&e).is_some());
    }

    #[test]
    fn tag_error_to_string_conversion() {
        let s: String = TagError::malformed("ID was missing the `tags` element").into();
        assert_eq!(s, "[Malformed identifier] ID was missing the `tags` element");
    }

    #[test]
    fn token_expiry() {
        assert!(!ArmToken::default().is_expired());
        let t = ArmToken {
            access_token: "tok".into(),
            expires_at: Some(Utc::now() - chrono::Duration::minutes(1)),
        };
        assert!(t.is_expired());
    }

    #[test]
    fn tag_contract_deserialization() {
        let json = r#"{"id":"/subscriptions/s/resourceGroups/rg/providers/Microsoft.ApiManagement/service/svc/tags/t","name":"t","type":"Microsoft.ApiManagement/service/tags","properties":{"displayName":"Test Tag"}}"#;
        let c: TagContract = serde_json::from_str(json).unwrap();
        assert_eq!(c.name.as_deref(), Some("t"));
        assert_eq!(c.resource_type.as_deref(), Some("Microsoft.ApiManagement/service/tags"));
        assert_eq!(c.properties.unwrap().display_name.as_deref(), Some("Test Tag"));
    }

    #[test]
    fn tag_contract_without_properties() {
        let c: TagContract = serde_json::from_str(r#"{"id":""}"#).unwrap();
        assert!(c.properties.is_none());
        assert!(c.resource_id().is_none());
    }

    #[test]
    fn create_update_parameters_serde() {
        let p = TagCreateUpdateParameters::with_display_name("Test Tag");
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, r#"{"properties":{"displayName":"Test Tag"}}"#);
    }

    #[test]
    fn desired_config_validation() {
        assert!(DesiredConfig::new("t", "rg", "svc", "Test Tag").validate().is_ok());
        assert!(DesiredConfig::new("test tag (v2)", "My_RG.(1)-a", "acctestAM-1", "x")
            .validate()
            .is_ok());
        let e = DesiredConfig::new("t", "rg", "svc", "").validate().unwrap_err();
        assert_eq!(e.kind, TagErrorKind::InvalidConfig);
        assert!(e.message.contains("display_name"));
        assert!(DesiredConfig::new("", "rg", "svc", "x").validate().is_err());
    }

    #[test]
    fn names_that_cannot_round_trip_are_rejected() {
        let bad = [
            DesiredConfig::new("a/b", "rg1", "svc1", "x"),
            DesiredConfig::new("tag1", "rg/1", "svc1", "x"),
            DesiredConfig::new("tag1", "rg1", "svc/1", "x"),
        ];
        for desired in bad {
            let rendered = format!(
                "/subscriptions/s/resourceGroups/{}/providers/Microsoft.ApiManagement/service/{}/tags/{}",
                desired.resource_group, desired.service_name, desired.name
            );
            assert!(crate::tag_id::parse(&rendered).is_err());
            let e = desired.validate().unwrap_err();
            assert_eq!(e.kind, TagErrorKind::InvalidConfig, "{desired:?}");
        }
    }

    #[test]
    fn names_with_apim_reserved_characters_are_rejected() {
        for c in ['*', '#', '&', '+', ':', '<', '>', '?'] {
            let e = DesiredConfig::new(format!("tag{c}1"), "rg1", "svc1", "x")
                .validate()
                .unwrap_err();
            assert!(e.message.starts_with("name "), "{c}");
        }
        assert!(DesiredConfig::new("t".repeat(81), "rg1", "svc1", "x").validate().is_err());
        assert!(DesiredConfig::new("t".repeat(80), "rg1", "svc1", "x").validate().is_ok());
    }

    #[test]
    fn service_and_resource_group_name_rules() {
        let long_service = "s".repeat(51);
        let long_group = "r".repeat(91);
        for svc in ["1svc", "svc-", "svc_1", long_service.as_str()] {
            let e = DesiredConfig::new("t", "rg1", svc, "x").validate().unwrap_err();
            assert!(e.message.starts_with("service_name "), "{svc}");
        }
        for rg in ["rg.", "rg 1", long_group.as_str()] {
            let e = DesiredConfig::new("t", rg, "svc1", "x").validate().unwrap_err();
            assert!(e.message.starts_with("resource_group "), "{rg}");
        }
    }

    #[test]
    fn drift_detects_display_name() {
        let desired = DesiredConfig::new("t", "rg", "svc", "New");
        let remote = RemoteResource {
            identity: Some(desired.identity("sub").unwrap()),
            display_name: Some("Old".into()),
        };
        assert_eq!(remote.drift(&desired), vec!["display_name"]);

        let in_sync = RemoteResource {
            identity: Some(desired.identity("sub").unwrap()),
            display_name: Some("New".into()),
        };
        assert!(in_sync.drift(&desired).is_empty());

        let moved = RemoteResource {
            identity: Some(ResourceIdentity::new("sub", "RG", "other", "T").unwrap()),
            display_name: Some("New".into()),
        };
        assert_eq!(moved.drift(&desired), vec!["service_name"]);
        assert!(RemoteResource::absent().drift(&desired).is_empty());
    }

    #[test]
    fn config_defaults() {
        let c = ApimConfig::new();
        assert_eq!(c.arm_base, "https://management.azure.com");
        assert_eq!(c.api_version, "2020-12-01");
        assert_eq!(c.timeouts.read(), Duration::from_secs(300));
        assert_eq!(c.timeouts.create(), Duration::from_secs(1800));
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.retry_base_delay_ms, 500);
    }

    #[test]
    fn config_partial_json_override() {
        let c = ApimConfig::from_json(r#"{"api_version":"2021-08-01","timeouts":{"read_secs":10}}"#)
            .unwrap();
        assert_eq!(c.api_version, "2021-08-01");
        assert_eq!(c.timeouts.read_secs, 10);
        assert_eq!(c.timeouts.delete_secs, 1800);
        assert_eq!(c.arm_base, ARM_BASE);
    }

    #[test]
    fn config_bad_json() {
        let e = ApimConfig::from_json("{").unwrap_err();
        assert_eq!(e.kind, TagErrorKind::InvalidConfig);
    }
}
