//! Generic Azure Resource Manager ID parser.
//!
//! An ARM ID is a `/`-separated path of alternating type/value segments:
//!
//! ```text
//! /subscriptions/{sub}/resourceGroups/{rg}/providers/{namespace}/{type}/{value}/...
//! ```
//!
//! [`ResourceId::parse`] lifts the subscription, resource group and provider
//! namespace out of the path and keeps every other segment in an ordered map.
//! A per-resource parser then pops the segments it understands with
//! [`ResourceId::pop_segment`] and finishes with
//! [`ResourceId::ensure_consumed`], which rejects IDs carrying structure the
//! parser did not expect.

use indexmap::IndexMap;

use crate::types::{TagError, TagResult};

/// One type/value pair, with the type key as it appeared in the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceId {
    pub subscription_id: String,
    pub resource_group: Option<String>,
    pub provider: Option<String>,
    /// Unconsumed segments keyed by lower-cased type key, in input order.
    segments: IndexMap<String, Segment>,
}

impl ResourceId {
    pub fn parse(input: &str) -> TagResult<Self> {
        let path = input
            .strip_prefix('/')
            .ok_or_else(|| TagError::malformed(format!("cannot parse Azure ID {input:?}: must begin with '/'")))?;
        let path = path.strip_suffix('/').unwrap_or(path);

        let components: Vec<&str> = path.split('/').collect();
        if components.len() % 2 != 0 {
            return Err(TagError::malformed(format!(
                "the number of path segments is not divisible by 2 in {path:?}"
            )));
        }

        let mut subscription_id = None;
        let mut provider = None;
        let mut segments: IndexMap<String, Segment> = IndexMap::with_capacity(components.len() / 2);

        for pair in components.chunks_exact(2) {
            let (key, value) = (pair[0], pair[1]);
            if key.is_empty() || value.is_empty() {
                return Err(TagError::malformed(format!(
                    "key/value cannot be empty strings in {input:?}: key {key:?}, value {value:?}"
                )));
            }

            let folded = key.to_ascii_lowercase();
            // The first subscriptions/providers pair belongs to the scope; any
            // later one is nesting and stays in the map.
            if folded == "subscriptions" && subscription_id.is_none() {
                subscription_id = Some(value.to_string());
                continue;
            }
            if folded == "providers" && provider.is_none() {
                provider = Some(value.to_string());
                continue;
            }
            if segments.contains_key(&folded) {
                return Err(TagError::malformed(format!(
                    "ID contained a duplicate {key:?} segment: {input:?}"
                )));
            }
            segments.insert(
                folded,
                Segment {
                    key: key.to_string(),
                    value: value.to_string(),
                },
            );
        }

        let subscription_id = subscription_id
            .ok_or_else(|| TagError::malformed("ID was missing the 'subscriptions' element"))?;
        let resource_group = segments
            .shift_remove("resourcegroups")
            .map(|segment| segment.value);

        Ok(Self {
            subscription_id,
            resource_group,
            provider,
            segments,
        })
    }

    /// Remove and return the value of the `name` segment, matching the key
    /// case-insensitively.
    pub fn pop_segment(&mut self, name: &str) -> TagResult<String> {
        self.segments
            .shift_remove(&name.to_ascii_lowercase())
            .map(|segment| segment.value)
            .ok_or_else(|| TagError::malformed(format!("ID was missing the `{name}` element")))
    }

    pub fn remaining(&self) -> impl Iterator<Item = &Segment> {
        self.segments.values()
    }

    pub fn ensure_consumed(&self, source: &str) -> TagResult<()> {
        match self.segments.values().next() {
            None => Ok(()),
            Some(first) => Err(TagError::malformed(format!(
                "ID contained more segments than required: unexpected {:?} segment in {source:?}",
                first.key
            ))),
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TagErrorKind;

    const VM_ID: &str =
        "/subscriptions/sub1/resourceGroups/rg1/providers/Microsoft.Compute/virtualMachines/vm1";

    #[test]
    fn scope_segments_are_lifted() {
        let id = ResourceId::parse(VM_ID).unwrap();
        assert_eq!(id.subscription_id, "sub1");
        assert_eq!(id.resource_group.as_deref(), Some("rg1"));
        assert_eq!(id.provider.as_deref(), Some("Microsoft.Compute"));
        let rest: Vec<_> = id.remaining().map(|s| s.key.as_str()).collect();
        assert_eq!(rest, vec!["virtualMachines"]);
    }

    #[test]
    fn pop_then_consumed() {
        let mut id = ResourceId::parse(VM_ID).unwrap();
        assert_eq!(id.pop_segment("virtualmachines").unwrap(), "vm1");
        assert!(id.ensure_consumed(VM_ID).is_ok());
    }

    #[test]
    fn pop_missing_segment() {
        let mut id = ResourceId::parse(VM_ID).unwrap();
        let e = id.pop_segment("disks").unwrap_err();
        assert_eq!(e.kind, TagErrorKind::MalformedIdentifier);
        assert!(e.message.contains("`disks`"));
    }

    #[test]
    fn leftovers_name_first_unexpected_key() {
        let input = format!("{VM_ID}/extensions/ext1/statuses/s1");
        let mut id = ResourceId::parse(&input).unwrap();
        id.pop_segment("virtualMachines").unwrap();
        let e = id.ensure_consumed(&input).unwrap_err();
        assert!(e.message.contains("\"extensions\""));
    }

    #[test]
    fn lower_cased_resource_group_key() {
        let id = ResourceId::parse("/subscriptions/s/resourcegroups/My-RG").unwrap();
        assert_eq!(id.resource_group.as_deref(), Some("My-RG"));
        assert!(id.provider.is_none());
    }

    #[test]
    fn trailing_slash_is_tolerated() {
        let id = ResourceId::parse("/subscriptions/s/resourceGroups/rg/").unwrap();
        assert_eq!(id.resource_group.as_deref(), Some("rg"));
    }

    #[test]
    fn rejects_odd_segment_count() {
        let e = ResourceId::parse("/subscriptions/s/resourceGroups").unwrap_err();
        assert!(e.message.contains("not divisible by 2"));
    }

    #[test]
    fn rejects_empty_value() {
        assert!(ResourceId::parse("/subscriptions//resourceGroups/rg").is_err());
    }

    #[test]
    fn rejects_relative_path() {
        assert!(ResourceId::parse("subscriptions/s").is_err());
        assert!(ResourceId::parse("").is_err());
    }

    #[test]
    fn rejects_missing_subscription() {
        let e = ResourceId::parse("/resourceGroups/rg").unwrap_err();
        assert!(e.message.contains("'subscriptions'"));
    }

    #[test]
    fn rejects_duplicate_keys() {
        let e = ResourceId::parse(
            "/subscriptions/s/resourceGroups/rg/providers/P/service/a/Service/b",
        )
        .unwrap_err();
        assert!(e.message.contains("duplicate"));
    }

    #[test]
    fn nested_providers_stay_in_map() {
        let input = "/subscriptions/s/resourceGroups/rg/providers/A/x/1/providers/B";
        let id = ResourceId::parse(input).unwrap();
        assert_eq!(id.provider.as_deref(), Some("A"));
        assert_eq!(id.remaining().count(), 2);
    }
}
