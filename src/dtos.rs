//! Wire models of the split and segment change endpoints.
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Version of a resource. Monotonically non-decreasing per resource; `-1` means "no data yet".
pub type ChangeNumber = i64;

/// Change number of a resource that has never been synchronized.
pub const NO_CHANGE_NUMBER: ChangeNumber = -1;

/// Matcher type whose rules reference a segment.
pub const IN_SEGMENT: &str = "IN_SEGMENT";

/// Response of the split changes endpoint.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SplitChangesResponse {
    /// Split definitions that changed after `since`.
    pub splits: Vec<Split>,
    #[allow(missing_docs)]
    pub since: ChangeNumber,
    /// Latest change number included in this response.
    pub till: ChangeNumber,
}

/// Status of a split definition. Only active splits are kept in the cache.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum SplitStatus {
    Active,
    Archived,
    #[serde(other)]
    Unknown,
}

/// A feature flag definition.
///
/// Only the fields the synchronization engine needs are typed. Everything else is kept in `other`
/// so the definition can be serialized back without losing information.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Split {
    #[allow(missing_docs)]
    pub name: String,
    #[allow(missing_docs)]
    pub status: SplitStatus,
    #[serde(default = "no_change_number")]
    #[allow(missing_docs)]
    pub change_number: ChangeNumber,
    #[serde(default)]
    #[allow(missing_docs)]
    pub killed: bool,
    #[serde(default = "control_treatment")]
    #[allow(missing_docs)]
    pub default_treatment: String,
    #[serde(default)]
    #[allow(missing_docs)]
    pub conditions: Vec<Condition>,
    #[serde(flatten)]
    #[allow(missing_docs)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Condition {
    pub matcher_group: MatcherGroup,
    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct MatcherGroup {
    #[serde(default)]
    pub combiner: Option<String>,
    #[serde(default)]
    pub matchers: Vec<Matcher>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Matcher {
    pub matcher_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_defined_segment_matcher_data: Option<UserDefinedSegmentMatcherData>,
    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct UserDefinedSegmentMatcherData {
    pub segment_name: String,
}

/// Response of the segment changes endpoint.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SegmentChangesResponse {
    /// Segment name.
    pub name: String,
    /// Keys added to the segment.
    #[serde(default)]
    pub added: Vec<String>,
    /// Keys removed from the segment.
    #[serde(default)]
    pub removed: Vec<String>,
    #[allow(missing_docs)]
    pub since: ChangeNumber,
    #[allow(missing_docs)]
    pub till: ChangeNumber,
}

/// Cache mutation computed from a single split changes response.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SplitsMutation {
    /// Active splits as `(name, serialized definition)` pairs.
    pub added: Vec<(String, String)>,
    /// Names of splits that are no longer active.
    pub removed: Vec<String>,
    /// Union of segment names referenced by the added splits.
    pub segments: BTreeSet<String>,
}

/// Collect names of segments referenced by `IN_SEGMENT` matchers of a split definition.
pub fn parse_segments(split: &Split) -> BTreeSet<String> {
    split
        .conditions
        .iter()
        .flat_map(|condition| condition.matcher_group.matchers.iter())
        .filter(|matcher| matcher.matcher_type == IN_SEGMENT)
        .filter_map(|matcher| matcher.user_defined_segment_matcher_data.as_ref())
        .map(|data| data.segment_name.clone())
        .collect()
}

/// Compute the cache mutation for the list of splits returned by the split changes endpoint.
///
/// Active splits are additions, anything else is a removal by name.
pub fn compute_splits_mutation(splits: &[Split]) -> serde_json::Result<SplitsMutation> {
    let mut mutation = SplitsMutation::default();

    for split in splits {
        if split.status == SplitStatus::Active {
            mutation
                .added
                .push((split.name.clone(), serde_json::to_string(split)?));
            mutation.segments.extend(parse_segments(split));
        } else {
            mutation.removed.push(split.name.clone());
        }
    }

    Ok(mutation)
}

fn no_change_number() -> ChangeNumber {
    NO_CHANGE_NUMBER
}

fn control_treatment() -> String {
    "control".to_owned()
}
