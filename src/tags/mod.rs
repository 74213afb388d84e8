//! Resource tags.
//!
//! Stacks are created with tags the engine propagates to most resources.
//! Some resource types are not tagged that way; [`TagReconciler`] sweeps
//! them after a successful create or update.

mod aws;
mod reconciler;
mod tag;

pub use aws::AwsResourceTagging;
#[cfg(test)]
pub use reconciler::{MockResourceTagging, MockTaggableResource};
pub use reconciler::{
    ResourceTagging, SUPPORTED_TYPES, TagReconcileReport, TagReconciler, TaggableResource,
};
pub use tag::{MAX_KEY_LEN, MAX_VALUE_LEN, RESERVED_PREFIX, Tag, missing_tags, tags_from_map};
