//! Commit log core - change tracking and diffing for one commit
//!
//! Turns the low-level graph events recorded while an object graph is
//! mutated into a [`ChangeMap`]: one [`ObjectChange`] per touched object
//! with attribute, to-one and to-many deltas, keyed by identity.
//!
//! Pipeline per commit:
//! - [`classify`] turns each [`GraphDiff`] into a change fragment
//! - [`relationship`] computes to-one and to-many deltas
//! - [`filter::ChangeFilter`] applies entity and property policy
//! - [`change_map::ChangeMapAggregator`] merges fragments by identity
//!
//! No I/O happens here; storage and the commit lifecycle live in the store
//! and engine crates.

pub mod builder;
pub mod change_map;
pub mod classify;
pub mod errors;
pub mod filter;
pub mod graph;
pub mod logging_facility;
pub mod metadata;
pub mod model;
pub mod relationship;
pub mod snapshot;
pub mod summary;

#[doc(hidden)]
pub use commitlog_core_types as types;

pub use builder::build_change_map;
pub use change_map::{ChangeMap, ChangeMapAggregator};
pub use classify::classify;
pub use errors::{CommitLogError, ExError, ExErrorKind, Result};
pub use filter::{ChangeFilter, FilterConfig, CONFIDENTIAL_MASK};
pub use graph::{GraphDiff, IdMap};
pub use metadata::{
    AttributeDescriptor, CommitLogAnnotation, DeleteRule, EntityDescriptor, EntityResolver,
    JoinTable, RelationshipDescriptor, RelationshipKind,
};
pub use model::{
    AttributeChange, KeyValue, ObjectChange, ObjectChangeType, ObjectId,
    ToManyRelationshipChange, ToOneRelationshipChange,
};
pub use snapshot::{Snapshot, SnapshotPair, SnapshotSource};
pub use summary::render_change_map_summary;
