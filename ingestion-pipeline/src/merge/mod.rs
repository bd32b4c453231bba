//! Knowledge-graph merge engine: three phases run in sequence per document
//! (entities, then relations, then the reference indexes), each collapsing
//! per-chunk mentions into a single persisted record.

pub mod description_merger;
pub mod entity_merger;
pub mod index_updater;
pub mod relation_merger;
pub mod source_ids;

pub use description_merger::{merge_descriptions, DescriptionMergeConfig};
pub use entity_merger::{EntityMergeConfig, EntityMerger};
pub use index_updater::IndexUpdater;
pub use relation_merger::{RelationMergeConfig, RelationMerger};
