//! Metadata update services
//!
//! Each service turns a request into a cluster state update task. The
//! derivation itself is a plain function of the current state
//! (`apply_*`), so it never mutates anything reachable from a published
//! state.

pub mod create_index;
pub mod delete_index;
pub mod index_aliases;
pub mod index_state;

pub use create_index::{CreateIndexRequest, MetadataCreateIndexService};
pub use delete_index::MetadataDeleteIndexService;
pub use index_aliases::{AliasAction, AliasActionType, MetadataIndexAliasesService};
pub use index_state::MetadataIndexStateService;
