//! Cluster Topology
//!
//! Stores, regions and the two ways of holding them:
//! - [`ClusterMetadata`]: the live state, mutated by heartbeats and applied
//!   operators under a read-write lock
//! - [`ClusterView`]: an immutable snapshot the scheduler works from
//!
//! ```text
//!   heartbeats ──► ClusterMetadata ──snapshot()──► Arc<ClusterView> ──► scheduler
//!                        ▲                                                 │
//!                        └──────────── apply_operator() ◄── operators ◄────┘
//! ```

pub mod metadata;
pub mod region;
pub mod store;
pub mod view;

pub use metadata::{ClusterMetadata, MetadataStats};
pub use region::{Peer, PeerRole, Region, RegionId};
pub use store::{Store, StoreId, StoreState, DEFAULT_ENGINE, ENGINE_LABEL_KEY};
pub use view::{ClusterSnapshot, ClusterView, ClusterViewBuilder};
