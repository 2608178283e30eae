//! Per-group replicated state machine driver for a sharded graph store.
//!
//! This crate drives a Raft oracle (the `raft` crate's `RawNode`) through
//! its tick/ready/advance cycle, applies committed entries to a posting
//! (graph-edge) store under externally supplied MVCC timestamps, and
//! coordinates linearizable reads, snapshotting, and membership changes.
//! The Raft algorithm itself — leader election, log replication, joint
//! consensus — is out of scope: see [`oracle`] for the boundary.

pub mod apply;
pub mod cluster;
pub mod config;
pub mod error;
pub mod header;
pub mod lifecycle;
pub mod metrics;
pub mod node;
pub mod oracle;
pub mod posting;
pub mod proposal;
pub mod raft_types;
pub mod read_index;
pub mod run_loop;
pub mod scheduler;
pub mod snapshot;
pub mod transport;
pub mod wal;
pub mod watermark;

pub use config::{Config, ConfigBuilder};
pub use node::Node;
pub use raft_types::{GroupId, NodeId};
