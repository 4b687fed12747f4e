//! In-process notifications about store changes.
//!
//! Subscribers receive branch lifecycle, commit, merge and purge events
//! over bounded channels. A subscriber whose buffer fills up is dropped
//! rather than slowing down writers.
//!
//! # Example
//!
//! ```ignore
//! let handle = store.subscribe(SubscriptionConfig {
//!     filter: SubscriptionFilter::doc_types(vec!["concept".to_string()]),
//!     ..Default::default()
//! });
//!
//! loop {
//!     match handle.recv() {
//!         Ok(StoreEvent::Committed { commit }) => println!("{} on {}", commit.id, commit.branch),
//!         Ok(StoreEvent::Dropped { .. }) | Err(_) => break,
//!         Ok(_) => {}
//!     }
//! }
//! ```

mod manager;
mod types;

pub use manager::{SubscriptionManager, DEFAULT_PAYLOAD_LIMIT};
pub use types::{
    BranchSummary, CommitSummary, DropReason, MergeSummary, StoreEvent, SubscriptionConfig,
    SubscriptionFilter, SubscriptionHandle, SubscriptionId,
};
