//! Record-Based Redundancy Control
//!
//! Lets several identically configured process instances, spread across
//! nodes, agree on one active instance through a shared MongoDB record.
//! The others stay in standby and take over when the active instance stops
//! renewing its keep-alive.
//!
//! # Features
//!
//! - **Redundancy Controller**: periodic poll of the instance record with lease renewal
//! - **Automatic Failover**: standby takes over after the keep-alive stays unchanged too long
//! - **Administrative Control**: `enabled` and `nodeNames` in the record stop a node on its next poll
//! - **Standby Guard**: helper to gate host work on activity
//!
//! # Example
//!
//! ```no_run
//! use rc_standby::{MongoInstanceStore, RedundancyConfig, RedundancyController, StandbyGuard};
//! use std::sync::Arc;
//!
//! async fn example(db: mongodb::Database) -> rc_standby::Result<()> {
//!     let store = Arc::new(MongoInstanceStore::new(&db));
//!     let config = RedundancyConfig::new("scada-a", "CS_CUSTOM_PROCESSOR");
//!
//!     let controller = Arc::new(RedundancyController::new(config, store)?);
//!     let handle = controller.clone().start()?;
//!
//!     let guard = StandbyGuard::new(controller.clone());
//!     guard.wait_for_activation().await?;
//!
//!     guard.run_if_active(|| async {
//!         println!("Doing the real work");
//!     }).await;
//!
//!     controller.shutdown();
//!     let _ = handle.await;
//!     Ok(())
//! }
//! ```

mod controller;
mod error;
mod guard;
mod mongo;
mod record;
mod store;

pub use controller::{Decision, RedundancyConfig, RedundancyController, RedundancyStatus};
pub use error::{FatalReason, PollError, Result, StandbyError, StoreError};
pub use guard::StandbyGuard;
pub use mongo::MongoInstanceStore;
pub use record::{keep_alive_now, InstanceKey, KeepAlive, ProcessInstance};
pub use store::{InMemoryInstanceStore, InsertOutcome, InstanceStore};
