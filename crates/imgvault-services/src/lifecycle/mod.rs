//! Lifecycle Manager.
//!
//! Objects age through STANDARD -> INFREQUENT -> ARCHIVE -> DELETED, measured from
//! their `created-at` metadata. Tier moves rewrite the object in place and keep it
//! readable; deletion is the only destructive step.

mod policy;
mod scheduler;
mod sweeper;

pub use policy::{evaluate, LifecyclePolicy, TierTransition};
pub use scheduler::{LifecycleHandle, LifecycleScheduler};
pub use sweeper::{LifecycleManager, SweepFailure, SweepReport};
