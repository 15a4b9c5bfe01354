//! Retrieval Coordinator.
//!
//! With a CDN configured, `resolve` answers with a CDN URL without touching the
//! store. Otherwise, or on `Access::Direct`, it checks the object exists and signs a
//! time-limited URL. A missing key is never an error: it resolves to `Missing`.

mod cache;
mod coordinator;

pub use cache::{CacheEntry, CacheStats, CacheStatus, EdgeCache};
pub use coordinator::{
    Access, Delivery, DeliveryReference, Displayable, RetrievalCoordinator, PLACEHOLDER_MESSAGE,
};
