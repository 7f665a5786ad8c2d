//! Tenant Adapter Routing
//!
//! Decides which database adapter serves a tenant request and how many
//! requests a tenant may run at once.
//!
//! # Architecture
//!
//! ```text
//! +--------------------+
//! |  AdmissionLimiter  |  <-- per-token semaphore (optional)
//! +---------+----------+
//!           |
//!           v
//! +--------------------+
//! |   SelectorStage    |  <-- random / round-robin pick
//! +---------+----------+
//!           |
//!           v
//! +--------------------+
//! | TenantPoolManager  |  <-- per-token adapter lists, resized live
//! +---------+----------+
//!           |
//!     +-----+-----+
//!     |     |     |
//!     v     v     v
//!  +----+ +----+ +----+
//!  |db a| |db b| |db c|  <-- adapters from the AdapterSupplier
//!  +----+ +----+ +----+
//! ```

pub mod admission;
pub mod connection_pool;
pub mod selection;

pub use admission::{AdmissionLimiter, AdmissionStats};
pub use connection_pool::{PoolStats, TenantPool, TenantPoolManager};
pub use selection::{
    strategy_for, RandomSelection, RoundRobinSelection, SelectionStrategy, SelectorStage,
};
