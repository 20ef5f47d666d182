//! Orgchart Directory: organization tree, membership and data-scope
//! services.
//!
//! Services are generic over the `orgchart-core` repository traits so that
//! this crate has no dependency on the storage crate.

pub mod audit;
pub mod cache;
pub mod config;
pub mod lock;
pub mod membership;
pub mod organization;
#[cfg(feature = "redis")]
mod redis_store;

pub use audit::AuditEmitter;
pub use cache::{DataScopeCache, InvalidationReport, MemoryScopeStore, ScopeStore, scope_key};
pub use config::DirectoryConfig;
pub use lock::LockTable;
pub use membership::MembershipService;
pub use organization::OrganizationService;
#[cfg(feature = "redis")]
pub use redis_store::RedisScopeStore;
