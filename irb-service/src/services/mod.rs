//! Business services for the IRB API: persistence, sessions, policy,
//! workflow, audit trail, caching and background automation.

pub mod audit;
pub mod automation;
mod database;
mod jwt;
pub mod memory;
pub mod metrics;
pub mod permissions;
pub mod revocation;
pub mod stats_cache;
pub mod store;
pub mod workflow;

pub use audit::{AuditRecorder, ClientInfo};
pub use automation::AutomationWorker;
pub use database::PgStore;
pub use jwt::{JwtService, SessionClaims};
pub use memory::MemoryStore;
pub use permissions::{Actor, Permission, Policy};
pub use revocation::{MemoryRevocation, RedisRevocation, TokenRevocation};
pub use stats_cache::StatsCache;
pub use store::{DashboardStats, IrbStore};
