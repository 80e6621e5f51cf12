//! Cache Module
//!
//! The application-facing facade: an enable switch in front of one driver.

mod facade;
mod stats;

// Re-export public types
pub use facade::Cache;
pub use stats::CacheStats;
