//! # Decision Cache
//!
//! Caches policy decisions and invalidates them per entity.
//!
//! - [`DefaultDecisionCache`] keeps decisions and per-entity timestamp markers
//!   in two [`acs_core::KeyValueStore`]s and treats a decision as stale once any
//!   marker it depends on is newer than the decision.
//! - [`CircuitBreakingDecisionCache`] makes the cache optional: reads and
//!   writes fail open, invalidations fail closed.

pub mod breaker;
pub mod clock;
pub mod connector;
pub mod engine;
pub mod key;
pub mod telemetry;
pub mod wrapper;

pub use breaker::{CacheCircuitBreaker, CircuitState};
pub use clock::{Clock, SystemClock};
pub use connector::StaticConnectorService;
pub use engine::{DecisionCache, DefaultDecisionCache};
pub use key::{DecisionCacheKey, DecisionCacheKeyBuilder};
pub use telemetry::CacheTelemetry;
pub use wrapper::CircuitBreakingDecisionCache;
