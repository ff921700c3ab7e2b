//! # Access Control Service
//!
//! Orchestration over the attribute resolver and the decision cache:
//! - [`PrivilegeManagementService`]: entity writes followed by invalidation
//!   of the entity and every descendant
//! - [`CachedDecisionPoint`]: read-through policy evaluation
//! - [`AccessControlRuntime`]: assembly from configuration and hot reload

pub mod decision_point;
pub mod observability;
pub mod privileges;
pub mod runtime;

pub use decision_point::CachedDecisionPoint;
pub use observability::init_tracing;
pub use privileges::PrivilegeManagementService;
pub use runtime::AccessControlRuntime;
