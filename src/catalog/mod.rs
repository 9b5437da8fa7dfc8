//! Plan and feature catalog.

pub mod feature;
pub mod item;
pub mod plan;
pub mod registry;

pub use feature::{Feature, FeatureKind, FeatureRef, FeatureView, MeteringInfo};
pub use item::{Item, ItemView};
pub use plan::{Plan, PlanRef, PlanView};
pub use registry::{Catalog, SharedCatalog, UsageSync};
