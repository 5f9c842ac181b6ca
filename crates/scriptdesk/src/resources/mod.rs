//! Production resources: lifecycle enums, the CRUD service, budget
//! statistics and exports.

pub mod export;
pub mod model;
pub mod service;
pub mod stats;

pub use export::{export_cost_analysis, export_resources, export_statistics, ExportFormat};
pub use model::{ResourcePriority, ResourceStatus};
pub use service::{ResourcePage, ResourcePatch, ResourceService};
pub use stats::{cost_analysis, resource_statistics, CostAnalysis, ResourceStatistics};
