//! Run Monitoring
//!
//! - [`ResourceMonitor`]: CPU and memory samples between task runs
//! - [`ExecutionTimeline`]: task run timing and Gantt charts

pub mod resource;
pub mod timeline;

pub use resource::{ResourceMonitor, ResourceSample};
pub use timeline::{EventType, ExecutionTimeline, Span, TaskKey, TimelineEvent};
