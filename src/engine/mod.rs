pub mod liveness_monitor;
pub mod pipeline;
pub mod presentation;

pub use liveness_monitor::{
    LivenessMonitor, LivenessRecord, LivenessRegistry, StaleNode, AGGREGATOR_NODE_ID,
};
pub use pipeline::{AggregatorPipeline, Ingested};
pub use presentation::{render_line, DisplayBuffer, Presenter, SharedDisplay, StdoutPresenter};
