mod depth_events;

pub use depth_events::{DepthDelta, DepthSnapshot};
