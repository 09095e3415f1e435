pub mod middleware;
pub use middleware::{RosMiddleware, to_ros_type};
