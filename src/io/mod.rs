pub mod catalog;
pub use catalog::Catalog;
pub mod memory;
pub use memory::{MemoryBus, MemoryNode};
pub mod mqtt;
#[cfg(feature = "ros")]
pub mod ros;
