pub mod mqtt;
pub mod nodes;
pub mod streams;
