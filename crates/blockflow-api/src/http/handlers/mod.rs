pub mod execution;
pub mod graph;
