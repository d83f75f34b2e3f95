pub mod flow;
pub mod store;
