pub mod actor;
pub mod registry;
