pub mod admission;
pub mod exclusions;
pub mod queue;
pub mod store;
pub mod stream;
pub mod workers;
