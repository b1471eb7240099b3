pub mod event;
pub mod job;
pub mod requests;
pub mod worker;
