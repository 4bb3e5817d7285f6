pub mod catalog;
pub mod engine;
pub mod links;
pub mod removal;
pub mod retry;
pub mod source;
pub mod sync;
