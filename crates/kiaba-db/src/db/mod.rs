//! Postgres repositories
//!
//! One repository per table, each implementing the matching trait from
//! [`crate::store`]. Multi-statement writes go through [`transaction::TransactionGuard`].

pub mod listing;
pub mod photo;
pub mod task;
pub mod transaction;

pub use listing::ListingRepository;
pub use photo::PhotoRepository;
pub use task::TaskRepository;
