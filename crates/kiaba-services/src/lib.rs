//! Kiaba Services Layer
//!
//! Orchestration on top of the stores, storage and image pipeline: attaching
//! photos to listings, running per-photo processing jobs, deriving listing
//! visibility from photo readiness, and the cached site metrics that visibility
//! feeds. [`setup::AppServices`] wires everything together for the CLI.

pub mod cache;
pub mod dispatch;
pub mod listings;
pub mod maintenance;
pub mod metrics;
pub mod photo_job;
pub mod photos;
pub mod setup;
pub mod visibility;

pub use dispatch::Dispatcher;
pub use listings::ListingService;
pub use maintenance::{Maintenance, MaintenanceReport};
pub use metrics::SiteMetrics;
pub use photo_job::{PhotoJobError, PhotoJobOutcome, PhotoJobRunner};
pub use photos::{JobScheduler, PhotoService, PhotoUpload};
pub use setup::{AppServices, Stores};
pub use visibility::{GateOutcome, ListingVisibilityGate};
