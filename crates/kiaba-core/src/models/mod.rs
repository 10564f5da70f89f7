pub mod listing;
pub mod photo;
pub mod task;

pub use listing::{CityCount, Listing, ListingStatus, NewListing, Visibility};
pub use photo::{Photo, ProcessedPhotoFields};
pub use task::{ProcessPhotoPayload, Task, TaskPayload, TaskStatus, TaskType};
