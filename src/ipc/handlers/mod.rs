pub mod attendance;
pub mod backup;
pub mod core;
pub mod courses;
pub mod gradebook;
pub mod people;
pub mod reports;
