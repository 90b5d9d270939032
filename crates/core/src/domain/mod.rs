pub mod feedback;
pub mod job;
pub mod phase;
pub mod quality;
pub mod version;
