pub mod atlas;
pub mod errors;
pub mod fusion;
pub mod invoke;
pub mod pipeline;
pub mod registration;
pub mod workdir;

pub use atlas::AtlasEntry;
pub use errors::Error;
pub use pipeline::{run, PipelineConfig};
pub use registration::RigidSearch;
