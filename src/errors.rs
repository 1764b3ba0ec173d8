use std::path::PathBuf;

pub use snafu::Snafu;

/// Fatal errors for a segmentation run. Per-atlas registration failures are
/// deliberately not represented here; they degrade to exclusion from the
/// fusion set and are only logged.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("required tool '{}' not found on PATH", tool))]
    ToolNotFound { tool: String },

    #[snafu(display("missing input: {}", path.display()))]
    MissingInput { path: PathBuf },

    #[snafu(display("cannot read atlas directory {}: {:?}", path.display(), source))]
    AtlasDirUnreadable {
        path: PathBuf,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },

    #[snafu(display("cannot read atlas manifest {}: {:?}", path.display(), source))]
    ManifestRead {
        path: PathBuf,
        #[snafu(source(from(csv::Error, Box::new)))]
        source: Box<csv::Error>,
    },

    #[snafu(display("manifest line {} of {} is not a <gray>,<labels> pair", line, path.display()))]
    ManifestEntry { path: PathBuf, line: usize },

    #[snafu(display("no atlases found in {}", path.display()))]
    NoAtlases { path: PathBuf },

    #[snafu(display("failed to create directory: {}", path.display()))]
    CreateDir {
        path: PathBuf,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },

    #[snafu(display("failed to create working directory {}: {:?}", path.display(), source))]
    CreateWorkDir {
        path: PathBuf,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },

    #[snafu(display(
        "only {} of {} atlases registered successfully, need at least half",
        survived,
        total
    ))]
    TooFewRegistered { survived: usize, total: usize },

    #[snafu(display("failed to copy {} into the output directory: {:?}", path.display(), source))]
    CopyArtifact {
        path: PathBuf,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },

    #[snafu(display("failed to launch fusion tool '{}': {:?}", tool, source))]
    FusionSpawn {
        tool: String,
        #[snafu(source(from(std::io::Error, Box::new)))]
        source: Box<std::io::Error>,
    },
}
