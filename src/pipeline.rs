use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressFinish, ProgressStyle};
use snafu::ResultExt;
use tracing::info;

use crate::atlas::{load_atlases, AtlasEntry};
use crate::errors::{CopyArtifactSnafu, CreateDirSnafu, Error};
use crate::fusion::{check_quorum, fusion_command, run_fusion};
use crate::invoke::resolve_tool;
use crate::registration::{DeformedAtlas, Registrar, RigidSearch};
use crate::workdir::WorkDir;

pub const DEFAULT_REGISTRATION_TOOL: &str = "greedy";
pub const DEFAULT_FUSION_TOOL: &str = "label_fusion";
pub const DEFAULT_TIMING_TOOL: &str = "time";
/// Suffix appended to the output root to name the consensus segmentation.
pub const OUTPUT_SUFFIX: &str = "Labels.nii.gz";

/// Everything one segmentation run needs, resolved from the CLI.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub input_image: PathBuf,
    pub input_mask: Option<PathBuf>,
    pub atlas_dir: PathBuf,
    /// Path prefix for all outputs; the consensus segmentation lands at
    /// `<output_root>Labels.nii.gz`.
    pub output_root: PathBuf,
    pub label_sigma: String,
    pub keep_deformed: bool,
    pub rigid_search: Option<RigidSearch>,
    pub registration_mask: Option<PathBuf>,
    pub threads: usize,
    pub time: bool,
    pub voting_method: String,
    pub registration_tool: String,
    pub fusion_tool: String,
}

impl PipelineConfig {
    pub fn output_path(&self) -> PathBuf {
        path_with_suffix(&self.output_root, OUTPUT_SUFFIX)
    }
}

/// Append a suffix to a path prefix, e.g. `/out/subj_` + `Labels.nii.gz`.
fn path_with_suffix(root: &Path, suffix: &str) -> PathBuf {
    let mut s = root.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

fn default_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len).with_finish(ProgressFinish::AndLeave);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{msg} {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta} @ {per_sec})",
            )
            .unwrap(),
    );
    pb
}

fn require_file(path: &Path) -> Result<(), Error> {
    if path.is_file() {
        Ok(())
    } else {
        Err(Error::MissingInput {
            path: path.to_path_buf(),
        })
    }
}

/// Run the full multi-atlas segmentation pipeline: tool checks, atlas
/// resolution, per-atlas registration, fusion gating, fusion, retention and
/// teardown. Returns the path of the consensus segmentation.
pub fn run(config: &PipelineConfig) -> Result<PathBuf, Error> {
    // Resolve tools before doing any work
    let registration_tool = resolve_tool(&config.registration_tool)?;
    let fusion_tool = resolve_tool(&config.fusion_tool)?;
    let timer = if config.time {
        Some(resolve_tool(DEFAULT_TIMING_TOOL)?)
    } else {
        None
    };

    // Validate inputs
    require_file(&config.input_image)?;
    if let Some(mask) = &config.input_mask {
        require_file(mask)?;
    }
    if let Some(mask) = &config.registration_mask {
        require_file(mask)?;
    }

    let atlases = load_atlases(&config.atlas_dir)?;
    info!("found {} atlases in {}", atlases.len(), config.atlas_dir.display());

    // The output parent must exist before the working directory, which may
    // be created beside it
    if let Some(parent) = config.output_root.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context(CreateDirSnafu { path: parent })?;
    }
    let workdir = WorkDir::create(&config.output_root)?;
    info!("working directory: {}", workdir.path().display());

    let registrar = Registrar::new(
        registration_tool,
        config.input_image.clone(),
        config.registration_mask.clone(),
        config.threads,
        config.rigid_search,
        config.label_sigma.clone(),
        timer.clone(),
    );

    let pb = default_bar(atlases.len() as u64);
    pb.set_message("Registering atlases");

    let mut deformed: Vec<DeformedAtlas> = Vec::with_capacity(atlases.len());
    for (index, atlas) in atlases.iter().enumerate() {
        if is_self_atlas(atlas, &config.input_image) {
            // leave-one-out: never register the subject against itself
            info!("skipping atlas {}: matches the input image", index);
            pb.inc(1);
            continue;
        }
        if let Some(result) = registrar.register(index, atlas, &workdir) {
            deformed.push(result);
        }
        pb.inc(1);
    }
    pb.finish_with_message("Registration complete");

    check_quorum(deformed.len(), atlases.len())?;
    info!(
        "{} of {} atlases registered successfully",
        deformed.len(),
        atlases.len()
    );

    let output = config.output_path();
    let cmd = fusion_command(
        &fusion_tool,
        &config.input_image,
        config.input_mask.as_deref(),
        &config.voting_method,
        &deformed,
        &output,
        timer.as_deref(),
    );
    run_fusion(&cmd, &output)?;

    if config.keep_deformed {
        retain_deformed(&config.output_root, &deformed)?;
    }

    workdir.close();
    Ok(output)
}

/// Copy each surviving deformed pair next to the output so it outlives the
/// working directory.
fn retain_deformed(output_root: &Path, deformed: &[DeformedAtlas]) -> Result<(), Error> {
    for d in deformed {
        let stem = d.source.stem();
        let gray = path_with_suffix(output_root, &format!("{}_to_subject.nii.gz", stem));
        let labels = path_with_suffix(output_root, &format!("{}_to_subject_Seg.nii.gz", stem));
        std::fs::copy(&d.gray, &gray).context(CopyArtifactSnafu { path: &d.gray })?;
        std::fs::copy(&d.labels, &labels).context(CopyArtifactSnafu { path: &d.labels })?;
        info!("kept deformed atlas {} at {}", stem, gray.display());
    }
    Ok(())
}

/// Skip an atlas whose gray image is the subject itself.
pub fn is_self_atlas(atlas: &AtlasEntry, input_image: &Path) -> bool {
    atlas.gray() == input_image
}
