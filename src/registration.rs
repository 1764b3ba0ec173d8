use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::atlas::AtlasEntry;
use crate::invoke::{run_stage, ToolCommand};
use crate::workdir::WorkDir;

/// All images in this pipeline are 3D volumes.
pub const DIMENSION: &str = "3";
/// Similarity metric for the rigid/affine/deformable stages.
pub const METRIC: [&str; 2] = ["NCC", "2x2x2"];
/// Multi-resolution iteration schedule, coarse to fine.
pub const ITERATIONS: &str = "100x50x10";

/// Randomized restart parameters for the rigid stage: number of search
/// points, rotation sigma in degrees, translation sigma in mm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RigidSearch {
    pub points: u32,
    pub rot_sigma_deg: u32,
    pub trans_sigma_mm: u32,
}

/// An atlas resampled into subject space. Both files are known to exist when
/// this value is constructed.
#[derive(Debug, Clone)]
pub struct DeformedAtlas {
    pub source: AtlasEntry,
    pub gray: PathBuf,
    pub labels: PathBuf,
}

/// Runs the four-stage registration chain and resampling for one atlas at a
/// time against a fixed subject.
#[derive(Debug)]
pub struct Registrar {
    tool: PathBuf,
    subject: PathBuf,
    registration_mask: Option<PathBuf>,
    threads: usize,
    search: Option<RigidSearch>,
    label_sigma: String,
    timer: Option<PathBuf>,
}

impl Registrar {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tool: PathBuf,
        subject: PathBuf,
        registration_mask: Option<PathBuf>,
        threads: usize,
        search: Option<RigidSearch>,
        label_sigma: String,
        timer: Option<PathBuf>,
    ) -> Self {
        Self {
            tool,
            subject,
            registration_mask,
            threads,
            search,
            label_sigma,
            timer,
        }
    }

    fn base_command(&self) -> ToolCommand {
        let cmd = ToolCommand::new(&self.tool)
            .arg("-d")
            .arg(DIMENSION)
            .arg("-threads")
            .arg(self.threads.to_string());
        match &self.timer {
            Some(timer) => cmd.timed(timer),
            None => cmd,
        }
    }

    /// Stage 1: center-of-mass initialization producing a coarse linear
    /// transform.
    fn com_command(&self, atlas: &AtlasEntry, out: &Path) -> ToolCommand {
        self.base_command()
            .arg("-i")
            .path(&self.subject)
            .path(atlas.gray())
            .arg("-moments")
            .arg("1")
            .arg("-o")
            .path(out)
    }

    fn linear_command(&self, atlas: &AtlasEntry, dof: u32, init: &Path, out: &Path) -> ToolCommand {
        let mut cmd = self
            .base_command()
            .arg("-a")
            .arg("-dof")
            .arg(dof.to_string())
            .arg("-m")
            .args(METRIC)
            .arg("-n")
            .arg(ITERATIONS)
            .arg("-i")
            .path(&self.subject)
            .path(atlas.gray())
            .arg("-ia")
            .path(init);
        if let Some(mask) = &self.registration_mask {
            cmd = cmd.arg("-gm").path(mask);
        }
        // search restarts only apply to the rigid stage
        if dof == 6 {
            if let Some(search) = &self.search {
                cmd = cmd
                    .arg("-search")
                    .arg(search.points.to_string())
                    .arg(search.rot_sigma_deg.to_string())
                    .arg(search.trans_sigma_mm.to_string());
            }
        }
        cmd.arg("-o").path(out)
    }

    /// Stage 2: rigid registration, 6 degrees of freedom.
    fn rigid_command(&self, atlas: &AtlasEntry, init: &Path, out: &Path) -> ToolCommand {
        self.linear_command(atlas, 6, init, out)
    }

    /// Stage 3: affine registration, 12 degrees of freedom.
    fn affine_command(&self, atlas: &AtlasEntry, init: &Path, out: &Path) -> ToolCommand {
        self.linear_command(atlas, 12, init, out)
    }

    /// Stage 4: dense deformable registration seeded by the affine result.
    fn deformable_command(&self, atlas: &AtlasEntry, affine: &Path, out: &Path) -> ToolCommand {
        let mut cmd = self
            .base_command()
            .arg("-m")
            .args(METRIC)
            .arg("-n")
            .arg(ITERATIONS)
            .arg("-i")
            .path(&self.subject)
            .path(atlas.gray())
            .arg("-it")
            .path(affine);
        if let Some(mask) = &self.registration_mask {
            cmd = cmd.arg("-gm").path(mask);
        }
        cmd.arg("-o").path(out)
    }

    /// Warp the atlas gray image (linear interpolation) and label map
    /// (label-aware interpolation) into subject space with the composed
    /// deformable + affine transform.
    fn resample_command(
        &self,
        atlas: &AtlasEntry,
        warp: &Path,
        affine: &Path,
        deformed_gray: &Path,
        deformed_labels: &Path,
    ) -> ToolCommand {
        self.base_command()
            .arg("-rf")
            .path(&self.subject)
            .arg("-ri")
            .arg("LINEAR")
            .arg("-rm")
            .path(atlas.gray())
            .path(deformed_gray)
            .arg("-ri")
            .arg("LABEL")
            .arg(&self.label_sigma)
            .arg("-rm")
            .path(atlas.labels())
            .path(deformed_labels)
            .arg("-r")
            .path(warp)
            .path(affine)
    }

    /// Run the full chain for one atlas. Stages run in strict sequence and
    /// the chain short-circuits on the first failure; a failed atlas is
    /// reported as `None` and excluded from fusion by the caller.
    pub fn register(
        &self,
        index: usize,
        atlas: &AtlasEntry,
        workdir: &WorkDir,
    ) -> Option<DeformedAtlas> {
        let com = workdir.join(&format!("atlas{:03}_com.mat", index));
        let rigid = workdir.join(&format!("atlas{:03}_rigid.mat", index));
        let affine = workdir.join(&format!("atlas{:03}_affine.mat", index));
        let warp = workdir.join(&format!("atlas{:03}_warp.nii.gz", index));
        let deformed_gray = workdir.join(&format!("atlas{:03}_deformed.nii.gz", index));
        let deformed_labels = workdir.join(&format!("atlas{:03}_deformed_Seg.nii.gz", index));

        info!(
            "registering atlas {} ({}) to {}",
            index,
            atlas.stem(),
            self.subject.display()
        );

        let stages: [(&str, ToolCommand, &Path); 5] = [
            ("center-of-mass", self.com_command(atlas, &com), &com),
            ("rigid", self.rigid_command(atlas, &com, &rigid), &rigid),
            ("affine", self.affine_command(atlas, &rigid, &affine), &affine),
            (
                "deformable",
                self.deformable_command(atlas, &affine, &warp),
                &warp,
            ),
            (
                "resample",
                self.resample_command(atlas, &warp, &affine, &deformed_gray, &deformed_labels),
                &deformed_gray,
            ),
        ];

        for (name, cmd, output) in &stages {
            let expected: Vec<&Path> = if *name == "resample" {
                vec![deformed_gray.as_path(), deformed_labels.as_path()]
            } else {
                vec![*output]
            };
            let outcome = run_stage(cmd, &expected);
            if !outcome.success() {
                warn!(
                    "atlas {} ({}) excluded: {} stage failed (status {:?})",
                    index,
                    atlas.stem(),
                    name,
                    outcome.status
                );
                return None;
            }
        }

        Some(DeformedAtlas {
            source: atlas.clone(),
            gray: deformed_gray,
            labels: deformed_labels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn registrar(search: Option<RigidSearch>, mask: Option<PathBuf>) -> Registrar {
        Registrar::new(
            PathBuf::from("greedy"),
            PathBuf::from("/data/subject.nii.gz"),
            mask,
            4,
            search,
            "0.25mm".to_string(),
            None,
        )
    }

    fn atlas() -> AtlasEntry {
        AtlasEntry::new("/atlases/a01.nii.gz", "/atlases/a01_Seg.nii.gz")
    }

    #[test]
    fn test_com_command_line() {
        let cmd = registrar(None, None).com_command(&atlas(), Path::new("/tmp/com.mat"));
        assert_eq!(
            cmd.display_line(),
            "greedy -d 3 -threads 4 -i /data/subject.nii.gz /atlases/a01.nii.gz \
             -moments 1 -o /tmp/com.mat"
        );
    }

    #[test]
    fn test_rigid_includes_search_params() {
        let search = RigidSearch {
            points: 100,
            rot_sigma_deg: 10,
            trans_sigma_mm: 5,
        };
        let cmd = registrar(Some(search), None).rigid_command(
            &atlas(),
            Path::new("/tmp/com.mat"),
            Path::new("/tmp/rigid.mat"),
        );
        let line = cmd.display_line();
        assert!(line.contains("-dof 6"));
        assert!(line.contains("-search 100 10 5"));
    }

    #[test]
    fn test_affine_omits_search_params() {
        let search = RigidSearch {
            points: 100,
            rot_sigma_deg: 10,
            trans_sigma_mm: 5,
        };
        let cmd = registrar(Some(search), None).affine_command(
            &atlas(),
            Path::new("/tmp/rigid.mat"),
            Path::new("/tmp/affine.mat"),
        );
        let line = cmd.display_line();
        assert!(line.contains("-dof 12"));
        assert!(!line.contains("-search"));
        assert!(line.contains("-ia /tmp/rigid.mat"));
    }

    #[rstest]
    #[case(None, false)]
    #[case(Some(PathBuf::from("/masks/reg.nii.gz")), true)]
    fn test_registration_mask(#[case] mask: Option<PathBuf>, #[case] expect: bool) {
        let cmd = registrar(None, mask).rigid_command(
            &atlas(),
            Path::new("/tmp/com.mat"),
            Path::new("/tmp/rigid.mat"),
        );
        assert_eq!(cmd.display_line().contains("-gm /masks/reg.nii.gz"), expect);
    }

    #[test]
    fn test_deformable_seeded_by_affine() {
        let cmd = registrar(None, None).deformable_command(
            &atlas(),
            Path::new("/tmp/affine.mat"),
            Path::new("/tmp/warp.nii.gz"),
        );
        let line = cmd.display_line();
        assert!(line.contains("-it /tmp/affine.mat"));
        assert!(line.contains("-m NCC 2x2x2"));
        assert!(line.contains("-n 100x50x10"));
        assert!(!line.contains(" -a "));
    }

    #[test]
    fn test_resample_interpolation_modes() {
        let cmd = registrar(None, None).resample_command(
            &atlas(),
            Path::new("/tmp/warp.nii.gz"),
            Path::new("/tmp/affine.mat"),
            Path::new("/tmp/def.nii.gz"),
            Path::new("/tmp/def_Seg.nii.gz"),
        );
        assert_eq!(
            cmd.display_line(),
            "greedy -d 3 -threads 4 -rf /data/subject.nii.gz \
             -ri LINEAR -rm /atlases/a01.nii.gz /tmp/def.nii.gz \
             -ri LABEL 0.25mm -rm /atlases/a01_Seg.nii.gz /tmp/def_Seg.nii.gz \
             -r /tmp/warp.nii.gz /tmp/affine.mat"
        );
    }

    #[test]
    fn test_timed_registrar_wraps_every_stage() {
        let reg = Registrar::new(
            PathBuf::from("greedy"),
            PathBuf::from("/data/subject.nii.gz"),
            None,
            1,
            None,
            "0.25mm".to_string(),
            Some(PathBuf::from("time")),
        );
        let cmd = reg.com_command(&atlas(), Path::new("/tmp/com.mat"));
        assert!(cmd.display_line().starts_with("time greedy "));
    }
}
