use std::path::{Path, PathBuf};

use itertools::Itertools;
use snafu::ResultExt;

use crate::errors::{AtlasDirUnreadableSnafu, Error, ManifestReadSnafu};

pub const ATLAS_MANIFEST: &str = "atlases.csv";
pub const LABEL_SUFFIX: &str = "_Seg.nii.gz";

/// One training exemplar: a gray image and its label map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtlasEntry {
    gray: PathBuf,
    labels: PathBuf,
}

impl AtlasEntry {
    pub fn new<P: Into<PathBuf>>(gray: P, labels: P) -> Self {
        Self {
            gray: gray.into(),
            labels: labels.into(),
        }
    }

    pub fn gray(&self) -> &Path {
        &self.gray
    }

    pub fn labels(&self) -> &Path {
        &self.labels
    }

    /// The gray image's file name without its NIfTI extension, used to name
    /// artifacts derived from this atlas.
    pub fn stem(&self) -> String {
        nifti_stem(&self.gray)
    }
}

/// Strip `.nii.gz` or `.nii` from a file name.
pub fn nifti_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.strip_suffix(".nii.gz")
        .or_else(|| name.strip_suffix(".nii"))
        .map(|s| s.to_string())
        .unwrap_or(name)
}

/// Resolve the atlas list for a directory. Prefers an `atlases.csv` manifest
/// when present, otherwise falls back to scanning for `*_Seg.nii.gz` label
/// maps paired with a same-stem base image.
pub fn load_atlases(atlas_dir: &Path) -> Result<Vec<AtlasEntry>, Error> {
    if !atlas_dir.is_dir() {
        return Err(Error::MissingInput {
            path: atlas_dir.to_path_buf(),
        });
    }
    let manifest = atlas_dir.join(ATLAS_MANIFEST);
    let entries = if manifest.is_file() {
        read_manifest(&manifest, atlas_dir)?
    } else {
        scan_directory(atlas_dir)?
    };
    if entries.is_empty() {
        return Err(Error::NoAtlases {
            path: atlas_dir.to_path_buf(),
        });
    }
    Ok(entries)
}

/// Read a headerless `<gray>,<labels>` manifest. Relative paths resolve
/// against the atlas directory; manifest order is preserved.
fn read_manifest(manifest: &Path, atlas_dir: &Path) -> Result<Vec<AtlasEntry>, Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(false)
        .from_path(manifest)
        .context(ManifestReadSnafu { path: manifest })?;

    let mut entries = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.context(ManifestReadSnafu { path: manifest })?;
        let (gray, labels) = match (record.get(0), record.get(1)) {
            (Some(gray), Some(labels)) if record.len() == 2 => (gray.trim(), labels.trim()),
            _ => {
                return Err(Error::ManifestEntry {
                    path: manifest.to_path_buf(),
                    // CSV records are zero-indexed
                    line: line + 1,
                })
            }
        };
        entries.push(AtlasEntry::new(
            resolve_against(atlas_dir, gray),
            resolve_against(atlas_dir, labels),
        ));
    }
    Ok(entries)
}

fn resolve_against(base: &Path, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Scan a directory for `X_Seg.nii.gz` label maps and pair each with its
/// `X.nii.gz` base image. Pairs whose base image is missing are skipped.
/// Results are sorted by file name so runs are deterministic.
fn scan_directory(atlas_dir: &Path) -> Result<Vec<AtlasEntry>, Error> {
    let entries = std::fs::read_dir(atlas_dir)
        .context(AtlasDirUnreadableSnafu { path: atlas_dir })?
        .collect::<Result<Vec<_>, _>>()
        .context(AtlasDirUnreadableSnafu { path: atlas_dir })?;

    let atlases = entries
        .into_iter()
        .map(|e| e.path())
        .filter_map(|labels| {
            let name = labels.file_name()?.to_str()?;
            let stem = name.strip_suffix(LABEL_SUFFIX)?;
            let gray = atlas_dir.join(format!("{}.nii.gz", stem));
            gray.is_file().then(|| AtlasEntry::new(gray, labels))
        })
        .sorted_by(|a, b| a.gray.cmp(&b.gray))
        .collect();
    Ok(atlases)
}
