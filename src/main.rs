use std::path::PathBuf;

use clap::Parser;
use snafu::{Report, ResultExt, Whatever};
use tracing::{error, Level};

use multiatlas_seg::pipeline::{self, PipelineConfig};
use multiatlas_seg::registration::RigidSearch;

#[derive(Parser, Debug)]
#[command(author = "Scott Chase Waggener", version = env!("CARGO_PKG_VERSION"), about = "Multi-atlas segmentation via external registration and label fusion", long_about = None)]
struct Args {
    #[arg(help = "Subject image to segment", long = "input-image")]
    input_image: PathBuf,

    #[arg(
        help = "Mask restricting the fusion domain within the subject",
        long = "input-mask"
    )]
    input_mask: Option<PathBuf>,

    #[arg(
        help = "Directory containing atlases.csv or *_Seg.nii.gz/base-image pairs",
        long = "atlas-dir"
    )]
    atlas_dir: PathBuf,

    #[arg(
        help = "Output path prefix; the consensus segmentation is written to <output-root>Labels.nii.gz",
        long = "output-root"
    )]
    output_root: PathBuf,

    #[arg(
        help = "Smoothing sigma for label-aware interpolation",
        long = "label-interpolation-sigma",
        default_value = "0.25mm"
    )]
    label_interpolation_sigma: String,

    #[arg(
        help = "Copy deformed atlas pairs next to the output (0 or 1)",
        long = "keep-deformed-atlases",
        default_value_t = 0,
        value_parser = clap::value_parser!(u8).range(0..=1)
    )]
    keep_deformed_atlases: u8,

    #[arg(
        help = "Rigid-stage search restarts: points, rotation sigma (deg), translation sigma (mm)",
        long = "rigid-search-params",
        num_args = 3,
        value_names = ["POINTS", "ROT_SIGMA", "TRANS_SIGMA"]
    )]
    rigid_search_params: Option<Vec<u32>>,

    #[arg(
        help = "Mask restricting the registration metric within the subject",
        long = "registration-mask"
    )]
    registration_mask: Option<PathBuf>,

    #[arg(
        help = "Thread count passed to the registration tool (default: NSLOTS env var, else 1)",
        long = "threads"
    )]
    threads: Option<usize>,

    #[arg(
        help = "Wrap every external invocation in the wall-clock timing utility (0 or 1)",
        long = "time",
        default_value_t = 0,
        value_parser = clap::value_parser!(u8).range(0..=1)
    )]
    time: u8,

    #[arg(
        help = "Voting method passed verbatim to the fusion tool",
        long = "voting-method",
        default_value = "Joint[0.1,2]"
    )]
    voting_method: String,

    #[arg(
        help = "Registration executable name or path",
        long = "registration-tool",
        default_value = pipeline::DEFAULT_REGISTRATION_TOOL
    )]
    registration_tool: String,

    #[arg(
        help = "Label-fusion executable name or path",
        long = "fusion-tool",
        default_value = pipeline::DEFAULT_FUSION_TOOL
    )]
    fusion_tool: String,
}

/// Default thread count from the scheduler-provided slot count, else 1.
fn default_threads() -> usize {
    std::env::var("NSLOTS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1)
}

impl From<Args> for PipelineConfig {
    fn from(args: Args) -> Self {
        let rigid_search = args.rigid_search_params.map(|p| RigidSearch {
            // clap enforces exactly 3 values
            points: p[0],
            rot_sigma_deg: p[1],
            trans_sigma_mm: p[2],
        });
        PipelineConfig {
            input_image: args.input_image,
            input_mask: args.input_mask,
            atlas_dir: args.atlas_dir,
            output_root: args.output_root,
            label_sigma: args.label_interpolation_sigma,
            keep_deformed: args.keep_deformed_atlases != 0,
            rigid_search,
            registration_mask: args.registration_mask,
            threads: args.threads.unwrap_or_else(default_threads),
            time: args.time != 0,
            voting_method: args.voting_method,
            registration_tool: args.registration_tool,
            fusion_tool: args.fusion_tool,
        }
    }
}

fn main() {
    let args = Args::parse();

    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(Level::INFO)
            .finish(),
    )
    .whatever_context("Could not set up global logging subscriber")
    .unwrap_or_else(|e: Whatever| {
        eprintln!("[ERROR] {}", Report::from_error(e));
    });

    let config = PipelineConfig::from(args);
    pipeline::run(&config).unwrap_or_else(|e| {
        error!("{}", Report::from_error(e));
        std::process::exit(-1);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec![
            "multiatlas-seg",
            "--input-image",
            "/data/subject.nii.gz",
            "--atlas-dir",
            "/data/atlases",
            "--output-root",
            "/out/subject_",
        ];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::from(parse(&[]));
        assert_eq!(config.label_sigma, "0.25mm");
        assert_eq!(config.voting_method, "Joint[0.1,2]");
        assert_eq!(config.registration_tool, "greedy");
        assert_eq!(config.fusion_tool, "label_fusion");
        assert!(!config.keep_deformed);
        assert!(!config.time);
        assert!(config.rigid_search.is_none());
        assert!(config.input_mask.is_none());
    }

    #[test]
    fn test_rigid_search_params() {
        let config = PipelineConfig::from(parse(&["--rigid-search-params", "100", "10", "5"]));
        assert_eq!(
            config.rigid_search,
            Some(RigidSearch {
                points: 100,
                rot_sigma_deg: 10,
                trans_sigma_mm: 5
            })
        );
    }

    #[test]
    fn test_rigid_search_params_require_three_values() {
        let result = Args::try_parse_from([
            "multiatlas-seg",
            "--input-image",
            "/data/subject.nii.gz",
            "--atlas-dir",
            "/data/atlases",
            "--output-root",
            "/out/subject_",
            "--rigid-search-params",
            "100",
            "10",
        ]);
        assert!(result.is_err());
    }

    #[rstest]
    #[case("0", false)]
    #[case("1", true)]
    fn test_keep_deformed_as_int(#[case] value: &str, #[case] expected: bool) {
        let config = PipelineConfig::from(parse(&["--keep-deformed-atlases", value]));
        assert_eq!(config.keep_deformed, expected);
    }

    #[test]
    fn test_output_path_from_root() {
        let config = PipelineConfig::from(parse(&[]));
        assert_eq!(
            config.output_path(),
            PathBuf::from("/out/subject_Labels.nii.gz")
        );
    }
}
