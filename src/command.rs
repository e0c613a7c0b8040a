//! The `diff` subcommand: flags in, exit status out.

use clap::Args;
use log::info;

use crate::acquire::{ImageAcquirer, PullMode};
use crate::backend::Backend;
use crate::context::Context;
use crate::engine::{DiffEngine, DiffOutcome};
use crate::error::{ComparisonError, ConfigurationError, Error, Result};
use crate::flags::{resolve_aliases, Flag, FlagSet};
use crate::options::OptionsBuilder;
use crate::outcome::ExecutionOutcome;
use crate::platform::{format_slice, parse_platform_flags, PlatformMatcher};

pub const DIFF_EXAMPLES: &str = "\
Examples:
  # Basic
  diffoci diff --semantic alpine:3.18.2 alpine:3.18.3

  # Dump conflicting files to ~/diff
  diffoci diff --semantic --report-dir=~/diff alpine:3.18.2 alpine:3.18.3";

#[derive(Args, Debug, Clone)]
#[command(after_help = DIFF_EXAMPLES)]
pub struct DiffArgs {
    #[arg(help = "First image (left side of the diff)")]
    pub image0: String,

    #[arg(help = "Second image (right side of the diff)")]
    pub image1: String,

    #[arg(long, help = "Ignore timestamps - Alias for --ignore-*-timestamps=true")]
    pub ignore_timestamps: bool,

    #[arg(long, help = "Ignore history")]
    pub ignore_history: bool,

    #[arg(long, help = "Ignore file order in tar layers")]
    pub ignore_file_order: bool,

    #[arg(long, help = "Ignore redundant bits of file mode")]
    pub ignore_file_mode_redundant_bits: bool,

    #[arg(long, help = "Ignore timestamps on files - Alias for --ignore-file-*time=true")]
    pub ignore_file_timestamps: bool,

    #[arg(long, help = "Ignore mtime timestamps on files")]
    pub ignore_file_mtime: bool,

    #[arg(long, help = "Ignore atime timestamps on files")]
    pub ignore_file_atime: bool,

    #[arg(long, help = "Ignore ctime timestamps on files")]
    pub ignore_file_ctime: bool,

    #[arg(long, help = "Ignore permissions on files")]
    pub extra_ignore_file_permissions: bool,

    #[arg(long, help = "Ignore file mode")]
    pub extra_ignore_file_mode: bool,

    #[arg(long, help = "Ignore the contents of files and compare their size only")]
    pub extra_ignore_file_content: bool,

    #[arg(long, help = "Ignore if different number of files are touched in the layers")]
    pub extra_ignore_layer_length_mismatch: bool,

    #[arg(long, value_delimiter = ',', help = "Ignore all diffs on specific files")]
    pub extra_ignore_files: Vec<String>,

    #[arg(long, help = "Ignore timestamps in image metadata")]
    pub ignore_image_timestamps: bool,

    #[arg(long, help = "Ignore image name annotation")]
    pub ignore_image_name: bool,

    #[arg(long, help = "Ignore tar format")]
    pub ignore_tar_format: bool,

    #[arg(long, help = "Treat leading `./` `/` `` in file paths as canonical")]
    pub treat_canonical_paths_equal: bool,

    #[arg(long, help = "[Recommended] Alias for --ignore-*=true --treat-canonical-paths-equal")]
    pub semantic: bool,

    #[arg(long, help = "Verbose output")]
    pub verbose: bool,

    #[arg(
        long,
        default_value = "",
        help = "Create a report file to the specified path (EXPERIMENTAL)"
    )]
    pub report_file: String,

    #[arg(
        long,
        default_value = "",
        help = "Create a detailed report in the specified directory"
    )]
    pub report_dir: String,

    #[arg(long, default_value = "missing", help = "Pull mode (always|missing|never)")]
    pub pull: String,

    #[arg(
        long,
        default_value_t = 1.0,
        help = "Scale factor for maximum values (e.g., maxTarBlobSize = 4GiB)"
    )]
    pub max_scale: f64,

    #[arg(
        long,
        value_delimiter = ',',
        help = "Platforms to compare, e.g. linux/amd64 (default: host platform)"
    )]
    pub platform: Vec<String>,
}

impl DiffArgs {
    /// The boolean flags as given, before alias expansion.
    pub fn raw_flags(&self) -> std::result::Result<FlagSet, ConfigurationError> {
        FlagSet::registered()
            .with(Flag::IgnoreTimestamps, self.ignore_timestamps)?
            .with(Flag::IgnoreHistory, self.ignore_history)?
            .with(Flag::IgnoreFileOrder, self.ignore_file_order)?
            .with(Flag::IgnoreFileModeRedundantBits, self.ignore_file_mode_redundant_bits)?
            .with(Flag::IgnoreFileTimestamps, self.ignore_file_timestamps)?
            .with(Flag::IgnoreFileMtime, self.ignore_file_mtime)?
            .with(Flag::IgnoreFileAtime, self.ignore_file_atime)?
            .with(Flag::IgnoreFileCtime, self.ignore_file_ctime)?
            .with(Flag::ExtraIgnoreFilePermissions, self.extra_ignore_file_permissions)?
            .with(Flag::ExtraIgnoreFileMode, self.extra_ignore_file_mode)?
            .with(Flag::ExtraIgnoreFileContent, self.extra_ignore_file_content)?
            .with(
                Flag::ExtraIgnoreLayerLengthMismatch,
                self.extra_ignore_layer_length_mismatch,
            )?
            .with(Flag::IgnoreImageTimestamps, self.ignore_image_timestamps)?
            .with(Flag::IgnoreImageName, self.ignore_image_name)?
            .with(Flag::IgnoreTarFormat, self.ignore_tar_format)?
            .with(Flag::TreatCanonicalPathsEqual, self.treat_canonical_paths_equal)?
            .with(Flag::Semantic, self.semantic)?
            .with(Flag::Verbose, self.verbose)
    }
}

/// Runs one comparison. Nothing is logged at error level here; that is left
/// to [`ExecutionOutcome::finish`].
pub fn run(
    ctx: &Context,
    args: &DiffArgs,
    backend: &dyn Backend,
    engine: &dyn DiffEngine,
) -> ExecutionOutcome {
    match compare(ctx, args, backend, engine) {
        Ok(outcome) => {
            let error = outcome.error.map(|e| match e {
                ComparisonError::Cancelled => Error::Cancelled,
                e => Error::Comparison(e),
            });
            ExecutionOutcome::classify(outcome.report.as_ref(), error)
        }
        Err(e) => ExecutionOutcome::Failed(e),
    }
}

fn compare(
    ctx: &Context,
    args: &DiffArgs,
    backend: &dyn Backend,
    engine: &dyn DiffEngine,
) -> Result<DiffOutcome> {
    let platforms = parse_platform_flags(&args.platform)?;
    info!("Target platforms: {}", format_slice(&platforms));
    let matcher = PlatformMatcher::any(platforms.clone())?;

    let flags = resolve_aliases(&args.raw_flags()?)?;
    let config = OptionsBuilder::new(&flags)
        .ignore_files(&args.extra_ignore_files)
        .report_file(&args.report_file)
        .report_dir(&args.report_dir)
        .max_scale(args.max_scale)
        .build()?;

    let mode: PullMode = args.pull.parse()?;
    let acquirer = ImageAcquirer::new(backend);
    let references = [args.image0.as_str(), args.image1.as_str()];
    let images = acquirer.acquire_pair(ctx, references, &platforms, mode)?;

    ctx.check()?;
    Ok(engine.diff(ctx, backend.content_store(), &images, &matcher, &config))
}
