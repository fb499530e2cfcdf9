//! Command-line interface components.

use crate::config::StarConfig;
use crate::models::{MergeKey, TableSummary, TransformOptions, Translation};
use crate::{
    operations, parse_star, parse_star_str, smart_merge, transform_star_in_place, write_star,
};
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use colored::*;
use nalgebra::DMatrix;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "star")]
#[command(about = "Inspect, merge and transform RELION STAR metadata")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// TOML file with parse, write and merge options
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print record count, columns and key groups of a STAR file
    Info {
        /// STAR file, or `-` for standard input
        input: PathBuf,
    },

    /// Join columns of SECONDARY onto PRIMARY
    Merge {
        primary: PathBuf,
        secondary: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Columns to take from SECONDARY (default: all of them)
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,

        /// Key columns in SECONDARY (default: inferred)
        #[arg(long, value_delimiter = ',')]
        key: Vec<String>,

        /// Key columns in PRIMARY when they differ from --key
        #[arg(long, value_delimiter = ',', requires = "key")]
        left_key: Vec<String>,

        /// Share of PRIMARY records that must match an inferred key
        #[arg(long)]
        threshold: Option<f64>,

        /// Let the last duplicate key in SECONDARY win instead of failing
        #[arg(long)]
        last_wins: bool,
    },

    /// Rotate orientations and shift origins of every particle
    Transform {
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Row-major 3x3 rotation, or 3x4 with the translation last in each row
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true, required = true)]
        rotation: Vec<f64>,

        /// Translation vector x,y,z in pixels
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true, conflicts_with = "distance")]
        translation: Option<Vec<f64>>,

        /// Shift along each particle's rotated Z axis, in pixels
        #[arg(long, allow_hyphen_values = true)]
        distance: Option<f64>,

        /// Apply the inverse transform
        #[arg(long)]
        invert: bool,

        /// Keep the original angles and only shift origins
        #[arg(long)]
        no_rotate: bool,

        /// Move defocus with the Z shift
        #[arg(long)]
        adjust_defocus: bool,
    },

    /// Apply table operations in a fixed order: selection, recentering,
    /// scaling, hand inversion, micrograph path replacement
    Ops {
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Keep only these classes
        #[arg(long, value_delimiter = ',')]
        classes: Vec<f64>,

        /// Keep particles classified identically in every subset
        #[arg(long)]
        all_same_class: bool,

        /// Move rounded origins into the coordinates
        #[arg(long, conflicts_with_all = ["recenter_modf", "zero_origins"])]
        recenter: bool,

        /// Move truncated origins into the coordinates
        #[arg(long, conflicts_with = "zero_origins")]
        recenter_modf: bool,

        /// Move the whole origin into the coordinates
        #[arg(long)]
        zero_origins: bool,

        #[arg(long)]
        scale_coords: Option<f64>,

        #[arg(long)]
        scale_origins: Option<f64>,

        #[arg(long)]
        scale_mag: Option<f64>,

        #[arg(long)]
        invert_hand: bool,

        /// Directory to point micrograph names at
        #[arg(long)]
        micrograph_dir: Option<String>,
    },

    /// Write one STAR file per micrograph
    Split {
        input: PathBuf,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
    },
}

impl Args {
    /// Log level from the verbose flag
    pub fn get_log_level(&self) -> &'static str {
        if self.verbose { "debug" } else { "info" }
    }

    /// Configuration from `--config`, or the defaults
    pub fn load_config(&self) -> Result<StarConfig> {
        match &self.config {
            Some(path) => StarConfig::from_toml_file(path)
                .with_context(|| format!("Failed to load configuration {}", path.display())),
            None => Ok(StarConfig::default()),
        }
    }
}

/// Set up structured logging on stderr
pub fn setup_logging(args: &Args) {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let log_level = args.get_log_level();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("star_processor={}", log_level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_level(true)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .init();

    debug!("Logging initialized at level: {}", log_level);
}

/// Run the selected subcommand
pub fn run(args: Args) -> Result<()> {
    let config = args.load_config()?;

    match args.command {
        Command::Info { input } => run_info(&input, &config),
        Command::Merge {
            primary,
            secondary,
            output,
            fields,
            key,
            left_key,
            threshold,
            last_wins,
        } => {
            let mut merge = config.merge.clone();
            if let Some(threshold) = threshold {
                merge = merge.with_threshold(threshold);
            }
            if last_wins {
                merge = merge.with_last_wins();
            }
            let config = config.clone().with_merge(merge);
            config.validate()?;

            let primary_df = read(&primary, &config)?;
            let secondary_df = read(&secondary, &config)?;

            let fields: Vec<String> = if fields.is_empty() {
                crate::frame::column_names(&secondary_df)
            } else {
                fields
            };
            let field_refs: Vec<&str> = fields.iter().map(String::as_str).collect();
            let key = (!key.is_empty()).then(|| MergeKey::compound(key));
            let left_key = (!left_key.is_empty()).then(|| MergeKey::compound(left_key));

            let merged = smart_merge(
                &primary_df,
                &secondary_df,
                &field_refs,
                key.as_ref(),
                left_key.as_ref(),
                &config.merge,
            )?;
            let path = write_star(&output, &merged, &config.write)?;
            report_written(&path, merged.height());
            Ok(())
        }
        Command::Transform {
            input,
            output,
            rotation,
            translation,
            distance,
            invert,
            no_rotate,
            adjust_defocus,
        } => {
            let matrix = match rotation.len() {
                9 => DMatrix::from_row_slice(3, 3, &rotation),
                12 => DMatrix::from_row_slice(3, 4, &rotation),
                n => bail!("--rotation needs 9 or 12 values, got {}", n),
            };

            let mut options = TransformOptions::default();
            if let Some(v) = translation {
                if v.len() != 3 {
                    bail!("--translation needs 3 values, got {}", v.len());
                }
                options = options.with_translation(Translation::Vector([v[0], v[1], v[2]]));
            }
            if let Some(d) = distance {
                options = options.with_translation(Translation::Scalar(d));
            }
            if invert {
                options = options.inverted();
            }
            if no_rotate {
                options = options.without_rotation();
            }
            if adjust_defocus {
                options = options.with_defocus_adjustment();
            }

            let mut df = read(&input, &config)?;
            transform_star_in_place(&mut df, &matrix, &options, None)?;
            let path = write_star(&output, &df, &config.write)?;
            report_written(&path, df.height());
            Ok(())
        }
        Command::Ops {
            input,
            output,
            classes,
            all_same_class,
            recenter,
            recenter_modf,
            zero_origins,
            scale_coords,
            scale_origins,
            scale_mag,
            invert_hand,
            micrograph_dir,
        } => {
            let mut df = read(&input, &config)?;

            if !classes.is_empty() {
                df = operations::select_classes(&df, &classes)?;
            }
            if all_same_class {
                df = operations::all_same_class(&df)?;
            }
            if recenter {
                operations::recenter_in_place(&mut df)?;
            }
            if recenter_modf {
                operations::recenter_modf_in_place(&mut df)?;
            }
            if zero_origins {
                operations::zero_origins_in_place(&mut df)?;
            }
            if let Some(factor) = scale_coords {
                operations::scale_coordinates_in_place(&mut df, factor)?;
            }
            if let Some(factor) = scale_origins {
                operations::scale_origins_in_place(&mut df, factor)?;
            }
            if let Some(factor) = scale_mag {
                operations::scale_magnification_in_place(&mut df, factor)?;
            }
            if invert_hand {
                operations::invert_hand_in_place(&mut df)?;
            }
            if let Some(dir) = micrograph_dir {
                operations::replace_micrograph_path_in_place(&mut df, &dir)?;
            }

            let path = write_star(&output, &df, &config.write)?;
            report_written(&path, df.height());
            Ok(())
        }
        Command::Split { input, output } => run_split(&input, &output, &config),
    }
}

/// Parse `path`, or standard input when it is `-`
fn read(path: &Path, config: &StarConfig) -> Result<polars::prelude::DataFrame> {
    if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read standard input")?;
        return Ok(parse_star_str(&text, "<stdin>", &config.parse)?);
    }
    parse_star(path, &config.parse).with_context(|| format!("Failed to read {}", path.display()))
}

fn run_info(input: &Path, config: &StarConfig) -> Result<()> {
    let df = read(input, config)?;
    let summary = operations::summarize(&df)?;
    print_summary(input, &summary);
    Ok(())
}

fn run_split(input: &Path, output: &Path, config: &StarConfig) -> Result<()> {
    let df = read(input, config)?;
    let parts = operations::split_micrographs(&df)?;
    std::fs::create_dir_all(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;

    for (micrograph, part) in &parts {
        let base = crate::models::basename(micrograph);
        let stem = Path::new(base)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| base.to_string());
        let path = write_star(&output.join(stem), part, &config.write)?;
        debug!("{} -> {}", micrograph, path.display());
    }
    info!("Split {} records into {} files", df.height(), parts.len());
    println!(
        "{} {} micrographs to {}",
        "Split".bright_green().bold(),
        parts.len().to_string().bright_yellow(),
        output.display().to_string().bright_cyan()
    );
    Ok(())
}

fn report_written(path: &Path, records: usize) {
    println!(
        "{} {} records to {}",
        "Wrote".bright_green().bold(),
        records.to_string().bright_yellow(),
        path.display().to_string().bright_cyan()
    );
}

fn print_summary(input: &Path, summary: &TableSummary) {
    println!("{}", input.display().to_string().bright_cyan().bold());
    let kind = if summary.particles { "particles" } else { "micrographs" };
    println!(
        "  {} {} ({})",
        "Records:".bright_white(),
        summary.records.to_string().bright_yellow(),
        kind
    );
    println!(
        "  {} {}",
        "Micrographs:".bright_white(),
        summary.micrographs.to_string().bright_yellow()
    );
    if summary.classes > 0 {
        println!(
            "  {} {}",
            "Classes:".bright_white(),
            summary.classes.to_string().bright_yellow()
        );
    }
    if let Some(apix) = summary.pixel_size {
        println!("  {} {:.4} A", "Pixel size:".bright_white(), apix);
    }
    println!("  {}", "Columns:".bright_white());
    for name in &summary.columns {
        let group = group_label(name);
        match group {
            Some(group) => println!("    {} {}", name, format!("({})", group).bright_black()),
            None => println!("    {}", name),
        }
    }
}

/// Name of the key column group a field belongs to
fn group_label(name: &str) -> Option<&'static str> {
    use crate::constants::{is_derived_field, relion};

    if is_derived_field(name) {
        Some("derived")
    } else if relion::ANGLES.contains(&name) || relion::ORIGINS3D.contains(&name) {
        Some("alignment")
    } else if relion::COORDS.contains(&name) {
        Some("coordinates")
    } else if relion::CTF_PARAMS.contains(&name) {
        Some("ctf")
    } else if relion::MICROSCOPE_PARAMS.contains(&name) {
        Some("microscope")
    } else {
        None
    }
}
