//! resfit: tag-and-probe templates and resolution curves from skimmed trees
//!
//!
//! # What it does
//!
//! A job file lists tree files and the products to be made out of them:
//!
//! * Binned templates: histograms of the invariant mass of the tag-and-probe
//!   pairs of one skim category passing a selection, weighted per event, with
//!   negative bins cleared.
//! * Unbinned templates: the same pairs recorded as (mass, weight) rows of a
//!   table in a JSON scratch file, for later unbinned likelihood fits.
//! * Resolution curves: a 2-D residual distribution is sliced along its x
//!   axis, every slice is fitted with a double Gaussian seeded by a single
//!   Gaussian fit, and one number per slice is extracted into a curve.
//!
//! Results are printed, written to text files in the output directory, and
//! optionally drawn as pictures.
//!
//!
//! # Running
//!
//! `resfit [job file]`, where the job file defaults to `resfit.job`. Log
//! verbosity is controlled through the `RUST_LOG` environment variable and
//! defaults to `info`.

#![warn(missing_docs)]

mod config;
mod output;

use crate::{
    config::{Configuration, ResolutionJob},
    output::JobResults,
};
use clap::{Parser, ValueHint};
use eyre::{eyre, Result, WrapErr};
use resfit::{
    render::{self, Canvas, CurveStyle},
    resolution::{ExtractionRule, ResolutionPlotter},
    scratch::ScratchFile,
    template::{TemplateGenerator, TREE_NAME},
    tree::Chain,
};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Instant,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Job file used when none is given on the command line
const DEFAULT_JOB: &str = "resfit.job";

#[derive(Parser, Debug)]
#[command(author, version, about = "Tag-and-probe templates and resolution curves", long_about = None)]
struct Cli {
    /// Job file listing inputs and the products to make out of them
    #[arg(default_value = DEFAULT_JOB, value_hint = ValueHint::FilePath)]
    job: PathBuf,
}

fn main() -> Result<()> {
    // ### LOGGING SETUP ###

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // ### CONFIGURATION READOUT ###

    let cli = Cli::parse();
    let cfg = Configuration::load(&cli.job).wrap_err("Failed to load the configuration")?;

    // The clock starts after configuration I/O, tree loading is part of the
    // measured work
    let saved_time = Instant::now();

    // ### JOB EXECUTION ###

    let mut results = JobResults::default();
    make_templates(&cfg, &mut results).wrap_err("Failed to make templates")?;
    if let Some(job) = &cfg.resolution {
        make_resolution_curves(&cfg.output_dir, job, &mut results)
            .wrap_err("Failed to make resolution curves")?;
    }

    // ### RESULTS DISPLAY AND STORAGE ###

    let elapsed_time = saved_time.elapsed();
    output::dump_results(&cfg.output_dir, &results, elapsed_time)
        .wrap_err("Failed to output the results")?;
    Ok(())
}

/// Build every binned and unbinned template of the job
fn make_templates(cfg: &Configuration, results: &mut JobResults) -> Result<()> {
    if cfg.templates.is_empty() {
        return Ok(());
    }

    let mut generator = TemplateGenerator::new();
    for (skim, path) in &cfg.inputs {
        generator
            .add_input(*skim, path)
            .wrap_err_with(|| format!("Could not read {} input {}", skim, path.display()))?;
    }

    // Only touch the scratch file if some template needs it, and start it
    // afresh so that tables of earlier runs do not linger
    let mut scratch = if cfg.templates.iter().any(|t| t.unbinned) {
        Some(ScratchFile::create(&cfg.scratch_path)?)
    } else {
        None
    };

    for job in &cfg.templates {
        generator.set_template_binning(job.variable, job.binning);
        let made = if let Some(scratch) = scratch.as_mut().filter(|_| job.unbinned) {
            let table = generator.make_unbinned_template(
                scratch,
                job.skim,
                &job.name,
                &job.expr,
                job.variable,
            )?;
            match table {
                Some(table) => {
                    results.tables.push((job.name.clone(), table.len()));
                    true
                }
                None => false,
            }
        } else {
            match generator.make_template(job.skim, &job.name, &job.expr, job.variable)? {
                Some(hist) => {
                    results.templates.push(hist);
                    true
                }
                None => false,
            }
        };
        if !made {
            results.empty_templates.push(job.name.clone());
        }
    }
    Ok(())
}

/// Fit the resolution curves of the job, their ratios, and draw them
fn make_resolution_curves(
    output_dir: &Path,
    job: &ResolutionJob,
    results: &mut JobResults,
) -> Result<()> {
    let chains = job
        .sources
        .iter()
        .map(|path| {
            let mut chain = Chain::new(TREE_NAME);
            chain
                .add(path)
                .wrap_err_with(|| format!("Could not read {}", path.display()))?;
            Ok(chain)
        })
        .collect::<Result<Vec<_>>>()?;

    let mut plotter = ResolutionPlotter::new();
    for chain in &chains {
        plotter.add_source(chain);
    }
    for cut in &job.cuts {
        plotter.add_cut(cut);
    }
    for expr in &job.exprs_y {
        plotter.add_expr(expr);
    }
    for expr in &job.exprs_x {
        plotter.add_expr_x(expr);
    }
    for &(param, low, high) in &job.limits {
        plotter.set_parameter_limits(param, low, high);
    }
    plotter.set_include_error_bars(job.error_bars.unwrap_or(true));
    if job.dump_fits {
        fs::create_dir_all(output_dir)?;
        plotter.set_dump_fits(Some(output_dir.to_owned()));
    }

    let binning = job
        .binning
        .ok_or_else(|| eyre!("Resolution curves need a binning"))?;
    let rule = job.rule.unwrap_or(ExtractionRule::NarrowSigma);
    let curves = plotter.make_fit_graphs(binning, rule)?;
    if job.dump_fits {
        info!("{} slice fits dumped", plotter.num_fit_dumps());
    }
    let ratios = match job.ratio {
        Some((value, error)) => plotter.ratio_to_point(&curves, value, error)?,
        None => Vec::new(),
    };

    if let Some(canvas_job) = &job.canvas {
        fs::create_dir_all(output_dir)?;
        let styles = (0..curves.len())
            .map(|i| match job.legend.get(i) {
                Some(label) => CurveStyle::nth(i, label),
                None => CurveStyle::nth(i, &format!("curve {}", i)),
            })
            .collect::<Vec<_>>();
        let x_label = job.exprs_x.first().cloned().unwrap_or_default();
        let mut canvas = Canvas {
            title: job.title.clone(),
            x_label,
            y_label: rule.to_string(),
            y_range: Some((canvas_job.y_min as f64, canvas_job.y_max as f64)),
            log_y: canvas_job.log_y,
        };
        let base = output_dir.join(&canvas_job.file_base);
        render::draw_curves(&base, &curves, &styles, &canvas)?;

        if !ratios.is_empty() {
            canvas.y_label = format!("{} ratio", rule);
            canvas.y_range = None;
            canvas.log_y = false;
            let base = output_dir.join(format!("{}_ratio", canvas_job.file_base));
            render::draw_curves(&base, &ratios, &styles, &canvas)?;
        }
    }

    results.rule = Some(rule);
    results.curves = curves;
    results.ratios = ratios;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_file_argument() {
        let cli = Cli::try_parse_from(["resfit"]).unwrap();
        assert_eq!(cli.job, PathBuf::from(DEFAULT_JOB));
        let cli = Cli::try_parse_from(["resfit", "zee.job"]).unwrap();
        assert_eq!(cli.job, PathBuf::from("zee.job"));
        assert!(Cli::try_parse_from(["resfit", "a.job", "b.job"]).is_err());
    }
}
