//! This module is in charge of outputting the final analysis results to the
//! standard output and various files

use eyre::{Result, WrapErr};
use resfit::{
    curve::Curve,
    hist::Hist1D,
    numeric::{reals, Float},
    resolution::ExtractionRule,
};
use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::Path,
    time::Duration,
};
use time::{format_description, OffsetDateTime};

// Number of significant digits in file output
const SIG_DIGITS: usize = (reals::DIGITS - 1) as usize;

/// Everything a job produced
#[derive(Debug, Default)]
pub struct JobResults {
    /// Quantity extracted from the slice fits, if resolution curves were made
    pub rule: Option<ExtractionRule>,

    /// Resolution curves
    pub curves: Vec<Curve>,

    /// Resolution curves divided by a reference
    pub ratios: Vec<Curve>,

    /// Histogram templates
    pub templates: Vec<Hist1D>,

    /// Unbinned templates, as (table name, number of rows)
    pub tables: Vec<(String, usize)>,

    /// Templates whose selection matched nothing
    pub empty_templates: Vec<String>,
}
//
impl JobResults {
    /// Print out a summary on stdout
    pub fn print(&self) {
        if let Some(rule) = self.rule {
            println!("Resolution curves ({}) : {}", rule, self.curves.len());
            for (i, curve) in self.curves.iter().enumerate() {
                let ys = curve.ys().map(|y| format!("{:.4}", y)).collect::<Vec<_>>();
                println!("  curve {:>2} : {}", i, ys.join(" "));
            }
        }
        for hist in &self.templates {
            println!("Template {:<20} : integral {:.4}", hist.name(), hist.integral());
        }
        for (name, rows) in &self.tables {
            println!("Unbinned {:<20} : {} rows", name, rows);
        }
        for name in &self.empty_templates {
            println!("Template {:<20} : no entry passed the selection", name);
        }
    }
}

/// Output the job results to the console and to disk
pub fn dump_results(output_dir: &Path, results: &JobResults, elapsed_time: Duration) -> Result<()> {
    results.print();
    fs::create_dir_all(output_dir)
        .wrap_err_with(|| format!("Could not create {}", output_dir.display()))?;

    // Compute a timestamp of when the run ended
    let format = format_description::parse(
        "[day]-[month repr:short]-[year repr:last_two]   [hour]:[minute]:[second]",
    )?;
    let timestamp = OffsetDateTime::now_utc().format(&format)?;

    // Write execution timings to a file
    {
        let mut tim_file = BufWriter::new(File::create(output_dir.join("res.times"))?);
        let tim_file = &mut tim_file;
        writeln_3p(tim_file, &timestamp[..])?;
        let elapsed_secs = elapsed_time.as_secs_f64() as Float;
        writeln_3p(tim_file, "---------------------------------------------")?;
        writeln_3p(tim_file, ("Elapsed time (s)", elapsed_secs))?;
        writeln_3p(tim_file, ("Resolution curves", results.curves.len()))?;
        writeln_3p(tim_file, ("Templates", results.templates.len() + results.tables.len()))?;
    }

    if !results.curves.is_empty() {
        let mut dat_file = BufWriter::new(File::create(output_dir.join("resolution.dat"))?);
        if let Some(rule) = results.rule {
            writeln_3p(&mut dat_file, ("Extraction rule", &rule.to_string()[..]))?;
        }
        write_curves(&mut dat_file, &results.curves)?;
    }

    if !results.ratios.is_empty() {
        let mut dat_file = BufWriter::new(File::create(output_dir.join("ratios.dat"))?);
        write_curves(&mut dat_file, &results.ratios)?;
    }

    if !results.templates.is_empty() || !results.tables.is_empty() {
        let mut dat_file = BufWriter::new(File::create(output_dir.join("templates.dat"))?);
        let dat_file = &mut dat_file;
        for hist in &results.templates {
            writeln_3p(dat_file, ("Template", hist.name()))?;
            writeln_3p(dat_file, ("Integral", hist.integral()))?;
            for (center, content, error) in hist.bins() {
                write_columns(dat_file, &[center, content, error])?;
            }
            writeln!(dat_file)?;
        }
        for (name, rows) in &results.tables {
            writeln_3p(dat_file, ("Unbinned template", &name[..]))?;
            writeln_3p(dat_file, ("Rows", *rows))?;
        }
    }

    Ok(())
}

/// Write curves as blocks of (x, y, y error) lines
fn write_curves(writer: &mut impl Write, curves: &[Curve]) -> io::Result<()> {
    for (i, curve) in curves.iter().enumerate() {
        writeln_3p(writer, "---------------------------------------------")?;
        writeln_3p(writer, ("Curve", i))?;
        for p in curve.points() {
            write_columns(writer, &[p.x, p.y, p.ey])?;
        }
    }
    Ok(())
}

/// Write one line of fixed-width scientific notation columns
fn write_columns(writer: &mut impl Write, values: &[Float]) -> io::Result<()> {
    let decimals = (SIG_DIGITS - 1).min(7);
    for value in values {
        write!(
            writer,
            "{:>width$.decs$e}",
            value,
            width = decimals + 8,
            decs = decimals
        )?;
    }
    writeln!(writer)
}

/// Text output facility with a leading space and fixed-size key columns
fn writeln_3p(writer: &mut impl Write, data: impl Write3p) -> io::Result<()> {
    write!(writer, " ")?;
    data.write(writer)?;
    writeln!(writer)
}

/// Trait implemented by things which can be written in result files
trait Write3p: Sized {
    /// Write down `self` to the output using result file style
    fn write(self, writer: &mut impl Write) -> io::Result<()>;
}

impl Write3p for &str {
    // Strings work in the usual way
    fn write(self, writer: &mut impl Write) -> io::Result<()> {
        write!(writer, "{}", self)
    }
}

impl Write3p for usize {
    // Integers work in the usual way too
    fn write(self, writer: &mut impl Write) -> io::Result<()> {
        write!(writer, "{}", self)
    }
}

impl Write3p for Float {
    // %g-like output for floats
    fn write(self, writer: &mut impl Write) -> io::Result<()> {
        write_engineering(writer, self, SIG_DIGITS)
    }
}

impl<T: Write3p> Write3p for (&str, T) {
    // Key-value output that uses fixed-size columns for better readability
    fn write(self, writer: &mut impl Write) -> io::Result<()> {
        write!(writer, "{:<31}: ", self.0)?;
        self.1.write(writer)
    }
}

/// Write a floating-point number using "engineering" notation
///
/// Analogous to the %g format of the C printf function, this method switches
/// between naive and scientific notation for floating-point numbers when the
/// number being printed becomes so small that printing leading zeroes could end
/// up larger than the scientific notation, or so large that we would be forced
/// to print more significant digits than requested.
///
fn write_engineering(writer: &mut impl Write, x: Float, sig_digits: usize) -> io::Result<()> {
    if x == 0. {
        // Zero is special because you can't take its log
        return write!(writer, "0");
    }
    let mut precision = sig_digits - 1;
    let log_x = x.abs().log10();
    if !(-3. ..=(sig_digits as Float)).contains(&log_x) {
        return write!(writer, "{:.1$e}", x, precision);
    }

    // Rust's precision controls the number of digits after the decimal point,
    // so it must be adjusted to keep a constant number of significant digits.
    // Numbers smaller than 1 get one extra digit since the leading zero does
    // not count as significant.
    precision = (precision as isize - log_x.trunc() as isize).max(0) as usize;
    if log_x < 0. {
        precision += 1
    }

    // No trailing zeros or decimal point in naive notation
    let str_with_zeros = format!("{:.1$}", x, precision);
    if str_with_zeros.contains('.') {
        write!(
            writer,
            "{}",
            str_with_zeros.trim_end_matches('0').trim_end_matches('.')
        )
    } else {
        write!(writer, "{}", str_with_zeros)
    }
}
