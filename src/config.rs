//! Mechanism for loading and checking the job configuration

use eyre::{bail, ensure, eyre, Result, WrapErr};
use resfit::{
    fit::{DoubleGaussian, Model},
    numeric::Float,
    resolution::{ExtractionRule, ResolutionBinning},
    template::{Binning, SkimType, TemplateGenerator, Variable},
};
use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
    str::FromStr,
};

/// One template to be built
#[derive(Clone, Debug, PartialEq)]
pub struct TemplateJob {
    /// Skim category to read from
    pub skim: SkimType,

    /// Name of the output histogram or table
    pub name: String,

    /// Tracked variable
    pub variable: Variable,

    /// Pair selection
    pub expr: String,

    /// Binning in effect when the template was requested
    pub binning: Binning,

    /// Whether a scratch table is built instead of a histogram
    pub unbinned: bool,
}

/// Picture of the resolution curves
#[derive(Clone, Debug, PartialEq)]
pub struct CanvasJob {
    /// Output file name, without extension
    pub file_base: String,

    /// Vertical range
    pub y_min: Float,
    /// Vertical range
    pub y_max: Float,

    /// Logarithmic vertical axis
    pub log_y: bool,
}

/// Resolution curves to be extracted
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResolutionJob {
    /// Tree files, one per curve (or a single shared one)
    pub sources: Vec<PathBuf>,

    /// Per-curve cuts
    pub cuts: Vec<String>,

    /// Per-curve x expressions
    pub exprs_x: Vec<String>,

    /// Per-curve y expressions
    pub exprs_y: Vec<String>,

    /// Binning of the (x, y) distributions
    pub binning: Option<ResolutionBinning>,

    /// Quantity reported for each x slice
    pub rule: Option<ExtractionRule>,

    /// Limits on double Gaussian parameters
    pub limits: Vec<(usize, Float, Float)>,

    /// Whether curves carry error bars (None means yes)
    pub error_bars: Option<bool>,

    /// Whether slice fits are dumped as pictures
    pub dump_fits: bool,

    /// Reference (value, error) the curves are divided by
    pub ratio: Option<(Float, Float)>,

    /// Picture of the curves
    pub canvas: Option<CanvasJob>,

    /// Canvas title
    pub title: String,

    /// Legend entries, one per curve
    pub legend: Vec<String>,
}

/// Job configuration
#[derive(Clone, Debug, PartialEq)]
pub struct Configuration {
    /// Directory where results are written
    pub output_dir: PathBuf,

    /// Scratch file for unbinned templates
    pub scratch_path: PathBuf,

    /// Template inputs, in order of declaration
    pub inputs: Vec<(SkimType, PathBuf)>,

    /// Templates, in order of declaration
    pub templates: Vec<TemplateJob>,

    /// Resolution study, if any resolution directive was given
    pub resolution: Option<ResolutionJob>,
}
//
impl Configuration {
    /// Load the configuration from a file, check it, and print it out
    pub fn load(file_name: impl AsRef<Path>) -> Result<Self> {
        let file_name = file_name.as_ref();
        let config_str = {
            let mut config_file = File::open(file_name)
                .wrap_err_with(|| format!("Could not open job file {}", file_name.display()))?;
            let mut buffer = String::new();
            config_file.read_to_string(&mut buffer)?;
            buffer
        };
        let config = Self::parse(&config_str)?;
        config.print();
        Ok(config)
    }

    /// Decode the contents of a job file
    pub fn parse(config_str: &str) -> Result<Self> {
        let mut config = Configuration {
            output_dir: PathBuf::from("."),
            scratch_path: PathBuf::from(resfit::scratch::ScratchFile::DEFAULT_PATH),
            inputs: Vec::new(),
            templates: Vec::new(),
            resolution: None,
        };

        // Binnings evolve as directives are read, each template captures the
        // binning in effect when it is declared
        let defaults = TemplateGenerator::new();
        let mut binnings = Variable::ALL.map(|v| (v, defaults.binning(v)));

        // Directives are the first whitespace-separated chunk of each line,
        // blank lines and comments are ignored
        for (line_number, line) in config_str.lines().enumerate() {
            let line = line.split('#').next().unwrap_or_default();
            let mut tokens = line.split_whitespace();
            let Some(directive) = tokens.next() else {
                continue;
            };
            let args = tokens.collect::<Vec<_>>();
            config
                .apply(directive, &args, &mut binnings)
                .wrap_err_with(|| format!("Bad directive on line {}", line_number + 1))?;
        }

        config.check()?;
        Ok(config)
    }

    fn resolution(&mut self) -> &mut ResolutionJob {
        self.resolution.get_or_insert_with(ResolutionJob::default)
    }

    /// Apply one directive
    fn apply(
        &mut self,
        directive: &str,
        args: &[&str],
        binnings: &mut [(Variable, Binning)],
    ) -> Result<()> {
        match directive {
            "output" => {
                let [dir] = items::<1>("output", args)?;
                self.output_dir = PathBuf::from(dir.data);
            }
            "scratch" => {
                let [path] = items::<1>("scratch", args)?;
                self.scratch_path = PathBuf::from(path.data);
            }
            "input" => {
                let [skim, path] = items::<2>("input", args)?;
                self.inputs.push((skim.parse()?, PathBuf::from(path.data)));
            }
            "binning" => {
                let [variable, n_bins, min, max] = items::<4>("binning", args)?;
                let variable = variable.parse::<Variable>()?;
                let binning = Binning::new(n_bins.parse()?, min.parse()?, max.parse()?)?;
                for entry in binnings.iter_mut().filter(|(v, _)| *v == variable) {
                    entry.1 = binning;
                }
            }
            "template" | "unbinned" => {
                let unbinned = directive == "unbinned";
                let tag = if unbinned { "unbinned" } else { "template" };
                let (head, expr) = split_expr::<3>(tag, args)?;
                let [skim, name, variable] = head;
                let variable = variable.parse::<Variable>()?;
                let binning = binnings
                    .iter()
                    .find(|(v, _)| *v == variable)
                    .map(|&(_, b)| b)
                    .ok_or_else(|| eyre!("No binning for variable {}", variable))?;
                self.templates.push(TemplateJob {
                    skim: skim.parse()?,
                    name: name.data.to_owned(),
                    variable,
                    expr,
                    binning,
                    unbinned,
                });
            }
            "res.source" => {
                let [path] = items::<1>("res.source", args)?;
                self.resolution().sources.push(PathBuf::from(path.data));
            }
            "res.cut" => self.resolution().cuts.push(args.join(" ")),
            "res.x" => self.resolution().exprs_x.push(args.join(" ")),
            "res.y" => self.resolution().exprs_y.push(args.join(" ")),
            "res.binning" => {
                let [nx, x_min, x_max, ny, y_min, y_max] = items::<6>("res.binning", args)?;
                self.resolution().binning = Some(ResolutionBinning {
                    n_bins_x: nx.parse()?,
                    x_min: x_min.parse()?,
                    x_max: x_max.parse()?,
                    n_bins_y: ny.parse()?,
                    y_min: y_min.parse()?,
                    y_max: y_max.parse()?,
                });
            }
            "res.rule" => {
                let [rule] = items::<1>("res.rule", args)?;
                self.resolution().rule = Some(rule.parse()?);
            }
            "res.limit" => {
                let [param, low, high] = items::<3>("res.limit", args)?;
                let param = param.parse::<usize>()?;
                ensure!(
                    param < DoubleGaussian.n_params(),
                    "Parameter {} does not exist, parameters are {:?}",
                    param,
                    DoubleGaussian.param_names()
                );
                let limit = (param, low.parse()?, high.parse()?);
                self.resolution().limits.push(limit);
            }
            "res.errors" => {
                let [flag] = items::<1>("res.errors", args)?;
                self.resolution().error_bars = Some(flag.parse_bool()?);
            }
            "res.dump" => {
                let [flag] = items::<1>("res.dump", args)?;
                self.resolution().dump_fits = flag.parse_bool()?;
            }
            "res.ratio" => {
                let [value, error] = items::<2>("res.ratio", args)?;
                self.resolution().ratio = Some((value.parse()?, error.parse()?));
            }
            "res.canvas" => {
                let [file_base, y_min, y_max, log_y] = items::<4>("res.canvas", args)?;
                self.resolution().canvas = Some(CanvasJob {
                    file_base: file_base.data.to_owned(),
                    y_min: y_min.parse()?,
                    y_max: y_max.parse()?,
                    log_y: log_y.parse_bool()?,
                });
            }
            "res.title" => self.resolution().title = args.join(" "),
            "res.legend" => self.resolution().legend.push(args.join(" ")),
            other => bail!("Unknown directive '{}'", other),
        }
        Ok(())
    }

    /// Check the consistency of the whole configuration
    fn check(&self) -> Result<()> {
        for template in &self.templates {
            ensure!(
                self.inputs.iter().any(|(skim, _)| *skim == template.skim),
                "Template {} reads skim {}, which has no input",
                template.name,
                template.skim
            );
        }
        if let Some(res) = &self.resolution {
            ensure!(
                res.binning.is_some(),
                "Resolution curves need a res.binning directive"
            );
            ensure!(
                !res.sources.is_empty(),
                "Resolution curves need at least one res.source directive"
            );
            if let Some(canvas) = &res.canvas {
                ensure!(
                    canvas.y_max > canvas.y_min,
                    "Canvas vertical range must not be empty"
                );
            }
        }
        Ok(())
    }

    /// Display the configuration
    pub fn print(&self) {
        println!("OUTPUT         : {}", self.output_dir.display());
        println!("SCRATCH        : {}", self.scratch_path.display());
        for (skim, path) in &self.inputs {
            println!("INPUT {:<8} : {}", skim, path.display());
        }
        for t in &self.templates {
            let kind = if t.unbinned { "UNBINNED" } else { "TEMPLATE" };
            println!(
                "{:<8} {:<5} : {} [{} bins in {}..{} of {}] {}",
                kind,
                t.skim,
                t.name,
                t.binning.n_bins(),
                t.binning.min(),
                t.binning.max(),
                t.variable,
                t.expr
            );
        }
        if let Some(res) = &self.resolution {
            println!("RES.SOURCES    : {}", res.sources.len());
            println!("RES.CUTS       : {:?}", res.cuts);
            println!("RES.X          : {:?}", res.exprs_x);
            println!("RES.Y          : {:?}", res.exprs_y);
            if let Some(b) = &res.binning {
                println!(
                    "RES.BINNING    : {} x [{}, {}], {} y [{}, {}]",
                    b.n_bins_x, b.x_min, b.x_max, b.n_bins_y, b.y_min, b.y_max
                );
            }
            let rule = res.rule.unwrap_or(ExtractionRule::NarrowSigma);
            println!("RES.RULE       : {}", rule);
            println!("RES.ERRORS     : {}", res.error_bars.unwrap_or(true));
            println!("RES.DUMP       : {}", res.dump_fits);
        }
    }
}

/// A value from the configuration file, tagged with the directive which it
/// belongs to for error reporting purposes.
struct ConfigItem<'data> {
    name: &'static str,
    data: &'data str,
}
//
impl<'data> ConfigItem<'data> {
    /// Build a config item from a directive tag and raw data
    fn new(name: &'static str, data: &'data str) -> Self {
        Self { name, data }
    }

    /// Parse this data using Rust's standard parsing logic
    fn parse<T: FromStr>(self) -> Result<T>
    where
        <T as FromStr>::Err: ::std::error::Error + Send + Sync + 'static,
    {
        self.data
            .parse::<T>()
            .wrap_err_with(|| format!("Could not parse '{}' in {}", self.data, self.name))
    }

    /// Parse this data using special logic which handles Fortran's bool syntax
    fn parse_bool(self) -> Result<bool> {
        match self.data.to_lowercase().as_str() {
            // Handle FORTRAN booleans as a special case
            ".true." => Ok(true),
            ".false." => Ok(false),
            // Delegate other booleans to the standard Rust parser
            _ => self.parse::<bool>(),
        }
    }
}

/// Tag exactly N arguments of a directive
fn items<'data, const N: usize>(
    name: &'static str,
    args: &[&'data str],
) -> Result<[ConfigItem<'data>; N]> {
    ensure!(
        args.len() == N,
        "{} expects {} arguments, got {}",
        name,
        N,
        args.len()
    );
    Ok(std::array::from_fn(|i| ConfigItem::new(name, args[i])))
}

/// Tag N leading arguments of a directive, joining the rest into an
/// expression
fn split_expr<'data, const N: usize>(
    name: &'static str,
    args: &[&'data str],
) -> Result<([ConfigItem<'data>; N], String)> {
    ensure!(
        args.len() >= N,
        "{} expects at least {} arguments, got {}",
        name,
        N,
        args.len()
    );
    let head = items::<N>(name, &args[..N])?;
    Ok((head, args[N..].join(" ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const JOB: &str = "
        # Templates
        output     results
        input      eg  eg_1.json
        input      eg  eg_2.json
        template   eg  pass mass tp.mass > 60 && probes.pass
        binning    mass 30 70 110
        unbinned   eg  fail mass !probes.pass

        res.source  zmm.json
        res.x       genBos_pt
        res.y       u_para
        res.y       u_perp
        res.binning 10 0 200 60 -60 60
        res.rule    weighted
        res.limit   1 0 20
        res.errors  .false.
        res.canvas  resolution 0 30 .true.
        res.legend  U parallel
    ";

    #[test]
    fn full_job_file() {
        let config = Configuration::parse(JOB).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("results"));
        assert_eq!(config.inputs.len(), 2);
        assert_eq!(config.templates.len(), 2);

        let pass = &config.templates[0];
        assert_eq!(pass.expr, "tp.mass > 60 && probes.pass");
        assert_eq!(pass.binning, Binning::new(60, 60., 120.).unwrap());
        assert!(!pass.unbinned);
        let fail = &config.templates[1];
        assert_eq!(fail.binning, Binning::new(30, 70., 110.).unwrap());
        assert!(fail.unbinned);

        let res = config.resolution.unwrap();
        assert_eq!(res.exprs_y, vec!["u_para", "u_perp"]);
        assert_eq!(res.rule, Some(ExtractionRule::WeightedSigma));
        assert_eq!(res.limits, vec![(1, 0., 20.)]);
        assert_eq!(res.error_bars, Some(false));
        assert_eq!(res.binning.unwrap().n_bins_y, 60);
        assert!(res.canvas.unwrap().log_y);
        assert_eq!(res.legend, vec!["U parallel"]);
    }

    #[test]
    fn bad_jobs() {
        assert!(Configuration::parse("frobnicate 3").is_err());
        assert!(Configuration::parse("input ee file.json").is_err());
        assert!(Configuration::parse("binning mass 0 60 120").is_err());
        assert!(Configuration::parse("template eg t mass x > 1").is_err());
        assert!(Configuration::parse("res.x pt").is_err());
        assert!(Configuration::parse("res.errors maybe").is_err());
        assert!(Configuration::parse("res.limit 7 0 1").is_err());
        assert!(Configuration::parse("").unwrap().resolution.is_none());
    }
}
