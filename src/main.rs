//! tlc-quant: measure TLC lane images and solve mixtures against calibrations.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use image::RgbImage;

use tlc_quant::data::chromatogram::Channel;
use tlc_quant::data::geometry::BoundingBox;
use tlc_quant::data::raster::{
    crop_region, load_image, parse_concentrations, parse_region, resize_image,
};
use tlc_quant::log::reproducibility::AnalysisLog;
use tlc_quant::pipeline::calibration::Calibration;
use tlc_quant::pipeline::mixture::Mixture;
use tlc_quant::pipeline::report::AnalysisReport;
use tlc_quant::pipeline::session::{Session, SessionError};
use tlc_quant::pipeline::settings::AnalysisSettings;
use tlc_quant::pipeline::solver::{ChannelSolution, PeakSelection, SolveError};

/// Minimum average R² when `--selection threshold` is given without `--min-r2`
const DEFAULT_MIN_R2: f64 = 0.9;

#[derive(Parser)]
#[command(
    name = "tlc-quant",
    version,
    about = "Quantify thin-layer chromatography lanes from photographs"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Analysis settings (JSON); defaults are used for missing fields
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Analyse only this region of every image, as X,Y,WIDTH,HEIGHT in source pixels
    #[arg(long, global = true, value_parser = parse_region)]
    roi: Option<BoundingBox>,

    /// Resize every image by this factor before analysis (applied after --roi)
    #[arg(long, global = true)]
    scale: Option<f64>,

    /// Print results as JSON instead of tables
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    /// Save the analysis log (.json for JSON, text otherwise)
    #[arg(long, global = true)]
    log: Option<PathBuf>,

    /// Save a data report (.csv for commas, tab-separated otherwise)
    #[arg(long, global = true)]
    report: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Fit calibration curves for a strip of standards
    Calibrate {
        #[arg(long)]
        name: String,
        #[arg(long)]
        image: PathBuf,
        /// Known concentrations, whitespace separated, e.g. "0.5 1 2 4"
        #[arg(long)]
        concentrations: String,
        /// Write the image with the detected bands outlined
        #[arg(long)]
        annotated: Option<PathBuf>,
    },
    /// Measure the peaks of a mixture lane
    Mixture {
        #[arg(long)]
        name: String,
        #[arg(long)]
        image: PathBuf,
    },
    /// Solve a mixture lane against one or more calibrations
    Solve {
        /// Mixture lane image
        #[arg(long)]
        mixture: PathBuf,
        /// NAME=PATH of a calibration strip (repeatable, order defines the unknowns)
        #[arg(long = "calibration", required = true)]
        calibrations: Vec<String>,
        /// Concentrations of each --calibration, in the same order
        #[arg(long = "concentrations", required = true)]
        concentrations: Vec<String>,
        #[arg(long, value_enum, default_value_t = ChannelArg::All)]
        channel: ChannelArg,
        /// Overrides the selection strategy of the settings file
        #[arg(long, value_enum)]
        selection: Option<SelectionArg>,
        /// Minimum average R² for the threshold strategy
        #[arg(long)]
        min_r2: Option<f64>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ChannelArg {
    R,
    G,
    B,
    /// Solve R, G and B independently
    All,
}

impl ChannelArg {
    fn channel(self) -> Option<Channel> {
        match self {
            ChannelArg::R => Some(Channel::R),
            ChannelArg::G => Some(Channel::G),
            ChannelArg::B => Some(Channel::B),
            ChannelArg::All => None,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum SelectionArg {
    TopN,
    Threshold,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    ::log::info!("tlc-quant v{}", env!("CARGO_PKG_VERSION"));

    let settings = match &cli.config {
        Some(path) => AnalysisSettings::load(path)?,
        None => AnalysisSettings::default(),
    };
    settings.validate()?;
    let mut session = Session::new(settings);

    let mut report = ReportParts::default();
    match &cli.command {
        Command::Calibrate {
            name,
            image,
            concentrations,
            annotated,
        } => {
            let raster = open(image, &cli, &mut session.log)?;
            let concentrations = parse_concentrations(concentrations)?;
            let calibration = session.add_calibration(name, raster, concentrations)?;
            if let Some(out) = annotated {
                calibration.annotated().save(out)?;
                ::log::info!("Annotated image saved to {}", out.display());
            }
            if !cli.json {
                print_calibration(calibration);
            }
            report.calibrations.push(name.clone());
        }
        Command::Mixture { name, image } => {
            let raster = open(image, &cli, &mut session.log)?;
            let mixture = session.add_mixture(name, raster)?;
            if !cli.json {
                print_mixture(mixture);
            }
            report.mixture = Some(name.clone());
        }
        Command::Solve {
            mixture,
            calibrations,
            concentrations,
            channel,
            selection,
            min_r2,
        } => {
            if calibrations.len() != concentrations.len() {
                return Err(format!(
                    "{} --calibration but {} --concentrations given",
                    calibrations.len(),
                    concentrations.len()
                )
                .into());
            }

            match (selection, min_r2) {
                (Some(SelectionArg::TopN), _) => session.settings.selection = PeakSelection::TopN,
                (Some(SelectionArg::Threshold), r2) => {
                    session.settings.selection = PeakSelection::Threshold {
                        min_r2: r2.unwrap_or(DEFAULT_MIN_R2),
                    }
                }
                (None, Some(r2)) => {
                    session.settings.selection = PeakSelection::Threshold { min_r2: *r2 }
                }
                (None, None) => {}
            }

            for (entry, text) in calibrations.iter().zip(concentrations) {
                let (name, path) = entry
                    .split_once('=')
                    .ok_or_else(|| format!("expected NAME=PATH, got '{}'", entry))?;
                let raster = open(Path::new(path), &cli, &mut session.log)?;
                session.add_calibration(name, raster, parse_concentrations(text)?)?;
                report.calibrations.push(name.to_string());
            }

            let mixture_name = mixture
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "mixture".to_string());
            let raster = open(mixture, &cli, &mut session.log)?;
            session.add_mixture(&mixture_name, raster)?;
            report.mixture = Some(mixture_name.clone());

            let names: Vec<&str> = report.calibrations.iter().map(String::as_str).collect();
            match channel.channel() {
                None => {
                    let all = session.solve_all(&mixture_name, &names)?;
                    report.solutions = Channel::ALL
                        .into_iter()
                        .zip([all.r, all.g, all.b])
                        .collect();
                }
                Some(channel) => {
                    let result = match session.solve(&mixture_name, &names, channel) {
                        Ok(solution) => Ok(solution),
                        Err(SessionError::Solve(e)) => Err(e),
                        Err(e) => return Err(e.into()),
                    };
                    report.solutions.push((channel, result));
                }
            }
            if !cli.json {
                print_solutions(&report.solutions);
            }
        }
    }

    let full = report.resolve(&session)?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&full.to_json())?);
    }
    if let Some(path) = &cli.report {
        full.save(path)?;
    }
    if let Some(path) = &cli.log {
        session.log.save(path)?;
        ::log::info!("Analysis log saved to {}", path.display());
    }
    Ok(())
}

/// Names collected while the session is still being mutated
#[derive(Default)]
struct ReportParts {
    calibrations: Vec<String>,
    mixture: Option<String>,
    solutions: Vec<(Channel, Result<ChannelSolution, SolveError>)>,
}

impl ReportParts {
    fn resolve(self, session: &Session) -> Result<AnalysisReport<'_>, Box<dyn std::error::Error>> {
        let calibrations = self
            .calibrations
            .iter()
            .map(|name| session.calibration(name))
            .collect::<Result<Vec<_>, _>>()?;
        let mixture = match &self.mixture {
            Some(name) => Some(session.mixture(name)?),
            None => None,
        };
        Ok(AnalysisReport {
            calibrations,
            mixture,
            solutions: self.solutions,
        })
    }
}

fn open(
    path: &Path,
    cli: &Cli,
    log: &mut AnalysisLog,
) -> Result<RgbImage, Box<dyn std::error::Error>> {
    let mut image = load_image(path)?;
    log.add_source(&path.display().to_string());
    if let Some(region) = cli.roi {
        image = crop_region(&image, region)?;
        ::log::info!("Cropped {} to {}", path.display(), region);
    }
    if let Some(scale) = cli.scale {
        image = resize_image(&image, scale)?;
    }
    Ok(image)
}

fn print_calibration(calibration: &Calibration) {
    println!(
        "Calibration '{}': {} bands",
        calibration.name(),
        calibration.peaks().len()
    );
    for peak in calibration.peaks() {
        println!("  Band {} ({})", peak.index + 1, peak.bounds);
        for channel in Channel::ALL {
            println!(
                "    {}  areas {:?}  fit {}",
                channel,
                peak.area.channel(channel),
                peak.fit[channel]
            );
        }
    }
}

fn print_mixture(mixture: &Mixture) {
    println!(
        "Mixture '{}': {} peaks, boundaries {:?}",
        mixture.name(),
        mixture.area().len(),
        mixture.minima().indices
    );
    for channel in Channel::ALL {
        println!("  {}  areas {:?}", channel, mixture.area().channel(channel));
    }
}

fn print_solutions(solutions: &[(Channel, Result<ChannelSolution, SolveError>)]) {
    for (channel, result) in solutions {
        match result {
            Ok(solution) => {
                let peaks: Vec<usize> = solution.selected_peaks.iter().map(|p| p + 1).collect();
                println!("Channel {} (peaks {:?}):", channel, peaks);
                for (name, c) in &solution.concentrations {
                    println!("  [{}] = {:.6}", name, c);
                }
                if let Some(warning) = &solution.warning {
                    println!("  warning: {}", warning);
                }
            }
            Err(e) => println!("Channel {}: {}", channel, e),
        }
    }
}
