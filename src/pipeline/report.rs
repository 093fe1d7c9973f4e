/// Data report export
///
/// Plain-text tables of band areas, calibration curves and solved
/// concentrations. `.csv` files are comma separated, anything else uses tabs.

use std::io;
use std::path::Path;

use serde_json::{json, Value};

use super::calibration::Calibration;
use super::mixture::Mixture;
use super::solver::{ChannelSolution, SolveError};
use crate::data::chromatogram::Channel;

/// Everything one report covers
#[derive(Default)]
pub struct AnalysisReport<'a> {
    pub calibrations: Vec<&'a Calibration>,
    pub mixture: Option<&'a Mixture>,
    pub solutions: Vec<(Channel, Result<ChannelSolution, SolveError>)>,
}

/// Column separator chosen from the file extension
pub fn separator_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "csv" => ",",
        _ => "\t",
    }
}

/// Quote a field that would otherwise split or break its row
fn escape_field(field: &str, sep: &str) -> String {
    if field.contains(sep) || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Names go into `#` lines verbatim apart from line breaks
fn comment_text(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

fn push_row<S: AsRef<str>>(out: &mut String, fields: &[S], sep: &str) {
    let row: Vec<String> = fields
        .iter()
        .map(|f| escape_field(f.as_ref(), sep))
        .collect();
    out.push_str(&row.join(sep));
    out.push('\n');
}

impl<'a> AnalysisReport<'a> {
    pub fn render(&self, sep: &str) -> String {
        let mut out = String::new();

        // ── Header ──
        out.push_str("# TLC Quantification Report\n");
        out.push_str(&format!(
            "# Calibrations: {}\n",
            self.calibrations
                .iter()
                .map(|c| comment_text(c.name()))
                .collect::<Vec<_>>()
                .join(", ")
        ));
        if let Some(mix) = self.mixture {
            out.push_str(&format!("# Mixture: {}\n", comment_text(mix.name())));
        }
        out.push_str(&format!(
            "# Generated: {}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        ));
        out.push('\n');

        // ── Calibration curves ──
        for cal in &self.calibrations {
            out.push_str(&format!(
                "# Calibration '{}' ({} bands, concentrations {})\n",
                comment_text(cal.name()),
                cal.peaks().len(),
                cal.concentrations()
                    .iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<_>>()
                    .join(" ")
            ));
            push_row(
                &mut out,
                &["Band", "Channel", "Areas", "Slope", "Intercept", "R2", "Points"],
                sep,
            );
            for peak in cal.peaks() {
                for channel in Channel::ALL {
                    let fit = &peak.fit[channel];
                    let areas = peak
                        .area
                        .channel(channel)
                        .iter()
                        .map(|a| format!("{:.1}", a))
                        .collect::<Vec<_>>()
                        .join(" ");
                    let row = [
                        (peak.index + 1).to_string(),
                        channel.to_string(),
                        areas,
                        fit.reported_slope().to_string(),
                        fit.reported_intercept().to_string(),
                        fit.reported_r_squared()
                            .map(|r2| format!("{:.3}", r2))
                            .unwrap_or_else(|| "undefined".to_string()),
                        fit.points.to_string(),
                    ];
                    push_row(&mut out, &row, sep);
                }
            }
            out.push('\n');
        }

        // ── Mixture peaks ──
        if let Some(mix) = self.mixture {
            let spans = mix.minima().spans();
            out.push_str(&format!(
                "# Mixture '{}' ({} peaks)\n",
                comment_text(mix.name()),
                spans.len()
            ));
            push_row(
                &mut out,
                &["Peak", "Start", "End", "Area_R", "Area_G", "Area_B"],
                sep,
            );
            for (i, (start, end)) in spans.iter().enumerate() {
                let mut row = vec![(i + 1).to_string(), start.to_string(), end.to_string()];
                for channel in Channel::ALL {
                    row.push(format!("{:.1}", mix.area().channel(channel)[i]));
                }
                push_row(&mut out, &row, sep);
            }
            out.push('\n');
        }

        // ── Concentrations ──
        if !self.solutions.is_empty() {
            out.push_str("# Concentrations\n");
            push_row(
                &mut out,
                &["Channel", "Calibration", "Concentration", "Peaks", "Note"],
                sep,
            );
            for (channel, result) in &self.solutions {
                match result {
                    Ok(solution) => {
                        let peaks = solution
                            .selected_peaks
                            .iter()
                            .map(|p| (p + 1).to_string())
                            .collect::<Vec<_>>()
                            .join(" ");
                        for (name, c) in &solution.concentrations {
                            let row = [
                                channel.to_string(),
                                name.clone(),
                                format!("{:.6}", c),
                                peaks.clone(),
                                solution.warning.clone().unwrap_or_default(),
                            ];
                            push_row(&mut out, &row, sep);
                        }
                    }
                    Err(e) => {
                        let row = [
                            channel.to_string(),
                            String::new(),
                            String::new(),
                            String::new(),
                            e.to_string(),
                        ];
                        push_row(&mut out, &row, sep);
                    }
                }
            }
        }

        out
    }

    /// Write the report, picking the separator from the extension
    pub fn save(&self, path: &Path) -> io::Result<()> {
        std::fs::write(path, self.render(separator_for(path)))?;
        log::info!("Data report saved to {}", path.display());
        Ok(())
    }

    /// Structured form of the same content
    pub fn to_json(&self) -> Value {
        let calibrations: Vec<Value> = self
            .calibrations
            .iter()
            .map(|cal| {
                json!({
                    "name": cal.name(),
                    "concentrations": cal.concentrations(),
                    "bands": cal.peaks(),
                })
            })
            .collect();
        let mixture = self.mixture.map(|mix| {
            json!({
                "name": mix.name(),
                "profile": mix.profile(),
                "minima": mix.minima(),
                "area": mix.area(),
            })
        });
        let solutions: Vec<Value> = self
            .solutions
            .iter()
            .map(|(channel, result)| match result {
                Ok(solution) => json!({ "channel": channel, "solution": solution }),
                Err(e) => json!({ "channel": channel, "error": e.to_string() }),
            })
            .collect();
        json!({
            "calibrations": calibrations,
            "mixture": mixture,
            "solutions": solutions,
        })
    }
}
