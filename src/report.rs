//! Reading and writing analysis reports and the small CSV tables around them.

use anyhow::{bail, Context, Result};
use log::info;
use sim_common::{AnalysisReport, DerivedRecord};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// On-disk encoding of an [`AnalysisReport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Json,
    Bincode,
    MessagePack,
}

impl ReportFormat {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "json" => Ok(ReportFormat::Json),
            "bincode" => Ok(ReportFormat::Bincode),
            "messagepack" | "msgpack" => Ok(ReportFormat::MessagePack),
            other => bail!("Unknown output format '{}'", other),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Json => "json",
            ReportFormat::Bincode => "bin",
            ReportFormat::MessagePack => "msgpack",
        }
    }

    /// Guesses the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "json" => Some(ReportFormat::Json),
            "bin" | "bincode" => Some(ReportFormat::Bincode),
            "msgpack" | "mpk" => Some(ReportFormat::MessagePack),
            _ => None,
        }
    }
}

/// Writes `report` to `<base>_report.<ext>` and returns the path.
pub fn save_report(report: &AnalysisReport, base: &str, format: ReportFormat) -> Result<PathBuf> {
    let path = PathBuf::from(format!("{}_report.{}", base, format.extension()));
    let mut writer = BufWriter::new(
        File::create(&path).with_context(|| format!("Failed to create report file {}", path.display()))?,
    );
    match format {
        ReportFormat::Json => serde_json::to_writer_pretty(&mut writer, report)?,
        ReportFormat::Bincode => bincode::serialize_into(&mut writer, report)?,
        ReportFormat::MessagePack => rmp_serde::encode::write_named(&mut writer, report)?,
    }
    writer.flush()?;
    info!("Report '{}' saved to {} ({:?})", report.title, path.display(), format);
    Ok(path)
}

/// Reads a report, picking the decoder from the file extension.
pub fn load_report(path: &Path) -> Result<AnalysisReport> {
    let Some(format) = ReportFormat::from_path(path) else {
        bail!("Cannot tell the report format of {} from its extension", path.display());
    };
    let reader = BufReader::new(File::open(path).with_context(|| format!("Failed to open {}", path.display()))?);
    let report = match format {
        ReportFormat::Json => serde_json::from_reader(reader)?,
        ReportFormat::Bincode => bincode::deserialize_from(reader)?,
        ReportFormat::MessagePack => rmp_serde::from_read(reader)?,
    };
    Ok(report)
}

/// Writes `parameter_value,derived_value,error` rows; a missing error is an empty field.
pub fn write_records_csv(records: &[DerivedRecord], path: &Path) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("Failed to create CSV file {}", path.display()))?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    info!("{} derived records saved to {}", records.len(), path.display());
    Ok(())
}

/// Reads a two-column numeric CSV with a header row, e.g. `k,omega` or `omega,amplitude`.
pub fn read_pairs_csv(path: &Path) -> Result<(Vec<f64>, Vec<f64>)> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    for (line, row) in reader.deserialize::<(f64, f64)>().enumerate() {
        let (x, y) = row.with_context(|| format!("Bad row {} in {}", line + 2, path.display()))?;
        xs.push(x);
        ys.push(y);
    }
    Ok((xs, ys))
}
