//! Snapshot export at shutdown
//!
//! Each closed zone is written as two files named after its privileged
//! token: `<token>.png` with the rendered canvas and `<token>.tok` listing
//! every registered token, one per line.

use crate::error::ExportError;
use crate::token::Token;
use crate::zone::Zone;
use log::{info, warn};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct ExportReport {
    pub exported: Vec<usize>,
    pub failed: Vec<(usize, ExportError)>,
}

pub fn image_path(dir: &Path, zone: &Zone) -> Result<PathBuf, ExportError> {
    snapshot_path(dir, zone, "png")
}

pub fn token_path(dir: &Path, zone: &Zone) -> Result<PathBuf, ExportError> {
    snapshot_path(dir, zone, "tok")
}

fn snapshot_path(dir: &Path, zone: &Zone, extension: &str) -> Result<PathBuf, ExportError> {
    let token = zone
        .privileged_token()
        .ok_or(ExportError::MissingPrivilegedToken(zone.id()))?;
    Ok(dir.join(format!("{}.{}", token, extension)))
}

fn write_image(path: PathBuf, zone: &Zone) -> Result<(), ExportError> {
    zone.gen_image()
        .save_with_format(&path, image::ImageFormat::Png)
        .map_err(|source| ExportError::Image { path, source })
}

fn write_token_listing(path: &Path, tokens: &[Token]) -> std::io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for token in tokens {
        writeln!(writer, "{}", token)?;
    }
    writer.flush()
}

fn write_tokens(path: PathBuf, zone: &Zone) -> Result<(), ExportError> {
    write_token_listing(&path, &zone.tokens()).map_err(|source| ExportError::Io { path, source })
}

/// Writes both snapshot files for one zone. The token listing is attempted
/// even if the image could not be written; the first error is returned.
pub fn export_zone(dir: &Path, zone: &Zone) -> Result<(), ExportError> {
    let image_result = write_image(image_path(dir, zone)?, zone);
    let token_result = write_tokens(token_path(dir, zone)?, zone);
    image_result.and(token_result)
}

/// Exports every zone in order. A failing zone is logged and skipped.
pub fn export_zones(dir: &Path, zones: &[Arc<Zone>]) -> ExportReport {
    info!("Exporting {} zones to {}", zones.len(), dir.display());

    let mut report = ExportReport::default();
    for zone in zones {
        if !zone.is_closed() {
            warn!("Exporting zone {} while it is still open", zone.id());
        }

        match export_zone(dir, zone) {
            Ok(()) => report.exported.push(zone.id()),
            Err(e) => {
                warn!("Error occurred while exporting zone {}: {}", zone.id(), e);
                report.failed.push((zone.id(), e));
            }
        }
    }
    report
}
