use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};

use super::convert::Converter;
use super::model::{Content, FileKind, Image, Table};
use crate::error::ChannelError;

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load a staged file.  Dispatch by extension.
///
/// Supported formats:
/// * `.csv` – header row of column names, one numeric row per line
/// * `.lis` – HSPICE listing, converted to CSV by `converter` first
/// * `.png` – image, decoded to RGBA8
pub fn load_file(path: &Path, converter: &dyn Converter) -> Result<Content, ChannelError> {
    let Some(kind) = FileKind::from_path(path) else {
        return Err(ChannelError::Unsupported {
            path: path.display().to_string(),
        });
    };

    let load_err = |cause: anyhow::Error| ChannelError::Load {
        kind,
        path: path.to_path_buf(),
        cause,
    };

    match kind {
        FileKind::Csv => {
            let table = load_csv(path).map_err(load_err)?;
            Ok(Content::Table { kind, table: Arc::new(table) })
        }
        FileKind::Lis => {
            let csv_path = converter.convert(path).map_err(|cause| ChannelError::Conversion {
                path: path.to_path_buf(),
                cause,
            })?;
            let table = load_csv(&csv_path).map_err(load_err)?;
            Ok(Content::Table { kind, table: Arc::new(table) })
        }
        FileKind::Png => {
            let image = load_image(path).map_err(load_err)?;
            Ok(Content::Image(Arc::new(image)))
        }
    }
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// CSV layout: header row with column names, every following row numeric.
/// Cells that are not numbers load as NaN so one bad cell does not cost the
/// whole column.
pub fn load_csv(path: &Path) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;

    let columns: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.to_string())
        .collect();
    if columns.is_empty() {
        bail!("{} has no header row", path.display());
    }

    let mut rows = Vec::new();
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        rows.push(
            record
                .iter()
                .map(|cell| cell.parse::<f64>().unwrap_or(f64::NAN))
                .collect(),
        );
    }

    Ok(Table::from_rows(columns, rows))
}

// ---------------------------------------------------------------------------
// Image loader
// ---------------------------------------------------------------------------

pub fn load_image(path: &Path) -> Result<Image> {
    let decoded = image::open(path)
        .with_context(|| format!("decoding {}", path.display()))?
        .to_rgba8();

    Ok(Image {
        width: decoded.width(),
        height: decoded.height(),
        rgba: decoded.into_raw(),
    })
}
