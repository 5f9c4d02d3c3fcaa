use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result, bail};
use log::{debug, info};

use super::hspice::{Block, parse_blocks};

// ---------------------------------------------------------------------------
// Listing → CSV conversion
// ---------------------------------------------------------------------------

/// Turns a listing file into a CSV file that the table loader can read.
pub trait Converter: Send + Sync {
    /// Convert `input`, returning the path of the CSV written.
    fn convert(&self, input: &Path) -> Result<PathBuf>;
}

/// CSV written next to the input: `tran.lis` → `tran.csv`.
pub fn csv_path_for(input: &Path) -> PathBuf {
    input.with_extension("csv")
}

// ---------------------------------------------------------------------------
// External tool
// ---------------------------------------------------------------------------

/// Runs `<program> <input> <output>`.  Success means exit status 0 and an
/// output file on disk; the tool's own output is discarded.
#[derive(Debug, Clone)]
pub struct ExternalConverter {
    program: String,
}

impl ExternalConverter {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into() }
    }
}

impl Converter for ExternalConverter {
    fn convert(&self, input: &Path) -> Result<PathBuf> {
        let output = csv_path_for(input);
        // A stale CSV from an earlier run must not pass for fresh output.
        if output.exists() {
            std::fs::remove_file(&output)
                .with_context(|| format!("removing stale {}", output.display()))?;
        }

        let status = Command::new(&self.program)
            .arg(input)
            .arg(&output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .with_context(|| format!("launching {}", self.program))?;

        if !status.success() {
            bail!("{} exited with {status}", self.program);
        }
        if !output.is_file() {
            bail!("{} did not write {}", self.program, output.display());
        }

        info!("Converted {} to {}", input.display(), output.display());
        Ok(output)
    }
}

// ---------------------------------------------------------------------------
// Built-in conversion
// ---------------------------------------------------------------------------

/// Parses the listing in-process.  The first block sets the columns; later
/// blocks with identical headers (a table continued over several pages) add
/// their rows, other blocks are skipped.
#[derive(Debug, Clone, Default)]
pub struct BuiltinConverter;

impl Converter for BuiltinConverter {
    fn convert(&self, input: &Path) -> Result<PathBuf> {
        let bytes = std::fs::read(input).with_context(|| format!("reading {}", input.display()))?;
        let text = String::from_utf8_lossy(&bytes);

        let blocks = parse_blocks(&text);
        let Some(first) = blocks.first() else {
            bail!("no x/y table blocks in {}", input.display());
        };

        let output = csv_path_for(input);
        write_csv(&output, first, &blocks[1..])?;
        debug!(
            "Wrote {} ({} columns) from {} block(s)",
            output.display(),
            first.headers.len(),
            blocks.len()
        );
        Ok(output)
    }
}

fn write_csv(output: &Path, first: &Block, rest: &[Block]) -> Result<()> {
    let mut writer = csv::Writer::from_path(output)
        .with_context(|| format!("creating {}", output.display()))?;
    writer.write_record(&first.headers).context("writing CSV header")?;

    let continuation = rest.iter().filter(|b| b.headers == first.headers);
    for block in std::iter::once(first).chain(continuation) {
        for row in &block.rows {
            writer
                .write_record(row.iter().map(|v| v.to_string()))
                .context("writing CSV row")?;
        }
    }
    writer.flush().context("flushing CSV")?;
    Ok(())
}
