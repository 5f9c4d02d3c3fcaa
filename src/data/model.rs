use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

// ---------------------------------------------------------------------------
// FileKind – what a watched file holds
// ---------------------------------------------------------------------------

/// Supported file types, decided by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// Comma-separated table with a header row.
    Csv,
    /// HSPICE listing, converted to CSV before loading.
    Lis,
    /// Image shown as a plot overlay.
    Png,
}

impl FileKind {
    /// Classify a path by its (case-insensitive) extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        match ext.as_str() {
            "csv" => Some(FileKind::Csv),
            "lis" => Some(FileKind::Lis),
            "png" => Some(FileKind::Png),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Csv => "csv",
            FileKind::Lis => "lis",
            FileKind::Png => "png",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Table – named numeric columns of equal length
// ---------------------------------------------------------------------------

/// A numeric table stored column-major.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    /// Column names in file order.
    pub columns: Vec<String>,
    /// One vector per column; all the same length.
    pub values: Vec<Vec<f64>>,
}

impl Table {
    /// Build from column names and row-major data.  Rows whose width differs
    /// from the header are skipped.
    pub fn from_rows(columns: Vec<String>, rows: impl IntoIterator<Item = Vec<f64>>) -> Self {
        let mut values = vec![Vec::new(); columns.len()];
        for row in rows {
            if row.len() != columns.len() {
                continue;
            }
            for (col, v) in values.iter_mut().zip(row) {
                col.push(v);
            }
        }
        Table { columns, values }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.values.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Values of the named column.
    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .position(|c| c == name)
            .map(|i| self.values[i].as_slice())
    }
}

// ---------------------------------------------------------------------------
// Image overlays
// ---------------------------------------------------------------------------

/// A decoded RGBA8 bitmap, rows top to bottom.
#[derive(Clone, PartialEq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.rgba.len())
            .finish()
    }
}

/// Where an image sits in plot coordinates: lower-left `(x0, y0)` and
/// upper-right `(x1, y1)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl Placement {
    /// Pixel-for-unit placement anchored at the origin.
    pub fn for_image(image: &Image) -> Self {
        Placement {
            x0: 0.0,
            y0: 0.0,
            x1: f64::from(image.width),
            y1: f64::from(image.height),
        }
    }

    /// Same rectangle with corners swapped so that `x0 <= x1` and `y0 <= y1`.
    pub fn normalized(self) -> Self {
        Placement {
            x0: self.x0.min(self.x1),
            y0: self.y0.min(self.y1),
            x1: self.x0.max(self.x1),
            y1: self.y0.max(self.y1),
        }
    }

    pub fn width(&self) -> f64 {
        (self.x1 - self.x0).abs()
    }

    pub fn height(&self) -> f64 {
        (self.y1 - self.y0).abs()
    }
}

// ---------------------------------------------------------------------------
// Content – a freshly loaded file
// ---------------------------------------------------------------------------

/// The decoded contents of one downloaded file.
#[derive(Debug, Clone)]
pub enum Content {
    Table { kind: FileKind, table: Arc<Table> },
    Image(Arc<Image>),
}

impl Content {
    pub fn kind(&self) -> FileKind {
        match self {
            Content::Table { kind, .. } => *kind,
            Content::Image(_) => FileKind::Png,
        }
    }
}

// ---------------------------------------------------------------------------
// Selection – which part of the content is shown
// ---------------------------------------------------------------------------

/// Which table columns a channel publishes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesSelection {
    /// X-axis column; `None` means the first column.
    pub x: Option<String>,
    /// Y-axis columns; `None` means every column except x.
    pub ys: Option<Vec<String>>,
    /// Publish only the first `limit` rows.
    pub limit: Option<usize>,
}

impl SeriesSelection {
    /// Carry the selection over to a newly loaded table: unknown names are
    /// dropped, a vanished x falls back to the first column and the row limit
    /// is released so the whole refreshed file shows.
    pub fn restored_for(&self, table: &Table) -> Self {
        let x = self.x.clone().filter(|x| table.column(x).is_some());
        let ys = self.ys.as_ref().map(|ys| {
            ys.iter()
                .filter(|y| table.column(y).is_some())
                .cloned()
                .collect()
        });
        SeriesSelection { x, ys, limit: None }
    }

    /// Resolve against `table`, returning the x column and y columns names.
    fn resolve<'t>(&self, table: &'t Table) -> Option<(&'t str, Vec<&'t str>)> {
        let x = match &self.x {
            Some(name) => table.columns.iter().find(|c| *c == name)?,
            None => table.columns.first()?,
        };
        let ys = match &self.ys {
            Some(names) => table
                .columns
                .iter()
                .filter(|c| names.contains(*c))
                .map(String::as_str)
                .collect(),
            None => table
                .columns
                .iter()
                .filter(|c| *c != x)
                .map(String::as_str)
                .collect(),
        };
        Some((x.as_str(), ys))
    }
}

// ---------------------------------------------------------------------------
// Dataset – what a sink receives
// ---------------------------------------------------------------------------

/// A named numeric series.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub name: String,
    pub values: Vec<f64>,
}

/// The payload pushed from a channel to a plot sink.
#[derive(Debug, Clone, PartialEq)]
pub enum Dataset {
    /// Y series sharing one x series.
    Series {
        kind: FileKind,
        x: Series,
        ys: Vec<Series>,
    },
    /// Bitmap overlay.
    Image {
        image: Arc<Image>,
        placement: Placement,
        opacity: f64,
    },
}

impl Dataset {
    /// Cut the selected columns out of a table.  `None` when the table has no
    /// columns to use as x.
    pub fn from_table(kind: FileKind, table: &Table, selection: &SeriesSelection) -> Option<Self> {
        let (x_name, y_names) = selection.resolve(table)?;
        let n = selection.limit.unwrap_or(usize::MAX).min(table.len());

        let series = |name: &str| {
            let values = table.column(name).unwrap_or_default();
            Series {
                name: name.to_string(),
                values: values[..n.min(values.len())].to_vec(),
            }
        };

        Some(Dataset::Series {
            kind,
            x: series(x_name),
            ys: y_names.into_iter().map(series).collect(),
        })
    }

    /// Image dataset; opacity is clamped to `[0, 1]` and the placement
    /// normalised.
    pub fn image(image: Arc<Image>, placement: Placement, opacity: f64) -> Self {
        Dataset::Image {
            image,
            placement: placement.normalized(),
            opacity: if opacity.is_nan() { 1.0 } else { opacity.clamp(0.0, 1.0) },
        }
    }

    pub fn kind(&self) -> FileKind {
        match self {
            Dataset::Series { kind, .. } => *kind,
            Dataset::Image { .. } => FileKind::Png,
        }
    }

    /// Min/max over all finite y values.
    pub fn value_range(&self) -> Option<(f64, f64)> {
        let Dataset::Series { ys, .. } = self else {
            return None;
        };
        ys.iter()
            .flat_map(|s| s.values.iter().copied())
            .filter(|v| v.is_finite())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

// ---------------------------------------------------------------------------
// DatasetSummary – what the control surface shows after a refresh
// ---------------------------------------------------------------------------

/// A compact description of a channel's latest data.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSummary {
    pub kind: FileKind,
    /// All column names of the loaded table (empty for images).
    pub columns: Vec<String>,
    /// Rows in the loaded table.
    pub rows: usize,
    /// Range of the published y values.
    pub value_range: Option<(f64, f64)>,
    /// Pixel size for images.
    pub image_size: Option<(u32, u32)>,
    pub refreshed_at: SystemTime,
}

impl DatasetSummary {
    pub fn new(content: &Content, dataset: Option<&Dataset>) -> Self {
        let (columns, rows, image_size) = match content {
            Content::Table { table, .. } => (table.columns.clone(), table.len(), None),
            Content::Image(img) => (Vec::new(), 0, Some((img.width, img.height))),
        };
        DatasetSummary {
            kind: content.kind(),
            columns,
            rows,
            value_range: dataset.and_then(Dataset::value_range),
            image_size,
            refreshed_at: SystemTime::now(),
        }
    }
}
