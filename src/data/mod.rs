/// Data layer: number and table decoding, file loading, core types.
///
/// Architecture:
/// ```text
///  .lis ──► convert ──► .csv ─┐
///    (hspice + units)          │
///  .csv ──────────────────────►│ loader   parse file → Content
///  .png ──────────────────────►│
///                              ▼
///                    ┌──────────────────┐
///                    │ Content          │  Table (columns) or Image
///                    └──────────────────┘
///                              │  SeriesSelection / Placement
///                              ▼
///                    ┌──────────────────┐
///                    │ Dataset          │  pushed to plot sinks
///                    └──────────────────┘
/// ```

pub mod convert;
pub mod hspice;
pub mod loader;
pub mod model;
pub mod units;
