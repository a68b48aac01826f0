//! Raw ingestion for the Madrid household-income / crime / contact-center ETL.
//!
//! Each source CSV (`;`-delimited, latin-1) is streamed in bounded chunks into
//! one zstd-compressed Parquet file under `<out>/raw/`. The crime export has a
//! metadata preamble, so its header line is located heuristically first.

pub mod config;
pub mod error;
pub mod loader;
pub mod process;
pub mod source;

pub use config::{DataPaths, LoaderConfig, RowPolicy};
pub use error::IngestError;
pub use loader::{load_all_raw, RawLoader, RawOutput};
pub use source::{Selector, Source};
