pub mod convert;
pub mod header;
pub mod inspect;
pub mod reader;
pub mod schema;
pub mod utils;
pub mod writer;

pub use header::HeaderLocator;
pub use reader::{ChunkedTableReader, ReadOptions};
pub use writer::{write_batches, ColumnarStreamWriter, WriteSummary, WriterOptions};
