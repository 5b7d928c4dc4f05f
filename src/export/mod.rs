//! Export and import of notifications as JSON, CSV or XML, optionally
//! gzip-compressed and encrypted.

mod csv;
mod json;
mod pipeline;
mod xml;

pub use json::{ExportEnvelope, ENVELOPE_VERSION};
pub use pipeline::{
    export, import, ExportFormat, ExportOptions, ImportOptions, ImportOutcome, RecordError,
};
