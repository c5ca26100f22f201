//! Consumers of decoded packet records.

pub mod dump;
pub mod histogram;

pub use dump::{render_payload, DumpFormat, DumpWriter};
pub use histogram::{Histogram, ProtocolSeries};
