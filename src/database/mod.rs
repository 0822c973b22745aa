//! Relational persistence and ASN-to-country resolution.

pub mod resolver;
pub mod writer;

pub use resolver::{CountryResolver, FileResolver, TableResolver};
pub use writer::EventWriter;
