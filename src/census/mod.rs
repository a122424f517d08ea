//! Census 2010 inputs: layout dictionary, code tables, microdata records.

pub mod layout;
pub mod lookups;
pub mod record;
pub mod source;

pub use lookups::{LookupPaths, Lookups};
pub use record::{DestinationKey, PersonRecord, RecordLayout};
pub use source::Microdata;
