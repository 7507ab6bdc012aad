//! # Formats
//!
//! Interchange formats of the forest:
//! - `xml`: owned element tree over `quick-xml`
//! - `nml`: the NML skeleton document codec
//! - `checksum`: integrity tag of the annotation time

pub mod checksum;
pub mod nml;
pub mod xml;

pub use checksum::{time_checksum, verify_time_checksum};
pub use nml::{LoadReport, SaveOptions, load_nml, save_nml};
pub use xml::XmlElement;
