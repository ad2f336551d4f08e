pub mod xml;

pub use xml::{XmlDocument, XmlNode};
