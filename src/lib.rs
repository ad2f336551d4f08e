//! Trellis: XSLT 1.0 transformations.
//!
//! The heavy lifting lives in the workspace crates; this crate wires them into
//! a builder-style API and the `trellis` command line tool.
//!
//! ```no_run
//! use trellis::TransformBuilder;
//!
//! let transformer = TransformBuilder::new()
//!     .with_stylesheet_file("report.xsl")?
//!     .with_parameter("title", "Q3")
//!     .build()?;
//! let html = transformer.transform_str("<report/>")?;
//! # Ok::<(), trellis::TrellisError>(())
//! ```

pub mod builder;
pub mod config;
pub mod error;
pub mod transformer;

pub use builder::TransformBuilder;
pub use config::TransformConfig;
pub use error::TrellisError;
pub use transformer::{TransformReport, Transformer};

pub use trellis_traits as traits;
pub use trellis_xpath1 as xpath;
pub use trellis_xslt as xslt;
