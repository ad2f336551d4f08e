//! XSLT 1.0 compiler and resumable processor.
//!
//! A stylesheet is compiled once into an immutable [`CompiledStylesheet`]: a
//! flat graph of actions plus a shared table of compiled expressions. Each
//! transformation runs on its own [`Processor`], which can stop whenever the
//! output sink pushes back and resume later from the same point.

pub mod ast;
pub mod compiler;
pub mod context;
pub mod datasources;
pub mod decimal_format;
pub mod error;
pub mod frame;
pub mod keys;
pub mod number;
pub mod output;
pub mod parser;
pub mod pattern;
pub mod processor;
pub mod query_store;
pub mod resolver;
pub mod sort;
pub mod transform;
pub mod util;

mod compiler_handlers;
mod executor_handlers;

pub use ast::CompiledStylesheet;
pub use compiler::compile;
pub use datasources::{XmlDocument, XmlNode};
pub use error::{Location, XsltError};
pub use output::{
    OutputMethod, OutputResult, OutputSettings, Record, RecordCursor, RecordKind, RecordOutput, SinkStatus,
    XmlSerializer,
};
pub use processor::{ExecutionStatus, Processor};
pub use resolver::{NoResolver, ProviderResolver, StylesheetResolver};
pub use transform::{TransformOptions, transform, transform_to_string};
pub use trellis_xpath1::{DataSourceNode, NodeType, XPathValue};
