pub mod ast;
pub mod axes;
pub mod context;
pub mod datasource;
pub mod engine;
pub mod error;
pub mod fragment;
pub mod functions;
pub mod operators;
pub mod parser;

pub use ast::{Axis, BinaryOperator, Expression, LocationPath, NodeTest, NodeTypeTest, Step};
pub use context::{ContextResolver, SimpleResolver, XML_NAMESPACE};
pub use datasource::{DataSourceNode, NodeType, QName};
pub use engine::{EvaluationContext, XPathValue, evaluate, number_to_string, string_to_number};
pub use fragment::{FragmentName, FragmentNode, ResultFragment};
pub use functions::FunctionRegistry;

// Re-export test utilities for integration testing in downstream crates
pub use datasource::tests;
pub use error::XPathError;
pub use parser::parse_expression;
