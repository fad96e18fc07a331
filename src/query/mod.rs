//! Query layer - a small SQL AST for the SQL provider
//!
//! - `ast`: statements and conditions
//! - `render`: AST -> SQL text with named parameters
//! - `registry`: named, reusable statements

pub mod ast;
pub mod registry;
pub mod render;

pub use ast::{Condition, Op, Operand, Statement};
pub use registry::QueryRegistry;
pub use render::{render, validate_identifier, Rendered};
