mod ast;
mod error;

pub use ast::{BinaryOp, Expr, ExprKind, Literal, LogicalOp, UnaryOp};
pub use error::{CompileError, ExprError};
