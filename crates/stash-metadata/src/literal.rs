use rustpython_parser::ast::{Constant, Expr, UnaryOp};

use stash_normalize::sanitize_version;

/// A Python literal value, as far as the restricted evaluator goes.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PyLiteral {
    Str(String),
    /// Integers keep their decimal spelling; they are only ever stringified.
    Int(String),
    Float(f64),
    Bool(bool),
    None,
    /// A tuple, list or set of literals.
    Seq(Vec<PyLiteral>),
}

/// Evaluate an expression if it is a literal; `None` for any other shape.
pub(crate) fn literal(expr: &Expr) -> Option<PyLiteral> {
    match expr {
        Expr::Constant(constant) => from_constant(&constant.value),
        Expr::Tuple(tuple) => seq(&tuple.elts),
        Expr::List(list) => seq(&list.elts),
        Expr::Set(set) => seq(&set.elts),
        Expr::UnaryOp(unary) if matches!(unary.op, UnaryOp::USub) => {
            match literal(&unary.operand)? {
                PyLiteral::Int(digits) => Some(PyLiteral::Int(format!("-{digits}"))),
                PyLiteral::Float(value) => Some(PyLiteral::Float(-value)),
                _ => None,
            }
        }
        _ => None,
    }
}

fn from_constant(constant: &Constant) -> Option<PyLiteral> {
    match constant {
        Constant::Str(value) => Some(PyLiteral::Str(value.clone())),
        Constant::Int(value) => Some(PyLiteral::Int(value.to_string())),
        Constant::Float(value) => Some(PyLiteral::Float(*value)),
        Constant::Bool(value) => Some(PyLiteral::Bool(*value)),
        Constant::None => Some(PyLiteral::None),
        Constant::Tuple(elements) => elements
            .iter()
            .map(from_constant)
            .collect::<Option<Vec<_>>>()
            .map(PyLiteral::Seq),
        _ => None,
    }
}

fn seq(elements: &[Expr]) -> Option<PyLiteral> {
    elements
        .iter()
        .map(literal)
        .collect::<Option<Vec<_>>>()
        .map(PyLiteral::Seq)
}

/// Python truthiness, for the "only truthy values count as resolved" rule.
pub(crate) fn is_truthy(value: &PyLiteral) -> bool {
    match value {
        PyLiteral::Str(s) => !s.is_empty(),
        PyLiteral::Int(digits) => !matches!(digits.as_str(), "0" | "-0"),
        PyLiteral::Float(f) => *f != 0.0,
        PyLiteral::Bool(b) => *b,
        PyLiteral::None => false,
        PyLiteral::Seq(elements) => !elements.is_empty(),
    }
}

/// Convert any literal to a version string: sequences are joined with `.`,
/// everything else is stringified, and the result is sanitized.
pub(crate) fn any_to_version(value: &PyLiteral) -> String {
    let text = match value {
        PyLiteral::Str(s) => s.clone(),
        PyLiteral::Seq(elements) => elements.iter().map(plain).collect::<Vec<_>>().join("."),
        other => plain(other),
    };
    sanitize_version(&text)
}

/// Python's `str()` of a literal, near enough.
fn plain(value: &PyLiteral) -> String {
    match value {
        PyLiteral::Str(s) => s.clone(),
        PyLiteral::Int(digits) => digits.clone(),
        PyLiteral::Float(f) => {
            if f.is_finite() && f.fract() == 0.0 {
                format!("{f:.1}")
            } else {
                f.to_string()
            }
        }
        PyLiteral::Bool(b) => if *b { "True" } else { "False" }.to_string(),
        PyLiteral::None => "None".to_string(),
        PyLiteral::Seq(elements) => elements.iter().map(plain).collect::<Vec<_>>().join("."),
    }
}
