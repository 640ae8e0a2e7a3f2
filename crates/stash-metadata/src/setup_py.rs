//! Name and version extraction from a `setup.py` script.
//!
//! Finds the `setup()` call anywhere in the file and resolves its `name` and
//! `version` keyword arguments. Only literal expressions and variables
//! assigned to literal expressions are supported; anything else (late
//! binding, computed values) deliberately resolves to nothing. The script is
//! expected to contain a single setup call; if there are several, the first
//! one found depth-first is used.

use rustpython_parser::ast::{self, Expr, ExprCall, Ranged, Stmt};
use rustpython_parser::{parse, Mode};
use tracing::{debug, error};

use crate::literal::{any_to_version, is_truthy, literal, PyLiteral};

pub(crate) struct SetupPyMetadata {
    pub(crate) name: Option<String>,
    pub(crate) version: Option<String>,
}

/// Extract `name` and `version` from `setup.py` source text.
pub(crate) fn extract(source: &str) -> SetupPyMetadata {
    let unresolved = SetupPyMetadata {
        name: None,
        version: None,
    };

    let module = match parse(source, Mode::Module, "setup.py") {
        Ok(ast::Mod::Module(module)) => module,
        Ok(_) => return unresolved,
        Err(err) => {
            error!("Syntax error when parsing setup.py: {err}");
            return unresolved;
        }
    };

    let lines = LineIndex::new(source);
    let Some(setup_call) = find_setup_call(&module.body) else {
        error!("File does not seem to have a setup call");
        return unresolved;
    };
    debug!(
        "Found setup call on line {}",
        lines.line_of(start_offset(setup_call.call))
    );

    let name = match setup_kwarg(&setup_call, "name", &lines) {
        Some(PyLiteral::Str(name)) if !name.is_empty() => Some(name),
        _ => {
            debug!("Name in setup.py was either not found, or failed to resolve to a valid string");
            None
        }
    };
    let version = match setup_kwarg(&setup_call, "version", &lines) {
        Some(value) if is_truthy(&value) => Some(any_to_version(&value)),
        _ => {
            debug!("Version in setup.py was either not found, or failed to resolve to a valid value");
            None
        }
    };

    SetupPyMetadata { name, version }
}

/// The setup call plus the chain of block bodies it is nested in, outermost
/// (module body) first. The chain is what variable backtracking walks.
struct SetupCall<'a> {
    call: &'a ExprCall,
    enclosing: Vec<&'a [Stmt]>,
}

fn find_setup_call<'a>(body: &'a [Stmt]) -> Option<SetupCall<'a>> {
    for stmt in body {
        let (exprs, bodies) = stmt_children(stmt);
        for expr in exprs {
            if let Some(call) = find_call_in_expr(expr) {
                return Some(SetupCall {
                    call,
                    enclosing: vec![body],
                });
            }
        }
        for child in bodies {
            if let Some(mut found) = find_setup_call(child) {
                found.enclosing.insert(0, body);
                return Some(found);
            }
        }
    }
    None
}

/// Is this `setup(...)` or `<name>.setup(...)`?
fn is_setup_call(call: &ExprCall) -> bool {
    match &*call.func {
        Expr::Name(name) => name.id.as_str() == "setup",
        Expr::Attribute(attribute) => {
            attribute.attr.as_str() == "setup" && matches!(&*attribute.value, Expr::Name(_))
        }
        _ => false,
    }
}

fn find_call_in_expr<'a>(expr: &'a Expr) -> Option<&'a ExprCall> {
    if let Expr::Call(call) = expr {
        if is_setup_call(call) {
            return Some(call);
        }
    }
    expr_children(expr).into_iter().find_map(find_call_in_expr)
}

/// Resolve a keyword argument of the setup call: a literal is evaluated, a
/// bare variable is backtracked through the enclosing bodies, anything else
/// is unresolved.
fn setup_kwarg(setup_call: &SetupCall<'_>, arg: &str, lines: &LineIndex) -> Option<PyLiteral> {
    let keyword = setup_call
        .call
        .keywords
        .iter()
        .find(|keyword| keyword.arg.as_ref().map(ast::Identifier::as_str) == Some(arg))?;

    if let Some(value) = literal(&keyword.value) {
        debug!("setup kwarg {arg:?} is a literal");
        return Some(value);
    }
    if let Expr::Name(name) = &keyword.value {
        debug!("setup kwarg {arg:?} looks like a variable");
        return backtrack_variable(setup_call, name.id.as_str(), lines);
    }

    error!("setup kwarg {arg:?} is an unsupported expression");
    None
}

/// Walk back up the enclosing bodies, innermost first, and look for the
/// last assignment of the variable before the setup call.
fn backtrack_variable(
    setup_call: &SetupCall<'_>,
    var_name: &str,
    lines: &LineIndex,
) -> Option<PyLiteral> {
    let call_line = lines.line_of(start_offset(setup_call.call));
    debug!("Backtracking up the AST from line {call_line} to find variable {var_name:?}");

    for body in setup_call.enclosing.iter().rev() {
        match top_level_assignment(body, var_name, Some(call_line), lines) {
            Lookup::Found(value) => return Some(value),
            Lookup::NotLiteral => {
                error!("Variable {var_name:?} is not assigned to a literal expression");
                return None;
            }
            Lookup::NotFound => {}
        }
    }

    error!("Variable {var_name:?} not found along the setup call branch");
    None
}

pub(crate) enum Lookup {
    Found(PyLiteral),
    NotLiteral,
    NotFound,
}

/// Scan a statement list, bottom up, for a top-level assignment of `attr` to
/// a literal expression. With `before_line`, only assignments strictly before
/// that line count.
pub(crate) fn top_level_assignment(
    body: &[Stmt],
    attr: &str,
    before_line: Option<usize>,
    lines: &LineIndex,
) -> Lookup {
    for stmt in body.iter().rev() {
        let Stmt::Assign(assign) = stmt else {
            continue;
        };
        if let Some(limit) = before_line {
            if lines.line_of(start_offset(assign)) >= limit {
                continue;
            }
        }
        let is_target = assign.targets.iter().any(
            |target| matches!(target, Expr::Name(name) if name.id.as_str() == attr),
        );
        if !is_target {
            continue;
        }
        return match literal(&assign.value) {
            Some(value) => Lookup::Found(value),
            None => Lookup::NotLiteral,
        };
    }
    Lookup::NotFound
}

/// Map byte offsets to 1-based line numbers.
pub(crate) struct LineIndex(Vec<usize>);

impl LineIndex {
    pub(crate) fn new(source: &str) -> Self {
        let mut starts = vec![0];
        for (index, byte) in source.bytes().enumerate() {
            if byte == b'\n' {
                starts.push(index + 1);
            }
        }
        Self(starts)
    }

    pub(crate) fn line_of(&self, offset: usize) -> usize {
        self.0.partition_point(|&start| start <= offset)
    }
}

fn start_offset(node: &impl Ranged) -> usize {
    u32::from(node.range().start()) as usize
}

/// The expressions and statement lists nested directly in a statement, in
/// syntactic order.
fn stmt_children(stmt: &Stmt) -> (Vec<&Expr>, Vec<&[Stmt]>) {
    let mut exprs: Vec<&Expr> = Vec::new();
    let mut bodies: Vec<&[Stmt]> = Vec::new();
    match stmt {
        Stmt::FunctionDef(inner) => bodies.push(&inner.body),
        Stmt::AsyncFunctionDef(inner) => bodies.push(&inner.body),
        Stmt::ClassDef(inner) => bodies.push(&inner.body),
        Stmt::Return(inner) => exprs.extend(inner.value.as_deref()),
        Stmt::Delete(inner) => exprs.extend(inner.targets.iter()),
        Stmt::Assign(inner) => {
            exprs.extend(inner.targets.iter());
            exprs.push(&inner.value);
        }
        Stmt::AugAssign(inner) => {
            exprs.push(&inner.target);
            exprs.push(&inner.value);
        }
        Stmt::AnnAssign(inner) => {
            exprs.push(&inner.target);
            exprs.extend(inner.value.as_deref());
        }
        Stmt::For(inner) => {
            exprs.push(&inner.target);
            exprs.push(&inner.iter);
            bodies.push(&inner.body);
            bodies.push(&inner.orelse);
        }
        Stmt::AsyncFor(inner) => {
            exprs.push(&inner.target);
            exprs.push(&inner.iter);
            bodies.push(&inner.body);
            bodies.push(&inner.orelse);
        }
        Stmt::While(inner) => {
            exprs.push(&inner.test);
            bodies.push(&inner.body);
            bodies.push(&inner.orelse);
        }
        Stmt::If(inner) => {
            exprs.push(&inner.test);
            bodies.push(&inner.body);
            bodies.push(&inner.orelse);
        }
        Stmt::With(inner) => {
            for item in &inner.items {
                exprs.push(&item.context_expr);
            }
            bodies.push(&inner.body);
        }
        Stmt::AsyncWith(inner) => {
            for item in &inner.items {
                exprs.push(&item.context_expr);
            }
            bodies.push(&inner.body);
        }
        Stmt::Match(inner) => {
            exprs.push(&inner.subject);
            for case in &inner.cases {
                bodies.push(&case.body);
            }
        }
        Stmt::Raise(inner) => {
            exprs.extend(inner.exc.as_deref());
            exprs.extend(inner.cause.as_deref());
        }
        Stmt::Try(inner) => {
            bodies.push(&inner.body);
            for handler in &inner.handlers {
                let ast::ExceptHandler::ExceptHandler(handler) = handler;
                bodies.push(&handler.body);
            }
            bodies.push(&inner.orelse);
            bodies.push(&inner.finalbody);
        }
        Stmt::TryStar(inner) => {
            bodies.push(&inner.body);
            for handler in &inner.handlers {
                let ast::ExceptHandler::ExceptHandler(handler) = handler;
                bodies.push(&handler.body);
            }
            bodies.push(&inner.orelse);
            bodies.push(&inner.finalbody);
        }
        Stmt::Assert(inner) => {
            exprs.push(&inner.test);
            exprs.extend(inner.msg.as_deref());
        }
        Stmt::Expr(inner) => exprs.push(&inner.value),
        _ => {}
    }
    (exprs, bodies)
}

/// The direct subexpressions of an expression, in syntactic order.
fn expr_children(expr: &Expr) -> Vec<&Expr> {
    match expr {
        Expr::BoolOp(inner) => inner.values.iter().collect(),
        Expr::NamedExpr(inner) => vec![&inner.target, &inner.value],
        Expr::BinOp(inner) => vec![&inner.left, &inner.right],
        Expr::UnaryOp(inner) => vec![&inner.operand],
        Expr::Lambda(inner) => vec![&inner.body],
        Expr::IfExp(inner) => vec![&inner.test, &inner.body, &inner.orelse],
        Expr::Dict(inner) => inner.keys.iter().flatten().chain(inner.values.iter()).collect(),
        Expr::Set(inner) => inner.elts.iter().collect(),
        Expr::Await(inner) => vec![&inner.value],
        Expr::Yield(inner) => inner.value.as_deref().into_iter().collect(),
        Expr::YieldFrom(inner) => vec![&inner.value],
        Expr::Compare(inner) => std::iter::once(&*inner.left)
            .chain(inner.comparators.iter())
            .collect(),
        Expr::Call(inner) => std::iter::once(&*inner.func)
            .chain(inner.args.iter())
            .chain(inner.keywords.iter().map(|keyword| &keyword.value))
            .collect(),
        Expr::FormattedValue(inner) => vec![&inner.value],
        Expr::JoinedStr(inner) => inner.values.iter().collect(),
        Expr::Attribute(inner) => vec![&inner.value],
        Expr::Subscript(inner) => vec![&inner.value, &inner.slice],
        Expr::Starred(inner) => vec![&inner.value],
        Expr::List(inner) => inner.elts.iter().collect(),
        Expr::Tuple(inner) => inner.elts.iter().collect(),
        _ => Vec::new(),
    }
}
