//! Template syntax tree nodes.
//!
//! Boxed recursive enums, one variant per construct. A front-end builds these
//! from template source; the interpreter walks them directly and the lowering
//! backend transforms them into an executable artifact. Expression nodes
//! evaluate to values, statement nodes execute for effect and output.

use std::fmt;

/// Literal constant embedded in the tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Const {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl From<i64> for Const {
    fn from(v: i64) -> Self {
        Const::Int(v)
    }
}

impl From<bool> for Const {
    fn from(v: bool) -> Self {
        Const::Bool(v)
    }
}

impl From<f64> for Const {
    fn from(v: f64) -> Self {
        Const::Float(v)
    }
}

impl From<&str> for Const {
    fn from(v: &str) -> Self {
        Const::Str(v.to_owned())
    }
}

/// Binary arithmetic operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

/// Unary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Pos,
    Neg,
    Not,
}

/// Comparison operators, including membership.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    LtEq,
    Gt,
    GtEq,
    In,
    NotIn,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::LtEq => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtEq => ">=",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
        };
        f.write_str(s)
    }
}

/// One step of a chained comparison (`a < b < c` has two operands).
#[derive(Clone, Debug, PartialEq)]
pub struct Operand {
    pub op: CmpOp,
    pub expr: Expr,
}

/// Expression node.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Literal constant.
    Const(Const),
    /// Raw template text between tags.
    TemplateData(String),
    /// Variable reference.
    Name(String),
    /// Attribute access: `obj.attr` (attr itself is an expression).
    Getattr { object: Box<Expr>, attr: Box<Expr> },
    /// Subscript access: `obj[index]`.
    Getitem { object: Box<Expr>, index: Box<Expr> },
    /// Call with positional arguments.
    Call { callee: Box<Expr>, args: Vec<Expr> },
    /// Tuple display.
    Tuple(Vec<Expr>),
    /// List display.
    List(Vec<Expr>),
    /// Map display (ordered key/value pairs).
    Map(Vec<(Expr, Expr)>),
    /// Binary arithmetic.
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Unary operation.
    Unary { op: UnaryOp, operand: Box<Expr> },
    /// Short-circuit conjunction.
    And { left: Box<Expr>, right: Box<Expr> },
    /// Short-circuit disjunction.
    Or { left: Box<Expr>, right: Box<Expr> },
    /// Chained comparison: `expr op0 e0 op1 e1 ...`.
    Compare { expr: Box<Expr>, ops: Vec<Operand> },
    /// Conditional expression: `then if test else otherwise`.
    Cond {
        test: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    /// Filter application: `value | name(args...)`.
    Filter {
        value: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },
    /// Test application: `value is name(args...)`.
    Test {
        value: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },
}

impl Expr {
    /// Literal constant node.
    pub fn constant(c: impl Into<Const>) -> Self {
        Expr::Const(c.into())
    }

    /// Variable reference node.
    pub fn name(name: &str) -> Self {
        Expr::Name(name.to_owned())
    }

    /// Attribute access with a constant attribute name.
    pub fn attr(object: Expr, attr: &str) -> Self {
        Expr::Getattr {
            object: Box::new(object),
            attr: Box::new(Expr::constant(attr)),
        }
    }

    /// Call node.
    pub fn call(callee: Expr, args: Vec<Expr>) -> Self {
        Expr::Call {
            callee: Box::new(callee),
            args,
        }
    }

    /// Binary arithmetic node.
    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Chained comparison node.
    pub fn compare(expr: Expr, ops: Vec<Operand>) -> Self {
        Expr::Compare {
            expr: Box::new(expr),
            ops,
        }
    }
}

/// Destructuring shape on the left side of an assignment or loop binding.
///
/// A leaf is a variable name; an interior node is an ordered sequence of
/// sub-targets, mirroring nested destructuring like `(a, (b, c))`.
#[derive(Clone, Debug, PartialEq)]
pub enum Target {
    Name(String),
    Tuple(Vec<Target>),
}

impl Target {
    /// Leaf target for a plain name.
    pub fn name(name: &str) -> Self {
        Target::Name(name.to_owned())
    }
}

/// One imported name in a from-import, with optional alias.
#[derive(Clone, Debug, PartialEq)]
pub struct ImportItem {
    pub name: String,
    pub alias: Option<String>,
}

impl ImportItem {
    pub fn plain(name: &str) -> Self {
        ImportItem {
            name: name.to_owned(),
            alias: None,
        }
    }

    pub fn aliased(name: &str, alias: &str) -> Self {
        ImportItem {
            name: name.to_owned(),
            alias: Some(alias.to_owned()),
        }
    }
}

/// Statement node.
#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    /// Emit the rendered form of each expression, in order.
    Output(Vec<Expr>),
    /// Conditional with optional else-body.
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    /// Loop construct with optional else-body (runs when nothing iterated).
    For {
        target: Target,
        iter: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    /// Break out of the nearest enclosing loop.
    Break,
    /// Continue with the next iteration of the nearest enclosing loop.
    Continue,
    /// Destructuring assignment. Toplevel assignments are exported.
    Assign { target: Target, value: Expr },
    /// Evaluate an expression for its side effects, discarding the result.
    ExprStmt(Expr),
    /// Artificial scope: the body runs in a fresh frame.
    Scope(Vec<Stmt>),
    /// Named block, dispatched through the render's block registry.
    Block { name: String, body: Vec<Stmt> },
    /// Replace the rest of this template with the named parent template.
    Extends(Expr),
    /// Render another template in place.
    Include {
        template: Expr,
        ignore_missing: bool,
    },
    /// Import another template's exports as a module value.
    Import { template: Expr, target: Target },
    /// Import selected exports from another template.
    FromImport {
        template: Expr,
        names: Vec<ImportItem>,
    },
    /// Render the body, then pass the joined text through a filter.
    FilterBlock {
        name: String,
        args: Vec<Expr>,
        body: Vec<Stmt>,
    },
}

/// A parsed template: optional source name plus the statement body.
#[derive(Clone, Debug, PartialEq)]
pub struct Template {
    pub name: Option<String>,
    pub body: Vec<Stmt>,
}

impl Template {
    pub fn new(body: Vec<Stmt>) -> Self {
        Template { name: None, body }
    }

    pub fn named(name: &str, body: Vec<Stmt>) -> Self {
        Template {
            name: Some(name.to_owned()),
            body,
        }
    }

    /// Collect every `Block` statement in the tree, in source order.
    ///
    /// Blocks may appear at any nesting depth; inheritance registers all of
    /// them up front, so the walk descends into every statement body.
    pub fn blocks(&self) -> Vec<(&str, &[Stmt])> {
        let mut found = Vec::new();
        collect_blocks(&self.body, &mut found);
        found
    }
}

fn collect_blocks<'a>(stmts: &'a [Stmt], found: &mut Vec<(&'a str, &'a [Stmt])>) {
    for stmt in stmts {
        match stmt {
            Stmt::Block { name, body } => {
                found.push((name.as_str(), body.as_slice()));
                collect_blocks(body, found);
            }
            Stmt::If { body, orelse, .. } | Stmt::For { body, orelse, .. } => {
                collect_blocks(body, found);
                collect_blocks(orelse, found);
            }
            Stmt::Scope(body) | Stmt::FilterBlock { body, .. } => {
                collect_blocks(body, found);
            }
            _ => {}
        }
    }
}
