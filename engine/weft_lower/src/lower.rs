//! Tree lowering.
//!
//! Turns a template tree into a flat, pre-validated op tree: constants are
//! converted to runtime values up front, adjacent constant output is fused
//! into single emit chunks, block bodies are split out for registration,
//! and misplaced control statements are rejected before anything runs.
//!
//! This backend covers the self-contained statement subset. Template
//! inheritance, includes and imports need the template lookup machinery of
//! the tree-walking backend and are rejected here with a compile error.

use std::rc::Rc;

use weft_ir::{BinaryOp, CmpOp, Const, Expr, Stmt, Target, Template, UnaryOp};
use weft_runtime::{RuntimeError, RuntimeResult, Value};

/// Expression with constants folded to runtime values.
#[derive(Clone, Debug)]
pub enum CExpr {
    Const(Value),
    Name(String),
    Getattr {
        object: Box<CExpr>,
        attr: Box<CExpr>,
    },
    Getitem {
        object: Box<CExpr>,
        index: Box<CExpr>,
    },
    Call {
        callee: Box<CExpr>,
        args: Vec<CExpr>,
    },
    Tuple(Vec<CExpr>),
    List(Vec<CExpr>),
    Map(Vec<(CExpr, CExpr)>),
    Binary {
        op: BinaryOp,
        left: Box<CExpr>,
        right: Box<CExpr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<CExpr>,
    },
    And {
        left: Box<CExpr>,
        right: Box<CExpr>,
    },
    Or {
        left: Box<CExpr>,
        right: Box<CExpr>,
    },
    Compare {
        expr: Box<CExpr>,
        ops: Vec<(CmpOp, CExpr)>,
    },
    Cond {
        test: Box<CExpr>,
        then: Box<CExpr>,
        otherwise: Box<CExpr>,
    },
    Filter {
        value: Box<CExpr>,
        name: String,
        args: Vec<CExpr>,
    },
    Test {
        value: Box<CExpr>,
        name: String,
        args: Vec<CExpr>,
    },
}

/// Lowered statement op.
#[derive(Clone, Debug)]
pub enum Code {
    /// Constant output chunk, fused across adjacent constant expressions.
    Emit(Rc<str>),
    /// Dynamic output.
    EmitExpr(CExpr),
    Assign {
        target: Target,
        value: CExpr,
    },
    If {
        test: CExpr,
        body: Vec<Code>,
        orelse: Vec<Code>,
    },
    For {
        target: Target,
        iter: CExpr,
        body: Vec<Code>,
        orelse: Vec<Code>,
    },
    Break,
    Continue,
    Scope(Vec<Code>),
    /// Dispatch the named block at the most derived level.
    CallBlock(String),
    FilterRegion {
        name: String,
        args: Vec<CExpr>,
        body: Vec<Code>,
    },
    /// Evaluate for side effects, discarding the value.
    Discard(CExpr),
}

/// Lowered form of one template: the toplevel body plus the extracted block
/// bodies in registration order.
#[derive(Clone, Debug)]
pub struct Lowered {
    pub name: Option<String>,
    pub body: Vec<Code>,
    pub blocks: Vec<(String, Vec<Code>)>,
}

/// Lower a template tree, validating it against this backend's subset.
pub fn lower(template: &Template) -> RuntimeResult<Lowered> {
    let mut ctx = LowerCtx { blocks: Vec::new() };
    let body = ctx.lower_body(&template.body, 0)?;
    tracing::debug!(
        name = template.name.as_deref(),
        ops = body.len(),
        blocks = ctx.blocks.len(),
        "lowered template"
    );
    Ok(Lowered {
        name: template.name.clone(),
        body,
        blocks: ctx.blocks,
    })
}

struct LowerCtx {
    blocks: Vec<(String, Vec<Code>)>,
}

impl LowerCtx {
    fn lower_body(&mut self, stmts: &[Stmt], loop_depth: usize) -> RuntimeResult<Vec<Code>> {
        let mut out = Vec::new();
        for stmt in stmts {
            match stmt {
                Stmt::Output(exprs) => {
                    for expr in exprs {
                        match expr {
                            Expr::TemplateData(text) => push_emit(&mut out, text),
                            Expr::Const(c) => push_emit(&mut out, &const_value(c).to_string()),
                            other => out.push(Code::EmitExpr(self.lower_expr(other)?)),
                        }
                    }
                }
                Stmt::If { test, body, orelse } => out.push(Code::If {
                    test: self.lower_expr(test)?,
                    body: self.lower_body(body, loop_depth)?,
                    orelse: self.lower_body(orelse, loop_depth)?,
                }),
                Stmt::For {
                    target,
                    iter,
                    body,
                    orelse,
                } => out.push(Code::For {
                    target: target.clone(),
                    iter: self.lower_expr(iter)?,
                    body: self.lower_body(body, loop_depth + 1)?,
                    orelse: self.lower_body(orelse, loop_depth)?,
                }),
                Stmt::Break => {
                    if loop_depth == 0 {
                        return Err(RuntimeError::compile("`break` outside a loop"));
                    }
                    out.push(Code::Break);
                }
                Stmt::Continue => {
                    if loop_depth == 0 {
                        return Err(RuntimeError::compile("`continue` outside a loop"));
                    }
                    out.push(Code::Continue);
                }
                Stmt::Assign { target, value } => out.push(Code::Assign {
                    target: target.clone(),
                    value: self.lower_expr(value)?,
                }),
                Stmt::ExprStmt(expr) => out.push(Code::Discard(self.lower_expr(expr)?)),
                Stmt::Scope(body) => out.push(Code::Scope(self.lower_body(body, loop_depth)?)),
                Stmt::Block { name, body } => {
                    // reserve the slot first so nested blocks land after
                    // their enclosing block, matching registration order
                    let slot = self.blocks.len();
                    self.blocks.push((name.clone(), Vec::new()));
                    let body = self.lower_body(body, 0)?;
                    self.blocks[slot].1 = body;
                    out.push(Code::CallBlock(name.clone()));
                }
                Stmt::FilterBlock { name, args, body } => out.push(Code::FilterRegion {
                    name: name.clone(),
                    args: self.lower_exprs(args)?,
                    body: self.lower_body(body, loop_depth)?,
                }),
                Stmt::Extends(_) => {
                    return Err(RuntimeError::compile(
                        "template inheritance is not supported by the compiling backend",
                    ));
                }
                Stmt::Include { .. } => {
                    return Err(RuntimeError::compile(
                        "includes are not supported by the compiling backend",
                    ));
                }
                Stmt::Import { .. } | Stmt::FromImport { .. } => {
                    return Err(RuntimeError::compile(
                        "imports are not supported by the compiling backend",
                    ));
                }
            }
        }
        Ok(out)
    }

    fn lower_exprs(&mut self, exprs: &[Expr]) -> RuntimeResult<Vec<CExpr>> {
        exprs.iter().map(|e| self.lower_expr(e)).collect()
    }

    fn lower_expr(&mut self, expr: &Expr) -> RuntimeResult<CExpr> {
        Ok(match expr {
            Expr::Const(c) => CExpr::Const(const_value(c)),
            Expr::TemplateData(text) => CExpr::Const(Value::str(text)),
            Expr::Name(name) => CExpr::Name(name.clone()),
            Expr::Getattr { object, attr } => CExpr::Getattr {
                object: Box::new(self.lower_expr(object)?),
                attr: Box::new(self.lower_expr(attr)?),
            },
            Expr::Getitem { object, index } => CExpr::Getitem {
                object: Box::new(self.lower_expr(object)?),
                index: Box::new(self.lower_expr(index)?),
            },
            Expr::Call { callee, args } => CExpr::Call {
                callee: Box::new(self.lower_expr(callee)?),
                args: self.lower_exprs(args)?,
            },
            Expr::Tuple(items) => CExpr::Tuple(self.lower_exprs(items)?),
            Expr::List(items) => CExpr::List(self.lower_exprs(items)?),
            Expr::Map(pairs) => {
                let mut lowered = Vec::with_capacity(pairs.len());
                for (key, value) in pairs {
                    lowered.push((self.lower_expr(key)?, self.lower_expr(value)?));
                }
                CExpr::Map(lowered)
            }
            Expr::Binary { op, left, right } => CExpr::Binary {
                op: *op,
                left: Box::new(self.lower_expr(left)?),
                right: Box::new(self.lower_expr(right)?),
            },
            Expr::Unary { op, operand } => CExpr::Unary {
                op: *op,
                operand: Box::new(self.lower_expr(operand)?),
            },
            Expr::And { left, right } => CExpr::And {
                left: Box::new(self.lower_expr(left)?),
                right: Box::new(self.lower_expr(right)?),
            },
            Expr::Or { left, right } => CExpr::Or {
                left: Box::new(self.lower_expr(left)?),
                right: Box::new(self.lower_expr(right)?),
            },
            Expr::Compare { expr, ops } => {
                let mut lowered = Vec::with_capacity(ops.len());
                for operand in ops {
                    lowered.push((operand.op, self.lower_expr(&operand.expr)?));
                }
                CExpr::Compare {
                    expr: Box::new(self.lower_expr(expr)?),
                    ops: lowered,
                }
            }
            Expr::Cond {
                test,
                then,
                otherwise,
            } => CExpr::Cond {
                test: Box::new(self.lower_expr(test)?),
                then: Box::new(self.lower_expr(then)?),
                otherwise: Box::new(self.lower_expr(otherwise)?),
            },
            Expr::Filter { value, name, args } => CExpr::Filter {
                value: Box::new(self.lower_expr(value)?),
                name: name.clone(),
                args: self.lower_exprs(args)?,
            },
            Expr::Test { value, name, args } => CExpr::Test {
                value: Box::new(self.lower_expr(value)?),
                name: name.clone(),
                args: self.lower_exprs(args)?,
            },
        })
    }
}

/// Append constant output, fusing with a trailing emit chunk.
fn push_emit(out: &mut Vec<Code>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Code::Emit(prev)) = out.last_mut() {
        let mut fused = String::with_capacity(prev.len() + text.len());
        fused.push_str(prev);
        fused.push_str(text);
        *prev = Rc::from(fused.as_str());
        return;
    }
    out.push(Code::Emit(Rc::from(text)));
}

pub(crate) fn const_value(c: &Const) -> Value {
    match c {
        Const::None => Value::None,
        Const::Bool(b) => Value::Bool(*b),
        Const::Int(i) => Value::Int(*i),
        Const::Float(f) => Value::Float(*f),
        Const::Str(s) => Value::str(s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_output_fuses() {
        let template = Template::new(vec![
            Stmt::Output(vec![
                Expr::TemplateData("a".to_owned()),
                Expr::constant(42),
                Expr::TemplateData("b".to_owned()),
            ]),
            Stmt::Output(vec![Expr::TemplateData("c".to_owned())]),
        ]);
        let lowered = lower(&template).unwrap();
        assert_eq!(lowered.body.len(), 1);
        match &lowered.body[0] {
            Code::Emit(text) => assert_eq!(text.as_ref(), "a42bc"),
            other => panic!("expected fused emit, got {other:?}"),
        }
    }

    #[test]
    fn test_dynamic_output_splits_chunks() {
        let template = Template::new(vec![Stmt::Output(vec![
            Expr::TemplateData("a".to_owned()),
            Expr::name("x"),
            Expr::TemplateData("b".to_owned()),
        ])]);
        let lowered = lower(&template).unwrap();
        assert_eq!(lowered.body.len(), 3);
        assert!(matches!(&lowered.body[1], Code::EmitExpr(CExpr::Name(n)) if n == "x"));
    }

    #[test]
    fn test_blocks_extracted_in_source_order() {
        let template = Template::new(vec![Stmt::Block {
            name: "outer".to_owned(),
            body: vec![Stmt::Block {
                name: "inner".to_owned(),
                body: vec![],
            }],
        }]);
        let lowered = lower(&template).unwrap();
        let names: Vec<&str> = lowered.blocks.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["outer", "inner"]);
        assert!(matches!(&lowered.body[0], Code::CallBlock(n) if n == "outer"));
    }

    #[test]
    fn test_break_outside_loop_rejected() {
        let template = Template::new(vec![Stmt::Break]);
        assert!(matches!(
            lower(&template).unwrap_err(),
            RuntimeError::Compile { .. }
        ));

        // a block body starts a fresh control-flow context
        let in_block = Template::new(vec![Stmt::For {
            target: Target::name("x"),
            iter: Expr::name("seq"),
            body: vec![Stmt::Block {
                name: "b".to_owned(),
                body: vec![Stmt::Break],
            }],
            orelse: vec![],
        }]);
        assert!(matches!(
            lower(&in_block).unwrap_err(),
            RuntimeError::Compile { .. }
        ));
    }

    #[test]
    fn test_break_inside_loop_accepted() {
        let template = Template::new(vec![Stmt::For {
            target: Target::name("x"),
            iter: Expr::name("seq"),
            body: vec![Stmt::Break],
            orelse: vec![],
        }]);
        assert!(lower(&template).is_ok());
    }

    #[test]
    fn test_inheritance_statements_rejected() {
        let extends = Template::new(vec![Stmt::Extends(Expr::constant("base.html"))]);
        assert!(matches!(
            lower(&extends).unwrap_err(),
            RuntimeError::Compile { .. }
        ));

        let include = Template::new(vec![Stmt::Include {
            template: Expr::constant("part.html"),
            ignore_missing: false,
        }]);
        assert!(matches!(
            lower(&include).unwrap_err(),
            RuntimeError::Compile { .. }
        ));
    }
}
