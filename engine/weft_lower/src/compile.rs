//! Closure compilation and execution.
//!
//! Each lowered op becomes a boxed closure over its pre-compiled children,
//! so rendering walks no trees and re-parses nothing. An `Executable` is
//! reusable: compile once, render against any number of variable sets.

use std::rc::Rc;

use weft_ir::{BinaryOp, CmpOp, Target, Template, UnaryOp};
use weft_runtime::{
    unpack, Config, Output, Rendered, RuntimeError, RuntimeResult, RuntimeState, SharedInfo,
    TargetPattern, Unpacked, Value, ValueMap,
};

use crate::lower::{lower, CExpr, Code, Lowered};

/// Non-local exit from a compiled op.
enum Flow {
    Break,
    Continue,
    Fail(RuntimeError),
}

impl From<RuntimeError> for Flow {
    fn from(err: RuntimeError) -> Self {
        Flow::Fail(err)
    }
}

/// Execution context threaded through compiled ops.
struct Env<'r> {
    state: &'r mut RuntimeState,
    out: &'r mut Output,
}

type StmtOp = Box<dyn Fn(&mut Env) -> Result<(), Flow>>;
type ExprOp = Box<dyn Fn(&mut Env) -> RuntimeResult<Value>>;

/// A compiled template, ready to render.
pub struct Executable {
    name: Option<String>,
    root: Rc<Vec<StmtOp>>,
    blocks: Vec<(String, Rc<Vec<StmtOp>>)>,
}

/// Compile a lowered template into closure form.
pub fn compile(lowered: &Lowered) -> Executable {
    Executable {
        name: lowered.name.clone(),
        root: Rc::new(compile_body(&lowered.body)),
        blocks: lowered
            .blocks
            .iter()
            .map(|(name, body)| (name.clone(), Rc::new(compile_body(body))))
            .collect(),
    }
}

/// Lower and compile in one step.
pub fn compile_template(template: &Template) -> RuntimeResult<Executable> {
    Ok(compile(&lower(template)?))
}

impl Executable {
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Render against the given variables.
    pub fn render(&self, config: Rc<Config>, vars: ValueMap) -> RuntimeResult<Rendered> {
        let info = SharedInfo::new(config, self.name.clone());
        self.register_blocks(&info);
        let mut state = RuntimeState::with_info(info.clone(), vars);
        let mut out = Output::new();
        {
            let mut env = Env {
                state: &mut state,
                out: &mut out,
            };
            run_ops(&self.root, &mut env).map_err(escaped_flow)?;
        }
        Ok(Rendered {
            output: out.concat(),
            exports: info.exports(),
        })
    }

    fn register_blocks(&self, info: &SharedInfo) {
        for (name, ops) in &self.blocks {
            let ops = ops.clone();
            info.bind_block(name, move |state| {
                let mut out = Output::new();
                {
                    let mut env = Env {
                        state,
                        out: &mut out,
                    };
                    run_ops(&ops, &mut env).map_err(escaped_flow)?;
                }
                Ok(out.into_fragments())
            });
        }
    }
}

/// Control flow reaching the root means the validation in lowering was
/// bypassed; surface it as a failure rather than ignoring it.
fn escaped_flow(flow: Flow) -> RuntimeError {
    match flow {
        Flow::Fail(err) => err,
        Flow::Break | Flow::Continue => {
            RuntimeError::unsupported("`break` or `continue` outside a loop")
        }
    }
}

fn run_ops(ops: &[StmtOp], env: &mut Env) -> Result<(), Flow> {
    for op in ops {
        op(env)?;
    }
    Ok(())
}

fn compile_body(codes: &[Code]) -> Vec<StmtOp> {
    codes.iter().map(compile_stmt).collect()
}

fn compile_stmt(code: &Code) -> StmtOp {
    match code {
        Code::Emit(text) => {
            let text = text.clone();
            Box::new(move |env| {
                env.out.push_shared(text.clone());
                Ok(())
            })
        }
        Code::EmitExpr(expr) => {
            let op = compile_expr(expr);
            Box::new(move |env| {
                let value = op(env)?;
                env.out.push(value.to_string());
                Ok(())
            })
        }
        Code::Assign { target, value } => {
            let target = target.clone();
            let op = compile_expr(value);
            Box::new(move |env| {
                let value = op(env)?;
                bind_target(&target, &value, env.state)?;
                Ok(())
            })
        }
        Code::If { test, body, orelse } => {
            let test = compile_expr(test);
            let body = compile_body(body);
            let orelse = compile_body(orelse);
            Box::new(move |env| {
                let branch = if test(env)?.is_truthy() { &body } else { &orelse };
                env.state.push_frame();
                let result = run_ops(branch, env);
                env.state.pop_frame();
                result
            })
        }
        Code::For {
            target,
            iter,
            body,
            orelse,
        } => {
            let target = target.clone();
            let iter = compile_expr(iter);
            let body = compile_body(body);
            let orelse = compile_body(orelse);
            Box::new(move |env| {
                let config = env.state.config().clone();
                let parent = if config.forloop_parent_access {
                    Some(env.state.lookup_var(&config.forloop_accessor))
                } else {
                    None
                };
                let iterable = iter(env)?;
                let items = iterable.try_iter().map_err(Flow::from)?;
                let loop_ref = config.wrap_loop(items, parent);

                env.state.push_frame();
                let mut iterated = false;
                let result = loop {
                    let item = loop_ref.borrow_mut().next_item();
                    let Some(item) = item else {
                        break Ok(());
                    };
                    iterated = true;
                    env.state
                        .assign_var(&config.forloop_accessor, Value::Loop(loop_ref.clone()));
                    if let Err(err) = bind_target(&target, &item, env.state) {
                        break Err(Flow::Fail(err));
                    }
                    match run_ops(&body, env) {
                        Ok(()) | Err(Flow::Continue) => {}
                        Err(Flow::Break) => break Ok(()),
                        Err(fail) => break Err(fail),
                    }
                };
                let result = match result {
                    Ok(()) if !iterated => run_ops(&orelse, env),
                    other => other,
                };
                env.state.pop_frame();
                result
            })
        }
        Code::Break => Box::new(|_env| Err(Flow::Break)),
        Code::Continue => Box::new(|_env| Err(Flow::Continue)),
        Code::Scope(body) => {
            let body = compile_body(body);
            Box::new(move |env| {
                env.state.push_frame();
                let result = run_ops(&body, env);
                env.state.pop_frame();
                result
            })
        }
        Code::CallBlock(name) => {
            let name = name.clone();
            Box::new(move |env| {
                let fragments = env.state.evaluate_block(&name, 1)?;
                env.out.extend(fragments);
                Ok(())
            })
        }
        Code::FilterRegion { name, args, body } => {
            let name = name.clone();
            let args = compile_exprs(args);
            let body = compile_body(body);
            Box::new(move |env| {
                let mut sub = Output::new();
                env.state.push_frame();
                let result = {
                    let mut inner = Env {
                        state: &mut *env.state,
                        out: &mut sub,
                    };
                    run_ops(&body, &mut inner)
                };
                env.state.pop_frame();
                result?;
                let args = eval_all(&args, env)?;
                let filtered =
                    env.state
                        .info()
                        .call_filter(&name, Value::str(sub.concat()), &args)?;
                env.out.push(filtered.to_string());
                Ok(())
            })
        }
        Code::Discard(expr) => {
            let op = compile_expr(expr);
            Box::new(move |env| {
                op(env)?;
                Ok(())
            })
        }
    }
}

fn compile_exprs(exprs: &[CExpr]) -> Vec<ExprOp> {
    exprs.iter().map(compile_expr).collect()
}

fn eval_all(ops: &[ExprOp], env: &mut Env) -> RuntimeResult<Vec<Value>> {
    ops.iter().map(|op| op(env)).collect()
}

fn compile_expr(expr: &CExpr) -> ExprOp {
    match expr {
        CExpr::Const(value) => {
            let value = value.clone();
            Box::new(move |_env| Ok(value.clone()))
        }
        CExpr::Name(name) => {
            let name = name.clone();
            Box::new(move |env| Ok(env.state.lookup_var(&name)))
        }
        CExpr::Getattr { object, attr } => {
            let object = compile_expr(object);
            let attr = compile_expr(attr);
            Box::new(move |env| {
                let object = object(env)?;
                match attr(env)? {
                    Value::Str(name) => Ok(object.get_attr(&name)),
                    other => Ok(object.get_item(&other)),
                }
            })
        }
        CExpr::Getitem { object, index } => {
            let object = compile_expr(object);
            let index = compile_expr(index);
            Box::new(move |env| {
                let object = object(env)?;
                let index = index(env)?;
                Ok(object.get_item(&index))
            })
        }
        CExpr::Call { callee, args } => {
            let callee = compile_expr(callee);
            let args = compile_exprs(args);
            Box::new(move |env| {
                let callee = callee(env)?;
                let args = eval_all(&args, env)?;
                callee.call(&args)
            })
        }
        CExpr::Tuple(items) => {
            let items = compile_exprs(items);
            Box::new(move |env| Ok(Value::tuple(eval_all(&items, env)?)))
        }
        CExpr::List(items) => {
            let items = compile_exprs(items);
            Box::new(move |env| Ok(Value::list(eval_all(&items, env)?)))
        }
        CExpr::Map(pairs) => {
            let pairs: Vec<(ExprOp, ExprOp)> = pairs
                .iter()
                .map(|(k, v)| (compile_expr(k), compile_expr(v)))
                .collect();
            Box::new(move |env| {
                let mut entries = ValueMap::default();
                for (key, value) in &pairs {
                    let key = key(env)?.to_string();
                    entries.insert(key, value(env)?);
                }
                Ok(Value::map(entries))
            })
        }
        CExpr::Binary { op, left, right } => {
            let op = *op;
            let left = compile_expr(left);
            let right = compile_expr(right);
            Box::new(move |env| {
                let left = left(env)?;
                let right = right(env)?;
                match op {
                    BinaryOp::Add => left.add(&right),
                    BinaryOp::Sub => left.sub(&right),
                    BinaryOp::Mul => left.mul(&right),
                    BinaryOp::Div => left.div(&right),
                    BinaryOp::FloorDiv => left.floordiv(&right),
                    BinaryOp::Mod => left.rem(&right),
                    BinaryOp::Pow => left.pow(&right),
                }
            })
        }
        CExpr::Unary { op, operand } => {
            let op = *op;
            let operand = compile_expr(operand);
            Box::new(move |env| {
                let operand = operand(env)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!operand.is_truthy())),
                    UnaryOp::Neg => operand.neg(),
                    UnaryOp::Pos => operand.pos(),
                }
            })
        }
        CExpr::And { left, right } => {
            let left = compile_expr(left);
            let right = compile_expr(right);
            Box::new(move |env| {
                if left(env)?.is_truthy() {
                    right(env)
                } else {
                    Ok(Value::Bool(false))
                }
            })
        }
        CExpr::Or { left, right } => {
            let left = compile_expr(left);
            let right = compile_expr(right);
            Box::new(move |env| {
                let left = left(env)?;
                if left.is_truthy() {
                    Ok(left)
                } else {
                    right(env)
                }
            })
        }
        CExpr::Compare { expr, ops } => {
            let first = compile_expr(expr);
            let ops: Vec<(CmpOp, ExprOp)> =
                ops.iter().map(|(op, e)| (*op, compile_expr(e))).collect();
            Box::new(move |env| {
                let mut prev = first(env)?;
                for (op, next) in &ops {
                    let next = next(env)?;
                    if !compare(*op, &prev, &next)? {
                        return Ok(Value::Bool(false));
                    }
                    prev = next;
                }
                Ok(Value::Bool(true))
            })
        }
        CExpr::Cond {
            test,
            then,
            otherwise,
        } => {
            let test = compile_expr(test);
            let then = compile_expr(then);
            let otherwise = compile_expr(otherwise);
            Box::new(move |env| {
                if test(env)?.is_truthy() {
                    then(env)
                } else {
                    otherwise(env)
                }
            })
        }
        CExpr::Filter { value, name, args } => {
            let value = compile_expr(value);
            let name = name.clone();
            let args = compile_exprs(args);
            Box::new(move |env| {
                let value = value(env)?;
                let args = eval_all(&args, env)?;
                env.state.info().call_filter(&name, value, &args)
            })
        }
        CExpr::Test { value, name, args } => {
            let value = compile_expr(value);
            let name = name.clone();
            let args = compile_exprs(args);
            Box::new(move |env| {
                let value = value(env)?;
                let args = eval_all(&args, env)?;
                env.state.info().call_test(&name, value, &args)
            })
        }
    }
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> RuntimeResult<bool> {
    use std::cmp::Ordering;
    let ordered =
        |accept: fn(Ordering) -> bool| Ok(left.partial_cmp_value(right).is_some_and(accept));
    match op {
        CmpOp::Eq => Ok(left == right),
        CmpOp::Ne => Ok(left != right),
        CmpOp::Lt => ordered(Ordering::is_lt),
        CmpOp::LtEq => ordered(Ordering::is_le),
        CmpOp::Gt => ordered(Ordering::is_gt),
        CmpOp::GtEq => ordered(Ordering::is_ge),
        CmpOp::In => right.contains(left),
        CmpOp::NotIn => Ok(!right.contains(left)?),
    }
}

fn bind_target(target: &Target, value: &Value, state: &mut RuntimeState) -> RuntimeResult<()> {
    match target {
        Target::Name(name) => {
            state.assign_var(name, value.clone());
            Ok(())
        }
        Target::Tuple(items) => {
            let patterns: Vec<TargetPattern> = items.iter().map(to_pattern).collect();
            let config = state.config().clone();
            let values = match unpack(&config, value, &patterns)? {
                Unpacked::Aligned(values) => values,
                Unpacked::Raw(values) => {
                    if values.len() != items.len() {
                        return Err(RuntimeError::ShapeMismatch {
                            expected: items.len(),
                            got: values.len(),
                        });
                    }
                    values
                }
            };
            for (item, value) in items.iter().zip(values) {
                bind_target(item, &value, state)?;
            }
            Ok(())
        }
    }
}

fn to_pattern(target: &Target) -> TargetPattern {
    match target {
        Target::Name(name) => TargetPattern::Leaf(name.clone()),
        Target::Tuple(items) => TargetPattern::Group(items.iter().map(to_pattern).collect()),
    }
}
