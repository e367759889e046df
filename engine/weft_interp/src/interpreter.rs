//! Tree-walking execution.
//!
//! The interpreter walks statement bodies directly against a
//! `weft_runtime::RuntimeState`. Control flow travels as a `Signal` on the
//! error channel; real failures ride along in `Signal::Fail`.

use std::rc::Rc;

use weft_ir::{BinaryOp, CmpOp, Const, Expr, Stmt, Target, Template, UnaryOp};
use weft_runtime::{
    unpack, Config, DeriveBehavior, Output, Rendered, RuntimeError, RuntimeResult, RuntimeState,
    SharedInfo, TargetPattern, TemplateHandle, TemplateLookup, TemplateRef, Unpacked, Value,
    ValueMap,
};

use crate::loader::TemplateSource;

/// Non-local exit from statement execution.
enum Signal {
    /// `break` reached the innermost loop.
    Break,
    /// `continue` reached the innermost loop.
    Continue,
    /// The rest of the template was replaced by a parent render.
    Stop,
    /// A real runtime failure.
    Fail(RuntimeError),
}

impl From<RuntimeError> for Signal {
    fn from(err: RuntimeError) -> Self {
        Signal::Fail(err)
    }
}

type Exec = Result<(), Signal>;

/// Tree-walking backend.
#[derive(Clone)]
pub struct Interpreter {
    config: Rc<Config>,
    loader: Option<Rc<dyn TemplateLookup>>,
}

impl Interpreter {
    pub fn new(config: Rc<Config>) -> Self {
        Interpreter {
            config,
            loader: None,
        }
    }

    /// Attach the template lookup service used by inheritance, includes and
    /// imports.
    pub fn with_loader(mut self, loader: Rc<dyn TemplateLookup>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Render a template against the given variables.
    pub fn render(&self, template: &Template, vars: ValueMap) -> RuntimeResult<Rendered> {
        tracing::debug!(name = template.name.as_deref(), "rendering template");
        let info = SharedInfo::new(self.config.clone(), template.name.clone());
        if let Some(loader) = &self.loader {
            info.set_loader(loader.clone());
        }
        let mut out = Output::new();
        self.render_into(template, info.clone(), vars, &mut out)?;
        Ok(Rendered {
            output: out.concat(),
            exports: info.exports(),
        })
    }

    /// Render a template body into an existing output buffer, registering
    /// its blocks into the given bookkeeping first.
    fn render_into(
        &self,
        template: &Template,
        info: SharedInfo,
        vars: ValueMap,
        out: &mut Output,
    ) -> RuntimeResult<()> {
        self.register_blocks(template, &info);
        let mut state = RuntimeState::with_info(info, vars);
        match self.exec_body(&template.body, &mut state, out) {
            Ok(()) | Err(Signal::Stop) => Ok(()),
            Err(Signal::Break | Signal::Continue) => Err(RuntimeError::unsupported(
                "`break` or `continue` outside a loop",
            )),
            Err(Signal::Fail(err)) => Err(err),
        }
    }

    /// Register every block of the template, outermost first. Registration
    /// order across an inheritance chain is override order: the template
    /// that registers first (the most derived one) wins at level 1.
    fn register_blocks(&self, template: &Template, info: &SharedInfo) {
        for (name, body) in template.blocks() {
            let body: Rc<Vec<Stmt>> = Rc::new(body.to_vec());
            let interp = self.clone();
            info.bind_block(name, move |state| {
                let mut out = Output::new();
                match interp.exec_body(&body, state, &mut out) {
                    Ok(()) => Ok(out.into_fragments()),
                    Err(Signal::Fail(err)) => Err(err),
                    Err(_) => Err(RuntimeError::unsupported("control flow escaped a block")),
                }
            });
        }
    }

    fn exec_body(&self, stmts: &[Stmt], state: &mut RuntimeState, out: &mut Output) -> Exec {
        for stmt in stmts {
            self.exec(stmt, state, out)?;
        }
        Ok(())
    }

    fn exec(&self, stmt: &Stmt, state: &mut RuntimeState, out: &mut Output) -> Exec {
        match stmt {
            Stmt::Output(exprs) => {
                for expr in exprs {
                    let value = self.eval(expr, state)?;
                    out.push(value.to_string());
                }
                Ok(())
            }
            Stmt::If { test, body, orelse } => {
                let branch = if self.eval(test, state)?.is_truthy() {
                    body
                } else {
                    orelse
                };
                state.push_frame();
                let result = self.exec_body(branch, state, out);
                state.pop_frame();
                result
            }
            Stmt::For {
                target,
                iter,
                body,
                orelse,
            } => self.exec_for(target, iter, body, orelse, state, out),
            Stmt::Break => Err(Signal::Break),
            Stmt::Continue => Err(Signal::Continue),
            Stmt::Assign { target, value } => {
                let value = self.eval(value, state)?;
                self.bind_target(target, &value, state)?;
                Ok(())
            }
            Stmt::ExprStmt(expr) => {
                self.eval(expr, state)?;
                Ok(())
            }
            Stmt::Scope(body) => {
                state.push_frame();
                let result = self.exec_body(body, state, out);
                state.pop_frame();
                result
            }
            Stmt::Block { name, .. } => {
                let fragments = state.evaluate_block(name, 1)?;
                out.extend(fragments);
                Ok(())
            }
            Stmt::Extends(expr) => {
                let name = self.eval(expr, state)?.to_string();
                let handle = state.get_template(&name)?;
                let source = tree_template(&handle)?;
                let info = state
                    .derive_info(DeriveBehavior::Extends, source.name().map(str::to_owned));
                self.render_into(source.template(), info, state.capture(), out)?;
                Err(Signal::Stop)
            }
            Stmt::Include {
                template,
                ignore_missing,
            } => {
                let name = self.eval(template, state)?.to_string();
                let handle = match state.get_template(&name) {
                    Ok(handle) => handle,
                    Err(RuntimeError::TemplateNotFound { .. }) if *ignore_missing => {
                        return Ok(());
                    }
                    Err(err) => return Err(err.into()),
                };
                let source = tree_template(&handle)?;
                let info =
                    state.derive_info(DeriveBehavior::Include, source.name().map(str::to_owned));
                self.render_into(source.template(), info, state.capture(), out)?;
                Ok(())
            }
            Stmt::Import { template, target } => {
                let name = self.eval(template, state)?.to_string();
                let info = self.render_for_exports(&name, state)?;
                let module = info.make_module();
                self.bind_target(target, &module, state)?;
                Ok(())
            }
            Stmt::FromImport { template, names } => {
                let name = self.eval(template, state)?.to_string();
                let info = self.render_for_exports(&name, state)?;
                let exports = info.exports();
                for item in names {
                    let value = exports.get(&item.name).cloned().unwrap_or_else(|| {
                        self.config.undefined_variable(&item.name)
                    });
                    let bind_as = item.alias.as_deref().unwrap_or(&item.name);
                    state.assign_var(bind_as, value);
                }
                Ok(())
            }
            Stmt::FilterBlock { name, args, body } => {
                let mut sub = Output::new();
                state.push_frame();
                let result = self.exec_body(body, state, &mut sub);
                state.pop_frame();
                result?;
                let args = self.eval_all(args, state)?;
                let filtered =
                    state
                        .info()
                        .call_filter(name, Value::str(sub.concat()), &args)?;
                out.push(filtered.to_string());
                Ok(())
            }
        }
    }

    fn exec_for(
        &self,
        target: &Target,
        iter: &Expr,
        body: &[Stmt],
        orelse: &[Stmt],
        state: &mut RuntimeState,
        out: &mut Output,
    ) -> Exec {
        let parent = if self.config.forloop_parent_access {
            Some(state.lookup_var(&self.config.forloop_accessor))
        } else {
            None
        };
        // the source must iterate; the lenient unpacking flags only cover
        // destructuring of individual items
        let iterable = self.eval(iter, state)?;
        let items = iterable.try_iter()?;
        let loop_ref = self.config.wrap_loop(items, parent);

        state.push_frame();
        let accessor = self.config.forloop_accessor.clone();
        let mut iterated = false;
        let result = loop {
            let item = loop_ref.borrow_mut().next_item();
            let Some(item) = item else {
                break Ok(());
            };
            iterated = true;
            state.assign_var(&accessor, Value::Loop(loop_ref.clone()));
            if let Err(err) = self.bind_target(target, &item, state) {
                break Err(Signal::Fail(err));
            }
            match self.exec_body(body, state, out) {
                Ok(()) | Err(Signal::Continue) => {}
                Err(Signal::Break) => break Ok(()),
                Err(other) => break Err(other),
            }
        };
        let result = match result {
            Ok(()) if !iterated => self.exec_body(orelse, state, out),
            other => other,
        };
        state.pop_frame();
        result
    }

    /// Destructure a value into a target shape.
    fn bind_target(
        &self,
        target: &Target,
        value: &Value,
        state: &mut RuntimeState,
    ) -> RuntimeResult<()> {
        match target {
            Target::Name(name) => {
                state.assign_var(name, value.clone());
                Ok(())
            }
            Target::Tuple(items) => {
                let patterns: Vec<TargetPattern> = items.iter().map(to_pattern).collect();
                let values = match unpack(&self.config, value, &patterns)? {
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
                    self.bind_target(item, &value, state)?;
                }
                Ok(())
            }
        }
    }

    /// Render a template purely for its exports, discarding output.
    fn render_for_exports(
        &self,
        name: &str,
        state: &mut RuntimeState,
    ) -> RuntimeResult<SharedInfo> {
        let handle = state.get_template(name)?;
        let source = tree_template(&handle)?;
        let info = state.derive_info(DeriveBehavior::Import, source.name().map(str::to_owned));
        let mut sink = Output::new();
        self.render_into(source.template(), info.clone(), state.capture(), &mut sink)?;
        Ok(info)
    }

    fn eval_all(&self, exprs: &[Expr], state: &RuntimeState) -> RuntimeResult<Vec<Value>> {
        exprs.iter().map(|e| self.eval(e, state)).collect()
    }

    fn eval(&self, expr: &Expr, state: &RuntimeState) -> RuntimeResult<Value> {
        match expr {
            Expr::Const(c) => Ok(const_value(c)),
            Expr::TemplateData(text) => Ok(Value::str(text)),
            Expr::Name(name) => Ok(state.lookup_var(name)),
            Expr::Getattr { object, attr } => {
                let object = self.eval(object, state)?;
                match self.eval(attr, state)? {
                    Value::Str(name) => Ok(object.get_attr(&name)),
                    other => Ok(object.get_item(&other)),
                }
            }
            Expr::Getitem { object, index } => {
                let object = self.eval(object, state)?;
                let index = self.eval(index, state)?;
                Ok(object.get_item(&index))
            }
            Expr::Call { callee, args } => {
                let callee = self.eval(callee, state)?;
                let args = self.eval_all(args, state)?;
                callee.call(&args)
            }
            Expr::Tuple(items) => Ok(Value::tuple(self.eval_all(items, state)?)),
            Expr::List(items) => Ok(Value::list(self.eval_all(items, state)?)),
            Expr::Map(pairs) => {
                let mut entries = ValueMap::default();
                for (key, value) in pairs {
                    let key = self.eval(key, state)?.to_string();
                    entries.insert(key, self.eval(value, state)?);
                }
                Ok(Value::map(entries))
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, state)?;
                let right = self.eval(right, state)?;
                match op {
                    BinaryOp::Add => left.add(&right),
                    BinaryOp::Sub => left.sub(&right),
                    BinaryOp::Mul => left.mul(&right),
                    BinaryOp::Div => left.div(&right),
                    BinaryOp::FloorDiv => left.floordiv(&right),
                    BinaryOp::Mod => left.rem(&right),
                    BinaryOp::Pow => left.pow(&right),
                }
            }
            Expr::Unary { op, operand } => {
                let operand = self.eval(operand, state)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!operand.is_truthy())),
                    UnaryOp::Neg => operand.neg(),
                    UnaryOp::Pos => operand.pos(),
                }
            }
            Expr::And { left, right } => {
                let left = self.eval(left, state)?;
                if left.is_truthy() {
                    self.eval(right, state)
                } else {
                    Ok(Value::Bool(false))
                }
            }
            Expr::Or { left, right } => {
                let left = self.eval(left, state)?;
                if left.is_truthy() {
                    Ok(left)
                } else {
                    self.eval(right, state)
                }
            }
            Expr::Compare { expr, ops } => {
                let mut prev = self.eval(expr, state)?;
                for operand in ops {
                    let next = self.eval(&operand.expr, state)?;
                    if !compare(operand.op, &prev, &next)? {
                        return Ok(Value::Bool(false));
                    }
                    prev = next;
                }
                Ok(Value::Bool(true))
            }
            Expr::Cond {
                test,
                then,
                otherwise,
            } => {
                if self.eval(test, state)?.is_truthy() {
                    self.eval(then, state)
                } else {
                    self.eval(otherwise, state)
                }
            }
            Expr::Filter { value, name, args } => {
                let value = self.eval(value, state)?;
                let args = self.eval_all(args, state)?;
                state.info().call_filter(name, value, &args)
            }
            Expr::Test { value, name, args } => {
                let value = self.eval(value, state)?;
                let args = self.eval_all(args, state)?;
                state.info().call_test(name, value, &args)
            }
        }
    }
}

fn const_value(c: &Const) -> Value {
    match c {
        Const::None => Value::None,
        Const::Bool(b) => Value::Bool(*b),
        Const::Int(i) => Value::Int(*i),
        Const::Float(f) => Value::Float(*f),
        Const::Str(s) => Value::str(s),
    }
}

fn to_pattern(target: &Target) -> TargetPattern {
    match target {
        Target::Name(name) => TargetPattern::Leaf(name.clone()),
        Target::Tuple(items) => TargetPattern::Group(items.iter().map(to_pattern).collect()),
    }
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> RuntimeResult<bool> {
    use std::cmp::Ordering;
    let ordered = |accept: fn(Ordering) -> bool| {
        Ok(left.partial_cmp_value(right).is_some_and(accept))
    };
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

/// Downcast an opaque template handle to this backend's tree form.
fn tree_template(handle: &TemplateHandle) -> RuntimeResult<&TemplateSource> {
    handle
        .as_any()
        .downcast_ref::<TemplateSource>()
        .ok_or_else(|| RuntimeError::unsupported("template handle is not a tree template"))
}
