//! Loop bookkeeping.
//!
//! Each `for` construct drives a loop context through a shared handle. The
//! context tracks position, answers the `loop.*` attribute family, and can
//! determine the total length of a single-pass source by buffering the
//! not-yet-consumed tail.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::error::{RuntimeError, RuntimeResult};
use crate::value::{Value, ValueIter};

/// Shared, mutable handle to a live loop context.
pub type LoopRef = Rc<RefCell<dyn LoopState>>;

/// Behavior of a value bound to the loop accessor name.
///
/// The standard implementation is [`LoopContext`]; a policy may substitute
/// its own through `Config::set_wrap_loop`, for instance to expose extra
/// attributes or to record iteration for debugging.
pub trait LoopState {
    /// Advance to the next item, or `None` when exhausted.
    fn next_item(&mut self) -> Option<Value>;

    /// Look up a `loop.*` attribute. `None` for unknown attributes, which
    /// the value layer turns into an undefined.
    fn attr(&mut self, name: &str) -> Option<Value>;

    /// Invoke the loop value as a callable. Not supported by default.
    fn call(&mut self, _args: &[Value]) -> RuntimeResult<Value> {
        Err(RuntimeError::NotCallable { type_name: "loop" })
    }
}

/// The standard loop context.
pub struct LoopContext {
    iter: Option<ValueIter>,
    /// Items pulled ahead of the cursor by `last` or `length`.
    buffer: VecDeque<Value>,
    /// Index of the current item; -1 before the first `next_item`.
    index0: i64,
    length: Option<usize>,
    parent: Option<Value>,
}

impl LoopContext {
    pub fn new(iter: ValueIter, parent: Option<Value>) -> Self {
        let length = iter.known_len();
        LoopContext {
            iter: Some(iter),
            buffer: VecDeque::new(),
            index0: -1,
            length,
            parent,
        }
    }

    /// Wrap into a shared handle, the form the runtime binds to the loop
    /// accessor name.
    pub fn shared(iter: ValueIter, parent: Option<Value>) -> LoopRef {
        Rc::new(RefCell::new(LoopContext::new(iter, parent)))
    }

    /// Look `n` items past the cursor without consuming them.
    fn peek(&mut self, n: usize) -> Option<&Value> {
        while self.buffer.len() < n {
            let item = self.iter.as_mut()?.next()?;
            self.buffer.push_back(item);
        }
        self.buffer.get(n - 1)
    }

    /// Total number of items. Drains a single-pass source into the buffer
    /// on first call; the answer is cached.
    fn length(&mut self) -> usize {
        if let Some(len) = self.length {
            return len;
        }
        if let Some(iter) = self.iter.as_mut() {
            self.buffer.extend(iter.by_ref());
        }
        self.iter = None;
        let len = (self.index0 + 1) as usize + self.buffer.len();
        self.length = Some(len);
        len
    }

}

impl LoopState for LoopContext {
    fn next_item(&mut self) -> Option<Value> {
        let item = match self.buffer.pop_front() {
            Some(item) => Some(item),
            None => self.iter.as_mut()?.next(),
        };
        if item.is_some() {
            self.index0 += 1;
        }
        item
    }

    fn attr(&mut self, name: &str) -> Option<Value> {
        match name {
            "index0" => Some(Value::Int(self.index0)),
            "index" => Some(Value::Int(self.index0 + 1)),
            "first" => Some(Value::Bool(self.index0 == 0)),
            "last" => Some(Value::Bool(self.peek(1).is_none())),
            "length" => Some(Value::Int(self.length() as i64)),
            "revindex" => Some(Value::Int(self.length() as i64 - self.index0)),
            "revindex0" => Some(Value::Int(self.length() as i64 - self.index0 - 1)),
            "parent" => Some(self.parent.clone().unwrap_or_else(|| Value::undefined("parent"))),
            "cycle" => {
                let index0 = self.index0;
                Some(Value::function("cycle", move |args| {
                    if args.is_empty() {
                        return Err(RuntimeError::unsupported("no items for cycling given"));
                    }
                    let idx = (index0.max(0) as usize) % args.len();
                    Ok(args[idx].clone())
                }))
            }
            _ => None,
        }
    }
}
