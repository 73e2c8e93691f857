//! Restricted evaluator for command snippets
//!
//! Snippets are [`rhai`] scripts.  The engine is rebuilt for every run and
//! exposes nothing beyond the values and functions registered here:
//!
//! - `args`: array of string arguments following the command name
//! - `nick`: display name of the invoking user
//! - `cmd`: the name the snippet was invoked as
//! - `reply(x)`: send `x` to the channel the command was invoked in
//! - `tell(x)`: send `x` privately to the invoking user
//!
//! `print` behaves like `reply`, and counts toward the same reply limit.  Module imports and `eval` are unavailable,
//! and every run is bounded by an operation budget and a wall-clock deadline.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    time::{Duration, Instant},
};

use rhai::{module_resolvers::DummyModuleResolver, Array, Dynamic, Engine, EvalAltResult, Scope};

use crate::prelude::*;

/// How many operations run between deadline checks
const DEADLINE_CHECK_INTERVAL: u64 = 256;

/// Resource bounds for a single snippet run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Wall-clock budget, after which the run is cancelled
    pub timeout: Duration,
    /// Maximum number of engine operations, or zero for no limit
    pub max_operations: u64,
    /// Maximum function call depth
    pub max_call_levels: usize,
    /// Maximum length of any string value
    pub max_string_size: usize,
    /// Maximum length of any array value
    pub max_array_size: usize,
    /// Maximum size of any object map value
    pub max_map_size: usize,
    /// Maximum number of messages a single run may send
    pub max_replies: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_operations: 1_000_000,
            max_call_levels: 32,
            max_string_size: 16 * 1024,
            max_array_size: 4096,
            max_map_size: 4096,
            max_replies: 10,
        }
    }
}

/// A message produced by a snippet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptReply {
    /// Sent to the channel the command was invoked in
    Channel(String),
    /// Sent privately to the invoking user
    Private(String),
}

/// A failed snippet run
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    /// The snippet did not parse
    #[error("Syntax error: {0}")]
    Parse(String),
    /// The snippet raised an error while running
    #[error("{0}")]
    Runtime(String),
    /// The snippet ran past its deadline and was cancelled
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    /// The snippet exceeded a resource bound
    #[error("Resource limit exceeded: {0}")]
    LimitExceeded(String),
    /// The evaluation task died before producing a result
    #[error("Evaluation aborted: {0}")]
    Aborted(String),
}

/// Everything needed to run one snippet
#[derive(Debug, Clone)]
pub struct Invocation {
    /// The command name the snippet is stored under
    pub name: String,
    /// The snippet source
    pub source: String,
    /// Message tokens following the command name
    pub args: Vec<String>,
    /// Display name of the invoking user
    pub nick: String,
}

/// The result of running a snippet
///
/// Replies queued before a failure are kept.
#[derive(Debug)]
pub struct Evaluation {
    /// Messages the snippet asked to send, in order
    pub replies: Vec<ScriptReply>,
    /// Whether the snippet completed
    pub outcome: Result<(), EvalError>,
}

/// Factory for restricted script engines
#[derive(Debug, Clone, Copy, Default)]
pub struct Sandbox {
    limits: Limits,
}

/// Replies queued by one run
///
/// `overflowed` is set the first time anything is queued past the limit, and
/// the run is terminated at its next operation.  A script can't catch its way
/// past the limit, and `print` (which has no way to raise) ends the run the
/// same way `reply` and `tell` do.
#[derive(Debug, Default)]
struct ReplyQueue {
    replies: RefCell<Vec<ScriptReply>>,
    overflowed: Cell<bool>,
}

impl ReplyQueue {
    fn push(&self, max: usize, reply: ScriptReply) -> Result<(), Box<EvalAltResult>> {
        let mut replies = self.replies.borrow_mut();

        if replies.len() >= max {
            self.overflowed.set(true);
            return Err(too_many_replies(max).into());
        }

        replies.push(reply);
        Ok(())
    }
}

fn too_many_replies(max: usize) -> String { format!("Too many replies (limit is {max})") }

impl Sandbox {
    /// Construct a sandbox enforcing the given limits
    #[must_use]
    pub fn new(limits: Limits) -> Self { Self { limits } }

    fn engine(&self, replies: &Rc<ReplyQueue>) -> Engine {
        let Limits {
            timeout,
            max_operations,
            max_call_levels,
            max_string_size,
            max_array_size,
            max_map_size,
            max_replies,
        } = self.limits;
        let deadline = Instant::now() + timeout;

        let mut engine = Engine::new();
        let q = Rc::clone(replies);

        engine
            .set_module_resolver(DummyModuleResolver::new())
            .set_max_operations(max_operations)
            .set_max_call_levels(max_call_levels)
            .set_max_expr_depths(64, 32)
            .set_max_string_size(max_string_size)
            .set_max_array_size(max_array_size)
            .set_max_map_size(max_map_size)
            .on_progress(move |ops| {
                if q.overflowed.get() {
                    // Any non-unit token marks a reply overflow
                    return Some(Dynamic::TRUE);
                }

                (ops % DEADLINE_CHECK_INTERVAL == 0 && Instant::now() >= deadline)
                    .then_some(Dynamic::UNIT)
            })
            .on_debug(|text, src, pos| debug!(src, %pos, "{text}"));

        engine.disable_symbol("eval");

        let q = Rc::clone(replies);
        engine.on_print(move |text| {
            if let Err(e) = q.push(max_replies, ScriptReply::Channel(text.to_owned())) {
                debug!(%e, "Dropping printed line");
            }
        });

        let q = Rc::clone(replies);
        engine.register_fn("reply", move |value: Dynamic| {
            q.push(max_replies, ScriptReply::Channel(value.to_string()))
        });

        let q = Rc::clone(replies);
        engine.register_fn("tell", move |value: Dynamic| {
            q.push(max_replies, ScriptReply::Private(value.to_string()))
        });

        engine
    }

    fn convert_error(&self, err: &EvalAltResult) -> EvalError {
        match err {
            EvalAltResult::ErrorTerminated(token, _) if token.is_unit() => {
                EvalError::Timeout(self.limits.timeout)
            },
            EvalAltResult::ErrorTerminated(..) => {
                EvalError::Runtime(too_many_replies(self.limits.max_replies))
            },
            EvalAltResult::ErrorTooManyOperations(_)
            | EvalAltResult::ErrorTooManyModules(_)
            | EvalAltResult::ErrorStackOverflow(_)
            | EvalAltResult::ErrorDataTooLarge(..) => EvalError::LimitExceeded(err.to_string()),
            EvalAltResult::ErrorParsing(..) => EvalError::Parse(err.to_string()),
            _ => EvalError::Runtime(err.to_string()),
        }
    }

    /// Run a snippet on the current thread
    ///
    /// This blocks until the snippet finishes or is cancelled; use
    /// [`run`](Self::run) from async code.
    #[must_use]
    pub fn eval(&self, inv: &Invocation) -> Evaluation {
        let replies = Rc::new(ReplyQueue::default());
        let engine = self.engine(&replies);

        let outcome = engine
            .compile(&inv.source)
            .map_err(|e| EvalError::Parse(e.to_string()))
            .and_then(|ast| {
                let args: Array = inv.args.iter().cloned().map(Dynamic::from).collect();
                let mut scope = Scope::new();
                scope
                    .push_constant("args", args)
                    .push_constant("nick", inv.nick.clone())
                    .push_constant("cmd", inv.name.clone());

                engine
                    .run_ast_with_scope(&mut scope, &ast)
                    .map_err(|e| self.convert_error(&e))
            })
            .and_then(|()| {
                if replies.overflowed.get() {
                    Err(EvalError::Runtime(too_many_replies(self.limits.max_replies)))
                } else {
                    Ok(())
                }
            });

        drop(engine);

        Evaluation {
            replies: replies.replies.take(),
            outcome,
        }
    }

    /// Run a snippet on the blocking thread pool
    pub async fn run(&self, inv: Invocation) -> Evaluation {
        let sandbox = *self;

        tokio::task::spawn_blocking(move || sandbox.eval(&inv))
            .await
            .unwrap_or_else(|e| Evaluation {
                replies: vec![],
                outcome: Err(EvalError::Aborted(e.to_string())),
            })
    }
}
