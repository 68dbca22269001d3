//! Task-local stack of in-flight calls.
//!
//! Each tokio task entered through [`with_run_stack`] or [`spawn`] gets its
//! own stack, so interleaved traces never see each other's calls. There is
//! no shared fallback: outside a scope the stack reads as empty and pushes
//! are dropped with a warning.
//!
//! Stacks are immutable snapshots: [`push_call`] installs a new stack
//! instead of editing the current one, so a [`CallStack`] captured earlier
//! stays valid. Bookkeeping anomalies (popping an empty stack or an unknown
//! id) are logged and ignored; they never fail the traced code.

use std::cell::RefCell;
use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::call::Call;

/// An immutable snapshot of the open calls, innermost last.
#[derive(Clone, Debug, Default)]
pub struct CallStack(Arc<Vec<Call>>);

impl CallStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_calls(calls: Vec<Call>) -> Self {
        Self(Arc::new(calls))
    }

    pub fn calls(&self) -> &[Call] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn top(&self) -> Option<&Call> {
        self.0.last()
    }

    /// A new stack with `call` on top. `self` is unchanged.
    pub fn pushed(&self, call: Call) -> Self {
        let mut calls = Vec::with_capacity(self.0.len() + 1);
        calls.extend(self.0.iter().cloned());
        calls.push(call);
        Self(Arc::new(calls))
    }

    fn truncated(&self, len: usize) -> Self {
        Self(Arc::new(self.0[..len].to_vec()))
    }

    fn position(&self, call_id: &str) -> Option<usize> {
        self.0.iter().rposition(|c| c.id() == call_id)
    }
}

tokio::task_local! {
    static TASK_STACK: RefCell<CallStack>;
}

/// Run `f` against the scoped stack, or return `None` outside any scope.
fn with_stack<R>(f: impl FnOnce(&RefCell<CallStack>) -> R) -> Option<R> {
    TASK_STACK.try_with(f).ok()
}

/// Whether the caller runs inside a call-stack scope.
pub fn in_scope() -> bool {
    TASK_STACK.try_with(|_| ()).is_ok()
}

/// The current stack snapshot. Empty outside a scope.
pub fn current_stack() -> CallStack {
    with_stack(|cell| cell.borrow().clone()).unwrap_or_default()
}

/// The innermost open call.
pub fn current_call() -> Option<Call> {
    with_stack(|cell| cell.borrow().top().cloned()).flatten()
}

/// Push `call` by installing a copy of the current stack with it on top.
///
/// Outside a scope nothing is retained and a warning is logged.
pub fn push_call(call: Call) {
    let pushed = with_stack(|cell| {
        let next = cell.borrow().pushed(call.clone());
        *cell.borrow_mut() = next;
    });
    if pushed.is_none() {
        tracing::warn!(
            call_id = %call.id(),
            "push_call outside a call-stack scope; the call will not parent later calls"
        );
    }
}

/// Pop a call off the stack.
///
/// Without an id, pops the top. With an id, removes the innermost call with
/// that id along with everything pushed after it. Returns the removed call,
/// or `None` after logging a warning if there was nothing to remove.
pub fn pop_call(call_id: Option<&str>) -> Option<Call> {
    let popped = with_stack(|cell| {
        let stack = cell.borrow().clone();
        if stack.is_empty() {
            tracing::warn!(call_id = ?call_id, "pop_call on an empty call stack");
            return None;
        }
        let idx = match call_id {
            None => stack.len() - 1,
            Some(id) => match stack.position(id) {
                Some(idx) => idx,
                None => {
                    tracing::warn!(call_id = %id, depth = stack.len(), "pop_call for a call not on the stack");
                    return None;
                }
            },
        };
        let popped = stack.calls()[idx].clone();
        *cell.borrow_mut() = stack.truncated(idx);
        Some(popped)
    });
    match popped {
        Some(popped) => popped,
        None => {
            tracing::warn!(call_id = ?call_id, "pop_call outside a call-stack scope");
            None
        }
    }
}

/// Run `fut` with `stack` as its call stack. The caller's stack is restored
/// when `fut` completes, panics or is dropped.
pub async fn with_run_stack<F: Future>(stack: CallStack, fut: F) -> F::Output {
    TASK_STACK.scope(RefCell::new(stack), fut).await
}

/// Synchronous form of [`with_run_stack`].
pub fn sync_with_run_stack<R>(stack: CallStack, f: impl FnOnce() -> R) -> R {
    TASK_STACK.sync_scope(RefCell::new(stack), f)
}

/// Run `fut` in a new scope seeded with a snapshot of the caller's stack.
///
/// Calls pushed inside `fut` parent each other and the caller's open calls,
/// but the caller's stack is unchanged afterwards.
pub async fn scoped<F: Future>(fut: F) -> F::Output {
    with_run_stack(current_stack(), fut).await
}

/// Spawn `fut` on a new task that starts from a snapshot of the caller's
/// stack. Pushes and pops inside the task do not affect the caller.
pub fn spawn<F>(fut: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let stack = current_stack();
    tokio::spawn(TASK_STACK.scope(RefCell::new(stack), fut))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::CallData;

    fn call(op: &str) -> Call {
        Call::new(CallData::new("e/p", op, "trace", None))
    }

    fn ids(stack: &CallStack) -> Vec<String> {
        stack.calls().iter().map(Call::op_name).collect()
    }

    #[test]
    fn push_copies_the_stack() {
        sync_with_run_stack(CallStack::new(), || {
            push_call(call("a"));
            let before = current_stack();
            push_call(call("b"));
            assert_eq!(ids(&before), vec!["a"]);
            assert_eq!(ids(&current_stack()), vec!["a", "b"]);
            assert_eq!(current_call().map(|c| c.op_name()).as_deref(), Some("b"));
        });
    }

    #[test]
    fn pop_by_id_truncates_above() {
        sync_with_run_stack(CallStack::new(), || {
            let a = call("a");
            push_call(a.clone());
            push_call(call("b"));
            push_call(call("c"));
            let popped = pop_call(Some(&a.id())).unwrap();
            assert!(popped.same_call(&a));
            assert!(current_stack().is_empty());
        });
    }

    #[test]
    fn pop_by_id_keeps_calls_below() {
        sync_with_run_stack(CallStack::new(), || {
            push_call(call("a"));
            let b = call("b");
            push_call(b.clone());
            push_call(call("c"));
            pop_call(Some(&b.id()));
            assert_eq!(ids(&current_stack()), vec!["a"]);
        });
    }

    #[test]
    fn anomalies_are_ignored() {
        sync_with_run_stack(CallStack::new(), || {
            assert!(pop_call(None).is_none());
            push_call(call("a"));
            assert!(pop_call(Some("not-on-stack")).is_none());
            assert_eq!(ids(&current_stack()), vec!["a"]);
            assert!(pop_call(None).is_some());
            assert!(pop_call(Some("gone")).is_none());
        });
    }

    #[test]
    fn scope_restores_previous_stack() {
        sync_with_run_stack(CallStack::new(), || {
            push_call(call("outer"));
            let inner = sync_with_run_stack(CallStack::from_calls(vec![call("synthetic")]), || {
                push_call(call("inner"));
                ids(&current_stack())
            });
            assert_eq!(inner, vec!["synthetic", "inner"]);
            assert_eq!(ids(&current_stack()), vec!["outer"]);
        });
    }

    #[tokio::test]
    async fn concurrent_tasks_are_isolated() {
        let root = call("root");
        with_run_stack(CallStack::new(), async move {
            push_call(root.clone());
            let left = spawn(async {
                push_call(call("left"));
                tokio::task::yield_now().await;
                ids(&current_stack())
            });
            let right = spawn(async {
                push_call(call("right"));
                tokio::task::yield_now().await;
                ids(&current_stack())
            });
            assert_eq!(left.await.unwrap(), vec!["root", "left"]);
            assert_eq!(right.await.unwrap(), vec!["root", "right"]);
            assert_eq!(ids(&current_stack()), vec!["root"]);
        })
        .await;
    }

    #[test]
    fn unscoped_pushes_are_not_retained() {
        assert!(!in_scope());
        push_call(call("orphan"));
        assert!(current_call().is_none());
        assert!(current_stack().is_empty());
        assert!(pop_call(None).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn plain_tasks_never_share_a_stack() {
        let task = |name: &'static str| {
            tokio::spawn(async move {
                push_call(call(name));
                tokio::task::yield_now().await;
                let seen = current_call().map(|c| c.op_name());
                let scoped_seen = scoped(async move {
                    push_call(call(name));
                    tokio::task::yield_now().await;
                    ids(&current_stack())
                })
                .await;
                (seen, scoped_seen)
            })
        };
        let (left, right) = (task("left"), task("right"));
        assert_eq!(left.await.unwrap(), (None, vec!["left".to_string()]));
        assert_eq!(right.await.unwrap(), (None, vec!["right".to_string()]));
    }

    #[tokio::test]
    async fn scoped_starts_from_the_callers_stack() {
        with_run_stack(CallStack::new(), async {
            push_call(call("outer"));
            let inner = scoped(async {
                push_call(call("inner"));
                ids(&current_stack())
            })
            .await;
            assert_eq!(inner, vec!["outer", "inner"]);
            assert_eq!(ids(&current_stack()), vec!["outer"]);
        })
        .await;
    }

    #[tokio::test]
    async fn stack_survives_suspension() {
        with_run_stack(CallStack::new(), async {
            push_call(call("a"));
            tokio::task::yield_now().await;
            push_call(call("b"));
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            assert_eq!(ids(&current_stack()), vec!["a", "b"]);
        })
        .await;
    }
}
