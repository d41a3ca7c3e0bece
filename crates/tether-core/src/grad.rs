// Gradient-mode scoping
//
// Evaluation code must switch gradient tracking off for a bounded region and
// restore the previous mode on every exit path, including `?` returns and
// panics. A GradModeGuard does that in its Drop.
//
// USAGE:
//
//   let _guard = GradModeGuard::no_grad(&runtime);
//   let logits = model.forward_t(&xs, false)?;   // not recorded
//   // mode restored when _guard goes out of scope
//
//   // or, scoped to a closure:
//   let acc = no_grad(&runtime, || evaluate(&model))?;
//
// NESTING:
//
//   Guards form a per-thread stack. Each frame remembers the mode in force
//   when it was acquired. Dropping the innermost guard restores that mode.
//   Dropping an outer guard while inner ones are alive cannot restore
//   anything yet (the inner guards are still in force), so its saved mode is
//   handed to the guard acquired right after it. When that one is dropped,
//   the mode reverts to what was in force before the outer guard.
//
//   Guards are !Send. The runtime's grad mode is per thread, so a guard must
//   be dropped on the thread that acquired it.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::runtime::Runtime;

static NEXT_GUARD_ID: AtomicU64 = AtomicU64::new(1);

struct GuardFrame {
    id: u64,
    previous: bool,
}

thread_local! {
    static GUARD_STACK: RefCell<Vec<GuardFrame>> = const { RefCell::new(Vec::new()) };
}

/// Number of grad-mode guards alive on the current thread.
pub fn depth() -> usize {
    GUARD_STACK.with(|s| s.borrow().len())
}

/// Sets the gradient mode for as long as it is alive.
#[must_use = "the previous grad mode is restored as soon as the guard is dropped"]
pub struct GradModeGuard<R: Runtime> {
    runtime: R,
    id: u64,
    // !Send: grad mode is thread-local in the runtime.
    _not_send: PhantomData<*const ()>,
}

impl<R: Runtime> GradModeGuard<R> {
    /// Set the grad mode to `enabled` until the guard is dropped.
    pub fn new(runtime: &R, enabled: bool) -> Self {
        let previous = runtime.set_grad_enabled(enabled);
        let id = NEXT_GUARD_ID.fetch_add(1, Ordering::Relaxed);
        GUARD_STACK.with(|s| s.borrow_mut().push(GuardFrame { id, previous }));
        tracing::debug!(guard = id, enabled, previous, "grad mode guard acquired");
        GradModeGuard {
            runtime: runtime.clone(),
            id,
            _not_send: PhantomData,
        }
    }

    /// Disable gradient tracking until the guard is dropped.
    pub fn no_grad(runtime: &R) -> Self {
        Self::new(runtime, false)
    }

    /// Enable gradient tracking until the guard is dropped.
    pub fn enable_grad(runtime: &R) -> Self {
        Self::new(runtime, true)
    }
}

impl<R: Runtime> Drop for GradModeGuard<R> {
    fn drop(&mut self) {
        GUARD_STACK.with(|s| {
            let mut stack = s.borrow_mut();
            let Some(pos) = stack.iter().position(|f| f.id == self.id) else {
                tracing::warn!(guard = self.id, "grad mode guard missing from stack");
                return;
            };
            let frame = stack.remove(pos);
            if pos == stack.len() {
                self.runtime.set_grad_enabled(frame.previous);
                tracing::debug!(guard = self.id, restored = frame.previous, "grad mode guard released");
            } else {
                // Inner guards are still in force; the next one inherits our
                // saved mode.
                stack[pos].previous = frame.previous;
                tracing::warn!(guard = self.id, "grad mode guard dropped out of order");
            }
        });
    }
}

/// Run `f` with gradient tracking disabled, restoring the mode afterwards.
pub fn no_grad<R: Runtime, T>(runtime: &R, f: impl FnOnce() -> T) -> T {
    let _guard = GradModeGuard::no_grad(runtime);
    f()
}
