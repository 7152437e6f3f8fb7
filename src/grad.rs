//! Gradient-tracking scope.
//!
//! Learned collaborators consult [`is_grad_enabled`] to decide whether an
//! operation should be recorded for an optimizer. Imagination rollouts used for
//! risk forecasting run under [`no_grad`], which disables tracking for the
//! current thread until the returned guard is dropped (including during
//! unwinding).

use std::cell::Cell;
use std::marker::PhantomData;

thread_local! {
    static GRAD_ENABLED: Cell<bool> = const { Cell::new(true) };
}

/// Whether gradient tracking is enabled on the current thread.
pub fn is_grad_enabled() -> bool {
    GRAD_ENABLED.with(|g| g.get())
}

/// Guard that restores the previous tracking mode on drop.
///
/// Not `Send`: the flag is thread-local.
#[must_use = "gradient tracking is restored as soon as the guard is dropped"]
#[derive(Debug)]
pub struct NoGradGuard {
    prev: bool,
    _not_send: PhantomData<*const ()>,
}

/// Disable gradient tracking until the returned guard is dropped.
///
/// Guards nest: the innermost drop restores whatever mode was active when it
/// was acquired.
pub fn no_grad() -> NoGradGuard {
    let prev = GRAD_ENABLED.with(|g| g.replace(false));
    NoGradGuard {
        prev,
        _not_send: PhantomData,
    }
}

impl Drop for NoGradGuard {
    fn drop(&mut self) {
        let prev = self.prev;
        GRAD_ENABLED.with(|g| g.set(prev));
    }
}
