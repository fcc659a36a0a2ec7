//! The interception combinators.
//!
//! - [`chain`]: argument hooks, native call, result hooks.
//! - [`patch_method`]: intercept hooks that may substitute arguments or
//!   short-circuit with a result before the native call.
//! - [`chain_async`]: result hooks applied to the resolved value of the
//!   pending branch of a callback-or-future API.
//!
//! Each leaves absent or already wrapped slots alone.

use std::rc::Rc;

use futures::future::{FutureExt, LocalBoxFuture};

use crate::error::Result;
use crate::patch::hooks::{ChainHooks, HookList, HookOutcome, InterceptHook, ResultHook};
use crate::patch::{NativeFn, NativeImpl, Receiver, ReentryGuard};

/// Result of trying to patch one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Applied,
    /// The surface does not expose the method.
    Missing,
    /// The slot already holds one of our wrappers.
    AlreadyWrapped,
    /// Nothing registered for the method.
    NoHooks,
}

impl PatchOutcome {
    pub fn is_applied(self) -> bool {
        self == PatchOutcome::Applied
    }
}

/// Return value of a method with a callback-or-future dual API.
pub enum AsyncReturn<T> {
    /// The caller passed a callback; the host will invoke it.
    Dispatched,
    /// No callback; the value arrives through this future.
    Pending(LocalBoxFuture<'static, Result<T>>),
}

impl<T> std::fmt::Debug for AsyncReturn<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AsyncReturn::Dispatched => f.write_str("Dispatched"),
            AsyncReturn::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

fn eligible<R: ?Sized, A, O>(
    slot: &Option<NativeFn<R, A, O>>,
    target: &str,
    has_hooks: bool,
) -> std::result::Result<NativeFn<R, A, O>, PatchOutcome> {
    let Some(orig) = slot.as_ref() else {
        log::warn!("[patch] {target}: method not present, skipped");
        return Err(PatchOutcome::Missing);
    };
    if orig.is_wrapped() {
        log::warn!("[patch] {target}: already patched, skipped");
        return Err(PatchOutcome::AlreadyWrapped);
    }
    if !has_hooks {
        log::warn!("[patch] {target}: no hooks registered, skipped");
        return Err(PatchOutcome::NoHooks);
    }
    Ok(orig.clone())
}

fn install<R: ?Sized, A, O>(
    slot: &mut Option<NativeFn<R, A, O>>,
    orig: &NativeFn<R, A, O>,
    imp: NativeImpl<R, A, O>,
) -> PatchOutcome {
    *slot = Some(NativeFn::disguised(orig.name_rc(), imp));
    PatchOutcome::Applied
}

/// Wrap `slot` so `hooks.pre` rewrite the arguments and `hooks.post` rewrite
/// the result of the original call.
///
/// A nested call on the same receiver goes straight to the original.
/// Errors from the original propagate; hook errors are logged and skipped.
pub fn chain<R, A, O>(slot: &mut Option<NativeFn<R, A, O>>, hooks: &ChainHooks<R, A, O>) -> PatchOutcome
where
    R: Receiver + ?Sized + 'static,
    A: Clone + 'static,
    O: 'static,
{
    let orig = match eligible(slot, hooks.target(), !hooks.is_empty()) {
        Ok(orig) => orig,
        Err(outcome) => return outcome,
    };
    let flag = format!("__chain_{}", orig.name());
    let inner = orig.clone();
    let hooks = hooks.clone();
    let imp: NativeImpl<R, A, O> = Rc::new(move |recv: &R, args: A| -> Result<O> {
        let Some(_guard) = ReentryGuard::enter(recv, &flag) else {
            return inner.call(recv, args);
        };
        let args = hooks.pre.run(recv, args);
        let out = inner.call(recv, args.clone())?;
        Ok(hooks.post.run(recv, out, &args))
    });
    install(slot, &orig, imp)
}

/// Wrap `slot` so each intercept hook may continue, substitute arguments,
/// or short-circuit with a result. Without a short-circuit the original is
/// called with the final arguments.
pub fn patch_method<R, A, O>(
    slot: &mut Option<NativeFn<R, A, O>>,
    hooks: &HookList<InterceptHook<R, A, O>>,
) -> PatchOutcome
where
    R: Receiver + ?Sized + 'static,
    A: 'static,
    O: 'static,
{
    let orig = match eligible(slot, hooks.target(), !hooks.is_empty()) {
        Ok(orig) => orig,
        Err(outcome) => return outcome,
    };
    let flag = format!("__patch_{}", orig.name());
    let inner = orig.clone();
    let hooks = hooks.clone();
    let imp: NativeImpl<R, A, O> = Rc::new(move |recv: &R, args: A| -> Result<O> {
        let Some(_guard) = ReentryGuard::enter(recv, &flag) else {
            return inner.call(recv, args);
        };
        let mut args = args;
        for (idx, hook) in hooks.snapshot().iter().enumerate() {
            match hook(recv, &inner, &args) {
                Ok(HookOutcome::Continue) => {}
                Ok(HookOutcome::ReplaceArgs(next)) => args = next,
                Ok(HookOutcome::Return(out)) => return Ok(out),
                Err(err) => log::debug!("[{}] intercept hook #{} failed: {}", hooks.target(), idx, err),
            }
        }
        inner.call(recv, args)
    });
    install(slot, &orig, imp)
}

/// Wrap the pending branch of a callback-or-future method. The callback
/// branch is returned untouched.
pub fn chain_async<R, A, T>(
    slot: &mut Option<NativeFn<R, A, AsyncReturn<T>>>,
    hooks: &HookList<ResultHook<R, A, T>>,
) -> PatchOutcome
where
    R: Receiver + Clone + 'static,
    A: Clone + 'static,
    T: 'static,
{
    let orig = match eligible(slot, hooks.target(), !hooks.is_empty()) {
        Ok(orig) => orig,
        Err(outcome) => return outcome,
    };
    let flag = format!("__async_{}", orig.name());
    let inner = orig.clone();
    let hooks = hooks.clone();
    let imp: NativeImpl<R, A, AsyncReturn<T>> =
        Rc::new(move |recv: &R, args: A| -> Result<AsyncReturn<T>> {
            let Some(_guard) = ReentryGuard::enter(recv, &flag) else {
                return inner.call(recv, args);
            };
            match inner.call(recv, args.clone())? {
                AsyncReturn::Dispatched => Ok(AsyncReturn::Dispatched),
                AsyncReturn::Pending(pending) => {
                    let hooks = hooks.clone();
                    let recv = recv.clone();
                    let fut = async move {
                        let value = pending.await?;
                        Ok(hooks.run(&recv, value, &args))
                    };
                    Ok(AsyncReturn::Pending(fut.boxed_local()))
                }
            }
        });
    install(slot, &orig, imp)
}
