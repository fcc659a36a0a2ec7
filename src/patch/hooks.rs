//! Hook registries.
//!
//! One [`HookList`] per interception point. Lists are shared handles:
//! registering on a clone registers on every wrapper that holds the list.
//! Hooks run in registration order and are never removed.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::Result;
use crate::patch::NativeFn;

/// Transforms arguments before the native call. `Some` replaces them.
pub type ArgHook<R, A> = dyn Fn(&R, &A) -> Result<Option<A>>;

/// Transforms the result after the native call. `Some` replaces it.
pub type ResultHook<R, A, O> = dyn Fn(&R, &O, &A) -> Result<Option<O>>;

/// Sees the original and the current arguments; decides how to continue.
pub type InterceptHook<R, A, O> = dyn Fn(&R, &NativeFn<R, A, O>, &A) -> Result<HookOutcome<A, O>>;

/// What an intercept hook wants done.
#[derive(Debug, Clone, PartialEq)]
pub enum HookOutcome<A, O> {
    /// Leave arguments as they are and go on.
    Continue,
    /// Go on with these arguments.
    ReplaceArgs(A),
    /// Stop; this is the call's result.
    Return(O),
}

pub struct HookList<H: ?Sized> {
    target: Rc<str>,
    hooks: Rc<RefCell<Vec<Rc<H>>>>,
}

impl<H: ?Sized> Clone for HookList<H> {
    fn clone(&self) -> Self {
        Self {
            target: Rc::clone(&self.target),
            hooks: Rc::clone(&self.hooks),
        }
    }
}

impl<H: ?Sized> fmt::Debug for HookList<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookList")
            .field("target", &self.target)
            .field("len", &self.len())
            .finish()
    }
}

impl<H: ?Sized> HookList<H> {
    pub fn new(target: &str) -> Self {
        Self {
            target: Rc::from(target),
            hooks: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// The `Interface.method` this list belongs to.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn register(&self, hook: Rc<H>) {
        self.hooks.borrow_mut().push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.borrow().is_empty()
    }

    /// Hooks as of now. Iterating the copy lets a hook register further
    /// hooks without a borrow conflict.
    pub fn snapshot(&self) -> Vec<Rc<H>> {
        self.hooks.borrow().clone()
    }
}

impl<R: ?Sized + 'static, A: 'static> HookList<ArgHook<R, A>> {
    pub fn add(&self, hook: impl Fn(&R, &A) -> Result<Option<A>> + 'static) {
        self.register(Rc::new(hook));
    }

    /// Thread `args` through every hook; failed hooks are logged and skipped.
    pub fn run(&self, recv: &R, mut args: A) -> A {
        for (idx, hook) in self.snapshot().iter().enumerate() {
            match hook(recv, &args) {
                Ok(Some(next)) => args = next,
                Ok(None) => {}
                Err(err) => log::debug!("[{}] argument hook #{} failed: {}", self.target, idx, err),
            }
        }
        args
    }
}

impl<R: ?Sized + 'static, A: 'static, O: 'static> HookList<ResultHook<R, A, O>> {
    pub fn add(&self, hook: impl Fn(&R, &O, &A) -> Result<Option<O>> + 'static) {
        self.register(Rc::new(hook));
    }

    /// Thread `out` through every hook; failed hooks are logged and skipped.
    pub fn run(&self, recv: &R, mut out: O, args: &A) -> O {
        for (idx, hook) in self.snapshot().iter().enumerate() {
            match hook(recv, &out, args) {
                Ok(Some(next)) => out = next,
                Ok(None) => {}
                Err(err) => log::debug!("[{}] result hook #{} failed: {}", self.target, idx, err),
            }
        }
        out
    }
}

impl<R: ?Sized + 'static, A: 'static, O: 'static> HookList<InterceptHook<R, A, O>> {
    pub fn add(
        &self,
        hook: impl Fn(&R, &NativeFn<R, A, O>, &A) -> Result<HookOutcome<A, O>> + 'static,
    ) {
        self.register(Rc::new(hook));
    }
}

/// Pre- and post-call hooks for one chained method.
pub struct ChainHooks<R: ?Sized, A, O> {
    pub pre: HookList<ArgHook<R, A>>,
    pub post: HookList<ResultHook<R, A, O>>,
}

impl<R: ?Sized, A, O> Clone for ChainHooks<R, A, O> {
    fn clone(&self) -> Self {
        Self {
            pre: self.pre.clone(),
            post: self.post.clone(),
        }
    }
}

impl<R: ?Sized, A, O> fmt::Debug for ChainHooks<R, A, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainHooks")
            .field("pre", &self.pre)
            .field("post", &self.post)
            .finish()
    }
}

impl<R: ?Sized, A, O> ChainHooks<R, A, O> {
    pub fn new(target: &str) -> Self {
        Self {
            pre: HookList::new(target),
            post: HookList::new(target),
        }
    }

    pub fn target(&self) -> &str {
        self.pre.target()
    }

    pub fn is_empty(&self) -> bool {
        self.pre.is_empty() && self.post.is_empty()
    }
}
