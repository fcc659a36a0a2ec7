//! Method-patch framework.
//!
//! A patched surface is modelled as a slot holding a [`NativeFn`]. The
//! combinators in [`wrap`] replace the slot's function with a wrapper that
//! runs the hooks registered in a [`HookList`] around the original. A
//! wrapper carries the original's name and source text and is marked so it
//! is never wrapped twice.

pub mod hooks;
pub mod wrap;

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use crate::error::Result;

pub use hooks::{ArgHook, ChainHooks, HookList, HookOutcome, InterceptHook, ResultHook};
pub use wrap::{chain, chain_async, patch_method, AsyncReturn, PatchOutcome};

/// Something a patched method can be called on.
///
/// Flags are per receiver instance and are used to stop a hook that calls
/// back into the patched entry point from recursing.
pub trait Receiver {
    fn flag_is_set(&self, flag: &str) -> bool;
    fn set_flag(&self, flag: &str, on: bool);
}

impl<T: Receiver + ?Sized> Receiver for Rc<T> {
    fn flag_is_set(&self, flag: &str) -> bool {
        (**self).flag_is_set(flag)
    }

    fn set_flag(&self, flag: &str, on: bool) {
        (**self).set_flag(flag, on)
    }
}

/// Flag storage for receivers owned by Rust code.
#[derive(Debug, Default)]
pub struct GuardFlags {
    active: RefCell<HashSet<String>>,
}

impl GuardFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, flag: &str) -> bool {
        self.active.borrow().contains(flag)
    }

    pub fn set(&self, flag: &str, on: bool) {
        let mut active = self.active.borrow_mut();
        if on {
            active.insert(flag.to_string());
        } else {
            active.remove(flag);
        }
    }
}

/// Holds a receiver flag for the duration of one call.
pub struct ReentryGuard<'a, R: Receiver + ?Sized> {
    recv: &'a R,
    flag: &'a str,
}

impl<'a, R: Receiver + ?Sized> ReentryGuard<'a, R> {
    /// `None` when the flag is already held, i.e. this is a nested call.
    pub fn enter(recv: &'a R, flag: &'a str) -> Option<Self> {
        if recv.flag_is_set(flag) {
            return None;
        }
        recv.set_flag(flag, true);
        Some(Self { recv, flag })
    }
}

impl<R: Receiver + ?Sized> Drop for ReentryGuard<'_, R> {
    fn drop(&mut self) {
        self.recv.set_flag(self.flag, false);
    }
}

pub type NativeImpl<R, A, O> = Rc<dyn Fn(&R, A) -> Result<O>>;

/// A callable method slot value: either the host's original or a wrapper
/// disguised as it.
pub struct NativeFn<R: ?Sized, A, O> {
    name: Rc<str>,
    imp: NativeImpl<R, A, O>,
    wrapped: bool,
}

impl<R: ?Sized, A, O> Clone for NativeFn<R, A, O> {
    fn clone(&self) -> Self {
        Self {
            name: Rc::clone(&self.name),
            imp: Rc::clone(&self.imp),
            wrapped: self.wrapped,
        }
    }
}

impl<R: ?Sized, A, O> fmt::Debug for NativeFn<R, A, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFn")
            .field("name", &self.name)
            .field("wrapped", &self.wrapped)
            .finish()
    }
}

impl<R: ?Sized, A, O> NativeFn<R, A, O> {
    /// Wrap a host implementation.
    pub fn new(name: &str, imp: impl Fn(&R, A) -> Result<O> + 'static) -> Self {
        Self {
            name: Rc::from(name),
            imp: Rc::new(imp),
            wrapped: false,
        }
    }

    pub(crate) fn disguised(name: Rc<str>, imp: NativeImpl<R, A, O>) -> Self {
        Self { name, imp, wrapped: true }
    }

    pub fn call(&self, recv: &R, args: A) -> Result<O> {
        (self.imp)(recv, args)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_rc(&self) -> Rc<str> {
        Rc::clone(&self.name)
    }

    /// `Function.prototype.toString` output.
    pub fn to_source(&self) -> String {
        format!("function {}() {{ [native code] }}", self.name)
    }

    /// Whether this is one of our wrappers.
    pub fn is_wrapped(&self) -> bool {
        self.wrapped
    }
}
