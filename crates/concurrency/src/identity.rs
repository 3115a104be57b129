//! Per-thread acting identity with scoped elevation
//!
//! The acting identity is thread-bound, matching how a request thread in
//! the host carries its authenticated user. [`IdentityGuard`] swaps the
//! identity in and restores the previous one when dropped, so restoration
//! happens on early returns, errors and unwinding alike.

use docnum_core::{NumberingResult, SystemIdentity, SYSTEM_USER};
use std::cell::RefCell;
use tracing::trace;

thread_local! {
    static CURRENT_USER: RefCell<Option<String>> = RefCell::new(None);
}

/// Restores the previous identity on drop
#[must_use = "the identity is restored as soon as the guard is dropped"]
#[derive(Debug)]
pub struct IdentityGuard {
    previous: Option<String>,
}

impl IdentityGuard {
    /// Act as `user` until the guard is dropped
    pub fn enter(user: impl Into<String>) -> Self {
        let user = user.into();
        let previous = CURRENT_USER.with(|cell| cell.replace(Some(user)));
        Self { previous }
    }
}

impl Drop for IdentityGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT_USER.with(|cell| {
            *cell.borrow_mut() = previous;
        });
    }
}

/// Thread-bound identity source
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadIdentity;

impl ThreadIdentity {
    /// Create the identity source
    pub fn new() -> Self {
        Self
    }

    /// Set the calling thread's identity, replacing any previous one
    pub fn set_current(user: impl Into<String>) {
        let user = user.into();
        CURRENT_USER.with(|cell| {
            *cell.borrow_mut() = Some(user);
        });
    }

    /// Clear the calling thread's identity
    pub fn clear() {
        CURRENT_USER.with(|cell| {
            *cell.borrow_mut() = None;
        });
    }

    /// The calling thread's identity
    pub fn current_user() -> Option<String> {
        CURRENT_USER.with(|cell| cell.borrow().clone())
    }

    /// Whether the calling thread acts as the system identity
    pub fn is_system() -> bool {
        CURRENT_USER.with(|cell| cell.borrow().as_deref() == Some(SYSTEM_USER))
    }

    /// Run `f` as `user`
    pub fn run_as<T>(user: &str, f: impl FnOnce() -> T) -> T {
        let _guard = IdentityGuard::enter(user);
        f()
    }
}

impl SystemIdentity for ThreadIdentity {
    fn current(&self) -> Option<String> {
        Self::current_user()
    }

    fn run_as_system(&self, work: &mut dyn FnMut() -> NumberingResult<()>) -> NumberingResult<()> {
        trace!(caller = ?Self::current_user(), "elevating to system identity");
        let _guard = IdentityGuard::enter(SYSTEM_USER);
        work()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docnum_core::{as_system, NumberingError};
    use std::panic;

    #[test]
    fn test_run_as_system_restores_caller() {
        ThreadIdentity::set_current("alice");
        let identity = ThreadIdentity::new();

        let seen = as_system(&identity, || Ok(ThreadIdentity::current_user())).unwrap();
        assert_eq!(seen.as_deref(), Some(SYSTEM_USER));
        assert_eq!(identity.current().as_deref(), Some("alice"));
        ThreadIdentity::clear();
    }

    #[test]
    fn test_identity_restored_after_error() {
        ThreadIdentity::set_current("bob");
        let identity = ThreadIdentity::new();

        let result: NumberingResult<()> =
            as_system(&identity, || Err(NumberingError::storage("boom")));
        assert!(result.is_err());
        assert_eq!(ThreadIdentity::current_user().as_deref(), Some("bob"));
        ThreadIdentity::clear();
    }

    #[test]
    fn test_identity_restored_after_panic() {
        ThreadIdentity::set_current("carol");
        let outcome = panic::catch_unwind(|| {
            ThreadIdentity::run_as(SYSTEM_USER, || panic!("inside elevated work"));
        });
        assert!(outcome.is_err());
        assert_eq!(ThreadIdentity::current_user().as_deref(), Some("carol"));
        ThreadIdentity::clear();
    }

    #[test]
    fn test_nested_guards_unwind_in_order() {
        ThreadIdentity::clear();
        {
            let _outer = IdentityGuard::enter("outer");
            {
                let _inner = IdentityGuard::enter("inner");
                assert_eq!(ThreadIdentity::current_user().as_deref(), Some("inner"));
            }
            assert_eq!(ThreadIdentity::current_user().as_deref(), Some("outer"));
        }
        assert_eq!(ThreadIdentity::current_user(), None);
    }

    #[test]
    fn test_identity_is_thread_bound() {
        ThreadIdentity::set_current("main");
        let other = std::thread::spawn(ThreadIdentity::current_user).join().unwrap();
        assert_eq!(other, None);
        ThreadIdentity::clear();
    }
}
