//! User context injection
//!
//! Thread-local storage for the user a piece of work belongs to, so that
//! spans opened inside the scope can be attributed without threading the
//! user id through every call. Only the short form of the id is kept.

use std::cell::RefCell;

use tether_core::UserId;
use uuid::Uuid;

/// User context data stored in thread-local storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContextData {
    /// Shortened user id, safe for log output
    pub user: String,
    /// Identifies one app session across log files
    pub session_id: Uuid,
}

thread_local! {
    static USER_CONTEXT: RefCell<Option<UserContextData>> = const { RefCell::new(None) };
}

/// RAII guard for user context
///
/// Sets the user context for the current thread; dropping it restores the
/// previous context.
///
/// ```ignore
/// let _guard = UserContextGuard::new(&user);
/// engine.process_queue().await?; // spans opened here carry the user
/// ```
pub struct UserContextGuard {
    previous: Option<UserContextData>,
}

impl UserContextGuard {
    pub fn new(user: &UserId) -> Self {
        Self::with_session_id(user, Uuid::new_v4())
    }

    /// Keep a stable session id, e.g. one restored after a restart
    pub fn with_session_id(user: &UserId, session_id: Uuid) -> Self {
        let data = UserContextData {
            user: user.short_id(),
            session_id,
        };
        let previous = USER_CONTEXT.with(|ctx| ctx.borrow_mut().replace(data));
        Self { previous }
    }

    /// The current user context, if any
    pub fn current() -> Option<UserContextData> {
        USER_CONTEXT.with(|ctx| ctx.borrow().clone())
    }

    pub fn current_user() -> Option<String> {
        Self::current().map(|ctx| ctx.user)
    }
}

impl Drop for UserContextGuard {
    fn drop(&mut self) {
        USER_CONTEXT.with(|ctx| *ctx.borrow_mut() = self.previous.take());
    }
}
