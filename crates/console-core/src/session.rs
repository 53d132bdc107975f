use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Views the shell can navigate between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Login,
    Dashboard,
}

/// Process-wide authentication state.
///
/// Starts unauthenticated. Clones share the same flag, so the handle can be
/// given to every component that needs it. Writes are last-write-wins; no
/// expiry is tracked on the client.
#[derive(Debug, Clone, Default)]
pub struct Session {
    authenticated: Arc<AtomicBool>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    pub fn mark_authenticated(&self) {
        self.authenticated.store(true, Ordering::SeqCst);
    }

    /// Route the shell should actually show when `requested` is asked for.
    pub fn guard(&self, requested: Route) -> Route {
        match requested {
            Route::Dashboard if !self.is_authenticated() => Route::Login,
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unauthenticated_and_guards_dashboard() {
        let session = Session::new();
        assert!(!session.is_authenticated());
        assert_eq!(session.guard(Route::Dashboard), Route::Login);
        assert_eq!(session.guard(Route::Login), Route::Login);
    }

    #[test]
    fn clones_share_the_flag() {
        let session = Session::new();
        let shared = session.clone();
        shared.mark_authenticated();
        assert!(session.is_authenticated());
        assert_eq!(session.guard(Route::Dashboard), Route::Dashboard);
    }
}
