//! Route Guard
//!
//! Navigation glue: decides whether a route may be shown for the current
//! session or where to send the user instead.

use crate::session::SessionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Root,
    Login,
    Register,
    Todos,
}

impl Route {
    pub const ALL: [Route; 4] = [Route::Root, Route::Login, Route::Register, Route::Todos];

    pub fn path(&self) -> &'static str {
        match self {
            Route::Root => "/",
            Route::Login => "/login",
            Route::Register => "/register",
            Route::Todos => "/todos",
        }
    }

    /// Exact path match; trailing slashes are ignored
    pub fn from_path(path: &str) -> Option<Route> {
        let trimmed = path.trim_end_matches('/');
        let normalized = if trimmed.is_empty() { "/" } else { trimmed };
        Self::ALL.into_iter().find(|route| route.path() == normalized)
    }

    pub fn requires_session(&self) -> bool {
        matches!(self, Route::Todos)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit(Route),
    Redirect(Route),
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admit(_))
    }

    /// Route that ends up being shown
    pub fn target(&self) -> Route {
        match self {
            Admission::Admit(route) | Admission::Redirect(route) => *route,
        }
    }
}

#[derive(Clone)]
pub struct RouteGuard {
    session: SessionStore,
}

impl RouteGuard {
    pub fn new(session: SessionStore) -> Self {
        Self { session }
    }

    pub fn admit(&self, route: Route) -> Admission {
        match route {
            Route::Root => Admission::Redirect(Route::Todos),
            route if route.requires_session() && !self.session.is_authenticated() => {
                Admission::Redirect(Route::Login)
            }
            route => Admission::Admit(route),
        }
    }

    /// Resolve a raw path, following redirects to the route finally shown.
    /// Unknown paths resolve like `/`.
    pub fn resolve(&self, path: &str) -> Route {
        let mut route = Route::from_path(path).unwrap_or(Route::Root);
        // Redirect chains are at most two hops (/ -> /todos -> /login)
        for _ in 0..Route::ALL.len() {
            match self.admit(route) {
                Admission::Admit(shown) => return shown,
                Admission::Redirect(next) => route = next,
            }
        }
        route
    }
}
