//! Access policy gate.
//!
//! Decides whether a view may render for the current session. Everything here
//! is a pure function of `(route, context)`; views and API handlers ask for a
//! [`Capability`] instead of branching on the role themselves.

use serde::Serialize;

use crate::db::Role;

pub const LOGIN_ROUTE: &str = "/login";
pub const DASHBOARD_ROUTE: &str = "/dashboard";

/// What the gate knows about the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessContext {
    /// A persisted credential is still being resolved
    Loading,
    Anonymous,
    Authenticated(Role),
}

/// Minimum capability level a route needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Requirement {
    Public,
    Authenticated,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", content = "target", rename_all = "lowercase")]
pub enum Decision {
    /// Render the neutral loading state; no decision yet
    Pending,
    Allow,
    Redirect(String),
}

/// Feature-level permissions derived from the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    BrowseCatalog,
    BookTestDrive,
    ViewOwnBookings,
    EditProfile,
    ManageBookings,
    ManageUsers,
    ViewReports,
}

impl Capability {
    pub const ALL: [Capability; 7] = [
        Capability::BrowseCatalog,
        Capability::BookTestDrive,
        Capability::ViewOwnBookings,
        Capability::EditProfile,
        Capability::ManageBookings,
        Capability::ManageUsers,
        Capability::ViewReports,
    ];

    fn requirement(&self) -> Requirement {
        match self {
            Capability::BrowseCatalog => Requirement::Public,
            Capability::BookTestDrive | Capability::ViewOwnBookings | Capability::EditProfile => {
                Requirement::Authenticated
            }
            Capability::ManageBookings | Capability::ManageUsers | Capability::ViewReports => {
                Requirement::Admin
            }
        }
    }
}

/// Normalise a route path: drop query/fragment and trailing slashes
fn normalize(route: &str) -> &str {
    let path = route.split(['?', '#']).next().unwrap_or("");
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

/// Requirement of a route in the application's route table. Unknown routes are public.
pub fn requirement_for(route: &str) -> Requirement {
    let path = normalize(route);
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match segments.as_slice() {
        ["admin", ..] => Requirement::Admin,
        ["profile"] | ["dashboard"] | ["test-drive", _] => Requirement::Authenticated,
        _ => Requirement::Public,
    }
}

fn satisfies(context: AccessContext, requirement: Requirement) -> Result<(), Decision> {
    match (requirement, context) {
        (Requirement::Public, _) => Ok(()),
        (_, AccessContext::Loading) => Err(Decision::Pending),
        (_, AccessContext::Anonymous) => Err(Decision::Redirect(LOGIN_ROUTE.to_string())),
        (Requirement::Admin, AccessContext::Authenticated(role)) if role != Role::Admin => {
            Err(Decision::Redirect(DASHBOARD_ROUTE.to_string()))
        }
        _ => Ok(()),
    }
}

/// Decide whether `route` may render for `context`.
///
/// While the session is loading no decision is made, even for public routes,
/// so nothing renders until the credential is resolved.
pub fn can_access(route: &str, context: AccessContext) -> Decision {
    if context == AccessContext::Loading {
        return Decision::Pending;
    }
    match satisfies(context, requirement_for(route)) {
        Ok(()) => Decision::Allow,
        Err(decision) => decision,
    }
}

pub fn grants(context: AccessContext, capability: Capability) -> bool {
    satisfies(context, capability.requirement()).is_ok()
}

pub fn capabilities(context: AccessContext) -> Vec<Capability> {
    Capability::ALL
        .into_iter()
        .filter(|c| grants(context, *c))
        .collect()
}

/// Where a signed-in account lands after login
pub fn home_route(context: AccessContext) -> &'static str {
    if grants(context, Capability::ManageBookings) {
        "/admin"
    } else if grants(context, Capability::ViewOwnBookings) {
        DASHBOARD_ROUTE
    } else {
        "/"
    }
}
