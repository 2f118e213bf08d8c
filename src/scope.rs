//! Scopes
//!
//! A scope names where a query is evaluated: `global` for provider-wide
//! resources, `<project>` for project-wide ones and `<project>.<location>`
//! for zonal or regional ones. Only this module looks inside scope strings.

use crate::error::QueryError;

/// Scope of provider-wide resources
pub const GLOBAL_SCOPE: &str = "global";

const SCOPE_SEPARATOR: char = '.';

/// Structured form of a scope
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    Global,
    Project {
        project_id: String,
        /// Zone, region or location inside the project
        location: Option<String>,
    },
}

impl Location {
    pub fn project(project_id: &str) -> Self {
        Location::Project {
            project_id: project_id.to_string(),
            location: None,
        }
    }

    pub fn zonal(project_id: &str, location: &str) -> Self {
        Location::Project {
            project_id: project_id.to_string(),
            location: Some(location.to_string()),
        }
    }

    /// Parse a scope string
    pub fn parse(scope: &str) -> Result<Self, QueryError> {
        if scope == GLOBAL_SCOPE {
            return Ok(Location::Global);
        }

        let (project_id, location) = match scope.split_once(SCOPE_SEPARATOR) {
            Some((project, location)) => (project, Some(location)),
            None => (scope, None),
        };

        if !validate_project_id(project_id) {
            return Err(QueryError::invalid_scope(scope, ""));
        }

        match location {
            Some(l) if !validate_location(l) => Err(QueryError::invalid_scope(scope, "")),
            Some(l) => Ok(Location::zonal(project_id, l)),
            None => Ok(Location::project(project_id)),
        }
    }

    /// Encode back to a scope string
    pub fn scope(&self) -> String {
        match self {
            Location::Global => GLOBAL_SCOPE.to_string(),
            Location::Project {
                project_id,
                location: Some(location),
            } => format!("{}{}{}", project_id, SCOPE_SEPARATOR, location),
            Location::Project {
                project_id,
                location: None,
            } => project_id.clone(),
        }
    }

    pub fn project_id(&self) -> Option<&str> {
        match self {
            Location::Global => None,
            Location::Project { project_id, .. } => Some(project_id),
        }
    }

    pub fn location(&self) -> Option<&str> {
        match self {
            Location::Global => None,
            Location::Project { location, .. } => location.as_deref(),
        }
    }
}

/// Validate a GCP project ID format
/// Project IDs must be 6-30 characters, lowercase letters, digits, and hyphens
/// Must start with a letter and cannot end with a hyphen
pub fn validate_project_id(project: &str) -> bool {
    if project.len() < 6 || project.len() > 30 {
        return false;
    }

    let mut chars = project.chars();

    // Must start with a letter
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() => {},
        _ => return false,
    }

    // Must not end with a hyphen
    if project.ends_with('-') {
        return false;
    }

    project
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

fn validate_location(location: &str) -> bool {
    !location.is_empty()
        && location
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// The set of locations a wrapper answers for
#[derive(Debug, Clone)]
pub enum ScopeBinding {
    Single(Location),
    Multi(Vec<Location>),
}

impl ScopeBinding {
    pub fn single(location: Location) -> Self {
        ScopeBinding::Single(location)
    }

    pub fn global() -> Self {
        ScopeBinding::Single(Location::Global)
    }

    /// Bind to several locations; duplicates are dropped, order is kept
    pub fn multi(locations: Vec<Location>) -> anyhow::Result<Self> {
        let mut unique: Vec<Location> = Vec::with_capacity(locations.len());
        for location in locations {
            if !unique.contains(&location) {
                unique.push(location);
            }
        }
        if unique.is_empty() {
            anyhow::bail!("a multi-location binding needs at least one location");
        }
        Ok(ScopeBinding::Multi(unique))
    }

    /// Every scope this binding answers for
    pub fn scopes(&self) -> Vec<String> {
        match self {
            ScopeBinding::Single(location) => vec![location.scope()],
            ScopeBinding::Multi(locations) => locations.iter().map(Location::scope).collect(),
        }
    }

    /// The only scope of a single binding, or the first of a multi binding
    pub fn default_scope(&self) -> String {
        match self {
            ScopeBinding::Single(location) => location.scope(),
            // multi() guarantees at least one entry
            ScopeBinding::Multi(locations) => locations
                .first()
                .map(Location::scope)
                .unwrap_or_default(),
        }
    }

    /// Resolve an incoming scope to exactly one bound location
    pub fn resolve(&self, scope: &str, item_type: &str) -> Result<&Location, QueryError> {
        let found = match self {
            ScopeBinding::Single(location) => {
                Some(location).filter(|l| l.scope() == scope)
            },
            ScopeBinding::Multi(locations) => locations.iter().find(|l| l.scope() == scope),
        };

        found.ok_or_else(|| QueryError::invalid_scope(scope, item_type))
    }
}
