//! Route-and-method permission table.
//!
//! Maps an access level to the path prefixes each HTTP method may reach at
//! that level. The table is built once and shared read-only.
//!
//! JSON form:
//! ```json
//! {
//!   "anonymous": { "GET": ["/pages", "/health"] },
//!   "authenticatedUser": { "POST": ["/tu-lalem"] }
//! }
//! ```

use std::collections::HashMap;
use std::path::Path;

use axum::http::Method;
use serde::Deserialize;

/// A named tier of permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum AccessLevel {
    #[serde(rename = "anonymous")]
    Anonymous,
    #[serde(rename = "authenticatedUser", alias = "loggedInUser")]
    AuthenticatedUser,
}

/// Errors raised while loading a permission table.
#[derive(Debug, thiserror::Error)]
pub enum PermissionsError {
    #[error("failed to read permission table {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("malformed permission table: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid HTTP method in permission table: {0}")]
    InvalidMethod(String),
    #[error("path prefix must start with '/': {0:?}")]
    InvalidPrefix(String),
}

/// Per-level accessibility of one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Accessibility {
    pub anonymous: bool,
    pub authenticated_user: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PermissionTable {
    levels: HashMap<AccessLevel, HashMap<Method, Vec<String>>>,
}

/// `HEAD` is looked up with the `GET` entries.
pub fn effective_method(method: &Method) -> Method {
    if method == Method::HEAD {
        Method::GET
    } else {
        method.clone()
    }
}

impl PermissionTable {
    pub fn builder() -> PermissionTableBuilder {
        PermissionTableBuilder::default()
    }

    /// Parse a table from its JSON form.
    pub fn from_json(json: &str) -> Result<Self, PermissionsError> {
        let raw: HashMap<AccessLevel, HashMap<String, Vec<String>>> = serde_json::from_str(json)?;

        let mut builder = Self::builder();
        for (level, methods) in raw {
            for (method, prefixes) in methods {
                let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
                    .map_err(|_| PermissionsError::InvalidMethod(method.clone()))?;
                for prefix in prefixes {
                    if !prefix.starts_with('/') {
                        return Err(PermissionsError::InvalidPrefix(prefix));
                    }
                    builder = builder.allow(level, method.clone(), prefix);
                }
            }
        }
        Ok(builder.build())
    }

    /// Load a table from a JSON file.
    pub fn load(path: &Path) -> Result<Self, PermissionsError> {
        let json = std::fs::read_to_string(path).map_err(|source| PermissionsError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Whether `path` is reachable with `method` at `level`.
    ///
    /// The method is used as given; callers normalise `HEAD` first.
    pub fn is_accessible(&self, level: AccessLevel, method: &Method, path: &str) -> bool {
        self.levels
            .get(&level)
            .and_then(|methods| methods.get(method))
            .is_some_and(|prefixes| prefixes.iter().any(|prefix| path.starts_with(prefix)))
    }

    /// Accessibility of a request at every level, after `HEAD` normalisation.
    pub fn accessibility(&self, method: &Method, path: &str) -> Accessibility {
        let method = effective_method(method);
        Accessibility {
            anonymous: self.is_accessible(AccessLevel::Anonymous, &method, path),
            authenticated_user: self.is_accessible(AccessLevel::AuthenticatedUser, &method, path),
        }
    }
}

#[derive(Debug, Default)]
pub struct PermissionTableBuilder {
    levels: HashMap<AccessLevel, HashMap<Method, Vec<String>>>,
}

impl PermissionTableBuilder {
    pub fn allow(mut self, level: AccessLevel, method: Method, prefix: impl Into<String>) -> Self {
        self.levels
            .entry(level)
            .or_default()
            .entry(method)
            .or_default()
            .push(prefix.into());
        self
    }

    pub fn build(self) -> PermissionTable {
        PermissionTable {
            levels: self.levels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PermissionTable {
        PermissionTable::builder()
            .allow(AccessLevel::Anonymous, Method::GET, "/pages")
            .allow(AccessLevel::AuthenticatedUser, Method::POST, "/tu-lalem")
            .allow(AccessLevel::AuthenticatedUser, Method::GET, "/tu-lalem")
            .build()
    }

    #[test]
    fn test_prefix_match() {
        let table = table();
        assert!(table.is_accessible(AccessLevel::Anonymous, &Method::GET, "/pages"));
        assert!(table.is_accessible(AccessLevel::Anonymous, &Method::GET, "/pages/12"));
        assert!(!table.is_accessible(AccessLevel::Anonymous, &Method::GET, "/Pages"));
        assert!(!table.is_accessible(AccessLevel::Anonymous, &Method::POST, "/pages"));
        assert!(!table.is_accessible(AccessLevel::AuthenticatedUser, &Method::GET, "/pages"));
    }

    #[test]
    fn test_head_uses_get_entries() {
        let table = table();
        let access = table.accessibility(&Method::HEAD, "/pages");
        assert!(access.anonymous);
        assert!(!access.authenticated_user);
    }

    #[test]
    fn test_accessibility_per_level() {
        let access = table().accessibility(&Method::POST, "/tu-lalem/entries");
        assert_eq!(
            access,
            Accessibility {
                anonymous: false,
                authenticated_user: true,
            }
        );
    }

    #[test]
    fn test_from_json_with_alias() {
        let table = PermissionTable::from_json(
            r#"{
                "anonymous": { "get": ["/pages"] },
                "loggedInUser": { "PATCH": ["/tu-lalem"] }
            }"#,
        )
        .unwrap();

        assert!(table.is_accessible(AccessLevel::Anonymous, &Method::GET, "/pages"));
        assert!(table.is_accessible(AccessLevel::AuthenticatedUser, &Method::PATCH, "/tu-lalem"));
    }

    #[test]
    fn test_from_json_rejects_unknown_level() {
        let result = PermissionTable::from_json(r#"{ "cronUser": { "GET": ["/cron"] } }"#);
        assert!(matches!(result, Err(PermissionsError::Parse(_))));
    }

    #[test]
    fn test_from_json_rejects_relative_prefix() {
        let result = PermissionTable::from_json(r#"{ "anonymous": { "GET": ["pages"] } }"#);
        assert!(matches!(result, Err(PermissionsError::InvalidPrefix(_))));
    }

    #[test]
    fn test_empty_table_denies_everything() {
        let access = PermissionTable::default().accessibility(&Method::GET, "/");
        assert_eq!(access, Accessibility::default());
    }
}
