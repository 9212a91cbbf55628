//! Error types for the dependency resolver.

use std::fmt;

/// Dependency resolution errors
///
/// Represents the error conditions that can occur while configuring or
/// reconfiguring a service dependency. Runtime set churn is never an error:
/// providers appearing and disappearing is the normal operating mode, and the
/// terminal `Broken` condition is a dependency *state*, observable through
/// [`DependencyModel::state`](crate::DependencyModel::state), not an error
/// value.
///
/// # Examples
///
/// ```rust
/// use rivet::{BindError, LdapFilter};
///
/// // Malformed LDAP filters surface as configuration faults.
/// match LdapFilter::parse("(lang=en") {
///     Err(BindError::InvalidFilterSyntax { filter, .. }) => {
///         assert_eq!(filter, "(lang=en");
///     }
///     _ => unreachable!(),
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    /// Malformed LDAP filter expression
    InvalidFilterSyntax {
        /// The filter text that failed to compile
        filter: String,
        /// What the parser objected to
        reason: String,
    },
    /// Unrecognised binding policy literal
    UnknownPolicy(String),
    /// A named comparator cannot be resolved
    UnloadableComparator(String),
    /// A required specification cannot be resolved
    UnloadableSpecification(String),
    /// Attempt to overlay or remove an immutable reference property
    IllegalPropertyChange(String),
    /// Reconfiguration not permitted once tracking has started
    UnsupportedReconfiguration(&'static str),
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindError::InvalidFilterSyntax { filter, reason } => {
                write!(f, "Invalid filter syntax in {:?}: {}", filter, reason)
            }
            BindError::UnknownPolicy(policy) => write!(f, "Binding policy unknown: {}", policy),
            BindError::UnloadableComparator(name) => {
                write!(f, "Cannot resolve the comparator: {}", name)
            }
            BindError::UnloadableSpecification(name) => {
                write!(f, "A required specification cannot be resolved: {}", name)
            }
            BindError::IllegalPropertyChange(key) => {
                write!(f, "Cannot change the property {}", key)
            }
            BindError::UnsupportedReconfiguration(what) => {
                write!(f, "Unsupported reconfiguration: {}", what)
            }
        }
    }
}

impl std::error::Error for BindError {}

/// Result type for dependency configuration operations
///
/// A convenience alias for `Result<T, BindError>` used throughout rivet,
/// following the common Rust pattern of a crate-specific Result type to
/// reduce boilerplate in function signatures.
pub type BindResult<T> = Result<T, BindError>;
