//! Service property values and maps.
//!
//! Every registered service carries an immutable bag of properties. The
//! resolver reads a handful of well-known keys (`service.id`,
//! `service.ranking`, `objectclass`) and feeds whole maps to LDAP filter
//! evaluation, so the value enum stays deliberately small.

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

/// Identity of a registered service. Assigned by the registry, immutable.
pub const SERVICE_ID: &str = "service.id";
/// Ranking of a provider. Higher wins; absent or non-integer reads as 0.
pub const SERVICE_RANKING: &str = "service.ranking";
/// Persistent identity of a provider. Immutable through transformation.
pub const SERVICE_PID: &str = "service.pid";
/// Name of the component instance publishing a service. Immutable through
/// transformation.
pub const INSTANCE_NAME: &str = "instance.name";
/// Interface names a registration was published under.
pub const OBJECTCLASS: &str = "objectclass";
/// LDAP expression carried by interceptor registrations, matched against the
/// identity properties of candidate dependencies.
pub const TARGET: &str = "target";

/// A single service property value.
///
/// # Examples
///
/// ```rust
/// use rivet::PropertyValue;
///
/// let rank = PropertyValue::from(10i64);
/// assert_eq!(rank.as_int(), Some(10));
/// assert_eq!(PropertyValue::from("en").as_str(), Some("en"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// A string value
    Str(String),
    /// An integer value
    Int(i64),
    /// A boolean value
    Bool(bool),
    /// A list of strings, e.g. the `objectclass` interface list
    StrList(Vec<String>),
}

impl PropertyValue {
    /// Returns the string form, `None` for non-string values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer form, `None` for non-integer values.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the boolean form, `None` for non-boolean values.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the string-list form, `None` for other values.
    pub fn as_str_list(&self) -> Option<&[String]> {
        match self {
            PropertyValue::StrList(list) => Some(list),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Str(s) => write!(f, "{}", s),
            PropertyValue::Int(i) => write!(f, "{}", i),
            PropertyValue::Bool(b) => write!(f, "{}", b),
            PropertyValue::StrList(list) => write!(f, "{}", list.join(", ")),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Str(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Str(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        PropertyValue::Int(value as i64)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(value: Vec<String>) -> Self {
        PropertyValue::StrList(value)
    }
}

/// An ordered map of service properties.
///
/// Keys are stored case-sensitively; LDAP evaluation looks attributes up
/// case-insensitively through [`PropertyMap::get_ignore_case`].
///
/// # Examples
///
/// ```rust
/// use rivet::PropertyMap;
///
/// let props = PropertyMap::new()
///     .with("lang", "en")
///     .with("service.ranking", 5i64);
/// assert_eq!(props.get("lang").and_then(|v| v.as_str()), Some("en"));
/// assert!(props.get_ignore_case("LANG").is_some());
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyMap {
    entries: BTreeMap<String, PropertyValue>,
}

impl PropertyMap {
    /// Creates an empty property map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a property, replacing any previous value under the key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Builder-style insertion.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Removes a property, returning its previous value.
    pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
        self.entries.remove(key)
    }

    /// Looks a property up by exact key.
    pub fn get<Q>(&self, key: &Q) -> Option<&PropertyValue>
    where
        String: Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.entries.get(key)
    }

    /// Looks a property up ignoring the case of the key, the way LDAP
    /// attribute names are matched.
    pub fn get_ignore_case(&self, key: &str) -> Option<&PropertyValue> {
        if let Some(value) = self.entries.get(key) {
            return Some(value);
        }
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    /// Does the map contain the exact key?
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Iterates over `(key, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.entries.iter()
    }

    /// Iterates over the keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// Number of properties.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Is the map empty?
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, PropertyValue)> for PropertyMap {
    fn from_iter<T: IntoIterator<Item = (String, PropertyValue)>>(iter: T) -> Self {
        PropertyMap {
            entries: iter.into_iter().collect(),
        }
    }
}
