//! LDAP search filters (RFC 1960) over service property maps.
//!
//! Filters select service references from the set of providers publishing a
//! required specification. Evaluation always works on a [`PropertyMap`], never
//! on a reference handle; composite registries expose reference types whose
//! native match entry points are not safe to call, so the resolver only ever
//! hands the evaluator plain property maps.

use std::fmt;
use std::str::FromStr;

use crate::error::{BindError, BindResult};
use crate::properties::{PropertyMap, PropertyValue};

/// A compiled LDAP filter.
///
/// # Examples
///
/// ```rust
/// use rivet::{LdapFilter, PropertyMap};
///
/// let filter = LdapFilter::parse("(&(lang=en)(service.ranking>=5))").unwrap();
/// let props = PropertyMap::new().with("lang", "en").with("service.ranking", 7i64);
/// assert!(filter.matches(&props));
///
/// let other = PropertyMap::new().with("lang", "fr");
/// assert!(!filter.matches(&other));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct LdapFilter {
    node: Node,
    text: String,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
    Present(String),
    Compare {
        attribute: String,
        op: CompareOp,
        value: String,
    },
    Substring {
        attribute: String,
        initial: Option<String>,
        any: Vec<String>,
        terminal: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Equal,
    GreaterEq,
    LessEq,
    Approx,
}

impl LdapFilter {
    /// Compiles a filter expression.
    ///
    /// Returns [`BindError::InvalidFilterSyntax`] describing the offending
    /// construct on malformed input.
    pub fn parse(text: &str) -> BindResult<LdapFilter> {
        let mut parser = Parser {
            bytes: text.as_bytes(),
            pos: 0,
        };
        let result = (|| {
            parser.skip_whitespace();
            let node = parser.parse_filter()?;
            parser.skip_whitespace();
            if parser.pos != parser.bytes.len() {
                return Err(format!("trailing characters at offset {}", parser.pos));
            }
            Ok(node)
        })();

        match result {
            Ok(node) => Ok(LdapFilter {
                node,
                text: text.to_string(),
            }),
            Err(reason) => Err(BindError::InvalidFilterSyntax {
                filter: text.to_string(),
                reason,
            }),
        }
    }

    /// The source text of the filter.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Evaluates the filter against a property map.
    pub fn matches(&self, properties: &PropertyMap) -> bool {
        self.node.matches(properties)
    }
}

impl FromStr for LdapFilter {
    type Err = BindError;

    fn from_str(s: &str) -> BindResult<LdapFilter> {
        LdapFilter::parse(s)
    }
}

impl fmt::Display for LdapFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

struct Parser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn expect(&mut self, byte: u8) -> Result<(), String> {
        match self.bump() {
            Some(b) if b == byte => Ok(()),
            Some(b) => Err(format!(
                "expected '{}' at offset {}, found '{}'",
                byte as char,
                self.pos - 1,
                b as char
            )),
            None => Err(format!("expected '{}', found end of input", byte as char)),
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn parse_filter(&mut self) -> Result<Node, String> {
        self.expect(b'(')?;
        let node = match self.peek() {
            Some(b'&') => {
                self.pos += 1;
                Node::And(self.parse_filter_list()?)
            }
            Some(b'|') => {
                self.pos += 1;
                Node::Or(self.parse_filter_list()?)
            }
            Some(b'!') => {
                self.pos += 1;
                self.skip_whitespace();
                Node::Not(Box::new(self.parse_filter()?))
            }
            Some(_) => self.parse_item()?,
            None => return Err("unterminated filter".to_string()),
        };
        self.skip_whitespace();
        self.expect(b')')?;
        Ok(node)
    }

    fn parse_filter_list(&mut self) -> Result<Vec<Node>, String> {
        let mut nodes = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some(b'(') => nodes.push(self.parse_filter()?),
                _ => break,
            }
        }
        if nodes.is_empty() {
            return Err(format!("empty filter list at offset {}", self.pos));
        }
        Ok(nodes)
    }

    fn parse_item(&mut self) -> Result<Node, String> {
        let attribute = self.parse_attribute()?;
        let op = match self.bump() {
            Some(b'=') => CompareOp::Equal,
            Some(b'>') => {
                self.expect(b'=')?;
                CompareOp::GreaterEq
            }
            Some(b'<') => {
                self.expect(b'=')?;
                CompareOp::LessEq
            }
            Some(b'~') => {
                self.expect(b'=')?;
                CompareOp::Approx
            }
            Some(b) => return Err(format!("unexpected operator '{}'", b as char)),
            None => return Err("missing operator".to_string()),
        };

        let (segments, wildcards) = self.parse_value()?;
        if op == CompareOp::Equal && wildcards {
            // (attr=*) is a presence test, anything else with '*' a substring.
            if segments.iter().all(|s| s.is_empty()) {
                return Ok(Node::Present(attribute));
            }
            let mut parts = segments;
            let terminal = if parts.len() > 1 { parts.pop() } else { None };
            let initial = if !parts.is_empty() && !parts[0].is_empty() {
                Some(parts.remove(0))
            } else {
                if !parts.is_empty() {
                    parts.remove(0);
                }
                None
            };
            let terminal = terminal.filter(|t| !t.is_empty());
            let any = parts.into_iter().filter(|p| !p.is_empty()).collect();
            return Ok(Node::Substring {
                attribute,
                initial,
                any,
                terminal,
            });
        }

        if wildcards {
            return Err("wildcards are only valid with '='".to_string());
        }
        Ok(Node::Compare {
            attribute,
            op,
            value: segments.into_iter().next().unwrap_or_default(),
        })
    }

    fn parse_attribute(&mut self) -> Result<String, String> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            match b {
                b'=' | b'>' | b'<' | b'~' | b'(' | b')' => break,
                _ => self.pos += 1,
            }
        }
        let attr = std::str::from_utf8(&self.bytes[start..self.pos])
            .map_err(|_| "attribute is not valid UTF-8".to_string())?
            .trim()
            .to_string();
        if attr.is_empty() {
            return Err(format!("empty attribute at offset {}", start));
        }
        Ok(attr)
    }

    /// Reads a value up to the closing parenthesis. Returns the `*`-separated
    /// segments and whether any wildcard was present.
    fn parse_value(&mut self) -> Result<(Vec<String>, bool), String> {
        let mut segments = Vec::new();
        let mut current = String::new();
        let mut wildcards = false;
        loop {
            match self.peek() {
                Some(b')') | None => break,
                Some(b'(') => return Err("unescaped '(' in value".to_string()),
                Some(b'*') => {
                    self.pos += 1;
                    wildcards = true;
                    segments.push(std::mem::take(&mut current));
                }
                Some(b'\\') => {
                    self.pos += 1;
                    let escaped = self
                        .bump()
                        .ok_or_else(|| "dangling escape at end of input".to_string())?;
                    current.push(escaped as char);
                }
                Some(b) => {
                    self.pos += 1;
                    current.push(b as char);
                }
            }
        }
        segments.push(current);
        Ok((segments, wildcards))
    }
}

impl Node {
    fn matches(&self, properties: &PropertyMap) -> bool {
        match self {
            Node::And(nodes) => nodes.iter().all(|n| n.matches(properties)),
            Node::Or(nodes) => nodes.iter().any(|n| n.matches(properties)),
            Node::Not(node) => !node.matches(properties),
            Node::Present(attribute) => properties.get_ignore_case(attribute).is_some(),
            Node::Compare {
                attribute,
                op,
                value,
            } => properties
                .get_ignore_case(attribute)
                .map(|actual| compare(actual, *op, value))
                .unwrap_or(false),
            Node::Substring {
                attribute,
                initial,
                any,
                terminal,
            } => properties
                .get_ignore_case(attribute)
                .map(|actual| match actual {
                    PropertyValue::Str(s) => substring_match(s, initial, any, terminal),
                    PropertyValue::StrList(list) => list
                        .iter()
                        .any(|s| substring_match(s, initial, any, terminal)),
                    _ => false,
                })
                .unwrap_or(false),
        }
    }
}

fn compare(actual: &PropertyValue, op: CompareOp, expected: &str) -> bool {
    match actual {
        PropertyValue::Str(s) => compare_str(s, op, expected),
        PropertyValue::Int(i) => match expected.trim().parse::<i64>() {
            Ok(expected) => match op {
                CompareOp::Equal | CompareOp::Approx => *i == expected,
                CompareOp::GreaterEq => *i >= expected,
                CompareOp::LessEq => *i <= expected,
            },
            Err(_) => false,
        },
        PropertyValue::Bool(b) => match expected.trim().parse::<bool>() {
            Ok(expected) => match op {
                CompareOp::Equal | CompareOp::Approx => *b == expected,
                _ => false,
            },
            Err(_) => false,
        },
        PropertyValue::StrList(list) => list.iter().any(|s| compare_str(s, op, expected)),
    }
}

fn compare_str(actual: &str, op: CompareOp, expected: &str) -> bool {
    match op {
        CompareOp::Equal => actual == expected,
        CompareOp::GreaterEq => actual >= expected,
        CompareOp::LessEq => actual <= expected,
        // Approximate match: case and surrounding whitespace insensitive.
        CompareOp::Approx => actual.trim().eq_ignore_ascii_case(expected.trim()),
    }
}

fn substring_match(
    actual: &str,
    initial: &Option<String>,
    any: &[String],
    terminal: &Option<String>,
) -> bool {
    let mut rest = actual;
    if let Some(prefix) = initial {
        match rest.strip_prefix(prefix.as_str()) {
            Some(stripped) => rest = stripped,
            None => return false,
        }
    }
    if let Some(suffix) = terminal {
        match rest.strip_suffix(suffix.as_str()) {
            Some(stripped) => rest = stripped,
            None => return false,
        }
    }
    for part in any {
        match rest.find(part.as_str()) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props() -> PropertyMap {
        PropertyMap::new()
            .with("lang", "en")
            .with("service.ranking", 10i64)
            .with("enabled", true)
            .with(
                "objectclass",
                vec!["org.example.Foo".to_string(), "org.example.Bar".to_string()],
            )
    }

    #[test]
    fn equality_and_presence() {
        assert!(LdapFilter::parse("(lang=en)").unwrap().matches(&props()));
        assert!(!LdapFilter::parse("(lang=fr)").unwrap().matches(&props()));
        assert!(LdapFilter::parse("(lang=*)").unwrap().matches(&props()));
        assert!(!LdapFilter::parse("(missing=*)").unwrap().matches(&props()));
    }

    #[test]
    fn numeric_and_boolean_comparisons() {
        assert!(LdapFilter::parse("(service.ranking>=10)").unwrap().matches(&props()));
        assert!(LdapFilter::parse("(service.ranking<=10)").unwrap().matches(&props()));
        assert!(!LdapFilter::parse("(service.ranking>=11)").unwrap().matches(&props()));
        assert!(LdapFilter::parse("(enabled=true)").unwrap().matches(&props()));
    }

    #[test]
    fn composite_expressions() {
        let filter = LdapFilter::parse("(&(lang=en)(|(service.ranking>=5)(enabled=false)))").unwrap();
        assert!(filter.matches(&props()));
        assert!(LdapFilter::parse("(!(lang=fr))").unwrap().matches(&props()));
        assert!(!LdapFilter::parse("(!(lang=en))").unwrap().matches(&props()));
    }

    #[test]
    fn substring_patterns() {
        assert!(LdapFilter::parse("(lang=e*)").unwrap().matches(&props()));
        assert!(LdapFilter::parse("(lang=*n)").unwrap().matches(&props()));
        assert!(LdapFilter::parse("(objectclass=org.example.*)").unwrap().matches(&props()));
        assert!(LdapFilter::parse("(objectclass=*Bar)").unwrap().matches(&props()));
        assert!(!LdapFilter::parse("(lang=f*)").unwrap().matches(&props()));
    }

    #[test]
    fn objectclass_membership() {
        assert!(LdapFilter::parse("(objectclass=org.example.Foo)").unwrap().matches(&props()));
        assert!(!LdapFilter::parse("(objectclass=org.example.Baz)").unwrap().matches(&props()));
    }

    #[test]
    fn approx_match_ignores_case() {
        assert!(LdapFilter::parse("(lang~=EN)").unwrap().matches(&props()));
    }

    #[test]
    fn attribute_lookup_ignores_case() {
        assert!(LdapFilter::parse("(LANG=en)").unwrap().matches(&props()));
    }

    #[test]
    fn syntax_errors() {
        for bad in ["", "(", "(lang=en", "lang=en", "(&)", "(lang>5)", "()", "(lang=en))"] {
            match LdapFilter::parse(bad) {
                Err(BindError::InvalidFilterSyntax { filter, .. }) => assert_eq!(filter, bad),
                other => panic!("expected syntax error for {:?}, got {:?}", bad, other),
            }
        }
    }

    #[test]
    fn display_round_trip() {
        let text = "(&(lang=en)(service.ranking>=5))";
        assert_eq!(LdapFilter::parse(text).unwrap().to_string(), text);
    }
}
