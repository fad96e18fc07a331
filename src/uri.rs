//! Resource URI - scheme-qualified identity for every stored resource
//!
//! Format: `<scheme>://<namespace>/<seg>/<seg>...`
//!
//! Examples:
//! - `memory://test/data/watch.txt`
//! - `file://configs/app/settings.json`
//! - `sql://users/42`

use std::convert::Infallible;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use serde::{Deserialize, Serialize};

const SCHEME_SEPARATOR: &str = "://";

/// Scheme-qualified identifier for one logical resource.
///
/// The canonical string is the identity: two URIs are equal iff their
/// canonical strings are equal. It doubles as the storage key for
/// backends that key by string.
#[derive(Debug, Clone)]
pub struct ResourceUri {
    scheme: String,
    namespace: String,
    path: Vec<String>,
    canonical: String,
}

impl ResourceUri {
    /// Create a new ResourceUri from its parts
    pub fn new<I, S>(scheme: impl Into<String>, namespace: impl Into<String>, path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let scheme = scheme.into();
        let namespace = namespace.into();
        let path: Vec<String> = path
            .into_iter()
            .map(Into::into)
            .filter(|s: &String| !s.is_empty())
            .collect();
        let canonical = canonical_form(&scheme, &namespace, &path);
        Self { scheme, namespace, path, canonical }
    }

    /// Parse a URI string.
    ///
    /// Parsing never fails. Malformed input (no `://`, empty scheme or
    /// empty namespace) produces a URI with an empty scheme, which no
    /// provider is registered under.
    pub fn parse(uri: &str) -> Self {
        let Some((scheme, rest)) = uri.split_once(SCHEME_SEPARATOR) else {
            return Self::unusable(uri);
        };

        let mut parts = rest.split('/');
        let namespace = parts.next().unwrap_or_default();
        if scheme.is_empty() || namespace.is_empty() {
            return Self::unusable(uri);
        }

        Self::new(scheme, namespace, parts)
    }

    fn unusable(raw: &str) -> Self {
        Self {
            scheme: String::new(),
            namespace: String::new(),
            path: Vec::new(),
            canonical: raw.to_string(),
        }
    }

    /// Whether this URI can be dispatched (has a scheme)
    pub fn is_valid(&self) -> bool {
        !self.scheme.is_empty()
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Path segments joined with `/` (empty when there are none)
    pub fn joined_path(&self) -> String {
        self.path.join("/")
    }

    /// Final path segment, used to route `execute` actions
    pub fn last_segment(&self) -> Option<&str> {
        self.path.last().map(String::as_str)
    }

    /// Canonical prefix shared by this URI's siblings.
    ///
    /// `memory://t/data/list` -> `memory://t/data/`
    pub fn parent_prefix(&self) -> String {
        let parent = match self.path.split_last() {
            Some((_, parent)) => parent,
            None => &[][..],
        };
        let mut prefix = format!("{}{}{}/", self.scheme, SCHEME_SEPARATOR, self.namespace);
        for seg in parent {
            prefix.push_str(seg);
            prefix.push('/');
        }
        prefix
    }

    /// Convert to the canonical URI string
    pub fn to_uri_string(&self) -> String {
        self.canonical.clone()
    }

    pub fn as_str(&self) -> &str {
        &self.canonical
    }
}

fn canonical_form(scheme: &str, namespace: &str, path: &[String]) -> String {
    let mut out = format!("{}{}{}", scheme, SCHEME_SEPARATOR, namespace);
    for seg in path {
        out.push('/');
        out.push_str(seg);
    }
    out
}

impl PartialEq for ResourceUri {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for ResourceUri {}

impl Hash for ResourceUri {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl fmt::Display for ResourceUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl FromStr for ResourceUri {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<&str> for ResourceUri {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

impl Serialize for ResourceUri {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.canonical)
    }
}

impl<'de> Deserialize<'de> for ResourceUri {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(ResourceUri::parse(&s))
    }
}
