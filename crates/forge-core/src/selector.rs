//! Label selectors for list and watch queries.

use std::collections::BTreeMap;
use std::fmt;

/// A label selector: everything, a set of required label values, or a raw
/// query string passed through verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Selector {
    /// Matches every object.
    #[default]
    All,
    /// Matches objects carrying all of the given label values.
    Labels(BTreeMap<String, String>),
    /// A raw label-query string, e.g. `team=build,env=prod`.
    Raw(String),
}

impl Selector {
    /// Builds a selector requiring a single label value.
    #[must_use]
    pub fn label(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(key.into(), value.into());
        Self::Labels(labels)
    }

    /// Renders the selector as a label-query string; `None` when it matches
    /// everything.
    #[must_use]
    pub fn to_query(&self) -> Option<String> {
        match self {
            Self::All => None,
            Self::Labels(labels) => {
                if labels.is_empty() {
                    return None;
                }
                let parts: Vec<String> =
                    labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
                Some(parts.join(","))
            }
            Self::Raw(raw) => {
                if raw.is_empty() {
                    None
                } else {
                    Some(raw.clone())
                }
            }
        }
    }

    /// Evaluates the selector against an object's labels.
    ///
    /// Raw selectors are parsed as comma-separated `key=value` terms; terms
    /// that do not parse are ignored, matching the server's lenient handling
    /// of empty queries.
    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Self::All => true,
            Self::Labels(required) => required
                .iter()
                .all(|(k, v)| labels.get(k).is_some_and(|have| have == v)),
            Self::Raw(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|term| !term.is_empty())
                .all(|term| match term.split_once('=') {
                    Some((k, v)) => {
                        labels.get(k.trim()).is_some_and(|have| have == v.trim())
                    }
                    // A bare key is an existence requirement.
                    None => labels.contains_key(term),
                }),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_query() {
            Some(q) => write!(f, "{q}"),
            None => write!(f, "<all>"),
        }
    }
}
