//! Matching human-readable names against broker identifiers

use serde::Deserialize;

/// How a name is matched against existing topic ARNs or queue URLs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPolicy {
    /// The trailing resource segment of the identifier equals the name
    #[default]
    Exact,
    /// The identifier contains the name anywhere. Lenient: `orders` also
    /// matches `orders-archive` and any identifier whose account or host
    /// happens to contain it.
    Contains,
}

impl MatchPolicy {
    pub fn matches(&self, identifier: &str, name: &str) -> bool {
        match self {
            Self::Exact => resource_name(identifier) == name,
            Self::Contains => identifier.contains(name),
        }
    }
}

/// The trailing segment of an ARN (`...:name`) or queue URL (`.../name`)
pub fn resource_name(identifier: &str) -> &str {
    identifier
        .rsplit([':', '/'])
        .next()
        .unwrap_or(identifier)
}
