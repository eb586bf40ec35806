use std::collections::HashSet;

use uuid::Uuid;

/// Delimiters used by identity providers that pack multiple group tokens
/// into one claim value (e.g. "Engineering#Ops|Finance").
const GROUP_TOKEN_DELIMITERS: &[char] = &['#', '/', '|', ',', ';', ':'];

/// Case-insensitive allow-list of group names, group ids, or emails.
///
/// Values are trimmed and lowercased once at construction; blank entries are
/// dropped. An empty set matches nothing.
#[derive(Debug, Clone, Default)]
pub struct GroupSet {
    values: HashSet<String>,
}

impl GroupSet {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            values: values
                .into_iter()
                .map(|v| v.as_ref().trim().to_lowercase())
                .filter(|v| !v.is_empty())
                .collect(),
        }
    }

    /// Build an id allow-list, normalizing UUID-shaped entries to the
    /// canonical hyphenated form. Entries that do not parse are kept as
    /// plain case-insensitive strings.
    pub fn from_ids<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            values: values
                .into_iter()
                .map(|v| normalize_guid(v.as_ref()).unwrap_or_else(|| v.as_ref().trim().to_lowercase()))
                .filter(|v| !v.is_empty())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, value: &str) -> bool {
        self.values.contains(&value.trim().to_lowercase())
    }
}

/// Canonical hyphenated lowercase form of a UUID-shaped string, if it parses.
pub fn normalize_guid(value: &str) -> Option<String> {
    Uuid::parse_str(value.trim())
        .ok()
        .map(|uuid| uuid.as_hyphenated().to_string())
}

/// Whether a raw group-bearing claim value matches either allow-list.
///
/// The value is trimmed and checked against `names` directly, then against
/// `ids` in canonical UUID form when it parses as one. Composite values are
/// then unpacked on the delimiter set and each token rechecked the same way.
/// Token equality only; a token never matches as a substring.
pub fn matches_group(raw_value: &str, names: &GroupSet, ids: &GroupSet) -> bool {
    let trimmed = raw_value.trim();
    if trimmed.is_empty() {
        return false;
    }

    if names.contains(trimmed) {
        return true;
    }
    if let Some(guid) = normalize_guid(trimmed)
        && ids.contains(&guid)
    {
        return true;
    }

    for token in trimmed.split(GROUP_TOKEN_DELIMITERS) {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        if names.contains(token) {
            return true;
        }
        if let Some(guid) = normalize_guid(token)
            && ids.contains(&guid)
        {
            return true;
        }
    }

    false
}
