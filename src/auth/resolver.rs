use super::claims::{ClaimSource, claim_keys};

/// Fixed fallback name claim keys, probed in priority order after any
/// configured preferred claims.
const NAME_CLAIM_KEYS: &[&str] = &[
    "name",
    claim_keys::DISPLAY_NAME,
    "displayName",
    "full_name",
    claim_keys::DISPLAY_NAME_2008,
    claim_keys::NAME,
];

const GIVEN_NAME_KEYS: &[&str] = &[claim_keys::GIVEN_NAME, "given_name"];
const FAMILY_NAME_KEYS: &[&str] = &[claim_keys::SURNAME, "family_name"];

/// Fixed email claim keys, probed in priority order.
const EMAIL_CLAIM_KEYS: &[&str] = &[
    claim_keys::EMAIL,
    "email",
    "preferred_username",
    claim_keys::UPN,
];

fn first_of(source: &dyn ClaimSource, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| source.first_non_blank(key))
}

/// Derive a display name from a claim source.
///
/// Resolution order: configured preferred claims, the fixed name claim list,
/// given + family name combined, given name alone, family name alone, the
/// resolved email, and finally nothing.
pub fn resolve_display_name(
    source: &dyn ClaimSource,
    preferred_claims: &[String],
) -> Option<String> {
    for key in preferred_claims {
        if let Some(value) = source.first_non_blank(key) {
            return Some(value);
        }
    }

    if let Some(value) = first_of(source, NAME_CLAIM_KEYS) {
        return Some(value);
    }

    let given = first_of(source, GIVEN_NAME_KEYS);
    let family = first_of(source, FAMILY_NAME_KEYS);
    match (given, family) {
        (Some(given), Some(family)) => Some(format!("{} {}", given, family)),
        (Some(given), None) => Some(given),
        (None, Some(family)) => Some(family),
        (None, None) => resolve_email(source),
    }
}

/// Derive an email address from a claim source. First non-blank value wins.
pub fn resolve_email(source: &dyn ClaimSource) -> Option<String> {
    first_of(source, EMAIL_CLAIM_KEYS)
}
