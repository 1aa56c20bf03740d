use crate::errors::StoreError;

/// Reserved site/metric boundary in the flat key space. Metric names use
/// single underscores only, so the doubled form cannot occur inside either
/// component of a well-formed key.
pub const SITE_SEP: &str = "__";

pub fn encode(site: &str, metric: &str) -> String {
    format!("{site}{SITE_SEP}{metric}")
}

/// Split a flat key back into `(site, metric)`.
///
/// Splits on the *first* separator occurrence: metric names may contain
/// single underscores, but the site boundary is marked exactly once. A key
/// with no separator is a legacy single-site key and decodes to
/// `MalformedKey` so the caller can route it through migration.
pub fn decode(key: &str) -> Result<(&str, &str), StoreError> {
    match key.split_once(SITE_SEP) {
        Some((site, metric)) if !site.is_empty() && !metric.is_empty() => Ok((site, metric)),
        _ => Err(StoreError::MalformedKey {
            key: key.to_string(),
        }),
    }
}

/// Reject site or metric names that would be ambiguous once flattened.
pub fn validate_component(kind: &'static str, name: &str) -> Result<(), StoreError> {
    if name.is_empty() || name.contains(SITE_SEP) {
        return Err(StoreError::InvalidName {
            kind,
            name: name.to_string(),
        });
    }
    Ok(())
}
