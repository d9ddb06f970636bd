//! Request fingerprints.
//!
//! Two intents that normalize to the same (component, styles, brands) tuple
//! share a fingerprint and are deduplicated. Normalization trims, lowercases,
//! drops empties, then sorts and dedups the lists, so `["Hover", "pill"]` and
//! `["pill", "hover", "hover"]` are the same request.

use sha2::{Digest, Sha256};

/// Normalized request-defining attributes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizedAttrs {
    /// Lowercased, trimmed component.
    pub component: String,
    /// Sorted, deduplicated, lowercased styles.
    pub styles: Vec<String>,
    /// Sorted, deduplicated, lowercased brand references.
    pub brand_refs: Vec<String>,
}

impl NormalizedAttrs {
    /// Normalize raw attributes.
    #[must_use]
    pub fn new(component: &str, styles: &[String], brand_refs: &[String]) -> Self {
        Self {
            component: component.trim().to_lowercase(),
            styles: normalize_list(styles),
            brand_refs: normalize_list(brand_refs),
        }
    }

    /// Hex SHA-256 over the normalized tuple.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.component.as_bytes());
        // unit separator keeps ("ab", []) distinct from ("a", ["b"])
        hasher.update([0x1f]);
        hasher.update(self.styles.join("\x1e").as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.brand_refs.join("\x1e").as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

fn normalize_list(items: &[String]) -> Vec<String> {
    let mut out: Vec<String> = items
        .iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();
    out.sort_unstable();
    out.dedup();
    out
}

/// Fingerprint raw attributes.
#[must_use]
pub fn fingerprint(component: &str, styles: &[String], brand_refs: &[String]) -> String {
    NormalizedAttrs::new(component, styles, brand_refs).fingerprint()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn order_case_and_duplicates_ignored() {
        let a = fingerprint("Button", &v(&["Hover", "pill"]), &v(&["Stripe"]));
        let b = fingerprint(" button ", &v(&["pill", "hover", "hover"]), &v(&["stripe", ""]));
        assert_eq!(a, b);
    }

    #[test]
    fn different_attrs_differ() {
        let base = fingerprint("button", &v(&["hover"]), &v(&["stripe"]));
        assert_ne!(base, fingerprint("dropdown", &v(&["hover"]), &v(&["stripe"])));
        assert_ne!(base, fingerprint("button", &v(&["pill"]), &v(&["stripe"])));
        assert_ne!(base, fingerprint("button", &v(&["hover"]), &v(&["github"])));
    }

    #[test]
    fn styles_and_brands_not_interchangeable() {
        assert_ne!(
            fingerprint("button", &v(&["stripe"]), &[]),
            fingerprint("button", &[], &v(&["stripe"]))
        );
    }

    #[test]
    fn hex_sha256_shape() {
        let fp = fingerprint("tab", &[], &[]);
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
