//! Default staining classifier.

/// Default H&E classifier: case-insensitive substring match on "he" / "h&e".
pub fn default_is_he(staining: &str) -> bool {
    let lower = staining.to_lowercase();
    lower.contains("he") || lower.contains("h&e")
}

#[cfg(test)]
mod tests {
    use super::default_is_he;

    #[test]
    fn matches_common_he_labels() {
        assert!(default_is_he("HE"));
        assert!(default_is_he("H&E"));
        assert!(default_is_he("he restain"));
    }

    #[test]
    fn rejects_ihc_labels() {
        assert!(!default_is_he("PMS2"));
        assert!(!default_is_he("SOX10"));
        assert!(!default_is_he(""));
    }
}
