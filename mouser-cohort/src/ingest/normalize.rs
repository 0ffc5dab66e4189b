//! Raw scan cleanup

/// Strip framing, control and whitespace characters
///
/// Returns `None` when nothing is left.
pub fn normalize_identifier(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_control() && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Drops a raw read identical to the last accepted one
///
/// Scanners repeat a tag while it stays in range; only the first of a run
/// is kept. A read counts as accepted once it was committed or reported as
/// a duplicate, so a scan that failed to save can be retried by scanning
/// again. A new listener starts with a fresh debouncer.
#[derive(Debug, Default)]
pub struct Debouncer {
    last: Option<String>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `raw` repeats the last accepted read
    pub fn is_repeat(&self, raw: &str) -> bool {
        self.last.as_deref() == Some(raw)
    }

    pub fn record(&mut self, raw: &str) {
        self.last = Some(raw.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_framing() {
        assert_eq!(normalize_identifier("\x02 985 112\r\n\x03").as_deref(), Some("985112"));
        assert_eq!(normalize_identifier("A1\t").as_deref(), Some("A1"));
    }

    #[test]
    fn test_normalize_empty() {
        assert_eq!(normalize_identifier(""), None);
        assert_eq!(normalize_identifier("\r\n \t"), None);
    }

    #[test]
    fn test_debounce_only_consecutive() {
        let mut debouncer = Debouncer::new();
        assert!(!debouncer.is_repeat("A"));
        debouncer.record("A");
        assert!(debouncer.is_repeat("A"));
        assert!(!debouncer.is_repeat("B"));
        debouncer.record("B");
        assert!(!debouncer.is_repeat("A"));
    }

    #[test]
    fn test_unrecorded_read_not_a_repeat() {
        let mut debouncer = Debouncer::new();
        debouncer.record("A");
        // Checked but never accepted
        assert!(!debouncer.is_repeat("B"));
        assert!(!debouncer.is_repeat("B"));
        assert!(debouncer.is_repeat("A"));
    }
}
