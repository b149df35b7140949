use tracing::debug;

/// Maps a sanitized dealer name to the folder a document is filed under.
pub struct DealerClassifier {
    fallback_key: String,
    reserved: Vec<String>,
}

impl Default for DealerClassifier {
    fn default() -> Self {
        Self::new("unclassified")
    }
}

impl DealerClassifier {
    pub fn new(fallback_key: impl Into<String>) -> Self {
        Self {
            fallback_key: fallback_key.into(),
            reserved: Vec::new(),
        }
    }

    /// Folder names that belong to the filer itself, such as the parked
    /// directory. Compared case-insensitively.
    pub fn with_reserved(mut self, keys: impl IntoIterator<Item = String>) -> Self {
        self.reserved.extend(keys);
        self
    }

    pub fn fallback_key(&self) -> &str {
        &self.fallback_key
    }

    /// The dealer name itself when usable, otherwise the fallback bucket so a
    /// document is never dropped for lack of a dealer.
    pub fn classify(&self, sanitized_dealer: &str) -> String {
        if self.is_usable_key(sanitized_dealer) {
            return sanitized_dealer.to_string();
        }

        debug!(
            dealer = sanitized_dealer,
            fallback = %self.fallback_key,
            "No usable dealer name, routing to fallback"
        );
        self.fallback_key.clone()
    }

    // "." and ".." would resolve to the output root or its parent
    fn is_usable_key(&self, key: &str) -> bool {
        !key.is_empty()
            && !key.chars().all(|c| c == '.')
            && !self.reserved.iter().any(|r| r.eq_ignore_ascii_case(key))
    }
}
