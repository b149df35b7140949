//! Text-to-filename sanitization.
//!
//! OCR text is decomposed with NFKD so accented letters fall back to their
//! ASCII base (`é` → `e` + combining mark), then everything outside the
//! allow-list is dropped. Space runs left behind by dropped glyphs are
//! collapsed so `"O'Brien & Sons"` becomes `"OBrien Sons"`.

use unicode_normalization::UnicodeNormalization;

/// Punctuation kept in addition to ASCII letters and digits.
pub const ALLOWED_PUNCTUATION: &[char] = &['-', '_', '.', '(', ')', ' '];

pub fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || ALLOWED_PUNCTUATION.contains(&c)
}

/// Reduce `text` to allow-listed characters. Pure and idempotent; returns an
/// empty string when nothing survives.
pub fn sanitize(text: &str) -> String {
    let filtered: String = text.nfkd().filter(|c| is_allowed(*c)).collect();

    filtered
        .split(' ')
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_inputs() -> Vec<String> {
        let mut inputs: Vec<String> = [
            "",
            " ",
            "ORD-4521★",
            "Cabinet Job #2",
            "O'Brien & Sons",
            "Crème Brûlée Ltd.",
            "ﬁnal (copy)",
            "Ｆｕｌｌｗｉｄｔｈ ４２",
            "  leading and trailing  ",
            "tab\tand\nnewline",
            "../../etc/passwd",
            "日本語のテキスト",
            "emoji 🚀 rocket",
            "a\u{0301}b\u{0308}c",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        // Sweep a slice of the BMP so every block we are likely to see from OCR
        // passes through at least once.
        let sweep: String = (0x20u32..0x3000)
            .step_by(7)
            .filter_map(char::from_u32)
            .collect();
        inputs.push(sweep);
        inputs
    }

    #[test]
    fn test_output_only_contains_allowed_characters() {
        for input in sample_inputs() {
            let out = sanitize(&input);
            assert!(
                out.chars().all(is_allowed),
                "disallowed character in {out:?} (from {input:?})"
            );
        }
    }

    #[test]
    fn test_idempotent() {
        for input in sample_inputs() {
            let once = sanitize(&input);
            assert_eq!(sanitize(&once), once, "not idempotent for {input:?}");
        }
    }

    #[test]
    fn test_empty_and_all_invalid() {
        assert_eq!(sanitize(""), "");
        assert_eq!(sanitize("★☆♥"), "");
        assert_eq!(sanitize("   "), "");
    }

    #[test]
    fn test_known_values() {
        assert_eq!(sanitize("ORD-4521★"), "ORD-4521");
        assert_eq!(sanitize("Cabinet Job #2"), "Cabinet Job 2");
        assert_eq!(sanitize("O'Brien & Sons"), "OBrien Sons");
        assert_eq!(sanitize("Crème Brûlée Ltd."), "Creme Brulee Ltd.");
        assert_eq!(sanitize("ﬁnal (copy)"), "final (copy)");
        assert_eq!(sanitize("Ｆｕｌｌｗｉｄｔｈ ４２"), "Fullwidth 42");
    }

    #[test]
    fn test_control_characters_dropped_not_replaced() {
        assert_eq!(sanitize("ORD-1\n"), "ORD-1");
        assert_eq!(sanitize("tab\tand\nnewline"), "tabandnewline");
    }

    #[test]
    fn test_path_separators_removed() {
        let out = sanitize("../../etc/passwd");
        assert!(!out.contains('/'));
        assert!(!out.contains('\\'));
        assert_eq!(out, "....etcpasswd");
    }
}
