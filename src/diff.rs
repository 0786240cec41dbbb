//! # Recitation Feedback Diff
//!
//! Compares the reference ayah against the recognized transcription and renders
//! the differences as line-per-character feedback, one marker per character:
//! `- ` for a reference character the reciter missed, `+ ` for a recognized
//! character not present in the ayah, and two spaces for a match.
//!
//! Invariant: the feedback string is empty iff the recognized text exactly
//! equals the reference text.

use similar::{ChangeTag, TextDiff};

/// Build the character-level feedback between the reference ayah and the
/// recognized recitation.
///
/// Returns an empty string when the two texts match exactly; otherwise every
/// character of both texts appears on its own marked line, so matching context
/// surrounds each deviation.
pub fn recitation_feedback(reference: &str, recognized: &str) -> String {
    if reference == recognized {
        return String::new();
    }

    let diff = TextDiff::from_chars(reference, recognized);
    let mut lines = Vec::new();

    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => "- ",
            ChangeTag::Insert => "+ ",
            ChangeTag::Equal => "  ",
        };
        lines.push(format!("{}{}", sign, change.value()));
    }

    lines.join("\n")
}

/// Similarity ratio between reference and recognized text, in `[0.0, 1.0]`.
///
/// Surfaced alongside the feedback so clients can show an overall score
/// without parsing the diff.
pub fn similarity_ratio(reference: &str, recognized: &str) -> f32 {
    TextDiff::from_chars(reference, recognized).ratio()
}

#[cfg(test)]
mod tests {
    use super::*;

    const AYAH: &str = "آمَنَ الرَّسُولُ بِمَا أُنزِلَ إِلَيْهِ مِن رَّبِّهِ";

    #[test]
    fn test_feedback_empty_on_exact_match() {
        assert!(recitation_feedback(AYAH, AYAH).is_empty());
        assert!(recitation_feedback("", "").is_empty());
    }

    #[test]
    fn test_feedback_nonempty_on_mismatch() {
        let recognized = "آمن الرسول بما أنزل إليه";
        let feedback = recitation_feedback(AYAH, recognized);
        assert!(!feedback.is_empty());
        assert!(feedback.lines().any(|l| l.starts_with("- ")));
    }

    #[test]
    fn test_feedback_marks_insertions() {
        let feedback = recitation_feedback("بسم", "بسمم");
        assert!(feedback.lines().any(|l| l.starts_with("+ ")));
        assert!(!feedback.lines().any(|l| l.starts_with("- ")));
    }

    #[test]
    fn test_feedback_keeps_matching_context() {
        let feedback = recitation_feedback("abc", "abd");
        // 'a' and 'b' match and still appear, prefixed with two spaces.
        assert!(feedback.lines().any(|l| l == "  a"));
        assert!(feedback.lines().any(|l| l == "  b"));
        assert!(feedback.lines().any(|l| l == "- c"));
        assert!(feedback.lines().any(|l| l == "+ d"));
    }

    #[test]
    fn test_similarity_ratio_bounds() {
        assert_eq!(similarity_ratio(AYAH, AYAH), 1.0);
        assert!(similarity_ratio(AYAH, "") < 1.0);
    }
}
