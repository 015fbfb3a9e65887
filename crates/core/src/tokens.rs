//! Token estimation for context budgeting.

use unicode_segmentation::UnicodeSegmentation;

/// Estimate the token count of a text at roughly four characters per token.
///
/// Counts grapheme clusters rather than bytes so multi-byte text does not
/// inflate the estimate. Non-empty text estimates at least one token.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let graphemes = text.graphemes(true).count();
    (graphemes / 4).max(1)
}
