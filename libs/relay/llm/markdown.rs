//! Heuristic markdown detection for completion text

const MARKDOWN_INDICATORS: &[&str] = &[
    "```", "# ", "## ", "### ", "- ", "* ", "1. ", "**", "__", "*", "_", "[", "](", "|", "---",
    "apiVersion:", "kind:", "metadata:",
];

/// True when the text should be rendered as markdown by the client
///
/// Any indicator token or a paragraph break counts.
pub fn detect_markdown(text: &str) -> bool {
    MARKDOWN_INDICATORS
        .iter()
        .any(|indicator| text.contains(indicator))
        || text.contains("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text() {
        assert!(!detect_markdown("hello"));
        assert!(!detect_markdown("The answer is 42.\nThanks"));
    }

    #[test]
    fn test_markdown_tokens() {
        assert!(detect_markdown("```rust\nfn main() {}\n```"));
        assert!(detect_markdown("## Heading"));
        assert!(detect_markdown("a **bold** move"));
        assert!(detect_markdown("see [docs](http://x)"));
        assert!(detect_markdown("| a | b |"));
        assert!(detect_markdown("kind: Deployment"));
        assert!(detect_markdown("first paragraph\n\nsecond"));
    }
}
