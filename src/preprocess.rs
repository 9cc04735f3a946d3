//! Markdown clean-up for the mapping report: emoji normalization and
//! highlight-box wrapping of call-chain summaries.

/// Emoji swapped for ones with better coverage in the rendered report.
pub const EMOJI_SUBSTITUTIONS: &[(&str, &str)] = &[
    ("\u{1F5FA}\u{FE0F}", "\u{1F4CB}"),
    ("\u{1F4D6}", "\u{1F4D1}"),
    ("\u{1F3AF}", "\u{1F393}"),
    ("\u{1F5C4}\u{FE0F}", "\u{1F4BE}"),
    ("\u{1F510}", "\u{1F512}"),
];

pub const SUMMARY_MARKER: &str = "**Resumo da Cadeia de Chamadas:**";
pub const HIGHLIGHT_OPEN: &str = "<div class=\"highlight-box\">";
pub const HIGHLIGHT_CLOSE: &str = "</div>";

const FENCE: &str = "```";

pub fn preprocess(markdown: &str) -> String {
    let substituted = substitute_emoji(markdown);
    let marked = wrap_summary_markers(&substituted);
    close_highlight_boxes(&marked)
}

pub fn substitute_emoji(markdown: &str) -> String {
    EMOJI_SUBSTITUTIONS
        .iter()
        .fold(markdown.to_string(), |text, (from, to)| text.replace(from, to))
}

/// Opens a highlight box in front of every summary marker. The box runs until
/// the next fenced code block.
pub fn wrap_summary_markers(markdown: &str) -> String {
    markdown.replace(SUMMARY_MARKER, &format!("\n{HIGHLIGHT_OPEN}\n\n{SUMMARY_MARKER}\n"))
}

/// Closes each open highlight box before the first fence that follows it,
/// before another box opens, or at the end of the text. Closing lines are
/// followed by a blank line so the fence is not swallowed by the HTML block.
pub fn close_highlight_boxes(markdown: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut in_box = false;
    let mut opened = 0usize;
    for line in markdown.split('\n') {
        if line.contains(HIGHLIGHT_OPEN) {
            if in_box {
                log::debug!("highlight box reopened before a fence; closing the previous one");
                out.extend([HIGHLIGHT_CLOSE, ""]);
            }
            in_box = true;
            opened += 1;
        } else if in_box && line.starts_with(FENCE) {
            out.extend([HIGHLIGHT_CLOSE, ""]);
            in_box = false;
        }
        out.push(line);
    }
    if in_box {
        log::debug!("highlight box still open at end of input; closing it");
        out.extend(["", HIGHLIGHT_CLOSE]);
    }
    if opened > 0 {
        log::debug!("wrapped {opened} highlight box(es)");
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::markdown::{MarkdownExtension, render_markdown};

    fn count(haystack: &str, needle: &str) -> usize {
        haystack.matches(needle).count()
    }

    #[test]
    fn emoji_are_substituted() {
        let out = substitute_emoji("🗺️ mapa 📖 guia 🎯 alvo 🗄️ banco 🔐 login 🚀");
        assert_eq!(out, "📋 mapa 📑 guia 🎓 alvo 💾 banco 🔒 login 🚀");
    }

    #[test]
    fn substitutions_are_idempotent() {
        let once = substitute_emoji("🗺️ 🔐 texto");
        assert_eq!(substitute_emoji(&once), once);
    }

    #[test]
    fn marker_then_fence_yields_one_box() {
        let source = "## Fluxo\n\n**Resumo da Cadeia de Chamadas:**\n1. A chama B\n\n```\ncodigo\n```\n";
        let out = preprocess(source);
        assert_eq!(count(&out, HIGHLIGHT_OPEN), 1);
        assert_eq!(count(&out, HIGHLIGHT_CLOSE), 1);
        let close = out.find(HIGHLIGHT_CLOSE).expect("closed");
        let fence = out.find("```").expect("fence");
        assert!(close < fence);
        assert!(out.contains("</div>\n\n```"));
    }

    #[test]
    fn second_opening_closes_the_first() {
        let source = "**Resumo da Cadeia de Chamadas:**\num\n\n**Resumo da Cadeia de Chamadas:**\ndois\n\n```\nx\n```";
        let out = preprocess(source);
        assert_eq!(count(&out, HIGHLIGHT_OPEN), 2);
        assert_eq!(count(&out, HIGHLIGHT_CLOSE), 2);
        let second_open = out.rfind(HIGHLIGHT_OPEN).expect("second");
        let first_close = out.find(HIGHLIGHT_CLOSE).expect("close");
        assert!(first_close < second_open);
    }

    #[test]
    fn unclosed_box_is_closed_at_end() {
        let out = preprocess("**Resumo da Cadeia de Chamadas:**\nsem bloco de código");
        assert_eq!(count(&out, HIGHLIGHT_CLOSE), 1);
        assert!(out.ends_with("\n\n</div>"));
    }

    #[test]
    fn fences_outside_boxes_are_untouched() {
        let source = "texto\n\n```\nx\n```\n";
        assert_eq!(preprocess(source), source);
    }

    #[test]
    fn marker_wrapping_is_not_idempotent() {
        let once = preprocess("**Resumo da Cadeia de Chamadas:**\na\n\n```\nb\n```");
        let twice = preprocess(&once);
        assert_eq!(count(&once, HIGHLIGHT_OPEN), 1);
        assert_eq!(count(&twice, HIGHLIGHT_OPEN), 2);
        assert_eq!(count(&twice, HIGHLIGHT_CLOSE), count(&twice, HIGHLIGHT_OPEN) + 1);
    }

    #[test]
    fn rendered_html_has_one_box_pair() {
        let source = "**Resumo da Cadeia de Chamadas:**\n1. passo\n\n```js\nf()\n```\n";
        let html = render_markdown(
            &preprocess(source),
            &[MarkdownExtension::Tables, MarkdownExtension::FencedCodeBlocks],
        );
        assert_eq!(count(&html, HIGHLIGHT_OPEN), 1);
        assert_eq!(count(&html, HIGHLIGHT_CLOSE), 1);
        assert!(html.contains("<strong>Resumo da Cadeia de Chamadas:</strong>"));
        let close = html.find(HIGHLIGHT_CLOSE).expect("close");
        assert!(close < html.find("<pre>").expect("pre"));
    }
}
