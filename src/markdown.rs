use pulldown_cmark::{CowStr, Event, Options, Parser, Tag, TagEnd, html};
use std::collections::HashMap;
use unicode_normalization::UnicodeNormalization;

/// Markdown features a report can switch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkdownExtension {
    Tables,
    FencedCodeBlocks,
    /// `_x_` and `__x__` stay literal; only `*` marks emphasis.
    CodeFriendly,
    HeaderIds,
    Toc,
    Strikethrough,
    TaskLists,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    pub level: u8,
    pub id: String,
    pub text: String,
}

const TOC_MARKER: &str = "[TOC]";

pub fn render_markdown(text: &str, extensions: &[MarkdownExtension]) -> String {
    render_markdown_with_toc(text, extensions).0
}

/// Renders `text` and returns the heading list alongside the HTML. The list
/// is empty unless [`MarkdownExtension::Toc`] is enabled.
pub fn render_markdown_with_toc(text: &str, extensions: &[MarkdownExtension]) -> (String, Vec<TocEntry>) {
    let enabled = |ext: MarkdownExtension| extensions.contains(&ext);
    let mut options = Options::empty();
    if enabled(MarkdownExtension::Tables) {
        options.insert(Options::ENABLE_TABLES);
    }
    if enabled(MarkdownExtension::Strikethrough) {
        options.insert(Options::ENABLE_STRIKETHROUGH);
    }
    if enabled(MarkdownExtension::TaskLists) {
        options.insert(Options::ENABLE_TASKLISTS);
    }
    let code_friendly = enabled(MarkdownExtension::CodeFriendly);
    let header_ids = enabled(MarkdownExtension::HeaderIds);
    let toc = enabled(MarkdownExtension::Toc);

    let mut events: Vec<Event<'_>> = Vec::new();
    let mut emphasis_stack: Vec<Option<&'static str>> = Vec::new();
    let mut heading: Option<(usize, String)> = None;
    let mut paragraph_start: Option<usize> = None;
    let mut toc_slots: Vec<usize> = Vec::new();
    let mut entries: Vec<TocEntry> = Vec::new();
    let mut slugs = SlugRegistry::default();

    for (event, range) in Parser::new_ext(text, options).into_offset_iter() {
        match event {
            Event::Start(tag @ (Tag::Emphasis | Tag::Strong)) => {
                let literal = (code_friendly && text[range.start..].starts_with('_')).then_some(
                    if matches!(tag, Tag::Strong) { "__" } else { "_" },
                );
                emphasis_stack.push(literal);
                match literal {
                    Some(marker) => events.push(Event::Text(CowStr::Borrowed(marker))),
                    None => events.push(Event::Start(tag)),
                }
            }
            Event::End(end @ (TagEnd::Emphasis | TagEnd::Strong)) => match emphasis_stack.pop().flatten() {
                Some(marker) => events.push(Event::Text(CowStr::Borrowed(marker))),
                None => events.push(Event::End(end)),
            },
            Event::Start(Tag::Heading { .. }) => {
                heading = Some((events.len(), String::new()));
                events.push(event);
            }
            Event::End(TagEnd::Heading(level)) => {
                if let Some((start, heading_text)) = heading.take() {
                    let heading_text = heading_text.trim().to_string();
                    let id = header_ids.then(|| slugs.unique(&slugify(&heading_text)));
                    if let (Some(id), Event::Start(Tag::Heading { id: slot, .. })) =
                        (&id, &mut events[start])
                    {
                        *slot = Some(CowStr::from(id.clone()));
                    }
                    if toc {
                        entries.push(TocEntry {
                            level: level as u8,
                            id: id.unwrap_or_else(|| slugify(&heading_text)),
                            text: heading_text,
                        });
                    }
                }
                events.push(Event::End(TagEnd::Heading(level)));
            }
            Event::Text(ref value) | Event::Code(ref value) => {
                if let Some((_, heading_text)) = heading.as_mut() {
                    heading_text.push_str(value);
                }
                events.push(event);
            }
            Event::Start(Tag::Paragraph) => {
                paragraph_start = Some(events.len());
                events.push(event);
            }
            Event::End(TagEnd::Paragraph) => {
                let marker_start = paragraph_start
                    .take()
                    .filter(|start| toc && is_toc_marker(&events[start + 1..]));
                match marker_start {
                    Some(start) => {
                        events.truncate(start);
                        toc_slots.push(events.len());
                        events.push(Event::Html(CowStr::Borrowed("")));
                    }
                    None => events.push(event),
                }
            }
            other => events.push(other),
        }
    }

    if !toc_slots.is_empty() {
        let toc_html = toc_to_html(&entries);
        for slot in toc_slots {
            events[slot] = Event::Html(CowStr::from(toc_html.clone()));
        }
    }

    let mut out = String::with_capacity(text.len() * 3 / 2);
    html::push_html(&mut out, events.into_iter());
    log::debug!("markdown rendered: {} bytes in, {} bytes out", text.len(), out.len());
    (out, entries)
}

fn is_toc_marker(body: &[Event<'_>]) -> bool {
    let mut text = String::new();
    for event in body {
        match event {
            Event::Text(value) => text.push_str(value),
            _ => return false,
        }
    }
    text.trim() == TOC_MARKER
}

/// Heading anchor: accents folded, punctuation removed, lowercased, and runs
/// of whitespace or dashes collapsed to one dash.
pub fn slugify(text: &str) -> String {
    let stripped: String = text
        .nfkd()
        .filter(|ch| ch.is_alphanumeric() || *ch == '_' || *ch == '-' || ch.is_whitespace())
        .collect();
    let lowered = stripped.trim().to_lowercase();
    let mut slug = String::with_capacity(lowered.len());
    let mut in_separator = false;
    for ch in lowered.chars() {
        if ch == '-' || ch.is_whitespace() {
            if !in_separator {
                slug.push('-');
            }
            in_separator = true;
        } else {
            slug.push(ch);
            in_separator = false;
        }
    }
    slug
}

#[derive(Debug, Default)]
struct SlugRegistry {
    seen: HashMap<String, usize>,
}

impl SlugRegistry {
    fn unique(&mut self, slug: &str) -> String {
        let count = self.seen.entry(slug.to_string()).or_insert(0);
        *count += 1;
        if *count == 1 {
            slug.to_string()
        } else {
            format!("{slug}-{count}")
        }
    }
}

fn toc_to_html(entries: &[TocEntry]) -> String {
    let mut out = String::from("<div class=\"toc\">\n");
    let mut open: Vec<u8> = Vec::new();
    for entry in entries {
        if open.last().is_none_or(|level| entry.level > *level) {
            out.push_str("<ul>\n");
            open.push(entry.level);
        } else {
            while open.len() > 1 && open.last().is_some_and(|level| entry.level < *level) {
                out.push_str("</li>\n</ul>\n");
                open.pop();
            }
            out.push_str("</li>\n");
        }
        out.push_str(&format!(
            "<li><a href=\"#{}\">{}</a>\n",
            escape_html(&entry.id),
            escape_html(&entry.text)
        ));
    }
    for _ in &open {
        out.push_str("</li>\n</ul>\n");
    }
    out.push_str("</div>\n");
    out
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use MarkdownExtension::*;

    const ALL: &[MarkdownExtension] = &[
        Tables,
        FencedCodeBlocks,
        CodeFriendly,
        HeaderIds,
        Toc,
        Strikethrough,
        TaskLists,
    ];

    #[test]
    fn slugs_fold_accents_and_punctuation() {
        assert_eq!(slugify("Introdução ao Sistema"), "introducao-ao-sistema");
        assert_eq!(slugify("📋 1. Visão - Geral!"), "1-visao-geral");
        assert_eq!(slugify("snake_case"), "snake_case");
    }

    #[test]
    fn headings_get_unique_ids() {
        let html = render_markdown("# Fluxo\n\n## Fluxo\n\n## Outro", &[HeaderIds]);
        assert!(html.contains("<h1 id=\"fluxo\">Fluxo</h1>"), "{html}");
        assert!(html.contains("<h2 id=\"fluxo-2\">Fluxo</h2>"), "{html}");
        assert!(html.contains("<h2 id=\"outro\">Outro</h2>"), "{html}");
    }

    #[test]
    fn headings_have_no_ids_without_the_extension() {
        let html = render_markdown("# Fluxo", &[]);
        assert_eq!(html.trim(), "<h1>Fluxo</h1>");
    }

    #[test]
    fn code_friendly_keeps_underscores_literal() {
        let html = render_markdown("use _snake_ and __dunder__ but *star*", &[CodeFriendly]);
        assert!(html.contains("_snake_"), "{html}");
        assert!(html.contains("__dunder__"), "{html}");
        assert!(html.contains("<em>star</em>"), "{html}");

        let plain = render_markdown("_snake_", &[]);
        assert!(plain.contains("<em>snake</em>"));
    }

    #[test]
    fn tables_strike_and_tasks_follow_extensions() {
        let source = "| a | b |\n|---|---|\n| 1 | 2 |\n\n~~old~~\n\n- [x] done\n- [ ] todo\n";
        let html = render_markdown(source, ALL);
        assert!(html.contains("<table>"));
        assert!(html.contains("<thead>"));
        assert!(html.contains("<del>old</del>"));
        assert!(html.contains("checked=\"\""));

        let bare = render_markdown(source, &[]);
        assert!(!bare.contains("<table>"));
        assert!(!bare.contains("<del>"));
    }

    #[test]
    fn fenced_code_keeps_language_class() {
        let html = render_markdown("```rust\nfn main() {}\n```\n", ALL);
        assert!(html.contains("<pre><code class=\"language-rust\">fn main() {}\n</code></pre>"));
    }

    #[test]
    fn toc_marker_is_replaced_with_nested_list() {
        let source = "[TOC]\n\n# Um\n\n## Dois\n\n# Três\n";
        let (html, entries) = render_markdown_with_toc(source, ALL);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].level, 2);
        assert_eq!(entries[2].id, "tres");
        assert!(!html.contains("[TOC]"));
        assert!(html.starts_with("<div class=\"toc\">"), "{html}");
        assert!(html.contains("<li><a href=\"#um\">Um</a>\n<ul>\n<li><a href=\"#dois\">Dois</a>"), "{html}");
        assert_eq!(html.matches("<ul>").count(), html.matches("</ul>").count());
    }

    #[test]
    fn toc_marker_stays_text_without_the_extension() {
        let html = render_markdown("[TOC]\n\n# Um", &[HeaderIds]);
        assert!(html.contains("[TOC]"));
    }

    #[test]
    fn raw_html_blocks_pass_through() {
        let html = render_markdown("<div class=\"highlight-box\">\n\n**Resumo**\n\n</div>\n", ALL);
        assert!(html.contains("<div class=\"highlight-box\">"));
        assert!(html.contains("<strong>Resumo</strong>"));
        assert!(html.contains("</div>"));
    }
}
