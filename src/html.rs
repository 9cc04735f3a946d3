use crate::flowable::{
    BlockBox, Flowable, InlineHighlight, InlineItem, ListMarker, Pagination, Paragraph, TableFlowable,
    TableRow, TextRun, TextStyle,
};
use crate::font::{Base14Font, FontMetrics, sanitize_for_winansi};
use crate::style::{
    ComputedStyle, ContentItem, DisplayMode, ElementInfo, ListStyleKind, PseudoElement, StyleResolver,
    TextAlignMode,
};
use crate::types::{Color, Pt};
use kuchiki::traits::TendrilSink;
use kuchiki::{NodeData, NodeRef};
use std::sync::Arc;

/// Parses `html` and turns its body into a story for the layout loop.
pub fn html_to_story(
    html: &str,
    resolver: &StyleResolver,
    metrics: Arc<FontMetrics>,
) -> Vec<Box<dyn Flowable>> {
    let document = kuchiki::parse_html().one(html);
    let mut builder = StoryBuilder {
        resolver,
        metrics,
        counters: vec![Vec::new()],
        path: Vec::new(),
    };

    let mut root_style = ComputedStyle::default();
    if let Ok(html_el) = document.select_first("html") {
        let node = html_el.as_node();
        builder.path.push(element_info(node));
        root_style = resolver.compute(&builder.path, &root_style, inline_style_attr(node).as_deref());
    }

    let Ok(body) = document.select_first("body") else {
        log::warn!("document has no body; nothing to render");
        return Vec::new();
    };
    let body_node = body.as_node();
    let story = builder
        .with_element(body_node, &root_style, |builder, style| {
            builder.build_block(body_node, "body", style)
        })
        .map(|block| vec![Box::new(block) as Box<dyn Flowable>])
        .unwrap_or_default();
    log::debug!("story built from {} bytes of html", html.len());
    story
}

struct StoryBuilder<'a> {
    resolver: &'a StyleResolver,
    metrics: Arc<FontMetrics>,
    /// One frame of counters per open element.
    counters: Vec<Vec<(String, i32)>>,
    path: Vec<ElementInfo>,
}

/// Gathers the children of one block container. Inline content between
/// block children becomes anonymous paragraphs.
struct Collector {
    blocks: Vec<Box<dyn Flowable>>,
    inline: Vec<InlineItem>,
    strut: TextStyle,
    align: TextAlignMode,
    preserve_whitespace: bool,
}

impl Collector {
    fn new(style: &ComputedStyle) -> Self {
        Self {
            blocks: Vec::new(),
            inline: Vec::new(),
            strut: text_style(style, false),
            align: style.text_align,
            preserve_whitespace: style.preserve_whitespace,
        }
    }

    fn push_text(&mut self, text: &str, style: TextStyle) {
        let sanitized = sanitize_for_winansi(text);
        if sanitized.text.is_empty() {
            return;
        }
        self.inline.push(InlineItem::Text(TextRun {
            text: sanitized.text,
            style,
        }));
    }

    fn push_break(&mut self) {
        self.inline.push(InlineItem::LineBreak);
    }

    fn flush(&mut self, metrics: &Arc<FontMetrics>) {
        if self.inline.is_empty() {
            return;
        }
        let items = std::mem::take(&mut self.inline);
        let paragraph = Paragraph::new(items, self.strut.clone(), metrics.clone())
            .with_align(self.align)
            .with_whitespace(self.preserve_whitespace);
        if !paragraph.is_blank() {
            self.blocks.push(Box::new(paragraph));
        }
    }

    fn push_block(&mut self, block: Box<dyn Flowable>, metrics: &Arc<FontMetrics>) {
        self.flush(metrics);
        self.blocks.push(block);
    }

    fn finish(mut self, metrics: &Arc<FontMetrics>) -> Vec<Box<dyn Flowable>> {
        self.flush(metrics);
        self.blocks
    }
}

impl StoryBuilder<'_> {
    /// Pushes `node` onto the selector path, resolves its style and counter
    /// scope, runs `f`, then pops both. `None` for `display: none`.
    fn with_element<R>(
        &mut self,
        node: &NodeRef,
        parent_style: &ComputedStyle,
        f: impl FnOnce(&mut Self, &ComputedStyle) -> R,
    ) -> Option<R> {
        self.path.push(element_info(node));
        let style = self
            .resolver
            .compute(&self.path, parent_style, inline_style_attr(node).as_deref());
        let result = if style.display == DisplayMode::None {
            None
        } else {
            self.enter_counters(node, &style);
            let result = f(self, &style);
            self.counters.pop();
            Some(result)
        };
        self.path.pop();
        result
    }

    fn enter_counters(&mut self, node: &NodeRef, style: &ComputedStyle) {
        self.counters.push(Vec::new());
        for (name, value) in &style.counter_reset {
            self.reset_counter(name, *value);
        }
        let tag = tag_name(node);
        if tag == "ol" || tag == "ul" {
            let start = node
                .as_element()
                .and_then(|el| el.attributes.borrow().get("start").and_then(|s| s.trim().parse::<i32>().ok()))
                .unwrap_or(1);
            self.reset_counter("list-item", start - 1);
        }
        if style.display == DisplayMode::ListItem {
            self.increment_counter("list-item", 1);
        }
        for (name, value) in &style.counter_increment {
            self.increment_counter(name, *value);
        }
    }

    fn reset_counter(&mut self, name: &str, value: i32) {
        if let Some(frame) = self.counters.last_mut() {
            frame.retain(|(existing, _)| existing != name);
            frame.push((name.to_string(), value));
        }
    }

    fn increment_counter(&mut self, name: &str, by: i32) {
        for frame in self.counters.iter_mut().rev() {
            if let Some(entry) = frame.iter_mut().find(|(existing, _)| existing == name) {
                entry.1 += by;
                return;
            }
        }
        self.reset_counter(name, by);
    }

    fn counter_value(&self, name: &str) -> i32 {
        self.counters
            .iter()
            .rev()
            .flat_map(|frame| frame.iter())
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| *value)
            .unwrap_or(0)
    }

    fn visit_children(
        &mut self,
        node: &NodeRef,
        parent_style: &ComputedStyle,
        inline_style: &TextStyle,
        out: &mut Collector,
    ) {
        for child in node.children() {
            match child.data() {
                NodeData::Text(text) => {
                    let text = text.borrow();
                    out.push_text(&text, inline_style.clone());
                }
                NodeData::Element(_) => self.visit_element(&child, parent_style, out),
                _ => {}
            }
        }
    }

    fn visit_element(&mut self, node: &NodeRef, parent_style: &ComputedStyle, out: &mut Collector) {
        let tag = tag_name(node);
        self.with_element(node, parent_style, |builder, style| match style.display {
            DisplayMode::Inline | DisplayMode::InlineBlock => {
                builder.visit_inline(node, &tag, style, out);
            }
            DisplayMode::Table => {
                let table = builder.build_table(node, style);
                out.push_block(Box::new(table), &builder.metrics);
            }
            _ => {
                let block = builder.build_block(node, &tag, style);
                out.push_block(Box::new(block), &builder.metrics);
            }
        });
    }

    fn visit_inline(&mut self, node: &NodeRef, tag: &str, style: &ComputedStyle, out: &mut Collector) {
        let run_style = text_style(style, true);
        match tag {
            "br" => {
                out.push_break();
                return;
            }
            "img" => {
                if let Some(alt) = attribute(node, "alt").filter(|alt| !alt.trim().is_empty()) {
                    out.push_text(&alt, run_style);
                }
                return;
            }
            "input" => {
                let is_checkbox = attribute(node, "type")
                    .is_some_and(|kind| kind.eq_ignore_ascii_case("checkbox"));
                if is_checkbox {
                    let mark = if attribute(node, "checked").is_some() { "[x] " } else { "[ ] " };
                    out.push_text(mark, run_style);
                }
                return;
            }
            _ => {}
        }
        self.push_pseudo(PseudoElement::Before, style, out);
        self.visit_children(node, style, &run_style, out);
        self.push_pseudo(PseudoElement::After, style, out);
    }

    fn push_pseudo(&mut self, pseudo: PseudoElement, element_style: &ComputedStyle, out: &mut Collector) {
        let Some(style) = self.resolver.compute_pseudo(&self.path, pseudo, element_style) else {
            return;
        };
        for (name, value) in &style.counter_reset {
            self.reset_counter(name, *value);
        }
        for (name, value) in &style.counter_increment {
            self.increment_counter(name, *value);
        }
        let text: String = style
            .content
            .iter()
            .flatten()
            .map(|item| match item {
                ContentItem::Text(text) => text.clone(),
                ContentItem::Counter(name) => self.counter_value(name).to_string(),
            })
            .collect();
        out.push_text(&text, text_style(&style, true));
    }

    fn build_block(&mut self, node: &NodeRef, tag: &str, style: &ComputedStyle) -> BlockBox {
        let mut collector = Collector::new(style);
        let strut = collector.strut.clone();
        self.push_pseudo(PseudoElement::Before, style, &mut collector);
        self.visit_children(node, style, &strut, &mut collector);
        self.push_pseudo(PseudoElement::After, style, &mut collector);
        let children = collector.finish(&self.metrics);

        let marker = if style.display == DisplayMode::ListItem {
            self.list_marker(style, &strut)
        } else {
            None
        };
        let mut block = BlockBox::new(children, self.metrics.clone())
            .with_margin(style.margin)
            .with_padding(style.padding)
            .with_border(style.border, style.color)
            .with_background(style.background)
            .with_width(style.width)
            .with_marker(marker)
            .with_pagination(pagination_for(style));
        if let Some(level) = heading_level(tag).filter(|level| *level <= 3) {
            let title = collapse_whitespace(&node.text_contents());
            if !title.is_empty() {
                block = block.with_bookmark(level, title);
            }
        }
        block
    }

    fn list_marker(&self, style: &ComputedStyle, strut: &TextStyle) -> Option<ListMarker> {
        match style.list_style {
            ListStyleKind::None => None,
            ListStyleKind::Decimal => Some(ListMarker::Text(TextRun {
                text: format!("{}.", self.counter_value("list-item")),
                style: strut.clone(),
            })),
            kind => Some(ListMarker::Bullet {
                kind,
                color: style.color,
                font_size: style.font_size,
            }),
        }
    }

    fn build_table(&mut self, node: &NodeRef, style: &ComputedStyle) -> TableFlowable {
        let mut header = Vec::new();
        let mut body = Vec::new();
        for child in element_children(node) {
            self.with_element(&child, style, |builder, child_style| match child_style.display {
                DisplayMode::TableHeaderGroup => {
                    header.extend(builder.build_row_group(&child, child_style));
                }
                DisplayMode::TableRowGroup | DisplayMode::TableFooterGroup => {
                    body.extend(builder.build_row_group(&child, child_style));
                }
                DisplayMode::TableRow => {
                    body.push(builder.build_row(&child, child_style, None));
                }
                _ => log::debug!("skipping <{}> inside table", tag_name(&child)),
            });
        }
        TableFlowable::new(header, body)
            .with_margin(style.margin)
            .with_width(style.width)
            .with_pagination(pagination_for(style))
    }

    fn build_row_group(&mut self, node: &NodeRef, style: &ComputedStyle) -> Vec<TableRow> {
        let mut rows = Vec::new();
        for child in element_children(node) {
            let row = self.with_element(&child, style, |builder, row_style| {
                (row_style.display == DisplayMode::TableRow)
                    .then(|| builder.build_row(&child, row_style, style.background))
            });
            rows.extend(row.flatten());
        }
        rows
    }

    fn build_row(
        &mut self,
        node: &NodeRef,
        style: &ComputedStyle,
        group_background: Option<Color>,
    ) -> TableRow {
        let mut cells = Vec::new();
        for child in element_children(node) {
            let tag = tag_name(&child);
            let cell = self.with_element(&child, style, |builder, cell_style| {
                builder.build_block(&child, &tag, cell_style)
            });
            cells.extend(cell);
        }
        TableRow::new(cells, style.background.or(group_background))
    }
}

fn text_style(style: &ComputedStyle, decorate: bool) -> TextStyle {
    TextStyle {
        font: Base14Font::select(style.family, style.bold, style.italic),
        font_size: style.font_size,
        line_height: style.resolved_line_height(),
        color: style.color,
        underline: style.underline,
        line_through: style.line_through,
        highlight: if decorate { inline_highlight(style) } else { None },
    }
}

fn inline_highlight(style: &ComputedStyle) -> Option<InlineHighlight> {
    let border_width = style.border.top.used_width();
    let pad_x = style.padding.left.max(style.padding.right);
    let pad_y = style.padding.top.max(style.padding.bottom);
    if style.background.is_none() && border_width == Pt::ZERO && pad_x == Pt::ZERO {
        return None;
    }
    Some(InlineHighlight {
        background: style.background,
        pad_x,
        pad_y,
        border: (border_width > Pt::ZERO).then(|| (border_width, style.border_color(&style.border.top))),
    })
}

fn pagination_for(style: &ComputedStyle) -> Pagination {
    Pagination {
        break_before: style.break_before,
        break_after: style.break_after,
        break_inside: style.break_inside,
        ..Pagination::default()
    }
}

fn heading_level(tag: &str) -> Option<u8> {
    match tag {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn tag_name(node: &NodeRef) -> String {
    node.as_element()
        .map(|el| el.name.local.as_ref().to_ascii_lowercase())
        .unwrap_or_default()
}

fn attribute(node: &NodeRef, name: &str) -> Option<String> {
    node.as_element()
        .and_then(|el| el.attributes.borrow().get(name).map(str::to_string))
}

fn inline_style_attr(node: &NodeRef) -> Option<String> {
    attribute(node, "style")
}

fn element_children(node: &NodeRef) -> Vec<NodeRef> {
    node.children()
        .filter(|child| child.as_element().is_some())
        .collect()
}

fn element_info(node: &NodeRef) -> ElementInfo {
    let mut sibling_index = 1usize;
    let mut sibling_count = 1usize;
    if let Some(parent) = node.parent() {
        let mut count = 0usize;
        for sibling in parent.children() {
            if sibling.as_element().is_none() {
                continue;
            }
            count += 1;
            if sibling == *node {
                sibling_index = count;
            }
        }
        sibling_count = count.max(1);
    }
    let id = attribute(node, "id");
    let classes = attribute(node, "class")
        .map(|class| class.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();
    ElementInfo {
        tag: tag_name(node),
        id,
        classes,
        sibling_index,
        sibling_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc_template::DocTemplate;
    use crate::page_template::PageTemplate;
    use crate::types::{Margins, Size};

    fn render(html: &str, css: &str) -> crate::canvas::Document {
        let resolver = StyleResolver::new(css).expect("css");
        let story = html_to_story(html, &resolver, Arc::new(FontMetrics::default()));
        let mut doc = DocTemplate::new(vec![PageTemplate::with_margins(
            "body",
            Size::a4(),
            Margins::all(40.0),
        )]);
        for flowable in story {
            doc.add_flowable(flowable);
        }
        doc.build().expect("layout")
    }

    fn all_text(doc: &crate::canvas::Document) -> String {
        (0..doc.page_count())
            .flat_map(|page| doc.page_text(page))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn paragraphs_and_inline_runs_render_text() {
        let doc = render("<p>Hello <strong>bold</strong> world</p>", "");
        assert_eq!(all_text(&doc), "Hello bold world");
    }

    #[test]
    fn ordered_list_counters_feed_before_content() {
        let css = "ol { counter-reset: item; } ol li { display: block; } \
                   ol li:before { content: counter(item) \". \"; counter-increment: item; }";
        let doc = render("<ol><li>a</li><li>b</li></ol><ol><li>c</li></ol>", css);
        let text = all_text(&doc);
        assert!(text.contains("1. a"), "{text}");
        assert!(text.contains("2. b"), "{text}");
        assert!(text.contains("1. c"), "{text}");
    }

    #[test]
    fn decimal_markers_use_list_item_counter() {
        let doc = render("<ol start=\"3\"><li>x</li><li>y</li></ol>", "");
        let text = all_text(&doc);
        assert!(text.contains("3."), "{text}");
        assert!(text.contains("4."), "{text}");
    }

    #[test]
    fn task_list_checkboxes_become_brackets() {
        let doc = render(
            "<ul><li><input type=\"checkbox\" checked=\"\" disabled=\"\"> done</li>\
             <li><input type=\"checkbox\" disabled=\"\"> todo</li></ul>",
            "",
        );
        let text = all_text(&doc);
        assert!(text.contains("[x] done"), "{text}");
        assert!(text.contains("[ ] todo"), "{text}");
    }

    #[test]
    fn display_none_and_head_are_skipped() {
        let doc = render(
            "<html><head><title>T</title></head><body><p>shown</p><p class=\"x\">hidden</p></body></html>",
            ".x { display: none; }",
        );
        assert_eq!(all_text(&doc), "shown");
    }

    #[test]
    fn headings_record_bookmarks() {
        let doc = render("<h1>Intro</h1><h2>Part</h2><h4>Deep</h4>", "");
        let bookmarks: Vec<(u8, String)> = doc.pages[0]
            .commands
            .iter()
            .filter_map(|cmd| match cmd {
                crate::canvas::Command::Bookmark { level, title, .. } => Some((*level, title.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(bookmarks, vec![(1, "Intro".to_string()), (2, "Part".to_string())]);
    }

    #[test]
    fn tables_render_header_and_body_cells() {
        let doc = render(
            "<table><thead><tr><th>Col</th><th>Other</th></tr></thead>\
             <tbody><tr><td>v1</td><td>v2</td></tr></tbody></table>",
            "table { width: 100%; }",
        );
        assert_eq!(all_text(&doc), "Col Other v1 v2");
    }

    #[test]
    fn oversized_table_row_flows_across_pages() {
        let words: Vec<String> = (0..5000).map(|i| format!("w{i}")).collect();
        let html = format!("<table><tr><td>{}</td></tr></table>", words.join(" "));
        let doc = render(&html, "table { width: 100%; }");
        assert!(doc.page_count() > 1);
        for page in &doc.pages {
            for command in &page.commands {
                if let crate::canvas::Command::DrawString { y, .. } = command {
                    assert!(*y <= doc.page_size.height, "text below the page at {y:?}");
                }
            }
        }
        let text = all_text(&doc);
        let drawn: Vec<&str> = text.split_whitespace().collect();
        assert_eq!(drawn.len(), 5000);
        assert_eq!(drawn.first(), Some(&"w0"));
        assert_eq!(drawn.last(), Some(&"w4999"));
    }

    #[test]
    fn table_columns_keep_their_place_on_every_page() {
        let long = "texto longo ".repeat(15);
        let mut html = String::from("<table><thead><tr><th>Alfa</th><th>Beta</th></tr></thead><tbody>");
        for _ in 0..60 {
            html.push_str(&format!("<tr><td>{long}</td><td>x</td></tr>"));
        }
        for _ in 0..60 {
            html.push_str(&format!("<tr><td>x</td><td>{long}</td></tr>"));
        }
        html.push_str("</tbody></table>");
        let doc = render(&html, "table { width: 100%; }");
        assert!(doc.page_count() > 1);

        let header_x: Vec<Pt> = doc
            .pages
            .iter()
            .filter_map(|page| {
                page.commands.iter().find_map(|command| match command {
                    crate::canvas::Command::DrawString { x, text, .. } if text == "Beta" => Some(*x),
                    _ => None,
                })
            })
            .collect();
        assert_eq!(header_x.len(), doc.page_count());
        assert!(header_x.windows(2).all(|pair| pair[0] == pair[1]), "{header_x:?}");
    }

    #[test]
    fn emoji_are_dropped_from_text() {
        let doc = render("<p>📋 Relatório → fim</p>", "");
        assert_eq!(all_text(&doc), "Relatório > fim");
    }
}
