use crate::canvas::{Command, Document};
use crate::font::{Base14Font, FontMetrics, sanitize_for_winansi};
use crate::style::{ContentItem, MarginBoxPosition, MarginBoxSpec, PageSetup};
use crate::types::{Margins, Pt};

/// Expands `content` for one page: strings verbatim, `counter(page)` and
/// `counter(pages)` as decimal numbers. Unknown counters render as `0`.
pub fn resolve_margin_content(items: &[ContentItem], page_number: usize, page_count: usize) -> String {
    let mut out = String::new();
    for item in items {
        match item {
            ContentItem::Text(text) => out.push_str(text),
            ContentItem::Counter(name) => match name.as_str() {
                "page" => out.push_str(&page_number.to_string()),
                "pages" => out.push_str(&page_count.to_string()),
                other => {
                    log::debug!("counter({other}) has no value in a margin box");
                    out.push('0');
                }
            },
        }
    }
    out
}

/// Paints every `@page` margin box onto every page. Runs after layout so
/// `counter(pages)` is known.
pub fn stamp_margin_boxes(doc: &mut Document, setup: &PageSetup, margins: Margins, metrics: &FontMetrics) {
    let page_count = doc.pages.len();
    if page_count == 0 || setup.margin_boxes.is_empty() {
        return;
    }
    let page_size = doc.page_size;
    for (idx0, page) in doc.pages.iter_mut().enumerate() {
        let page_number = idx0 + 1;
        for spec in &setup.margin_boxes {
            let raw = resolve_margin_content(&spec.content, page_number, page_count);
            let text = sanitize_for_winansi(&raw).text;
            if text.trim().is_empty() {
                continue;
            }
            let (x, baseline, font, size) =
                place_margin_text(spec, &text, page_size.width, page_size.height, margins, metrics);
            page.commands.push(Command::SaveState);
            page.commands.push(Command::SetFillColor(spec.style.color));
            page.commands.push(Command::SetFont { font, size });
            page.commands.push(Command::DrawString {
                x,
                y: baseline,
                text,
                word_spacing: Pt::ZERO,
            });
            page.commands.push(Command::RestoreState);
        }
    }
}

fn place_margin_text(
    spec: &MarginBoxSpec,
    text: &str,
    page_width: Pt,
    page_height: Pt,
    margins: Margins,
    metrics: &FontMetrics,
) -> (Pt, Pt, Base14Font, Pt) {
    let style = &spec.style;
    let font = Base14Font::select(style.family, style.bold, style.italic);
    let size = style.font_size;
    let width = metrics.measure(font, size, text);

    let left = margins.left;
    let right = page_width - margins.right;
    let x = match spec.position {
        MarginBoxPosition::TopLeft | MarginBoxPosition::BottomLeft => left,
        MarginBoxPosition::TopCenter | MarginBoxPosition::BottomCenter => {
            left + (right - left - width).mul_ratio(1, 2)
        }
        MarginBoxPosition::TopRight | MarginBoxPosition::BottomRight => right - width,
    };

    // Centre the glyph box vertically in the margin band.
    let (band_top, band_height) = if spec.position.is_top() {
        (Pt::ZERO, margins.top)
    } else {
        (page_height - margins.bottom, margins.bottom)
    };
    let ascent = size.mul_ratio(font.ascent(), 1000);
    let descent = size.mul_ratio(-font.descent(), 1000);
    let glyph_top = band_top + (band_height - ascent - descent).mul_ratio(1, 2);
    (x, glyph_top + ascent, font, size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Page;
    use crate::style::StyleResolver;
    use crate::types::Size;

    fn doc(pages: usize) -> Document {
        Document {
            page_size: Size::a4(),
            pages: vec![Page::default(); pages],
        }
    }

    #[test]
    fn page_counters_expand_per_page() {
        let items = vec![
            ContentItem::Text("Página ".to_string()),
            ContentItem::Counter("page".to_string()),
            ContentItem::Text(" de ".to_string()),
            ContentItem::Counter("pages".to_string()),
        ];
        assert_eq!(resolve_margin_content(&items, 2, 7), "Página 2 de 7");
        assert_eq!(
            resolve_margin_content(&[ContentItem::Counter("item".to_string())], 1, 1),
            "0"
        );
    }

    #[test]
    fn margin_boxes_are_stamped_on_every_page() {
        let resolver = StyleResolver::new(
            "@page { margin: 2cm; \
               @top-right { content: \"Página \" counter(page) \" de \" counter(pages); font-size: 9pt; } \
               @bottom-center { content: \"rodapé\"; font-size: 8pt; } }",
        )
        .expect("css");
        let mut document = doc(3);
        let margins = Margins::all(2.0 * 72.0 / 2.54);
        stamp_margin_boxes(&mut document, resolver.page_setup(), margins, &FontMetrics::default());

        for page in 0..3 {
            let texts = document.page_text(page);
            assert_eq!(texts, vec![format!("Página {} de 3", page + 1).as_str(), "rodapé"]);
        }

        let baselines: Vec<Pt> = document.pages[0]
            .commands
            .iter()
            .filter_map(|cmd| match cmd {
                Command::DrawString { y, .. } => Some(*y),
                _ => None,
            })
            .collect();
        assert!(baselines[0] < margins.top);
        assert!(baselines[1] > Size::a4().height - margins.bottom);
    }

    #[test]
    fn right_aligned_box_ends_at_content_edge() {
        let resolver =
            StyleResolver::new("@page { @top-right { content: \"x\"; font-size: 10pt; } }").expect("css");
        let mut document = doc(1);
        let metrics = FontMetrics::default();
        let margins = Margins::all(50.0);
        stamp_margin_boxes(&mut document, resolver.page_setup(), margins, &metrics);
        let x = document.pages[0]
            .commands
            .iter()
            .find_map(|cmd| match cmd {
                Command::DrawString { x, .. } => Some(*x),
                _ => None,
            })
            .expect("stamped");
        let width = metrics.measure(Base14Font::Helvetica, Pt::from_i32(10), "x");
        assert_eq!(x + width, Size::a4().width - margins.right);
    }

    #[test]
    fn nothing_is_stamped_without_margin_boxes() {
        let mut document = doc(2);
        stamp_margin_boxes(&mut document, &PageSetup::default(), Margins::all(10.0), &FontMetrics::default());
        assert!(document.pages.iter().all(|page| page.commands.is_empty()));
    }
}
