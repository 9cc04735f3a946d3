use crate::canvas::{Command, Document, Page};
use crate::font::{Base14Font, winansi_byte};
use crate::metrics::DocumentMetrics;
use crate::types::{Color, Pt};
use fixed::types::I32F32;
use std::collections::BTreeSet;
use std::io::{self, Write};

#[derive(Debug, Clone)]
pub struct PdfOptions {
    pub title: Option<String>,
    pub producer: String,
    /// Flate-compress page content streams.
    pub compress: bool,
}

impl Default for PdfOptions {
    fn default() -> Self {
        Self {
            title: None,
            producer: "markpage".to_string(),
            compress: true,
        }
    }
}

const PDF_HEADER: &[u8] = b"%PDF-1.7\n%\xE2\xE3\xCF\xD3\n";
const PDF_CATALOG_ID: usize = 1;
const PDF_PAGES_ID: usize = 2;
const PDF_RESOURCES_ID: usize = 3;
const FIRST_FONT_ID: usize = 4;

#[derive(Debug, Clone)]
struct OutlineNode {
    title: String,
    page_index: usize,
    y: Pt,
    parent: Option<usize>,
    children: Vec<usize>,
}

/// Object ids are fixed before anything is written, so the byte stream
/// depends only on the document.
struct ObjectLayout {
    fonts: Vec<(Base14Font, usize)>,
    first_page_id: usize,
    outline_root_id: Option<usize>,
    info_id: usize,
    total: usize,
}

impl ObjectLayout {
    fn new(fonts: Vec<Base14Font>, page_count: usize, outline_nodes: usize) -> Self {
        let fonts: Vec<(Base14Font, usize)> = fonts
            .into_iter()
            .enumerate()
            .map(|(idx, font)| (font, FIRST_FONT_ID + idx))
            .collect();
        let first_page_id = FIRST_FONT_ID + fonts.len();
        let mut next = first_page_id + page_count * 2;
        let outline_root_id = (outline_nodes > 0).then(|| {
            let id = next;
            next += 1 + outline_nodes;
            id
        });
        let info_id = next;
        Self {
            fonts,
            first_page_id,
            outline_root_id,
            info_id,
            total: info_id,
        }
    }

    fn page_id(&self, page_index: usize) -> usize {
        self.first_page_id + page_index * 2
    }

    fn content_id(&self, page_index: usize) -> usize {
        self.page_id(page_index) + 1
    }

    fn outline_node_id(&self, node: usize) -> Option<usize> {
        self.outline_root_id.map(|root| root + 1 + node)
    }

    fn font_resource(&self, font: Base14Font) -> String {
        let idx = self
            .fonts
            .iter()
            .position(|(candidate, _)| *candidate == font)
            .unwrap_or(0);
        format!("F{}", idx + 1)
    }
}

pub fn document_to_pdf(document: &Document, options: &PdfOptions) -> io::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    document_to_writer(document, options, &mut bytes)?;
    Ok(bytes)
}

pub fn document_to_pdf_with_metrics(
    document: &Document,
    options: &PdfOptions,
    metrics: &mut DocumentMetrics,
) -> io::Result<Vec<u8>> {
    let bytes = document_to_pdf(document, options)?;
    metrics.total_bytes = bytes.len();
    Ok(bytes)
}

/// Serializes `document` and returns the number of bytes written.
pub fn document_to_writer<W: Write>(
    document: &Document,
    options: &PdfOptions,
    writer: &mut W,
) -> io::Result<usize> {
    let fonts = collect_used_fonts(document);
    let outline = build_outline(document);
    let layout = ObjectLayout::new(fonts, document.pages.len(), outline.len());
    let page_height = document.page_size.height;

    let mut offset = 0usize;
    let mut offsets = vec![0usize; layout.total + 1];
    write_bytes(writer, PDF_HEADER, &mut offset)?;

    let mut catalog = format!("<< /Type /Catalog /Pages {PDF_PAGES_ID} 0 R");
    if let Some(root) = layout.outline_root_id {
        catalog.push_str(&format!(" /Outlines {root} 0 R /PageMode /UseOutlines"));
    }
    catalog.push_str(" >>");
    write_pdf_object(writer, &mut offset, &mut offsets, PDF_CATALOG_ID, &catalog)?;

    let kids = (0..document.pages.len())
        .map(|idx| format!("{} 0 R", layout.page_id(idx)))
        .collect::<Vec<_>>()
        .join(" ");
    let pages = format!(
        "<< /Type /Pages /Kids [{kids}] /Count {} /MediaBox [0 0 {} {}] >>",
        document.pages.len(),
        fmt_pt(document.page_size.width),
        fmt_pt(page_height)
    );
    write_pdf_object(writer, &mut offset, &mut offsets, PDF_PAGES_ID, &pages)?;

    let font_entries = layout
        .fonts
        .iter()
        .enumerate()
        .map(|(idx, (_, id))| format!("/F{} {id} 0 R", idx + 1))
        .collect::<Vec<_>>()
        .join(" ");
    let resources = format!("<< /Font << {font_entries} >> >>");
    write_pdf_object(writer, &mut offset, &mut offsets, PDF_RESOURCES_ID, &resources)?;

    for (font, id) in &layout.fonts {
        write_pdf_object(writer, &mut offset, &mut offsets, *id, &font_object(*font))?;
    }

    for (idx, page) in document.pages.iter().enumerate() {
        let page_obj = format!(
            "<< /Type /Page /Parent {PDF_PAGES_ID} 0 R /Resources {PDF_RESOURCES_ID} 0 R /Contents {} 0 R >>",
            layout.content_id(idx)
        );
        write_pdf_object(writer, &mut offset, &mut offsets, layout.page_id(idx), &page_obj)?;

        let content = render_page(page, page_height, &layout);
        write_stream_object(
            writer,
            &mut offset,
            &mut offsets,
            layout.content_id(idx),
            content.as_bytes(),
            options.compress,
        )?;
    }

    if let Some(root_id) = layout.outline_root_id {
        let top_level: Vec<usize> = (0..outline.len())
            .filter(|idx| outline[*idx].parent.is_none())
            .collect();
        let root = format!(
            "<< /Type /Outlines /First {} 0 R /Last {} 0 R /Count {} >>",
            outline_ref(&layout, top_level.first()),
            outline_ref(&layout, top_level.last()),
            outline.len()
        );
        write_pdf_object(writer, &mut offset, &mut offsets, root_id, &root)?;
        for idx in 0..outline.len() {
            let body = outline_item_object(&outline, idx, &top_level, &layout, root_id, page_height);
            if let Some(id) = layout.outline_node_id(idx) {
                write_pdf_object(writer, &mut offset, &mut offsets, id, &body)?;
            }
        }
    }

    write_pdf_object(
        writer,
        &mut offset,
        &mut offsets,
        layout.info_id,
        &info_object(options.title.as_deref(), &options.producer),
    )?;

    let xref_start = offset;
    write_str(writer, &format!("xref\n0 {}\n", layout.total + 1), &mut offset)?;
    write_str(writer, "0000000000 65535 f \n", &mut offset)?;
    for entry in offsets.iter().skip(1) {
        write_str(writer, &format!("{entry:010} 00000 n \n"), &mut offset)?;
    }
    write_str(
        writer,
        &format!(
            "trailer\n<< /Size {} /Root {PDF_CATALOG_ID} 0 R /Info {} 0 R >>\nstartxref\n{xref_start}\n%%EOF\n",
            layout.total + 1,
            layout.info_id
        ),
        &mut offset,
    )?;
    log::debug!(
        "pdf written: {} page(s), {} font(s), {} bookmark(s), {offset} bytes",
        document.pages.len(),
        layout.fonts.len(),
        outline.len()
    );
    Ok(offset)
}

fn collect_used_fonts(document: &Document) -> Vec<Base14Font> {
    let mut fonts = BTreeSet::new();
    fonts.insert(Base14Font::Helvetica);
    for page in &document.pages {
        for cmd in &page.commands {
            if let Command::SetFont { font, .. } = cmd {
                fonts.insert(*font);
            }
        }
    }
    fonts.into_iter().collect()
}

fn build_outline(document: &Document) -> Vec<OutlineNode> {
    let mut nodes: Vec<OutlineNode> = Vec::new();
    let mut stack: Vec<(u8, usize)> = Vec::new();
    for (page_index, page) in document.pages.iter().enumerate() {
        for cmd in &page.commands {
            let Command::Bookmark { level, title, y } = cmd else {
                continue;
            };
            while stack.last().is_some_and(|(open, _)| *open >= *level) {
                stack.pop();
            }
            let parent = stack.last().map(|(_, idx)| *idx);
            let idx = nodes.len();
            nodes.push(OutlineNode {
                title: title.clone(),
                page_index,
                y: *y,
                parent,
                children: Vec::new(),
            });
            if let Some(parent) = parent {
                nodes[parent].children.push(idx);
            }
            stack.push((*level, idx));
        }
    }
    nodes
}

fn outline_ref(layout: &ObjectLayout, node: Option<&usize>) -> usize {
    node.and_then(|idx| layout.outline_node_id(*idx)).unwrap_or(0)
}

fn descendant_count(nodes: &[OutlineNode], idx: usize) -> usize {
    nodes[idx]
        .children
        .iter()
        .map(|child| 1 + descendant_count(nodes, *child))
        .sum()
}

fn outline_item_object(
    nodes: &[OutlineNode],
    idx: usize,
    top_level: &[usize],
    layout: &ObjectLayout,
    root_id: usize,
    page_height: Pt,
) -> String {
    let node = &nodes[idx];
    let siblings: &[usize] = match node.parent {
        Some(parent) => &nodes[parent].children,
        None => top_level,
    };
    let position = siblings.iter().position(|sibling| *sibling == idx).unwrap_or(0);
    let parent_id = node
        .parent
        .and_then(|parent| layout.outline_node_id(parent))
        .unwrap_or(root_id);

    let mut body = format!(
        "<< /Title {} /Parent {parent_id} 0 R /Dest [{} 0 R /XYZ 0 {} null]",
        utf16_hex_string(&node.title),
        layout.page_id(node.page_index),
        fmt_pt(page_height - node.y)
    );
    if position > 0 {
        body.push_str(&format!(" /Prev {} 0 R", outline_ref(layout, siblings.get(position - 1))));
    }
    if position + 1 < siblings.len() {
        body.push_str(&format!(" /Next {} 0 R", outline_ref(layout, siblings.get(position + 1))));
    }
    if !node.children.is_empty() {
        body.push_str(&format!(
            " /First {} 0 R /Last {} 0 R /Count {}",
            outline_ref(layout, node.children.first()),
            outline_ref(layout, node.children.last()),
            descendant_count(nodes, idx)
        ));
    }
    body.push_str(" >>");
    body
}

fn font_object(font: Base14Font) -> String {
    format!(
        "<< /Type /Font /Subtype /Type1 /BaseFont /{} /Encoding /WinAnsiEncoding >>",
        font.base_font_name()
    )
}

fn info_object(title: Option<&str>, producer: &str) -> String {
    let mut entries: Vec<String> = Vec::new();
    if let Some(title) = title {
        entries.push(format!("/Title {}", utf16_hex_string(title)));
    }
    entries.push(format!("/Producer ({})", escape_pdf_string(producer)));
    format!("<< {} >>", entries.join(" "))
}

#[derive(Debug, Clone, Copy)]
struct TextState {
    font: Base14Font,
    size: Pt,
    word_spacing: Pt,
}

fn render_page(page: &Page, page_height: Pt, layout: &ObjectLayout) -> String {
    let mut out = String::new();
    let mut state = TextState {
        font: Base14Font::Helvetica,
        size: Pt::from_i32(12),
        word_spacing: Pt::ZERO,
    };
    let mut saved: Vec<TextState> = Vec::new();

    for cmd in &page.commands {
        match cmd {
            Command::SaveState => {
                saved.push(state);
                out.push_str("q\n");
            }
            Command::RestoreState => {
                if let Some(previous) = saved.pop() {
                    state = previous;
                }
                out.push_str("Q\n");
            }
            Command::SetFillColor(color) => out.push_str(&color_to_pdf_fill(*color)),
            Command::SetStrokeColor(color) => out.push_str(&color_to_pdf_stroke(*color)),
            Command::SetLineWidth(width) => {
                out.push_str(&format!("{} w\n", fmt_pt(*width)));
            }
            Command::SetDash { pattern, phase } => {
                let items = pattern.iter().map(|v| fmt_pt(*v)).collect::<Vec<_>>().join(" ");
                out.push_str(&format!("[{items}] {} d\n", fmt_pt(*phase)));
            }
            Command::SetFont { font, size } => {
                state.font = *font;
                state.size = *size;
            }
            Command::MoveTo { x, y } => {
                out.push_str(&format!("{} {} m\n", fmt_pt(*x), fmt_pt(page_height - *y)));
            }
            Command::LineTo { x, y } => {
                out.push_str(&format!("{} {} l\n", fmt_pt(*x), fmt_pt(page_height - *y)));
            }
            Command::CurveTo {
                x1,
                y1,
                x2,
                y2,
                x,
                y,
            } => {
                out.push_str(&format!(
                    "{} {} {} {} {} {} c\n",
                    fmt_pt(*x1),
                    fmt_pt(page_height - *y1),
                    fmt_pt(*x2),
                    fmt_pt(page_height - *y2),
                    fmt_pt(*x),
                    fmt_pt(page_height - *y),
                ));
            }
            Command::ClosePath => out.push_str("h\n"),
            Command::DrawRect {
                x,
                y,
                width,
                height,
            } => {
                out.push_str(&format!(
                    "{} {} {} {} re\n",
                    fmt_pt(*x),
                    fmt_pt(page_height - *y - *height),
                    fmt_pt(*width),
                    fmt_pt(*height)
                ));
            }
            Command::Fill => out.push_str("f\n"),
            Command::Stroke => out.push_str("S\n"),
            Command::DrawString {
                x,
                y,
                text,
                word_spacing,
            } => {
                out.push_str("BT\n");
                out.push_str(&format!(
                    "/{} {} Tf\n",
                    layout.font_resource(state.font),
                    fmt_pt(state.size)
                ));
                // Tw is part of the graphics state and outlives ET.
                if *word_spacing != state.word_spacing {
                    out.push_str(&format!("{} Tw\n", fmt_pt(*word_spacing)));
                    state.word_spacing = *word_spacing;
                }
                out.push_str(&format!("{} {} Td\n", fmt_pt(*x), fmt_pt(page_height - *y)));
                out.push_str(&format!("({}) Tj\n", encode_winansi_pdf_string(text)));
                out.push_str("ET\n");
            }
            Command::Bookmark { .. } => {}
        }
    }
    out
}

fn flate_compress(data: &[u8]) -> io::Result<Vec<u8>> {
    use flate2::Compression;
    use flate2::write::ZlibEncoder;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

fn write_stream_object<W: Write>(
    writer: &mut W,
    offset: &mut usize,
    offsets: &mut [usize],
    obj_id: usize,
    data: &[u8],
    compress: bool,
) -> io::Result<()> {
    let (data, filter) = if compress {
        (flate_compress(data)?, " /Filter /FlateDecode")
    } else {
        (data.to_vec(), "")
    };
    if let Some(slot) = offsets.get_mut(obj_id) {
        *slot = *offset;
    }
    write_str(
        writer,
        &format!("{obj_id} 0 obj\n<< /Length {}{filter} >>\nstream\n", data.len()),
        offset,
    )?;
    write_bytes(writer, &data, offset)?;
    write_bytes(writer, b"\nendstream\nendobj\n", offset)
}

fn write_pdf_object<W: Write>(
    writer: &mut W,
    offset: &mut usize,
    offsets: &mut [usize],
    obj_id: usize,
    body: &str,
) -> io::Result<()> {
    if let Some(slot) = offsets.get_mut(obj_id) {
        *slot = *offset;
    }
    write_str(writer, &format!("{obj_id} 0 obj\n"), offset)?;
    write_bytes(writer, body.as_bytes(), offset)?;
    write_bytes(writer, b"\nendobj\n", offset)?;
    Ok(())
}

fn write_bytes<W: Write>(writer: &mut W, data: &[u8], offset: &mut usize) -> io::Result<()> {
    writer.write_all(data)?;
    *offset += data.len();
    Ok(())
}

fn write_str<W: Write>(writer: &mut W, data: &str, offset: &mut usize) -> io::Result<()> {
    write_bytes(writer, data.as_bytes(), offset)
}

fn escape_pdf_string(input: &str) -> String {
    let mut out = String::new();
    for ch in input.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '(' => out.push_str("\\("),
            ')' => out.push_str("\\)"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(ch),
        }
    }
    out
}

/// Text string for `/Title` entries: UTF-16BE with BOM, hex encoded.
fn utf16_hex_string(input: &str) -> String {
    let mut out = String::from("<FEFF");
    for unit in input.encode_utf16() {
        out.push_str(&format!("{unit:04X}"));
    }
    out.push('>');
    out
}

/// Literal string body for `Tj`. Text reaching the writer is already
/// WinAnsi-clean; anything else becomes `?`.
fn encode_winansi_pdf_string(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut replaced = 0usize;
    for ch in input.chars() {
        let byte = winansi_byte(ch).unwrap_or_else(|| {
            replaced += 1;
            b'?'
        });
        match byte {
            b'\\' => out.push_str("\\\\"),
            b'(' => out.push_str("\\("),
            b')' => out.push_str("\\)"),
            b if b < 0x20 || b >= 0x7f => out.push_str(&format!("\\{b:03o}")),
            b => out.push(b as char),
        }
    }
    if replaced > 0 {
        log::warn!("{replaced} character(s) not encodable in WinAnsi were replaced");
    }
    out
}

fn fmt(value: f32) -> String {
    if !value.is_finite() {
        return "0".to_string();
    }
    let fixed = I32F32::from_num(value);
    let scaled = (fixed * I32F32::from_num(1000)).round();
    let milli: i64 = scaled.to_num();
    format_milli(milli)
}

fn format_milli(milli: i64) -> String {
    if milli == 0 {
        return "0".to_string();
    }
    let sign = if milli < 0 { "-" } else { "" };
    let abs = milli.abs();
    let int_part = abs / 1000;
    let frac_part = abs % 1000;
    if frac_part == 0 {
        format!("{sign}{int_part}")
    } else {
        let mut s = format!("{sign}{int_part}.{frac_part:03}");
        while s.ends_with('0') {
            s.pop();
        }
        s
    }
}

fn fmt_pt(value: Pt) -> String {
    format_milli(value.to_milli())
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

fn color_to_pdf_fill(color: Color) -> String {
    format!(
        "{} {} {} rg\n",
        fmt(clamp_unit(color.r)),
        fmt(clamp_unit(color.g)),
        fmt(clamp_unit(color.b))
    )
}

fn color_to_pdf_stroke(color: Color) -> String {
    format!(
        "{} {} {} RG\n",
        fmt(clamp_unit(color.r)),
        fmt(clamp_unit(color.g)),
        fmt(clamp_unit(color.b))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Canvas;
    use crate::types::Size;

    fn sample_document() -> Document {
        let mut canvas = Canvas::new(Size::a4());
        canvas.bookmark(1, "Introdução", Pt::from_i32(72));
        canvas.set_font(Base14Font::HelveticaBold, Pt::from_i32(16));
        canvas.draw_string(Pt::from_i32(72), Pt::from_i32(90), "Introdução (1)");
        canvas.bookmark(2, "Detalhes", Pt::from_i32(120));
        canvas.fill_rect(
            Pt::from_i32(72),
            Pt::from_i32(130),
            Pt::from_i32(100),
            Pt::from_i32(20),
            Color::from_rgb8(0x28, 0x74, 0xa6),
        );
        canvas.show_page();
        canvas.bookmark(1, "Conclusão", Pt::from_i32(72));
        canvas.set_font(Base14Font::Courier, Pt::from_i32(9));
        canvas.draw_string_spaced(Pt::from_i32(72), Pt::from_i32(90), "a b c", Pt::from_f32(1.5));
        canvas.finish()
    }

    fn uncompressed() -> PdfOptions {
        PdfOptions {
            title: Some("Relatório".to_string()),
            compress: false,
            ..PdfOptions::default()
        }
    }

    #[test]
    fn format_milli_trims_trailing_zeros() {
        assert_eq!(format_milli(0), "0");
        assert_eq!(format_milli(12_000), "12");
        assert_eq!(format_milli(12_500), "12.5");
        assert_eq!(format_milli(-1_250), "-1.25");
        assert_eq!(format_milli(7), "0.007");
    }

    #[test]
    fn winansi_strings_escape_delimiters_and_high_bytes() {
        assert_eq!(encode_winansi_pdf_string("a(b)\\"), "a\\(b\\)\\\\");
        assert_eq!(encode_winansi_pdf_string("é"), "\\351");
        assert_eq!(encode_winansi_pdf_string("😀"), "?");
    }

    #[test]
    fn titles_are_utf16_hex() {
        assert_eq!(utf16_hex_string("Aé"), "<FEFF004100E9>");
    }

    #[test]
    fn output_is_a_parseable_pdf_with_outline() {
        let bytes = document_to_pdf(&sample_document(), &uncompressed()).expect("pdf");
        assert!(bytes.starts_with(b"%PDF-1.7"));

        let parsed = lopdf::Document::load_mem(&bytes).expect("lopdf");
        assert_eq!(parsed.get_pages().len(), 2);

        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("/Outlines"));
        assert!(text.contains("/BaseFont /Helvetica-Bold"));
        assert!(text.contains("/BaseFont /Courier"));
        assert!(text.contains("1.5 Tw"));
        assert!(text.contains("(Introdu\\347\\343o \\(1\\)) Tj"));
        assert!(text.contains("/Producer (markpage)"));
    }

    #[test]
    fn outline_nests_by_heading_level() {
        let nodes = build_outline(&sample_document());
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0].children, vec![1]);
        assert_eq!(nodes[1].parent, Some(0));
        assert_eq!(nodes[2].parent, None);
        assert_eq!(nodes[2].page_index, 1);
    }

    #[test]
    fn identical_documents_serialize_identically() {
        let first = document_to_pdf(&sample_document(), &PdfOptions::default()).expect("pdf");
        let second = document_to_pdf(&sample_document(), &PdfOptions::default()).expect("pdf");
        assert_eq!(first, second);
    }

    #[test]
    fn metrics_record_total_bytes() {
        let mut metrics = DocumentMetrics::default();
        let bytes =
            document_to_pdf_with_metrics(&sample_document(), &PdfOptions::default(), &mut metrics)
                .expect("pdf");
        assert_eq!(metrics.total_bytes, bytes.len());
    }
}
