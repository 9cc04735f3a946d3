mod canvas;
#[cfg(feature = "cli")]
pub mod console;
mod doc_template;
mod error;
mod flowable;
mod font;
mod frame;
mod html;
pub mod markdown;
mod metrics;
mod page_data;
mod page_template;
mod pdf;
mod pdfinspect;
pub mod preprocess;
pub mod report;
mod style;
mod types;

pub use canvas::{Canvas, Command, Document, Page};
pub use doc_template::DocTemplate;
pub use error::{MarkpageError, Result};
pub use flowable::{
    BlockBox, Flowable, InlineItem, Pagination, Paragraph, TableFlowable, TableRow, TextRun,
    TextStyle,
};
pub use font::{Base14Font, FontMetrics, sanitize_for_winansi};
pub use frame::{AddResult, Frame};
pub use markdown::{MarkdownExtension, TocEntry, render_markdown, render_markdown_with_toc};
pub use metrics::{DocumentMetrics, PageMetrics};
pub use page_template::{FrameSpec, PageTemplate};
pub use pdfinspect::{PdfInspectReport, inspect_pdf_bytes, inspect_pdf_path};
pub use preprocess::preprocess;
pub use report::{
    ReportKind, ReportObserver, ReportOutcome, ReportProfile, SilentObserver, SizeUnit, generate,
};
pub use style::{BreakMode, PageSetup, StyleResolver};
pub use types::{Color, Margins, Pt, Rect, Size};

use pdf::PdfOptions;
use std::sync::Arc;
use std::time::Instant;

/// HTML/CSS to PDF renderer for the report stylesheets.
pub struct Engine {
    default_page_size: Size,
    default_margins: Margins,
    page_size_explicit: bool,
    margins_explicit: bool,
    pdf_options: PdfOptions,
    metrics: Arc<FontMetrics>,
}

#[derive(Clone)]
pub struct EngineBuilder {
    page_size: Size,
    margins: Margins,
    page_size_explicit: bool,
    margins_explicit: bool,
    pdf_options: PdfOptions,
}

struct RenderContext {
    resolver: StyleResolver,
    page_size: Size,
    margins: Margins,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Page geometry for `css`: builder values set explicitly win over
    /// `@page`, which wins over the builder defaults.
    fn build_render_context(&self, css: &str) -> Result<RenderContext> {
        let t_css = Instant::now();
        let resolver = StyleResolver::new(css)?;
        let setup = resolver.page_setup();

        let page_size = match setup.size {
            Some(css_size) if !self.page_size_explicit => css_size,
            Some(_) => {
                log::debug!("@page size overridden by engine configuration");
                self.default_page_size
            }
            None => self.default_page_size,
        };
        let margins = match setup.margins {
            Some(css_margins) if !self.margins_explicit => css_margins,
            Some(_) => {
                log::debug!("@page margins overridden by engine configuration");
                self.default_margins
            }
            None => self.default_margins,
        };
        if margins.horizontal() >= page_size.width || margins.vertical() >= page_size.height {
            return Err(MarkpageError::InvalidConfiguration(format!(
                "page margins leave no content area on a {}x{}pt page",
                page_size.width.to_f32(),
                page_size.height.to_f32()
            )));
        }
        log::debug!(
            "css parsed in {:.1} ms ({} bytes)",
            t_css.elapsed().as_secs_f64() * 1000.0,
            css.len()
        );
        Ok(RenderContext {
            resolver,
            page_size,
            margins,
        })
    }

    fn layout(&self, html: &str, context: &RenderContext) -> Result<(Document, DocumentMetrics)> {
        let t_story = Instant::now();
        let story = html::html_to_story(html, &context.resolver, self.metrics.clone());
        log::debug!(
            "story of {} flowable(s) built in {:.1} ms",
            story.len(),
            t_story.elapsed().as_secs_f64() * 1000.0
        );

        let template = PageTemplate::with_margins("body", context.page_size, context.margins);
        let mut doc_template = DocTemplate::new(vec![template]);
        for flowable in story {
            doc_template.add_flowable(flowable);
        }
        let (mut document, metrics) = doc_template.build_with_metrics()?;
        page_data::stamp_margin_boxes(
            &mut document,
            context.resolver.page_setup(),
            context.margins,
            &self.metrics,
        );
        Ok((document, metrics))
    }

    pub fn render_to_document(&self, html: &str, css: &str) -> Result<Document> {
        let context = self.build_render_context(css)?;
        Ok(self.layout(html, &context)?.0)
    }

    pub fn render_to_buffer(&self, html: &str, css: &str) -> Result<Vec<u8>> {
        let document = self.render_to_document(html, css)?;
        Ok(pdf::document_to_pdf(&document, &self.pdf_options)?)
    }

    pub fn render_with_metrics(&self, html: &str, css: &str) -> Result<(Vec<u8>, DocumentMetrics)> {
        let context = self.build_render_context(css)?;
        let (document, mut metrics) = self.layout(html, &context)?;
        let bytes = pdf::document_to_pdf_with_metrics(&document, &self.pdf_options, &mut metrics)?;
        Ok((bytes, metrics))
    }

    pub fn render_to_writer<W: std::io::Write>(&self, html: &str, css: &str, writer: &mut W) -> Result<usize> {
        let document = self.render_to_document(html, css)?;
        Ok(pdf::document_to_writer(&document, &self.pdf_options, writer)?)
    }

    /// Renders straight into `path`. A failure part-way leaves a truncated file.
    pub fn render_to_file(&self, html: &str, css: &str, path: impl AsRef<std::path::Path>) -> Result<usize> {
        let document = self.render_to_document(html, css)?;
        let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
        let written = pdf::document_to_writer(&document, &self.pdf_options, &mut file)?;
        std::io::Write::flush(&mut file)?;
        Ok(written)
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            page_size: Size::a4(),
            margins: Margins::all(72.0),
            page_size_explicit: false,
            margins_explicit: false,
            pdf_options: PdfOptions::default(),
        }
    }

    pub fn page_size(mut self, size: Size) -> Self {
        self.page_size = size;
        self.page_size_explicit = true;
        self
    }

    pub fn margins(mut self, margins: Margins) -> Self {
        self.margins = margins;
        self.margins_explicit = true;
        self
    }

    pub fn margin_all(mut self, value: f32) -> Self {
        self.margins = Margins::all(value);
        self.margins_explicit = true;
        self
    }

    pub fn document_title(mut self, title: impl Into<String>) -> Self {
        self.pdf_options.title = Some(title.into());
        self
    }

    pub fn producer(mut self, producer: impl Into<String>) -> Self {
        self.pdf_options.producer = producer.into();
        self
    }

    pub fn compress(mut self, enabled: bool) -> Self {
        self.pdf_options.compress = enabled;
        self
    }

    pub fn build(self) -> Result<Engine> {
        if self.page_size.width <= Pt::ZERO || self.page_size.height <= Pt::ZERO {
            return Err(MarkpageError::InvalidConfiguration(
                "page size must be positive".to_string(),
            ));
        }
        if self.margins.top < Pt::ZERO
            || self.margins.right < Pt::ZERO
            || self.margins.bottom < Pt::ZERO
            || self.margins.left < Pt::ZERO
        {
            return Err(MarkpageError::InvalidConfiguration(
                "margins must not be negative".to_string(),
            ));
        }
        Ok(Engine {
            default_page_size: self.page_size,
            default_margins: self.margins,
            page_size_explicit: self.page_size_explicit,
            margins_explicit: self.margins_explicit,
            pdf_options: self.pdf_options,
            metrics: Arc::new(FontMetrics::default()),
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_CSS: &str = "@page { size: A4; margin: 2cm; \
        @top-right { content: \"Página \" counter(page) \" de \" counter(pages); font-size: 9pt; } } \
        body { font-size: 10pt; } p { text-align: justify; }";

    fn engine() -> Engine {
        Engine::builder()
            .document_title("Teste")
            .build()
            .expect("engine")
    }

    fn long_html(paragraphs: usize) -> String {
        let mut html = String::from("<html><body><h1>Relatório</h1>");
        for i in 0..paragraphs {
            html.push_str(&format!(
                "<p>Parágrafo {i}: texto de exemplo que ocupa espaço suficiente para quebrar linhas \
                 e forçar a paginação do documento gerado pelo motor.</p>"
            ));
        }
        html.push_str("</body></html>");
        html
    }

    #[test]
    fn css_page_rule_sets_geometry() {
        let doc = engine().render_to_document("<p>oi</p>", SAMPLE_CSS).expect("render");
        assert_eq!(doc.page_size, Size::a4());
        assert_eq!(doc.page_count(), 1);
        assert!(doc.page_text(0).contains(&"Página 1 de 1"));
    }

    #[test]
    fn explicit_builder_size_beats_page_rule() {
        let engine = Engine::builder().page_size(Size::letter()).build().expect("engine");
        let doc = engine.render_to_document("<p>oi</p>", SAMPLE_CSS).expect("render");
        assert_eq!(doc.page_size, Size::letter());
    }

    #[test]
    fn page_counters_number_every_page() {
        let doc = engine().render_to_document(&long_html(80), SAMPLE_CSS).expect("render");
        let pages = doc.page_count();
        assert!(pages > 1);
        for index in 0..pages {
            let label = format!("Página {} de {pages}", index + 1);
            assert!(doc.page_text(index).contains(&label.as_str()), "page {index}");
        }
    }

    #[test]
    fn buffer_is_deterministic_pdf() {
        let html = long_html(10);
        let first = engine().render_to_buffer(&html, SAMPLE_CSS).expect("first");
        let second = engine().render_to_buffer(&html, SAMPLE_CSS).expect("second");
        assert!(first.starts_with(b"%PDF-"));
        assert_eq!(first, second);
        let report = inspect_pdf_bytes(&first).expect("inspect");
        assert_eq!(report.title.as_deref(), Some("Teste"));
    }

    #[test]
    fn metrics_cover_pages_and_bytes() {
        let (bytes, metrics) = engine().render_with_metrics(&long_html(60), SAMPLE_CSS).expect("render");
        assert_eq!(metrics.total_bytes, bytes.len());
        assert_eq!(metrics.page_count(), inspect_pdf_bytes(&bytes).expect("inspect").page_count);
        assert!(metrics.total_commands() > 0);
    }

    #[test]
    fn render_to_file_writes_the_buffer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.pdf");
        let written = engine().render_to_file("<p>arquivo</p>", SAMPLE_CSS, &path).expect("file");
        let on_disk = std::fs::read(&path).expect("read");
        assert_eq!(written, on_disk.len());
        assert_eq!(on_disk, engine().render_to_buffer("<p>arquivo</p>", SAMPLE_CSS).expect("buffer"));
    }

    #[test]
    fn oversized_margins_are_rejected() {
        let engine = Engine::builder().margin_all(500.0).build().expect("engine");
        let err = engine.render_to_buffer("<p>x</p>", "").expect_err("no room");
        assert!(matches!(err, MarkpageError::InvalidConfiguration(_)));
    }

    #[test]
    fn negative_margins_fail_at_build() {
        assert!(Engine::builder().margin_all(-1.0).build().is_err());
    }
}
