//! The two fixed report pipelines: load, preprocess, Markdown to HTML,
//! assemble, render, write and read back.

use crate::Engine;
use crate::error::{MarkpageError, Result};
use crate::markdown::{MarkdownExtension, render_markdown};
use crate::pdfinspect::inspect_pdf_path;
use crate::preprocess::preprocess;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Mapping,
    Flowchart,
}

/// Unit for the file size printed after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeUnit {
    Megabytes,
    Kilobytes,
}

impl SizeUnit {
    pub fn format(self, bytes: usize) -> String {
        match self {
            SizeUnit::Megabytes => format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0)),
            SizeUnit::Kilobytes => format!("{:.2} KB", bytes as f64 / 1024.0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReportProfile {
    pub kind: ReportKind,
    pub input_file: &'static str,
    pub output_file: &'static str,
    pub title: &'static str,
    pub lang: &'static str,
    pub title_block: &'static str,
    pub stylesheet: &'static str,
    pub extensions: &'static [MarkdownExtension],
    pub preprocess: bool,
    pub size_unit: SizeUnit,
}

const MAPPING_EXTENSIONS: &[MarkdownExtension] = &[
    MarkdownExtension::Tables,
    MarkdownExtension::FencedCodeBlocks,
    MarkdownExtension::CodeFriendly,
    MarkdownExtension::HeaderIds,
    MarkdownExtension::Toc,
    MarkdownExtension::Strikethrough,
    MarkdownExtension::TaskLists,
];

const FLOWCHART_EXTENSIONS: &[MarkdownExtension] = &[
    MarkdownExtension::Tables,
    MarkdownExtension::FencedCodeBlocks,
    MarkdownExtension::CodeFriendly,
    MarkdownExtension::HeaderIds,
];

const MAPPING_TITLE_BLOCK: &str = concat!(
    "<div class=\"document-header\">",
    "<div class=\"document-title\">\u{1F4CB} MAPEAMENTO COMPLETO</div>",
    "<div class=\"document-subtitle\">Sistema de Controle Financeiro Finanza</div>",
    "<div class=\"document-subtitle\">IFSUL - Campus Venâncio Aires</div>",
    "<div class=\"document-subtitle\" style=\"font-size: 11pt; margin-top: 10pt;\">",
    "Documentação Técnica Detalhada com Fluxos Completos de Código</div>",
    "</div>"
);

const FLOWCHART_TITLE_BLOCK: &str = concat!(
    "<div style=\"text-align: center; margin-bottom: 30pt; padding: 20pt; ",
    "background: linear-gradient(135deg, #1a5490 0%, #2874a6 100%); color: white; border-radius: 5pt;\">",
    "<div style=\"font-size: 28pt; font-weight: bold; margin-bottom: 10pt;\">\u{1F4CA} FLUXOGRAMA SIMPLIFICADO</div>",
    "<div style=\"font-size: 14pt;\">Sistema de Controle Financeiro Finanza</div>",
    "<div style=\"font-size: 12pt; margin-top: 5pt;\">IFSUL - Campus Venâncio Aires</div>",
    "</div>"
);

impl ReportProfile {
    pub fn mapping() -> Self {
        Self {
            kind: ReportKind::Mapping,
            input_file: "MAPEAMENTO_COMPLETO.md",
            output_file: "MAPEAMENTO_COMPLETO.pdf",
            title: "Mapeamento Completo - Sistema Finanza",
            lang: "pt-BR",
            title_block: MAPPING_TITLE_BLOCK,
            stylesheet: include_str!("stylesheets/mapping.css"),
            extensions: MAPPING_EXTENSIONS,
            preprocess: true,
            size_unit: SizeUnit::Megabytes,
        }
    }

    pub fn flowchart() -> Self {
        Self {
            kind: ReportKind::Flowchart,
            input_file: "FLUXOGRAMA_SIMPLES.md",
            output_file: "FLUXOGRAMA_SIMPLES.pdf",
            title: "Fluxograma Simplificado - Sistema Finanza",
            lang: "pt-BR",
            title_block: FLOWCHART_TITLE_BLOCK,
            stylesheet: include_str!("stylesheets/flowchart.css"),
            extensions: FLOWCHART_EXTENSIONS,
            preprocess: false,
            size_unit: SizeUnit::Kilobytes,
        }
    }

    pub fn input_path(&self, dir: &Path) -> PathBuf {
        dir.join(self.input_file)
    }

    pub fn output_path(&self, dir: &Path) -> PathBuf {
        dir.join(self.output_file)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportOutcome {
    pub output_path: PathBuf,
    pub bytes: usize,
    pub page_count: usize,
}

/// Stage callbacks fired by [`generate`]. All methods default to no-ops.
pub trait ReportObserver {
    fn reading(&mut self, _input: &Path) {}
    fn preprocessing(&mut self) {}
    fn converting(&mut self) {}
    fn rendering(&mut self) {}
    fn written(&mut self, _outcome: &ReportOutcome) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SilentObserver;

impl ReportObserver for SilentObserver {}

pub fn assemble_document(profile: &ReportProfile, fragment: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"{lang}\">\n<head>\n<meta charset=\"UTF-8\">\n<title>{title}</title>\n</head>\n<body>\n{block}\n{fragment}\n</body>\n</html>\n",
        lang = profile.lang,
        title = profile.title,
        block = profile.title_block,
    )
}

/// Runs one report against `dir`. A missing input is reported before any
/// other work and leaves `dir` untouched.
pub fn generate(
    profile: &ReportProfile,
    dir: &Path,
    observer: &mut dyn ReportObserver,
) -> Result<ReportOutcome> {
    let input = profile.input_path(dir);
    if !input.is_file() {
        return Err(MarkpageError::InputNotFound { path: input });
    }
    let started = Instant::now();

    observer.reading(&input);
    let source = std::fs::read_to_string(&input)?;

    let markdown = if profile.preprocess {
        observer.preprocessing();
        preprocess(&source)
    } else {
        source
    };

    observer.converting();
    let fragment = render_markdown(&markdown, profile.extensions);
    let html = assemble_document(profile, &fragment);

    observer.rendering();
    let engine = Engine::builder().document_title(profile.title).build()?;
    let output_path = profile.output_path(dir);
    let bytes = engine.render_to_file(&html, profile.stylesheet, &output_path)?;

    let report = inspect_pdf_path(&output_path)?;
    log::debug!(
        "{:?} report: {} page(s), {} bytes in {:.1} ms",
        profile.kind,
        report.page_count,
        bytes,
        started.elapsed().as_secs_f64() * 1000.0
    );
    let outcome = ReportOutcome {
        output_path,
        bytes,
        page_count: report.page_count,
    };
    observer.written(&outcome);
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "# Visão Geral\n\nTexto com `codigo_inline` e **negrito**.\n\n\
        | Camada | Arquivo |\n|---|---|\n| API | server.js |\n\n\
        **Resumo da Cadeia de Chamadas:**\n1. rota\n2. controller\n\n\
        ```js\napp.get('/', handler);\n```\n";

    #[derive(Default)]
    struct Recorder {
        stages: Vec<&'static str>,
    }

    impl ReportObserver for Recorder {
        fn reading(&mut self, _input: &Path) {
            self.stages.push("reading");
        }
        fn preprocessing(&mut self) {
            self.stages.push("preprocessing");
        }
        fn converting(&mut self) {
            self.stages.push("converting");
        }
        fn rendering(&mut self) {
            self.stages.push("rendering");
        }
        fn written(&mut self, _outcome: &ReportOutcome) {
            self.stages.push("written");
        }
    }

    #[test]
    fn sizes_format_with_two_decimals() {
        assert_eq!(SizeUnit::Megabytes.format(1_572_864), "1.50 MB");
        assert_eq!(SizeUnit::Kilobytes.format(2048), "2.00 KB");
    }

    #[test]
    fn assembled_document_carries_title_and_block() {
        let profile = ReportProfile::flowchart();
        let html = assemble_document(&profile, "<p>corpo</p>");
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<html lang=\"pt-BR\">"));
        assert!(html.contains("<title>Fluxograma Simplificado - Sistema Finanza</title>"));
        assert!(html.contains("FLUXOGRAMA SIMPLIFICADO"));
        assert!(html.find("FLUXOGRAMA").expect("block") < html.find("<p>corpo</p>").expect("body"));
    }

    #[test]
    fn missing_input_fails_before_any_stage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut recorder = Recorder::default();
        let err = generate(&ReportProfile::mapping(), dir.path(), &mut recorder).expect_err("missing");
        assert!(err.is_missing_input());
        assert!(recorder.stages.is_empty());
        assert!(!dir.path().join("MAPEAMENTO_COMPLETO.pdf").exists());
    }

    #[test]
    fn mapping_runs_every_stage() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("MAPEAMENTO_COMPLETO.md"), SAMPLE).expect("write");
        let mut recorder = Recorder::default();
        let outcome = generate(&ReportProfile::mapping(), dir.path(), &mut recorder).expect("generate");
        assert_eq!(
            recorder.stages,
            ["reading", "preprocessing", "converting", "rendering", "written"]
        );
        let written = std::fs::read(&outcome.output_path).expect("read");
        assert!(written.starts_with(b"%PDF-"));
        assert_eq!(outcome.bytes, written.len());
        assert!(outcome.page_count >= 1);
    }

    #[test]
    fn flowchart_skips_preprocessing() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("FLUXOGRAMA_SIMPLES.md"), SAMPLE).expect("write");
        let mut recorder = Recorder::default();
        generate(&ReportProfile::flowchart(), dir.path(), &mut recorder).expect("generate");
        assert!(!recorder.stages.contains(&"preprocessing"));
        assert!(dir.path().join("FLUXOGRAMA_SIMPLES.pdf").is_file());
    }

    #[test]
    fn reruns_are_byte_identical() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("MAPEAMENTO_COMPLETO.md"), SAMPLE).expect("write");
        let profile = ReportProfile::mapping();
        let first = generate(&profile, dir.path(), &mut SilentObserver).expect("first");
        let first_bytes = std::fs::read(&first.output_path).expect("read");
        let second = generate(&profile, dir.path(), &mut SilentObserver).expect("second");
        assert_eq!(first.bytes, second.bytes);
        assert_eq!(first_bytes, std::fs::read(&second.output_path).expect("read"));
    }
}
