//! Terminal front end shared by the report binaries.

use crate::error::MarkpageError;
use crate::report::{ReportKind, ReportObserver, ReportOutcome, ReportProfile, SizeUnit, generate};
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

const RULE_WIDTH: usize = 60;

fn rule() -> String {
    "=".repeat(RULE_WIDTH)
}

/// Prints the Portuguese progress lines for a report.
pub struct ConsoleObserver {
    kind: ReportKind,
    size_unit: SizeUnit,
}

impl ConsoleObserver {
    pub fn new(profile: &ReportProfile) -> Self {
        Self {
            kind: profile.kind,
            size_unit: profile.size_unit,
        }
    }
}

impl ReportObserver for ConsoleObserver {
    fn reading(&mut self, input: &Path) {
        match self.kind {
            ReportKind::Mapping => println!("🔄 Lendo arquivo markdown: {}", input.display()),
            ReportKind::Flowchart => println!("📄 Lendo arquivo: {}", input.display()),
        }
    }

    fn preprocessing(&mut self) {
        println!("🔄 Pré-processando conteúdo...");
    }

    fn converting(&mut self) {
        println!("🔄 Convertendo Markdown para HTML...");
    }

    fn rendering(&mut self) {
        match self.kind {
            ReportKind::Mapping => println!("🔄 Gerando PDF..."),
            ReportKind::Flowchart => println!("📝 Gerando PDF..."),
        }
    }

    fn written(&mut self, outcome: &ReportOutcome) {
        let size = self.size_unit.format(outcome.bytes);
        match self.kind {
            ReportKind::Mapping => {
                println!("✅ PDF gerado com sucesso: {}", outcome.output_path.display());
                println!("📊 Tamanho do arquivo: {size}");
            }
            ReportKind::Flowchart => {
                println!("✅ PDF gerado: {}", outcome.output_path.display());
                println!("📊 Tamanho: {size}");
            }
        }
    }
}

fn banner(kind: ReportKind) -> &'static str {
    match kind {
        ReportKind::Mapping => "  GERADOR DE PDF - MAPEAMENTO SISTEMA FINANZA",
        ReportKind::Flowchart => "  GERADOR DE PDF - FLUXOGRAMA SIMPLIFICADO",
    }
}

fn working_dir() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|err| {
        log::warn!("current directory unavailable ({err}); using \".\"");
        PathBuf::from(".")
    })
}

/// Runs `profile` in the working directory and maps the result to an exit
/// status.
pub fn run(profile: ReportProfile) -> ExitCode {
    let dir = working_dir();
    let input = profile.input_path(&dir);
    if !input.is_file() {
        println!("❌ Erro: Arquivo não encontrado: {}", input.display());
        return ExitCode::FAILURE;
    }

    println!("{}", rule());
    println!("{}", banner(profile.kind));
    println!("{}", rule());
    println!();

    let mut observer = ConsoleObserver::new(&profile);
    let result = generate(&profile, &dir, &mut observer)
        .with_context(|| format!("failed to generate {}", profile.output_file));

    match result {
        Ok(_) => {
            println!();
            println!("{}", rule());
            match profile.kind {
                ReportKind::Mapping => println!("  ✅ PROCESSO CONCLUÍDO COM SUCESSO!"),
                ReportKind::Flowchart => println!("  ✅ PROCESSO CONCLUÍDO!"),
            }
            println!("{}", rule());
            ExitCode::SUCCESS
        }
        Err(err) => {
            report_error(profile.kind, &err);
            ExitCode::FAILURE
        }
    }
}

fn report_error(kind: ReportKind, err: &anyhow::Error) {
    // Input vanished between the check and the read.
    if let Some(MarkpageError::InputNotFound { path }) = err.downcast_ref::<MarkpageError>() {
        println!("❌ Erro: Arquivo não encontrado: {}", path.display());
        return;
    }
    match kind {
        ReportKind::Mapping => {
            println!();
            println!("{}", rule());
            println!("  ❌ ERRO: {err:#}");
            println!("{}", rule());
        }
        ReportKind::Flowchart => println!("❌ ERRO: {err:#}"),
    }
    eprintln!("{err:?}");
}
