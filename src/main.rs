use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use serde_json::json;
use std::fs;
use std::path::PathBuf;

use texdeck::latex::{
    generate_markdown_text, replace_citations, Bibliography, CollectingSink, DocumentBuilder, DocumentOptions,
    DiagnosticSink, LatexWarning, LogSink, NameListHighlighter, PassthroughRasterizer, SourceFolder,
};

/// CLI app turning a paper's LaTeX source into a Markdown summary
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Source folder, or a .tar.gz/.tgz/.zip archive of it
    #[arg(short, long)]
    source: PathBuf,
    /// Extract an archive source into this directory instead of a temporary one
    #[arg(long)]
    extract_to: Option<PathBuf>,
    /// Output file (prints to stdout if not specified)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Author names to highlight (repeatable)
    #[arg(long)]
    highlight: Vec<String>,
    /// Number of figures kept in the summary
    #[arg(long, default_value_t = 4)]
    max_figures: usize,
    /// Leave figures out of the summary
    #[arg(long)]
    no_figures: bool,
    /// Keep PDF/EPS images instead of converting them to PNG
    #[arg(long)]
    no_rasterize: bool,
    /// Only accept image references that name an existing file exactly
    #[arg(long)]
    no_extension_recovery: bool,
    /// Free-text line shown above the author list
    #[arg(long)]
    comment: Option<String>,
    /// Print the extracted metadata as JSON instead of Markdown
    #[arg(long)]
    json: bool,
    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Logs every warning and keeps a copy for the JSON report.
#[derive(Clone, Default)]
struct ReportSink {
    log: LogSink,
    collected: CollectingSink,
}

impl DiagnosticSink for ReportSink {
    fn report(&self, warning: LatexWarning) {
        self.log.report(warning.clone());
        self.collected.report(warning);
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Configure logging
    if args.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    let mut folder = match &args.extract_to {
        Some(target) => SourceFolder::open_into(&args.source, target),
        None => SourceFolder::open(&args.source),
    }
    .with_context(|| format!("Failed to open source {:?}", args.source))?;

    let options = DocumentOptions {
        recover_extensions: !args.no_extension_recovery,
        max_figures: args.max_figures,
        ..DocumentOptions::default()
    };
    let sink = ReportSink::default();
    let mut builder = DocumentBuilder::new(&folder.path).options(options).diagnostics(sink.clone());
    if args.no_rasterize {
        builder = builder.rasterizer(PassthroughRasterizer);
    }
    if let Some(comment) = &args.comment {
        builder = builder.comment(comment.clone());
    }
    let mut doc = builder
        .open()
        .with_context(|| format!("Failed to read LaTeX document from {:?}", folder.path))?;

    if !args.highlight.is_empty() {
        doc.highlight_authors(&NameListHighlighter::new(args.highlight.iter().cloned()));
    }

    let output = if args.json {
        let figures = if args.no_figures {
            Vec::new()
        } else {
            doc.select_most_cited_figures(args.max_figures)
                .context("Failed to extract figures")?
                .into_iter()
                .map(|figure| {
                    json!({
                        "number": figure.number,
                        "images": figure.images.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
                        "caption": figure.caption,
                        "label": figure.label,
                    })
                })
                .collect()
        };
        let report = json!({
            "main_file": doc.main_file().display().to_string(),
            "title": doc.title(),
            "authors": doc.authors(),
            "abstract": doc.abstract_text(),
            "figures": figures,
            "macros": doc.macros().iter().map(|m| m.definition.clone()).collect::<Vec<_>>(),
            "problematic_spans": doc.problematic_spans().len(),
            "warnings": sink.collected.warnings().iter().map(|w| w.to_string()).collect::<Vec<_>>(),
        });
        serde_json::to_string_pretty(&report)?
    } else {
        let markdown = generate_markdown_text(&doc, !args.no_figures).context("Failed to generate Markdown")?;
        let bibliography = Bibliography::load_for_document(doc.tree(), doc.folder())?;
        if bibliography.is_empty() {
            markdown
        } else {
            info!("Resolving citations against {} bibliography entries", bibliography.len());
            replace_citations(&markdown, &bibliography)
        }
    };

    // The output points at images inside the extracted sources
    if !args.no_figures {
        if let Some(kept) = folder.persist() {
            info!("Extracted sources kept in {:?}", kept);
        }
    }

    // Write output to file or stdout
    if let Some(output_file) = &args.output {
        fs::write(output_file, output)
            .with_context(|| format!("Failed to write output to {:?}", output_file))?;
        info!("Output written to {:?}", output_file);
    } else {
        println!("{}", output);
    }

    Ok(())
}
