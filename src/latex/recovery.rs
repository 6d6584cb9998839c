//! Resilient parsing.
//!
//! A single broken table or unbalanced brace should not cost the title,
//! authors and figures of the rest of the paper. When the whole document does
//! not parse, the body is cut at section boundaries and every span is parsed
//! on its own; the spans that still fail are set aside. A failing first span
//! is retried as preamble and body separately, so a damaged introduction does
//! not take the title and macros with it.

use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Result, TexDeckError};
use crate::latex::diagnostics::{DiagnosticSink, LatexWarning};
use crate::latex::tree::{Node, ParseError, TexTree};

const BEGIN_DOCUMENT: &str = "\\begin{document}";
const END_DOCUMENT: &str = "\\end{document}";

/// Characters of a problematic span quoted in its warning.
const PREVIEW_CHARS: usize = 80;

static SPAN_BOUNDARY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\(?:section\b|appendix\b)").expect("Invalid section boundary regex pattern")
});

/// A span of the body that could not be parsed even on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProblematicSpan {
    pub index: usize,
    pub text: String,
    pub error: ParseError,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedSource {
    pub tree: TexTree,
    pub problematic: Vec<ProblematicSpan>,
}

impl ParsedSource {
    pub fn is_complete(&self) -> bool {
        self.problematic.is_empty()
    }
}

/// Parse the whole source, falling back to section-by-section parsing.
pub fn resilient_parse(source: &str, sink: &dyn DiagnosticSink) -> Result<ParsedSource> {
    match TexTree::parse(source) {
        Ok(tree) => Ok(ParsedSource { tree, problematic: Vec::new() }),
        Err(reason) => {
            sink.report(LatexWarning::SegmentedParse { reason });
            segmented_parse(source, sink)
        }
    }
}

/// Split the document body at `\section` and `\appendix` markers. The first
/// span keeps the preamble; every span is wrapped in its own document
/// environment.
pub fn split_spans(source: &str) -> Result<Vec<String>> {
    let (preamble, bodies) = cut_spans(source)?;
    Ok(bodies
        .iter()
        .enumerate()
        .map(|(index, body)| wrap_span(if index == 0 { preamble } else { "" }, body))
        .collect())
}

fn wrap_span(prefix: &str, body: &str) -> String {
    format!("{}{}{}{}", prefix, BEGIN_DOCUMENT, body, END_DOCUMENT)
}

/// The preamble and the body pieces between section boundaries.
fn cut_spans(source: &str) -> Result<(&str, Vec<&str>)> {
    let begin = source.find(BEGIN_DOCUMENT).ok_or(TexDeckError::MissingDocumentBegin)?;
    let body_start = begin + BEGIN_DOCUMENT.len();
    let body_end = source[body_start..]
        .rfind(END_DOCUMENT)
        .map_or(source.len(), |i| body_start + i);
    let body = &source[body_start..body_end];

    let mut cuts: Vec<usize> = SPAN_BOUNDARY_REGEX
        .find_iter(body)
        .map(|m| m.start())
        .filter(|&start| start > 0)
        .collect();
    cuts.insert(0, 0);
    cuts.push(body.len());

    let pieces = cuts.windows(2).map(|window| &body[window[0]..window[1]]).collect();
    Ok((&source[..begin], pieces))
}

/// Collects the successfully parsed parts of a segmented document.
#[derive(Default)]
struct SpanCollector {
    preamble: Vec<Node>,
    body: Vec<Node>,
    problematic: Vec<ProblematicSpan>,
}

impl SpanCollector {
    /// Keep the document body of `tree`, and with `keep_preamble` the nodes
    /// before it.
    fn keep(&mut self, tree: TexTree, keep_preamble: bool) {
        for node in tree.nodes {
            match node {
                Node::Environment { name, children, .. } if name == "document" => {
                    self.body.extend(children);
                    break;
                }
                other if keep_preamble => self.preamble.push(other),
                _ => {}
            }
        }
    }

    fn set_aside(&mut self, index: usize, text: String, error: ParseError, sink: &dyn DiagnosticSink) {
        let preview: String = text.chars().take(PREVIEW_CHARS).collect();
        sink.report(LatexWarning::ProblematicSpan { index, error: error.clone(), preview });
        self.problematic.push(ProblematicSpan { index, text, error });
    }

    fn add(&mut self, index: usize, text: String, keep_preamble: bool, sink: &dyn DiagnosticSink) -> bool {
        match TexTree::parse(&text) {
            Ok(tree) => {
                self.keep(tree, keep_preamble);
                true
            }
            Err(error) => {
                self.set_aside(index, text, error, sink);
                false
            }
        }
    }
}

fn segmented_parse(source: &str, sink: &dyn DiagnosticSink) -> Result<ParsedSource> {
    let (preamble, bodies) = cut_spans(source)?;
    let total = bodies.len();
    let mut collector = SpanCollector::default();
    let mut kept = 0;

    for (index, body) in bodies.iter().enumerate() {
        if index > 0 {
            kept += usize::from(collector.add(index, wrap_span("", body), false, sink));
            continue;
        }
        match TexTree::parse(&wrap_span(preamble, body)) {
            Ok(tree) => {
                collector.keep(tree, true);
                kept += 1;
            }
            Err(error) => {
                debug!("Header span does not parse ({}), retrying preamble and body separately", error);
                let preamble_ok = collector.add(0, preamble.to_string(), true, sink);
                let body_ok = collector.add(0, wrap_span("", body), false, sink);
                kept += usize::from(preamble_ok && body_ok);
            }
        }
    }

    info!("Segmented parse kept {}/{} spans", kept, total);

    let SpanCollector { mut preamble, body, problematic } = collector;
    preamble.push(Node::Environment {
        name: "document".to_string(),
        args: Vec::new(),
        children: body,
    });
    Ok(ParsedSource { tree: TexTree::new(preamble), problematic })
}
