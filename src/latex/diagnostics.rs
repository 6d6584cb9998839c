//! Non-fatal findings reported while reading a document.

use std::cell::RefCell;
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;

use crate::latex::tree::ParseError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LatexWarning {
    MultipleMainCandidates { count: usize },
    MainDocumentChosen { path: PathBuf },
    SegmentedParse { reason: ParseError },
    ProblematicSpan { index: usize, error: ParseError, preview: String },
    MissingTitle,
    MissingAbstract { reason: String },
    MissingCaption { figure: usize },
    RasterizeFailed { path: PathBuf, reason: String },
}

impl fmt::Display for LatexWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LatexWarning::MultipleMainCandidates { count } => {
                write!(f, "Multiple tex files ({}), looking for \\documentclass", count)
            }
            LatexWarning::MainDocumentChosen { path } => write!(f, "Found documentclass in {:?}", path),
            LatexWarning::SegmentedParse { reason } => {
                write!(f, "Whole document parse failed ({}), parsing section by section", reason)
            }
            LatexWarning::ProblematicSpan { index, error, preview } => {
                write!(f, "Skipping problematic text in span {} ({}): {}", index, error, preview)
            }
            LatexWarning::MissingTitle => write!(f, "No \\title found"),
            LatexWarning::MissingAbstract { reason } => write!(f, "Could not extract abstract: {}", reason),
            LatexWarning::MissingCaption { figure } => write!(f, "Figure {} has no caption", figure),
            LatexWarning::RasterizeFailed { path, reason } => {
                write!(f, "Could not rasterize {:?}, keeping original: {}", path, reason)
            }
        }
    }
}

/// Receives the warnings of one document.
pub trait DiagnosticSink {
    fn report(&self, warning: LatexWarning);
}

/// Forwards warnings to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn report(&self, warning: LatexWarning) {
        log::warn!("{}", warning);
    }
}

/// Keeps warnings in memory. Clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct CollectingSink {
    warnings: Rc<RefCell<Vec<LatexWarning>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warnings(&self) -> Vec<LatexWarning> {
        self.warnings.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.warnings.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.borrow().is_empty()
    }
}

impl DiagnosticSink for CollectingSink {
    fn report(&self, warning: LatexWarning) {
        log::debug!("{}", warning);
        self.warnings.borrow_mut().push(warning);
    }
}
