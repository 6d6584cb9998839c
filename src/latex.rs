use once_cell::sync::Lazy;
use regex::Regex;

pub mod bibliography;
pub mod diagnostics;
pub mod document;
pub mod figures;
pub mod macros;
pub mod normalize;
pub mod parser;
pub mod recovery;
pub mod render;
pub mod tree;

pub use bibliography::{replace_citations, BibEntry, BibEntryBuilder, Bibliography, CitationResolver, CiteKind};
pub use diagnostics::{CollectingSink, DiagnosticSink, LatexWarning, LogSink};
pub use document::{
    short_authors, AuthorHighlighter, AuthorStyle, DocumentBuilder, DocumentOptions, LatexDocument,
    NameListHighlighter,
};
pub use figures::{ExternalRasterizer, Figure, PassthroughRasterizer, Rasterizer};
pub use macros::Macro;
pub use parser::SourceFolder;
pub use render::generate_markdown_text;
pub use tree::{Node, ParseError, TexTree};

// Commonly used regex patterns compiled once
pub(crate) static CITE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\(citep|citet|citealt|cite)\*?(?:\[[^\]]*\])*\{([^}]*)\}").expect("Invalid citation regex pattern")
});
pub(crate) static ORCID_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9]{4}-[0-9]{4}-[0-9]{4}-[0-9]{3}[0-9X]").expect("Invalid ORCID regex pattern")
});
