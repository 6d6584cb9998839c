//! The paper model: one cleaned and parsed main document plus the metadata
//! recovered from it.

use log::info;
use once_cell::unsync::OnceCell;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::latex::diagnostics::{DiagnosticSink, LatexWarning, LogSink};
use crate::latex::figures::{
    extract_figures, graphics_search_path, select_most_cited_figures, ExternalRasterizer, Figure,
    FigureSettings, Rasterizer,
};
use crate::latex::macros::{extract_macros, macro_lines, Macro};
use crate::latex::normalize::{InputInliner, Normalizer};
use crate::latex::parser::{find_main_tex_file, find_tex_files, read_source};
use crate::latex::recovery::{resilient_parse, ProblematicSpan};
use crate::latex::tree::{Arg, Node, TexTree};
use crate::latex::ORCID_REGEX;

/// Commands whose content never belongs in a title.
const TITLE_NOISE: [&str; 4] = ["thanks", "footnote", "thanksref", "footnotemark"];

/// Affiliation markers and notes attached to a single author name.
const AUTHOR_NOISE: [&str; 8] = [
    "inst",
    "thanks",
    "footnote",
    "footnotemark",
    "thanksref",
    "affiliation",
    "email",
    "orcidlink",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentOptions {
    /// Try known image extensions when a graphics reference has none.
    pub recover_extensions: bool,
    pub pdf_dpi: u32,
    pub eps_dpi: u32,
    /// Author lists longer than this are shortened.
    pub short_author_threshold: usize,
    /// Figures kept in the summary.
    pub max_figures: usize,
}

impl Default for DocumentOptions {
    fn default() -> Self {
        let figures = FigureSettings::default();
        Self {
            recover_extensions: figures.recover_extensions,
            pdf_dpi: figures.pdf_dpi,
            eps_dpi: figures.eps_dpi,
            short_author_threshold: 4,
            max_figures: 4,
        }
    }
}

impl DocumentOptions {
    pub fn figure_settings(&self) -> FigureSettings {
        FigureSettings {
            recover_extensions: self.recover_extensions,
            pdf_dpi: self.pdf_dpi,
            eps_dpi: self.eps_dpi,
        }
    }
}

/// How a paper declares its authors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorStyle<'t> {
    /// A single `\author{A, B \and C}` block.
    CombinedBlock(&'t Node),
    /// One `\author` command per author, as in recent journal classes.
    PerAuthor(Vec<&'t Node>),
    Missing,
}

impl<'t> AuthorStyle<'t> {
    /// Classify the `\author` declarations of a document.
    pub fn from_declarations(declarations: Vec<&'t Node>) -> Self {
        match declarations.len() {
            0 => AuthorStyle::Missing,
            1 => AuthorStyle::CombinedBlock(declarations[0]),
            _ => AuthorStyle::PerAuthor(declarations),
        }
    }

    pub fn authors(&self) -> Vec<String> {
        match self {
            AuthorStyle::CombinedBlock(node) => combined_block_authors(node),
            AuthorStyle::PerAuthor(nodes) => per_author_names(nodes),
            AuthorStyle::Missing => Vec::new(),
        }
    }
}

/// Names of a combined `\author` block: the plain text pieces directly inside
/// its argument, with commas removed. Commands, math and groups are skipped,
/// so `\author{A. One affil, B. Two affil}` stays one merged entry.
pub fn combined_block_authors(node: &Node) -> Vec<String> {
    let Some(arg) = node.last_required_arg() else {
        return Vec::new();
    };
    arg.contents
        .iter()
        .filter_map(|child| match child {
            Node::Text(text) => Some(text.replace(',', "").replace('~', " ").trim().to_string()),
            _ => None,
        })
        .filter(|name| !name.is_empty())
        .collect()
}

fn args_text(args: &[Arg]) -> String {
    args.iter()
        .flat_map(|arg| arg.contents.iter())
        .map(|node| node.text_without(&AUTHOR_NOISE))
        .collect()
}

fn clean_name(name: &str) -> String {
    collapse_spaces(&name.replace('~', " "))
}

/// Names of one-author-per-command declarations. An argument carrying an
/// ORCID identifier is dropped with everything before it.
pub fn per_author_names(nodes: &[&Node]) -> Vec<String> {
    nodes
        .iter()
        .map(|node| {
            let args = node.args();
            let orcid = args
                .iter()
                .position(|arg| ORCID_REGEX.is_match(&args_text(std::slice::from_ref(arg))));
            let name = match orcid {
                Some(index) => args_text(&args[index + 1..]),
                None => node
                    .required_args()
                    .map(|arg| args_text(std::slice::from_ref(arg)))
                    .collect(),
            };
            clean_name(&name)
        })
        .filter(|name| !name.is_empty())
        .collect()
}

/// First author followed by "et al." when the list is longer than
/// `threshold`; highlighted (`<mark>`) authors are listed after it.
pub fn short_authors(authors: &[String], threshold: usize) -> Vec<String> {
    if authors.len() <= threshold {
        return authors.to_vec();
    }
    let Some((first, rest)) = authors.split_first() else {
        return Vec::new();
    };
    let marked: Vec<String> = rest.iter().filter(|a| a.contains("<mark>")).cloned().collect();
    if marked.len() == rest.len() {
        return authors.to_vec();
    }
    if marked.is_empty() {
        return vec![format!("{}, et al.", first)];
    }
    std::iter::once(format!("{}, et al. -- incl.", first))
        .chain(marked)
        .collect()
}

/// Marks the authors a reader cares about.
pub trait AuthorHighlighter {
    /// Same length and order as `authors`.
    fn highlight(&self, authors: &[String]) -> Vec<String>;
}

/// Highlights every author whose name contains one of `names`.
#[derive(Debug, Clone, Default)]
pub struct NameListHighlighter {
    names: Vec<String>,
}

impl NameListHighlighter {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { names: names.into_iter().map(Into::into).collect() }
    }
}

impl AuthorHighlighter for NameListHighlighter {
    fn highlight(&self, authors: &[String]) -> Vec<String> {
        authors
            .iter()
            .map(|author| {
                if self.names.iter().any(|name| author.contains(name.as_str())) {
                    format!("<mark>{}</mark>", author)
                } else {
                    author.clone()
                }
            })
            .collect()
    }
}

fn collapse_spaces(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Configures and opens a [`LatexDocument`].
pub struct DocumentBuilder {
    folder: PathBuf,
    options: DocumentOptions,
    diagnostics: Box<dyn DiagnosticSink>,
    rasterizer: Box<dyn Rasterizer>,
    comment: Option<String>,
}

impl DocumentBuilder {
    pub fn new(folder: impl AsRef<Path>) -> Self {
        Self {
            folder: folder.as_ref().to_path_buf(),
            options: DocumentOptions::default(),
            diagnostics: Box::new(LogSink),
            rasterizer: Box::new(ExternalRasterizer),
            comment: None,
        }
    }

    pub fn options(mut self, options: DocumentOptions) -> Self {
        self.options = options;
        self
    }

    pub fn diagnostics(mut self, sink: impl DiagnosticSink + 'static) -> Self {
        self.diagnostics = Box::new(sink);
        self
    }

    pub fn rasterizer(mut self, rasterizer: impl Rasterizer + 'static) -> Self {
        self.rasterizer = Box::new(rasterizer);
        self
    }

    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Locate, clean and parse the main document of the folder.
    pub fn open(self) -> Result<LatexDocument> {
        let folder = self.folder;
        let main_file = find_main_tex_file(&folder, self.diagnostics.as_ref())?;
        info!("Main document: {:?}", main_file);

        let raw_source = read_source(&main_file)?;
        let candidates: Vec<PathBuf> = find_tex_files(&folder)?
            .into_iter()
            .filter(|file| *file != main_file)
            .collect();
        let base_dir = main_file.parent().unwrap_or(folder.as_path()).to_path_buf();
        let normalizer = Normalizer::new(InputInliner::new(&base_dir, candidates));
        let source = normalizer.normalize(&raw_source);

        let parsed = resilient_parse(&source, self.diagnostics.as_ref())?;
        let macros = extract_macros(&parsed.tree);
        let graphics_path = graphics_search_path(&parsed.tree, &folder);
        info!(
            "Parsed {:?}: {} macros, {} problematic spans",
            main_file,
            macros.len(),
            parsed.problematic.len()
        );

        Ok(LatexDocument {
            folder,
            main_file,
            raw_source,
            source,
            tree: parsed.tree,
            problematic: parsed.problematic,
            macros,
            graphics_path,
            options: self.options,
            diagnostics: self.diagnostics,
            rasterizer: self.rasterizer,
            comment: self.comment,
            title: OnceCell::new(),
            authors: OnceCell::new(),
            abstract_text: OnceCell::new(),
            figures: OnceCell::new(),
        })
    }
}

/// A paper's LaTeX source, cleaned and parsed. Title, authors, abstract and
/// figures are computed on first access and cached.
pub struct LatexDocument {
    folder: PathBuf,
    main_file: PathBuf,
    raw_source: String,
    source: String,
    tree: TexTree,
    problematic: Vec<ProblematicSpan>,
    macros: Vec<Macro>,
    graphics_path: Vec<PathBuf>,
    options: DocumentOptions,
    diagnostics: Box<dyn DiagnosticSink>,
    rasterizer: Box<dyn Rasterizer>,
    comment: Option<String>,
    title: OnceCell<String>,
    authors: OnceCell<Vec<String>>,
    abstract_text: OnceCell<String>,
    figures: OnceCell<Vec<Figure>>,
}

impl fmt::Debug for LatexDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LatexDocument")
            .field("folder", &self.folder)
            .field("main_file", &self.main_file)
            .field("macros", &self.macros.len())
            .field("problematic", &self.problematic.len())
            .field("options", &self.options)
            .finish()
    }
}

impl LatexDocument {
    /// Open `folder` with default options, logging warnings.
    pub fn open(folder: impl AsRef<Path>) -> Result<Self> {
        DocumentBuilder::new(folder).open()
    }

    pub fn builder(folder: impl AsRef<Path>) -> DocumentBuilder {
        DocumentBuilder::new(folder)
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn main_file(&self) -> &Path {
        &self.main_file
    }

    pub fn raw_source(&self) -> &str {
        &self.raw_source
    }

    /// Normalized source the tree was parsed from.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn tree(&self) -> &TexTree {
        &self.tree
    }

    pub fn options(&self) -> &DocumentOptions {
        &self.options
    }

    pub fn problematic_spans(&self) -> &[ProblematicSpan] {
        &self.problematic
    }

    pub fn macros(&self) -> &[Macro] {
        &self.macros
    }

    /// Required and user macro definitions, one `$...$` line each.
    pub fn macro_lines(&self) -> Vec<String> {
        macro_lines(&self.macros)
    }

    pub fn graphics_path(&self) -> &[PathBuf] {
        &self.graphics_path
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn set_comment(&mut self, comment: Option<String>) {
        self.comment = comment;
    }

    pub fn title(&self) -> &str {
        self.title.get_or_init(|| self.extract_title())
    }

    fn extract_title(&self) -> String {
        let Some(title) = self.tree.find("title") else {
            self.diagnostics.report(LatexWarning::MissingTitle);
            return String::new();
        };
        let title = collapse_spaces(&title.text_without(&TITLE_NOISE).replace('~', " "));
        match self.tree.find("subtitle") {
            Some(subtitle) => {
                let subtitle = collapse_spaces(&subtitle.text_without(&TITLE_NOISE).replace('~', " "));
                format!("{}: {}", title, subtitle)
            }
            None => title,
        }
    }

    pub fn abstract_text(&self) -> &str {
        self.abstract_text.get_or_init(|| self.extract_abstract())
    }

    fn extract_abstract(&self) -> String {
        let Some(node) = self.tree.find("abstract") else {
            self.diagnostics.report(LatexWarning::MissingAbstract {
                reason: "no abstract environment or command".to_string(),
            });
            return String::new();
        };
        let body: &[Node] = match node {
            Node::Environment { children, .. } => children.as_slice(),
            _ => match node.last_required_arg() {
                Some(arg) => arg.contents.as_slice(),
                None => {
                    self.diagnostics.report(LatexWarning::MissingAbstract {
                        reason: "\\abstract command without argument".to_string(),
                    });
                    return String::new();
                }
            },
        };
        let text: String = body
            .iter()
            .filter(|child| !matches!(child, Node::Comment(_)))
            .map(|child| child.to_string())
            .collect();
        collapse_spaces(&text.replace('~', " "))
    }

    /// How the authors are declared.
    pub fn author_style(&self) -> AuthorStyle<'_> {
        AuthorStyle::from_declarations(self.tree.find_all(&["author"]))
    }

    pub fn authors(&self) -> &[String] {
        self.authors.get_or_init(|| self.author_style().authors())
    }

    /// The author list shortened above the configured threshold.
    pub fn short_authors(&self) -> Vec<String> {
        short_authors(self.authors(), self.options.short_author_threshold)
    }

    /// Replace the cached author list by its highlighted version.
    pub fn highlight_authors(&mut self, highlighter: &dyn AuthorHighlighter) {
        let highlighted = highlighter.highlight(self.authors());
        self.authors = OnceCell::with_value(highlighted);
    }

    /// All figures, resolved and rasterized once.
    pub fn figures(&self) -> Result<&[Figure]> {
        self.figures
            .get_or_try_init(|| {
                extract_figures(
                    &self.tree,
                    &self.graphics_path,
                    &self.options.figure_settings(),
                    self.rasterizer.as_ref(),
                    self.diagnostics.as_ref(),
                )
            })
            .map(Vec::as_slice)
    }

    /// The `n` figures whose labels are referenced most often.
    pub fn select_most_cited_figures(&self, n: usize) -> Result<Vec<&Figure>> {
        Ok(select_most_cited_figures(self.figures()?, &self.source, n))
    }
}
