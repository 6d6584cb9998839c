use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use tempfile::{tempdir, TempDir};
use texdeck::latex::diagnostics::{CollectingSink, LatexWarning};
use texdeck::latex::document::{
    combined_block_authors, per_author_names, short_authors, AuthorStyle, DocumentBuilder, DocumentOptions,
    LatexDocument, NameListHighlighter,
};
use texdeck::latex::figures::PassthroughRasterizer;
use texdeck::latex::render::{generate_markdown_text, macros_markdown_text};
use texdeck::latex::tree::TexTree;
use texdeck::TexDeckError;

const PAPER: &str = "\\documentclass{aa}
\\newcommand{\\msun}{M_\\odot}
\\begin{document}
\\title{A study of~stars\\thanks{Funded.}}
\\subtitle{The sequel}
\\author{Ada Lovelace, Charles Babbage \\and Grace Hopper}
\\begin{abstract}
We study stars % a comment
of mass 1\\msun.
\\end{abstract}
\\section{Intro}
Text.
\\end{document}
";

fn write_file(dir: &Path, name: &str, content: &str) {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let mut file = File::create(path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
}

fn open(dir: &TempDir) -> (LatexDocument, CollectingSink) {
    let sink = CollectingSink::new();
    let doc = DocumentBuilder::new(dir.path())
        .diagnostics(sink.clone())
        .rasterizer(PassthroughRasterizer)
        .open()
        .unwrap();
    (doc, sink)
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|name| name.to_string()).collect()
}

#[test]
fn test_metadata() {
    let dir = tempdir().unwrap();
    write_file(dir.path(), "ms.tex", PAPER);
    let (doc, sink) = open(&dir);

    assert_eq!(doc.main_file(), dir.path().join("ms.tex"));
    assert_eq!(doc.title(), "A study of stars: The sequel");
    assert_eq!(doc.abstract_text(), "We study stars of mass 1\\msun.");
    assert!(doc.problematic_spans().is_empty());
    assert!(sink.is_empty());

    assert_eq!(doc.macros().len(), 1);
    assert_eq!(doc.macros()[0].definition, "\\newcommand{\\msun}{M_\\odot}");
}

#[test]
fn test_combined_block_keeps_known_limitation() {
    let dir = tempdir().unwrap();
    write_file(dir.path(), "ms.tex", PAPER);
    let (doc, _) = open(&dir);

    assert!(matches!(doc.author_style(), AuthorStyle::CombinedBlock(_)));
    // commas do not separate authors inside a combined block
    assert_eq!(doc.authors(), names(&["Ada Lovelace Charles Babbage", "Grace Hopper"]).as_slice());
}

#[test]
fn test_combined_block_authors() {
    let tree = TexTree::parse(r"\author{A.~One\inst{1} \and B. Two$^2$ \and {\it C} Three}").unwrap();
    let author = tree.find("author").unwrap();
    assert_eq!(combined_block_authors(author), names(&["A. One", "B. Two", "Three"]));
}

#[test]
fn test_per_author_names() {
    let tree = TexTree::parse(
        "\\author[0000-0002-1825-0097]{Jane~Doe}\n\\affiliation{Somewhere}\n\\author{John Smith\\inst{2}}",
    )
    .unwrap();
    let declarations = tree.find_all(&["author"]);
    assert_eq!(per_author_names(&declarations), names(&["Jane Doe", "John Smith"]));
}

#[test]
fn test_per_author_style_in_document() {
    let dir = tempdir().unwrap();
    write_file(
        dir.path(),
        "main.tex",
        "\\documentclass{aastex631}
\\begin{document}
\\title{Multi}
\\author[0000-0002-1825-0097]{Jane Doe}
\\affiliation{Somewhere}
\\author{John Smith}
\\begin{abstract}Text.\\end{abstract}
\\end{document}",
    );
    let (doc, _) = open(&dir);

    assert!(matches!(doc.author_style(), AuthorStyle::PerAuthor(ref nodes) if nodes.len() == 2));
    assert_eq!(doc.authors(), names(&["Jane Doe", "John Smith"]).as_slice());
    assert_eq!(doc.abstract_text(), "Text.");
}

#[test]
fn test_missing_metadata_is_reported() {
    let dir = tempdir().unwrap();
    write_file(dir.path(), "main.tex", "\\documentclass{article}\n\\begin{document}\nBody.\n\\end{document}");
    let (doc, sink) = open(&dir);

    assert_eq!(doc.title(), "");
    assert_eq!(doc.abstract_text(), "");
    assert!(doc.authors().is_empty());
    assert!(matches!(doc.author_style(), AuthorStyle::Missing));

    let warnings = sink.warnings();
    assert_eq!(warnings[0], LatexWarning::MissingTitle);
    assert!(matches!(warnings[1], LatexWarning::MissingAbstract { .. }));

    // cached: asking again does not warn again
    doc.title();
    assert_eq!(sink.len(), 2);
}

#[test]
fn test_abstract_command_fallback() {
    let dir = tempdir().unwrap();
    write_file(
        dir.path(),
        "main.tex",
        "\\documentclass{aa}\n\\abstract{Short~one.}\n\\begin{document}\n\\end{document}",
    );
    let (doc, _) = open(&dir);
    assert_eq!(doc.abstract_text(), "Short one.");
}

#[test]
fn test_short_authors() {
    let authors = names(&["First", "B", "C", "<mark>D</mark>", "E", "F"]);
    assert_eq!(short_authors(&authors, 4), names(&["First, et al. -- incl.", "<mark>D</mark>"]));

    let authors = names(&["First", "B", "C", "D", "E", "F"]);
    assert_eq!(short_authors(&authors, 4), names(&["First, et al."]));

    let authors = names(&["First", "B", "C", "D"]);
    assert_eq!(short_authors(&authors, 4), authors);
}

#[test]
fn test_highlight_authors() {
    let dir = tempdir().unwrap();
    write_file(
        dir.path(),
        "main.tex",
        "\\documentclass{article}
\\begin{document}
\\title{Team}
\\author{Aa One \\and Bb Two \\and Cc Three \\and Dee Four \\and Ee Five \\and Ff Six}
\\end{document}",
    );
    let (mut doc, _) = open(&dir);
    assert_eq!(doc.authors().len(), 6);

    doc.highlight_authors(&NameListHighlighter::new(["Dee"]));
    assert_eq!(doc.authors().len(), 6);
    assert_eq!(doc.authors()[3], "<mark>Dee Four</mark>");
    assert_eq!(doc.short_authors(), names(&["Aa One, et al. -- incl.", "<mark>Dee Four</mark>"]));
}

#[test]
fn test_graphics_path() {
    let dir = tempdir().unwrap();
    write_file(
        dir.path(),
        "main.tex",
        "\\documentclass{article}\n\\graphicspath{{figs/}}\n\\begin{document}\n\\end{document}",
    );
    let (doc, _) = open(&dir);
    assert_eq!(doc.graphics_path(), &[dir.path().join("figs/"), dir.path().to_path_buf()]);
}

fn write_paper_with_figure(dir: &Path) {
    write_file(
        dir,
        "main.tex",
        "\\documentclass{article}
\\newcommand{\\msun}{M_\\odot}
\\begin{document}
\\title{Figures}
\\author{Ada Lovelace}
\\begin{abstract}
About 1\\msun.
\\end{abstract}
\\input{sections/body}
\\end{document}",
    );
    write_file(
        dir,
        "sections/body.tex",
        "\\section{Body}
See Figure \\ref{fig:one} and \\ref{fig:one}.
\\begin{figure}
\\includegraphics{one}
\\caption{The one.}\\label{fig:one}
\\end{figure}
",
    );
    File::create(dir.join("one.png")).unwrap();
}

#[test]
fn test_figures_through_inputs() {
    let dir = tempdir().unwrap();
    write_paper_with_figure(dir.path());
    let (doc, _) = open(&dir);

    let figures = doc.figures().unwrap();
    assert_eq!(figures.len(), 1);
    assert_eq!(figures[0].images, vec![dir.path().join("one.png")]);
    assert_eq!(figures[0].caption, "The one.");
    assert_eq!(figures[0].label, "fig:one");
    assert_eq!(doc.select_most_cited_figures(4).unwrap().len(), 1);
}

#[test]
fn test_missing_figure_image_is_fatal() {
    let dir = tempdir().unwrap();
    write_file(
        dir.path(),
        "main.tex",
        "\\begin{document}\\begin{figure}\\includegraphics{ghost}\\end{figure}\\end{document}",
    );
    let (doc, _) = open(&dir);
    assert!(matches!(doc.figures(), Err(TexDeckError::ImageNotFound { .. })));
}

#[test]
fn test_generate_markdown_text() {
    let dir = tempdir().unwrap();
    write_paper_with_figure(dir.path());
    let sink = CollectingSink::new();
    let mut doc = DocumentBuilder::new(dir.path())
        .options(DocumentOptions { max_figures: 1, ..DocumentOptions::default() })
        .diagnostics(sink)
        .rasterizer(PassthroughRasterizer)
        .comment("Accepted in A&A")
        .open()
        .unwrap();
    doc.highlight_authors(&NameListHighlighter::new(["Lovelace"]));

    let markdown = generate_markdown_text(&doc, true).unwrap();
    assert!(markdown.starts_with("<div class=\"macros\" style=\"visibility:hidden;\">\n$\\newcommand{\\ensuremath}{}$"));
    assert!(markdown.contains("$\\newcommand{\\msun}{M_\\odot}$</div>"));
    assert!(markdown.contains("<div id=\"title\">\n\n# Figures\n\n</div>"));
    assert!(markdown.contains("Accepted in A&A\n\n<mark>Ada Lovelace</mark>"));
    assert!(markdown.contains("**Abstract:** About 1$\\msun$."));
    assert!(markdown.contains("<div id=\"fig1\">"));
    assert!(markdown.contains("alt=\"Fig1\" width=\"100%\"/>\n\n**Figure 1. -** The one. (*fig:one*)"));

    let without_figures = generate_markdown_text(&doc, false).unwrap();
    assert!(!without_figures.contains("<div id=\"fig1\">"));
}

#[test]
fn test_macros_markdown_text() {
    let lines = names(&["$a$", "$b$"]);
    assert_eq!(
        macros_markdown_text(&lines, false),
        "<div class=\"macros\" style=\"visibility:hidden;\">\n$a$\n$b$</div>"
    );
    assert!(macros_markdown_text(&lines, true).contains("visibility:visible;"));
}

#[test]
fn test_environment_shortcut_macros_keep_metadata() {
    let dir = tempdir().unwrap();
    write_file(
        dir.path(),
        "main.tex",
        "\\documentclass{article}
\\newcommand{\\be}{\\begin{equation}}
\\newcommand{\\ee}{\\end{equation}}
\\begin{document}
\\title{Real Title}
\\author{A One \\and B Two}
\\begin{abstract}Hello world.\\end{abstract}
\\be E = mc^2 \\ee
\\end{document}",
    );
    let (doc, sink) = open(&dir);

    assert_eq!(doc.title(), "Real Title");
    assert_eq!(doc.authors(), names(&["A One", "B Two"]).as_slice());
    assert_eq!(doc.abstract_text(), "Hello world.");
    assert_eq!(doc.macros().len(), 2);
    assert_eq!(doc.macros()[0].definition, "\\newcommand{\\be}{\\begin{equation}}");
    assert!(doc.problematic_spans().is_empty());
    assert!(sink.is_empty());
}

#[test]
fn test_input_outside_the_source_tree_is_not_inlined() {
    let outside = tempdir().unwrap();
    write_file(outside.path(), "secret.tex", "TOP-SECRET");
    let dir = tempdir().unwrap();
    write_file(
        dir.path(),
        "main.tex",
        &format!(
            "\\documentclass{{article}}\n\\begin{{document}}\n\\begin{{abstract}}\nOpen \\input{{{}}}\n\\end{{abstract}}\n\\end{{document}}",
            outside.path().join("secret").display()
        ),
    );
    let (doc, _) = open(&dir);

    assert!(doc.abstract_text().starts_with("Open \\input{"));
    assert!(!doc.abstract_text().contains("TOP-SECRET"));
    assert!(!doc.source().contains("TOP-SECRET"));
}
