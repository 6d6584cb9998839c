use texdeck::latex::diagnostics::{CollectingSink, LatexWarning};
use texdeck::latex::recovery::{resilient_parse, split_spans};
use texdeck::TexDeckError;

const BROKEN_MIDDLE: &str = "\\documentclass{article}
\\title{Recovered}
\\begin{document}
\\section{One}
Good one.
\\section{Two}
Broken {brace.
\\section{Three}
Good three.
\\end{document}";

#[test]
fn test_well_formed_source_parses_whole() {
    let sink = CollectingSink::new();
    let parsed = resilient_parse("\\begin{document}\\section{A} text\\end{document}", &sink).unwrap();
    assert!(parsed.is_complete());
    assert!(sink.is_empty());
    assert_eq!(parsed.tree.find_all(&["section"]).len(), 1);
}

#[test]
fn test_split_spans() {
    let spans = split_spans(BROKEN_MIDDLE).unwrap();
    assert_eq!(spans.len(), 4);
    assert!(spans[0].starts_with("\\documentclass{article}"));
    assert!(spans[0].ends_with("\\begin{document}\n\\end{document}"));
    for span in &spans[1..] {
        assert!(span.starts_with("\\begin{document}\\section{"));
        assert!(span.ends_with("\\end{document}"));
    }
}

#[test]
fn test_malformed_section_is_set_aside() {
    let sink = CollectingSink::new();
    let parsed = resilient_parse(BROKEN_MIDDLE, &sink).unwrap();

    let sections: Vec<String> = parsed
        .tree
        .find_all(&["section"])
        .iter()
        .map(|node| node.plain_text())
        .collect();
    assert_eq!(sections, vec!["One", "Three"]);
    assert!(parsed.tree.plain_text().contains("Good three."));

    // the preamble of the header span survives
    assert!(parsed.tree.find("title").is_some());
    assert!(parsed.tree.document().is_some());

    assert!(!parsed.is_complete());
    assert_eq!(parsed.problematic.len(), 1);
    assert_eq!(parsed.problematic[0].index, 2);
    assert!(parsed.problematic[0].text.contains("Broken {brace."));

    let warnings = sink.warnings();
    assert!(matches!(warnings[0], LatexWarning::SegmentedParse { .. }));
    assert!(matches!(warnings[1], LatexWarning::ProblematicSpan { index: 2, .. }));
}

#[test]
fn test_missing_document_begin_is_fatal() {
    let sink = CollectingSink::new();
    let result = resilient_parse("\\section{A} {unbalanced", &sink);
    assert!(matches!(result, Err(TexDeckError::MissingDocumentBegin)));
}

const BROKEN_INTRO: &str = "\\documentclass{article}
\\title{Kept title}
\\newcommand{\\msun}{M_\\odot}
\\begin{document}
\\maketitle
Broken {intro.
\\section{One}
Good one.
\\end{document}";

const BROKEN_PREAMBLE: &str = "\\documentclass{article}
\\newcommand{\\broken}{x
\\begin{document}
\\author{Kept Author}
\\section{One}
Good one.
\\end{document}";

fn section_titles(parsed: &texdeck::latex::recovery::ParsedSource) -> Vec<String> {
    parsed
        .tree
        .find_all(&["section"])
        .iter()
        .map(|node| node.plain_text())
        .collect()
}

#[test]
fn test_broken_header_body_keeps_preamble() {
    let sink = CollectingSink::new();
    let parsed = resilient_parse(BROKEN_INTRO, &sink).unwrap();

    assert_eq!(parsed.tree.find("title").unwrap().plain_text(), "Kept title");
    assert!(parsed.tree.find("newcommand").is_some());
    assert_eq!(section_titles(&parsed), vec!["One"]);

    assert_eq!(parsed.problematic.len(), 1);
    assert_eq!(parsed.problematic[0].index, 0);
    assert!(parsed.problematic[0].text.contains("Broken {intro."));
    assert!(!parsed.problematic[0].text.contains("\\documentclass"));

    let warnings = sink.warnings();
    assert_eq!(warnings.len(), 2);
    assert!(matches!(warnings[1], LatexWarning::ProblematicSpan { index: 0, .. }));
}

#[test]
fn test_broken_preamble_keeps_header_body() {
    let sink = CollectingSink::new();
    let parsed = resilient_parse(BROKEN_PREAMBLE, &sink).unwrap();

    assert_eq!(parsed.tree.find("author").unwrap().plain_text(), "Kept Author");
    assert_eq!(section_titles(&parsed), vec!["One"]);
    assert!(parsed.tree.document().is_some());

    assert_eq!(parsed.problematic.len(), 1);
    assert_eq!(parsed.problematic[0].index, 0);
    assert!(parsed.problematic[0].text.starts_with("\\documentclass"));
    assert!(!parsed.problematic[0].text.contains("Kept Author"));
}

#[test]
fn test_environment_shortcut_macros_parse_whole() {
    let sink = CollectingSink::new();
    let source = "\\documentclass{article}
\\newcommand{\\be}{\\begin{equation}}
\\newcommand{\\ee}{\\end{equation}}
\\title{Real Title}
\\begin{document}
\\be x = 1 \\ee
\\end{document}";
    let parsed = resilient_parse(source, &sink).unwrap();

    assert!(parsed.is_complete());
    assert!(sink.is_empty());
    assert_eq!(parsed.tree.find_all(&["newcommand"]).len(), 2);
    assert!(parsed.tree.find("title").is_some());
}

#[test]
fn test_pathological_nesting_in_a_span() {
    let sink = CollectingSink::new();
    let source = format!(
        "\\title{{Deep}}\\begin{{document}}\\section{{A}}{}\\section{{B}}Fine.\\end{{document}}",
        "\\x[{".repeat(100)
    );
    let start = std::time::Instant::now();
    let parsed = resilient_parse(&source, &sink).unwrap();
    assert!(start.elapsed() < std::time::Duration::from_secs(5));

    assert_eq!(section_titles(&parsed), vec!["B"]);
    assert!(parsed.tree.find("title").is_some());
    // the broken first span is retried without its preamble
    assert_eq!(parsed.problematic.len(), 1);
    assert_eq!(parsed.problematic[0].index, 0);
    assert!(parsed.problematic[0].text.starts_with("\\begin{document}\\section{A}"));
}
