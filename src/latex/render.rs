//! Markdown summary of a document.

use crate::error::Result;
use crate::latex::document::LatexDocument;
use crate::latex::macros::force_macros_mathmode;

/// Macro definitions in a `<div>` the math renderer reads but readers don't
/// see. `show_errors` makes it visible, for debugging.
pub fn macros_markdown_text(lines: &[String], show_errors: bool) -> String {
    let style = if show_errors {
        "background:yellow;visibility:visible;"
    } else {
        "visibility:hidden;"
    };
    format!("<div class=\"macros\" style=\"{}\">\n{}</div>", style, lines.join("\n"))
}

fn div(id: &str, body: &str) -> String {
    format!("<div id=\"{}\">\n\n{}\n\n</div>", id, body)
}

/// Title, short authors, abstract and, with `with_figures`, the most cited
/// figures. User macros outside math mode are wrapped in `$...$`; citation
/// commands are left for [`crate::latex::bibliography::replace_citations`].
pub fn generate_markdown_text(doc: &LatexDocument, with_figures: bool) -> Result<String> {
    let mut authors = doc.short_authors().join(", ");
    if let Some(comment) = doc.comment() {
        authors = format!("{}\n\n{}", comment, authors);
    }

    let mut blocks = vec![
        div("title", &format!("# {}", doc.title())),
        div("authors", &authors),
        div("abstract", &format!("**Abstract:** {}", doc.abstract_text())),
    ];
    if with_figures {
        for (index, figure) in doc
            .select_most_cited_figures(doc.options().max_figures)?
            .into_iter()
            .enumerate()
        {
            blocks.push(div(&format!("fig{}", index + 1), &figure.to_markdown()));
        }
    }

    let text = blocks.join("\n");
    Ok(format!(
        "{}\n\n{}",
        macros_markdown_text(&doc.macro_lines(), false),
        force_macros_mathmode(&text, doc.macros())
    ))
}
