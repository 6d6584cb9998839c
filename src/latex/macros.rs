//! Macro definitions.
//!
//! User macros are shipped to the downstream math renderer as
//! `\newcommand` snippets, and their invocations outside math mode are
//! wrapped in `$...$` so the renderer sees them at all.

use std::collections::HashMap;

use crate::latex::tree::{nodes_source, ArgKind, Node, TexTree};

/// Definition commands, starred forms included.
pub const DEFINITION_COMMANDS: [&str; 6] = [
    "newcommand",
    "renewcommand",
    "providecommand",
    "DeclareRobustCommand",
    "def",
    "gdef",
];

/// Definitions for journal-style symbols papers use without defining them.
pub const REQUIRED_MACROS: [&str; 10] = [
    r"\newcommand{\ensuremath}{}",
    r"\newcommand{\xspace}{}",
    r"\newcommand{\object}[1]{\texttt{#1}}",
    r"\newcommand{\farcs}{{.}''}",
    r"\newcommand{\farcm}{{.}'}",
    r"\newcommand{\arcsec}{''}",
    r"\newcommand{\arcmin}{'}",
    r"\newcommand{\ion}[2]{\mathrm{#1\,#2}}",
    r"\newcommand{\sun}{\odot}",
    r"\newcommand{\degr}{^\circ}",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Macro {
    pub name: String,
    pub arg_count: usize,
    pub replacement: String,
    /// Canonical `\newcommand{\name}[n]{replacement}` form.
    pub definition: String,
}

impl Macro {
    /// Read a definition node such as `\renewcommand{\foo}[1]{#1}` or a
    /// repaired `\def{\foo}{bar}`.
    pub fn from_node(node: &Node) -> Option<Self> {
        let command = node.name()?.trim_end_matches('*');
        if !node.is_command() || !DEFINITION_COMMANDS.contains(&command) {
            return None;
        }

        let (name_arg, rest) = node.args().split_first()?;
        if name_arg.kind != ArgKind::Required {
            return None;
        }
        let name = name_arg.contents.iter().find_map(|n| match n {
            Node::Command { name, .. } => Some(name.clone()),
            _ => None,
        })?;
        let body = rest.iter().rev().find(|arg| arg.kind == ArgKind::Required)?;
        let arg_count = rest
            .first()
            .filter(|arg| arg.kind == ArgKind::Optional)
            .and_then(|arg| nodes_source(&arg.contents).trim().parse().ok())
            .unwrap_or(0);

        let mut definition = format!("\\newcommand{{\\{}}}", name);
        for arg in rest {
            definition.push_str(&arg.to_string());
        }

        Some(Self {
            name,
            arg_count,
            replacement: nodes_source(&body.contents),
            definition: definition.replace('$', ""),
        })
    }
}

/// Every macro definition of the tree, in source order.
pub fn extract_macros(tree: &TexTree) -> Vec<Macro> {
    let names: Vec<String> = DEFINITION_COMMANDS
        .iter()
        .flat_map(|name| [name.to_string(), format!("{}*", name)])
        .collect();
    let names: Vec<&str> = names.iter().map(String::as_str).collect();
    tree.find_all(&names)
        .into_iter()
        .filter_map(Macro::from_node)
        .collect()
}

/// Required and user definitions, one `$...$` line each.
pub fn macro_lines(macros: &[Macro]) -> Vec<String> {
    REQUIRED_MACROS
        .iter()
        .map(|definition| format!("${}$", definition))
        .chain(macros.iter().map(|m| format!("${}$", m.definition)))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MathState {
    Dollar,
    Paren,
    Bracket,
}

/// Length of the first `count` adjacent balanced `{...}` groups of `text`.
fn brace_args_len(text: &str, count: usize) -> usize {
    let mut consumed = 0;
    for _ in 0..count {
        let rest = &text[consumed..];
        if !rest.starts_with('{') {
            break;
        }
        let mut depth = 0usize;
        let mut end = None;
        let mut escaped = false;
        for (i, c) in rest.char_indices() {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(i + 1);
                        break;
                    }
                }
                _ => {}
            }
        }
        match end {
            Some(end) => consumed += end,
            None => break,
        }
    }
    consumed
}

/// Wrap every invocation of a user macro found outside math mode, with its
/// arguments, in `$...$`. Text already in math mode is left alone, so the
/// pass is idempotent.
pub fn force_macros_mathmode(text: &str, macros: &[Macro]) -> String {
    let arg_counts: HashMap<&str, usize> = macros
        .iter()
        .map(|m| (m.name.as_str(), m.arg_count))
        .collect();
    if arg_counts.is_empty() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut math: Option<MathState> = None;
    let mut rest = text;
    while let Some(c) = rest.chars().next() {
        let consumed = match c {
            '\\' => {
                let after = &rest[1..];
                let name_len = after
                    .find(|c: char| !(c.is_ascii_alphabetic() || c == '@'))
                    .unwrap_or(after.len());
                if name_len == 0 {
                    let symbol = after.chars().next();
                    math = match (symbol, math) {
                        (Some('('), None) => Some(MathState::Paren),
                        (Some('['), None) => Some(MathState::Bracket),
                        (Some(')'), Some(MathState::Paren)) | (Some(']'), Some(MathState::Bracket)) => None,
                        (_, state) => state,
                    };
                    let len = 1 + symbol.map_or(0, char::len_utf8);
                    out.push_str(&rest[..len]);
                    len
                } else {
                    let end = 1 + name_len;
                    match arg_counts.get(&after[..name_len]) {
                        Some(&count) if math.is_none() => {
                            let call = end + brace_args_len(&rest[end..], count);
                            out.push('$');
                            out.push_str(&rest[..call]);
                            out.push('$');
                            call
                        }
                        _ => {
                            out.push_str(&rest[..end]);
                            end
                        }
                    }
                }
            }
            '$' => {
                math = match math {
                    None => Some(MathState::Dollar),
                    Some(MathState::Dollar) => None,
                    other => other,
                };
                out.push('$');
                1
            }
            _ => {
                out.push(c);
                c.len_utf8()
            }
        };
        rest = &rest[consumed..];
    }
    out
}
