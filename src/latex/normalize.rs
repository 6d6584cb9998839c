//! Source normalization.
//!
//! Raw sources are rewritten by an ordered list of small, pure text steps
//! before parsing. None of them fails: input a step cannot canonicalize is
//! passed through untouched and left to the resilient parser.

use log::debug;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::path::{Path, PathBuf};

use crate::latex::parser::{read_source, resolve_input_path};

static EMPTY_GROUP_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\([A-Za-z@]+)\{\}").expect("Invalid empty group regex pattern")
});
static DEF_NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\([gex]?def)\s*(\\[A-Za-z@]+)((?:#[1-9])*)\s*\{").expect("Invalid def regex pattern")
});
static NEWCOMMAND_NAME_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\(newcommand|renewcommand|providecommand|DeclareRobustCommand)(\*?)\s*(\\[A-Za-z@]+)")
        .expect("Invalid newcommand regex pattern")
});
static INPUT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\(input|include)\s*\{([^{}]+)\}").expect("Invalid input regex pattern")
});

/// Nested `\input` levels followed before giving up.
const MAX_INPUT_DEPTH: usize = 8;

/// Accent commands, the letter they decorate and the composed character.
const ACCENTS: &[(&str, char, char)] = &[
    ("'", 'a', 'á'), ("'", 'e', 'é'), ("'", 'i', 'í'), ("'", 'o', 'ó'), ("'", 'u', 'ú'),
    ("'", 'y', 'ý'), ("'", 'c', 'ć'), ("'", 'n', 'ń'), ("'", 's', 'ś'), ("'", 'z', 'ź'),
    ("`", 'a', 'à'), ("`", 'e', 'è'), ("`", 'i', 'ì'), ("`", 'o', 'ò'), ("`", 'u', 'ù'),
    ("^", 'a', 'â'), ("^", 'e', 'ê'), ("^", 'i', 'î'), ("^", 'o', 'ô'), ("^", 'u', 'û'),
    ("\"", 'a', 'ä'), ("\"", 'e', 'ë'), ("\"", 'i', 'ï'), ("\"", 'o', 'ö'), ("\"", 'u', 'ü'),
    ("\"", 'y', 'ÿ'),
    ("~", 'a', 'ã'), ("~", 'n', 'ñ'), ("~", 'o', 'õ'),
    ("c", 'c', 'ç'), ("c", 's', 'ş'),
    ("v", 'c', 'č'), ("v", 's', 'š'), ("v", 'z', 'ž'), ("v", 'r', 'ř'), ("v", 'e', 'ě'),
    ("v", 'n', 'ň'),
    ("r", 'a', 'å'),
];

/// One named rewriting step.
#[derive(Clone, Copy)]
pub struct NormalizationStep {
    pub name: &'static str,
    pub apply: fn(&str) -> String,
}

/// Steps run on every file before `\input` directives are inlined.
pub const PRE_SPLICE_STEPS: [NormalizationStep; 5] = [
    NormalizationStep { name: "strip_comments", apply: strip_comments },
    NormalizationStep { name: "single_math_delimiters", apply: single_math_delimiters },
    NormalizationStep { name: "collapse_whitespace", apply: collapse_whitespace },
    NormalizationStep { name: "strip_empty_groups", apply: strip_empty_groups },
    NormalizationStep { name: "repair_definition_names", apply: repair_definition_names },
];

/// Position of the first `%` not escaped by a backslash.
fn comment_start(line: &str) -> Option<usize> {
    let mut backslashes = 0;
    for (i, c) in line.char_indices() {
        if c == '\\' {
            backslashes += 1;
            continue;
        }
        if c == '%' && backslashes % 2 == 0 {
            return Some(i);
        }
        backslashes = 0;
    }
    None
}

/// Keep, on each line, only the text before the first unescaped `%`.
pub fn strip_comments(text: &str) -> String {
    text.lines()
        .map(|line| match comment_start(line) {
            Some(start) => &line[..start],
            None => line,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// `$$...$$` becomes `$...$`.
pub fn single_math_delimiters(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                out.push(c);
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            '$' => {
                out.push('$');
                if chars.peek() == Some(&'$') {
                    chars.next();
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Collapse runs of blanks, drop trailing blanks and empty lines.
pub fn collapse_whitespace(text: &str) -> String {
    text.lines()
        .map(|line| line.split([' ', '\t']).filter(|word| !word.is_empty()).collect::<Vec<_>>())
        .filter(|words| !words.is_empty())
        .map(|words| words.join(" "))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `\LaTeX{}` becomes `\LaTeX `. The name of a `\def` is left alone.
pub fn strip_empty_groups(text: &str) -> String {
    EMPTY_GROUP_REGEX
        .replace_all(text, |caps: &Captures| {
            let whole = &caps[0];
            let start = caps.get(0).map_or(0, |m| m.start());
            if text[..start].trim_end().ends_with("def") {
                whole.to_string()
            } else {
                format!("\\{} ", &caps[1])
            }
        })
        .into_owned()
}

/// Give definition names the braces the tree parser expects:
/// `\def\foo#1{..}` becomes `\def{\foo}[1]{..}` and `\newcommand\foo`
/// becomes `\newcommand{\foo}`.
pub fn repair_definition_names(text: &str) -> String {
    let text = DEF_NAME_REGEX.replace_all(text, |caps: &Captures| {
        let params = caps[3].matches('#').count();
        if params > 0 {
            format!("\\{}{{{}}}[{}]{{", &caps[1], &caps[2], params)
        } else {
            format!("\\{}{{{}}}{{", &caps[1], &caps[2])
        }
    });
    NEWCOMMAND_NAME_REGEX
        .replace_all(&text, |caps: &Captures| format!("\\{}{}{{{}}}", &caps[1], &caps[2], &caps[3]))
        .into_owned()
}

/// Replace accent commands by their Unicode characters, accepting `\~{n}`,
/// `\~n` and the upper-case forms of both.
pub fn translate_accents(text: &str) -> String {
    let mut text = text.to_string();
    for &(command, base, accented) in ACCENTS {
        let upper_base: String = base.to_uppercase().collect();
        let upper_accented: String = accented.to_uppercase().collect();
        // letter commands need a space before an unbraced argument
        let separator = if command.chars().all(|c| c.is_ascii_alphabetic()) { " " } else { "" };
        for (letter, replacement) in [(base.to_string(), accented.to_string()), (upper_base, upper_accented)] {
            let braced = format!("\\{}{{{}}}", command, letter);
            let unbraced = format!("\\{}{}{}", command, separator, letter);
            text = text.replace(&braced, &replacement).replace(&unbraced, &replacement);
        }
    }
    text
}

/// Apply [`PRE_SPLICE_STEPS`] in order.
pub fn apply_pre_splice_steps(text: &str) -> String {
    PRE_SPLICE_STEPS
        .iter()
        .fold(text.to_string(), |text, step| (step.apply)(&text))
}

/// Splices `\input`/`\include` directives with the content of the files they
/// name.
#[derive(Debug, Clone)]
pub struct InputInliner {
    base_dir: PathBuf,
    candidates: Vec<PathBuf>,
}

impl InputInliner {
    /// `candidates` are the markup files of the tree, the main file excluded.
    pub fn new(base_dir: &Path, candidates: Vec<PathBuf>) -> Self {
        Self { base_dir: base_dir.to_path_buf(), candidates }
    }

    pub fn apply(&self, text: &str) -> String {
        self.inline(text, 0)
    }

    fn inline(&self, text: &str, depth: usize) -> String {
        if depth >= MAX_INPUT_DEPTH {
            return text.to_string();
        }

        let directives: Vec<_> = INPUT_REGEX
            .captures_iter(text)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let line_start = text[..whole.start()].rfind('\n').map_or(0, |i| i + 1);
                if comment_start(&text[line_start..whole.start()]).is_some() {
                    return None;
                }
                Some((whole.range(), caps[2].to_string()))
            })
            .collect();

        let mut result = text.to_string();
        // from the end so earlier ranges stay valid
        for (range, name) in directives.into_iter().rev() {
            let Some(path) = resolve_input_path(&self.base_dir, &self.candidates, &name) else {
                debug!("Could not resolve input file '{}'", name);
                continue;
            };
            let content = match read_source(&path) {
                Ok(content) => content,
                Err(e) => {
                    debug!("Could not read input file {:?}: {}", path, e);
                    continue;
                }
            };
            let content = self.inline(&apply_pre_splice_steps(&content), depth + 1);
            let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            let directive = &text[range.clone()];
            let replacement = format!("{}\n% {} inlined from {}\n", content, directive, file_name);
            result.replace_range(range, &replacement);
        }
        result
    }
}

/// Full normalization pipeline for a main file.
#[derive(Debug, Clone)]
pub struct Normalizer {
    inliner: InputInliner,
}

impl Normalizer {
    pub fn new(inliner: InputInliner) -> Self {
        Self { inliner }
    }

    /// Names of the steps, in the order they run.
    pub fn step_names() -> Vec<&'static str> {
        let mut names: Vec<_> = PRE_SPLICE_STEPS.iter().map(|step| step.name).collect();
        names.push("inline_inputs");
        names.push("translate_accents");
        names
    }

    pub fn normalize(&self, raw: &str) -> String {
        let text = apply_pre_splice_steps(raw);
        let text = self.inliner.apply(&text);
        translate_accents(&text)
    }
}
