use log::{info, warn};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::latex::parser::{find_bbl_files, find_bib_files};
use crate::latex::tree::{nodes_source, TexTree};
use crate::latex::CITE_REGEX;

static BIBTEX_ENTRY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"@([a-zA-Z]+)\s*\{\s*([^,\s]+)\s*,").expect("Invalid BibTeX entry regex pattern")
});
static BIBTEX_FIELD_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"([a-zA-Z_-]+)\s*=\s*(?:\{((?:[^{}]|\{(?:[^{}]|\{[^{}]*\})*\})*)\}|"([^"]*)"|([A-Za-z0-9_.:/-]+))"#)
        .expect("Invalid BibTeX field regex pattern")
});
static CITEAUTHORYEAR_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[\\protect\\citeauthoryear\{([^}]+)\}\{(\d{4})\}\]\{([^}]+)\}")
        .expect("Invalid citeauthoryear regex pattern")
});
static BIBITEM_KEY_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\[[^\]]*\])?\{([^}]+)\}").expect("Invalid bibitem key regex pattern"));
static TRAILING_BRACES_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([^{}]+)\}\s*$").expect("Invalid trailing braces regex pattern"));
static YEAR_END_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})\.$").expect("Invalid year regex pattern"));
static YEAR_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(19\d{2}|20\d{2})\b").expect("Invalid year regex pattern"));
static NEWBLOCK_TITLE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\newblock\s+(.*?)(?:\.|\n)").expect("Invalid newblock regex pattern"));

/// Authors cited by name before switching to "et al.".
const MAX_CITED_AUTHORS: usize = 3;

/// Bibliography entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BibEntry {
    pub key: String,
    pub entry_type: String,
    pub fields: HashMap<String, String>,
}

/// Builder for BibEntry to allow for cleaner creation
pub struct BibEntryBuilder {
    key: String,
    entry_type: String,
    fields: HashMap<String, String>,
}

impl BibEntryBuilder {
    /// Create a new BibEntryBuilder with the required key and entry type
    pub fn new(key: impl Into<String>, entry_type: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            entry_type: entry_type.into(),
            fields: HashMap::new(),
        }
    }

    /// Add a field; names are stored lower-case
    pub fn field(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(field.into().to_lowercase(), value.into());
        self
    }

    pub fn fields<I, K, V>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (field, value) in fields {
            self = self.field(field, value);
        }
        self
    }

    pub fn build(self) -> BibEntry {
        BibEntry {
            key: self.key,
            entry_type: self.entry_type,
            fields: self.fields,
        }
    }
}

impl BibEntry {
    pub fn builder(key: impl Into<String>, entry_type: impl Into<String>) -> BibEntryBuilder {
        BibEntryBuilder::new(key, entry_type)
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    /// Last names of the authors, braces removed.
    pub fn author_last_names(&self) -> Vec<String> {
        let Some(authors) = self.get("author") else {
            return Vec::new();
        };
        authors
            .split(" and ")
            .map(|author| {
                let author = author.replace(['{', '}'], "");
                let author = author.trim();
                match author.split_once(',') {
                    Some((last, _)) => last.trim().to_string(),
                    None => author.split_whitespace().last().unwrap_or_default().to_string(),
                }
            })
            .filter(|name| !name.is_empty())
            .collect()
    }

    /// `A`, `A and B`, `A, B and C` or `A, et al.`
    pub fn short_authors(&self) -> String {
        let names = self.author_last_names();
        match names.as_slice() {
            [] => String::new(),
            [single] => single.clone(),
            _ if names.len() > MAX_CITED_AUTHORS => format!("{}, et al.", names[0]),
            [init @ .., last] => format!("{} and {}", init.join(", "), last),
        }
    }

    pub fn year(&self) -> &str {
        self.get("year").unwrap_or_default()
    }

    /// From `url`, `adsurl` or `doi`, in that order.
    pub fn url(&self) -> String {
        if let Some(url) = self.get("url") {
            url.to_string()
        } else if let Some(url) = self.get("adsurl") {
            url.to_string()
        } else if let Some(doi) = self.get("doi") {
            format!("https://doi.org/{}", doi)
        } else {
            String::new()
        }
    }
}

/// Citation commands understood by [`replace_citations`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CiteKind {
    Cite,
    Citet,
    Citep,
    Citealt,
}

impl CiteKind {
    pub fn from_command(command: &str) -> Option<Self> {
        match command.trim_start_matches('\\').trim_end_matches('*') {
            "cite" => Some(CiteKind::Cite),
            "citet" => Some(CiteKind::Citet),
            "citep" => Some(CiteKind::Citep),
            "citealt" => Some(CiteKind::Citealt),
            _ => None,
        }
    }

    /// Parenthetical forms put the year right after the authors.
    fn is_parenthetical(self) -> bool {
        matches!(self, CiteKind::Citep | CiteKind::Citealt)
    }
}

/// Turns citation keys into Markdown.
pub trait CitationResolver {
    /// `None` when the key is unknown.
    fn citation_markdown(&self, kind: CiteKind, key: &str) -> Option<String>;
}

/// Bibliography collection
#[derive(Default, Clone)]
pub struct Bibliography {
    pub entries: HashMap<String, BibEntry>,
}

impl fmt::Debug for Bibliography {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bibliography")
            .field("entries_count", &self.entries.len())
            .field("entries", &self.entries)
            .finish()
    }
}

impl Bibliography {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entry: BibEntry) {
        self.entries.insert(entry.key.clone(), entry);
    }

    pub fn get(&self, key: &str) -> Option<&BibEntry> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BibEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn merge(&mut self, other: Bibliography) {
        self.entries.extend(other.entries);
    }

    /// Parse BibTeX source: `@type{key, field = {..}, field = "..", field = bare}`.
    pub fn parse_bibtex(content: &str) -> Self {
        let mut bibliography = Self::new();
        let starts: Vec<_> = BIBTEX_ENTRY_REGEX.captures_iter(content).collect();
        for (i, caps) in starts.iter().enumerate() {
            let entry_type = caps[1].to_lowercase();
            if matches!(entry_type.as_str(), "comment" | "string" | "preamble") {
                continue;
            }
            let (Some(whole), Some(key)) = (caps.get(0), caps.get(2)) else {
                continue;
            };
            let body_end = starts
                .get(i + 1)
                .and_then(|next| next.get(0))
                .map_or(content.len(), |m| m.start());
            let body = &content[whole.end()..body_end];

            let mut builder = BibEntryBuilder::new(key.as_str(), entry_type);
            for field in BIBTEX_FIELD_REGEX.captures_iter(body) {
                let value = field
                    .get(2)
                    .or_else(|| field.get(3))
                    .or_else(|| field.get(4))
                    .map_or("", |m| m.as_str());
                builder = builder.field(&field[1], collapse_value(value));
            }
            bibliography.insert(builder.build());
        }
        bibliography
    }

    /// Parse a BBL file into Bibliography structure
    pub fn parse_bbl(content: &str) -> Self {
        let mut bibliography = Self::new();

        let (Some(start_idx), Some(end_idx)) =
            (content.find("\\begin{thebibliography}"), content.find("\\end{thebibliography}"))
        else {
            return bibliography;
        };
        if end_idx < start_idx {
            return bibliography;
        }
        let bib_content = &content[start_idx..end_idx];

        for part in bib_content.split("\\bibitem").skip(1) {
            let lines: Vec<&str> = part.lines().collect();
            let Some(first_line) = lines.first().map(|line| line.trim()) else {
                continue;
            };

            let mut citation_key = String::new();
            let mut year = String::new();
            if let Some(captures) = CITEAUTHORYEAR_REGEX.captures(first_line) {
                year = captures[2].to_string();
                citation_key = captures[3].to_string();
            } else if let Some(captures) = BIBITEM_KEY_REGEX.captures(first_line) {
                citation_key = captures[1].to_string();
            } else if let Some(captures) = TRAILING_BRACES_REGEX.captures(first_line) {
                citation_key = captures[1].to_string();
            }
            if citation_key.is_empty() {
                continue;
            }

            let mut entry_builder = BibEntryBuilder::new(citation_key, "article");
            if let Some(author) = lines.get(1) {
                entry_builder = entry_builder.field("author", author.trim());
            }

            if year.is_empty() {
                year = lines
                    .iter()
                    .rev()
                    .find_map(|line| YEAR_END_REGEX.captures(line.trim_end()).map(|c| c[1].to_string()))
                    .or_else(|| lines.iter().find_map(|line| YEAR_REGEX.captures(line).map(|c| c[1].to_string())))
                    .unwrap_or_default();
            }
            if !year.is_empty() {
                entry_builder = entry_builder.field("year", year);
            }

            let full_text = lines.join("\n");
            if let Some(captures) = NEWBLOCK_TITLE_REGEX.captures(&full_text) {
                entry_builder = entry_builder.field("title", captures[1].trim());
            }

            bibliography.insert(entry_builder.build());
        }

        bibliography
    }

    /// Parse and merge every file; unreadable files are skipped with a warning.
    pub fn parse_bibliography_files(files: &[PathBuf]) -> Self {
        let mut consolidated = Self::new();
        for file in files {
            let content = match fs::read(file) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    warn!("Failed to read bibliography file {:?}: {}", file, e);
                    continue;
                }
            };
            let is_bbl = file.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("bbl"));
            let parsed = if is_bbl { Self::parse_bbl(&content) } else { Self::parse_bibtex(&content) };
            info!("Parsed {} entries from {:?}", parsed.len(), file);
            consolidated.merge(parsed);
        }
        consolidated
    }

    /// Load the `.bib` files named by `\bibliography{a,b}` (matched by file
    /// name prefix inside `folder`), or every `.bbl` file of the folder when
    /// none matches.
    pub fn load_for_document(tree: &TexTree, folder: &Path) -> Result<Self> {
        let names: Vec<String> = tree
            .find_all(&["bibliography"])
            .iter()
            .filter_map(|node| node.last_required_arg())
            .flat_map(|arg| {
                nodes_source(&arg.contents)
                    .split(',')
                    .map(|name| name.trim().trim_end_matches(".bib").to_string())
                    .collect::<Vec<_>>()
            })
            .filter(|name| !name.is_empty())
            .collect();

        let bib_files: Vec<PathBuf> = find_bib_files(folder)?
            .into_iter()
            .filter(|file| {
                let relative = file.strip_prefix(folder).unwrap_or(file.as_path()).to_string_lossy().into_owned();
                let file_name = file.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
                names.iter().any(|name| relative.starts_with(name.as_str()) || file_name.starts_with(name.as_str()))
            })
            .collect();

        if !bib_files.is_empty() {
            return Ok(Self::parse_bibliography_files(&bib_files));
        }
        let bbl_files = find_bbl_files(folder)?;
        Ok(Self::parse_bibliography_files(&bbl_files))
    }
}

fn collapse_value(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl CitationResolver for Bibliography {
    fn citation_markdown(&self, kind: CiteKind, key: &str) -> Option<String> {
        let entry = self.get(key)?;
        let text = if kind.is_parenthetical() {
            format!("{} {}", entry.short_authors(), entry.year())
        } else {
            format!("{} ({})", entry.short_authors(), entry.year())
        };
        Some(format!("[{}]({})", text, entry.url()))
    }
}

/// Replace every `\cite`, `\citet`, `\citep` and `\citealt` command of a
/// Markdown text by ` (md1, md2) `. Unknown keys are kept as they are.
pub fn replace_citations(markdown: &str, resolver: &dyn CitationResolver) -> String {
    CITE_REGEX
        .replace_all(markdown, |caps: &Captures| {
            let Some(kind) = CiteKind::from_command(&caps[1]) else {
                return caps[0].to_string();
            };
            let citations: Vec<String> = caps[2]
                .split(',')
                .map(str::trim)
                .filter(|key| !key.is_empty())
                .map(|key| {
                    resolver.citation_markdown(kind, key).unwrap_or_else(|| {
                        warn!("Unknown citation key '{}'", key);
                        key.to_string()
                    })
                })
                .collect();
            format!(" ({}) ", citations.join(", "))
        })
        .into_owned()
}
