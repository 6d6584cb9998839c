//! Tolerant LaTeX tree parser.
//!
//! The parser accepts anything it does not understand (unknown commands,
//! stray `]`, optional arguments that never close, lone control symbols) and
//! only gives up on structural damage: unbalanced braces, environments that
//! are never closed or closed by the wrong `\end`, and unterminated math.
//! Recovering from those is the job of [`crate::latex::recovery`].
//!
//! Inside a brace group, `\begin`/`\end` that do not pair up within the
//! group are kept as plain commands, so environment shortcuts in macro
//! definitions parse.

use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Environments whose body is kept verbatim instead of being parsed.
const VERBATIM_ENVIRONMENTS: &[&str] = &["verbatim", "verbatim*", "lstlisting", "comment", "minted"];

/// Control symbols that read as a space in plain text.
const SPACING_SYMBOLS: &[&str] = &["\\", " ", ",", ";", ":", "!", "quad", "qquad", "newline", "linebreak"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    /// `{...}`
    Required,
    /// `[...]`
    Optional,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arg {
    pub kind: ArgKind,
    pub contents: Vec<Node>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathDelimiter {
    /// `$...$`
    Dollar,
    /// `\(...\)`
    Paren,
    /// `\[...\]`
    Bracket,
}

impl MathDelimiter {
    fn open(self) -> &'static str {
        match self {
            MathDelimiter::Dollar => "$",
            MathDelimiter::Paren => "\\(",
            MathDelimiter::Bracket => "\\[",
        }
    }

    fn close(self) -> &'static str {
        match self {
            MathDelimiter::Dollar => "$",
            MathDelimiter::Paren => "\\)",
            MathDelimiter::Bracket => "\\]",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Text(String),
    /// Comment text without the leading `%`.
    Comment(String),
    Command { name: String, args: Vec<Arg> },
    Environment { name: String, args: Vec<Arg>, children: Vec<Node> },
    /// A bare `{...}` group.
    Group(Vec<Node>),
    Math { delimiter: MathDelimiter, content: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    #[error("unclosed brace group")]
    UnclosedGroup,
    #[error("unexpected closing brace")]
    UnexpectedCloseBrace,
    #[error("environment '{0}' is never closed")]
    UnclosedEnvironment(String),
    #[error("\\end{{{found}}} closes environment '{expected}'")]
    MismatchedEnd { expected: String, found: String },
    #[error("\\end{{{0}}} without matching \\begin")]
    UnexpectedEnd(String),
    #[error("unclosed math span")]
    UnclosedMath,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} at byte {offset}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub offset: usize,
}

impl Node {
    /// Command or environment name.
    pub fn name(&self) -> Option<&str> {
        match self {
            Node::Command { name, .. } | Node::Environment { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn args(&self) -> &[Arg] {
        match self {
            Node::Command { args, .. } | Node::Environment { args, .. } => args,
            _ => &[],
        }
    }

    /// Body of an environment or group.
    pub fn children(&self) -> &[Node] {
        match self {
            Node::Environment { children, .. } => children,
            Node::Group(nodes) => nodes,
            _ => &[],
        }
    }

    pub fn required_args(&self) -> impl Iterator<Item = &Arg> {
        self.args().iter().filter(|arg| arg.kind == ArgKind::Required)
    }

    pub fn optional_args(&self) -> impl Iterator<Item = &Arg> {
        self.args().iter().filter(|arg| arg.kind == ArgKind::Optional)
    }

    pub fn last_required_arg(&self) -> Option<&Arg> {
        self.required_args().last()
    }

    pub fn is_command(&self) -> bool {
        matches!(self, Node::Command { .. })
    }

    /// Plain text of the node: commands contribute the text of their required
    /// arguments, argument-less control words are kept as source.
    pub fn plain_text(&self) -> String {
        self.text_without(&[])
    }

    /// Like [`Node::plain_text`] but drops every command named in `skip`
    /// together with its arguments.
    pub fn text_without(&self, skip: &[&str]) -> String {
        match self {
            Node::Text(text) => text.clone(),
            Node::Comment(_) => String::new(),
            Node::Command { name, .. } if skip.contains(&name.as_str()) => String::new(),
            Node::Command { name, args } if args.is_empty() => {
                if SPACING_SYMBOLS.contains(&name.as_str()) {
                    " ".to_string()
                } else if name.chars().all(|c| c.is_alphabetic() || c == '@' || c == '*') {
                    format!("\\{}", name)
                } else {
                    name.clone()
                }
            }
            Node::Command { .. } => self
                .required_args()
                .map(|arg| nodes_text(&arg.contents, skip))
                .collect(),
            Node::Environment { children, .. } => nodes_text(children, skip),
            Node::Group(nodes) => nodes_text(nodes, skip),
            Node::Math { .. } => self.to_string(),
        }
    }

    /// All descendants (not the node itself) named after one of `names`, in
    /// document order.
    pub fn find_all<'n>(&'n self, names: &[&str]) -> Vec<&'n Node> {
        let mut found = Vec::new();
        visit_children(self, &mut |node: &'n Node| {
            if node.name().is_some_and(|name| names.contains(&name)) {
                found.push(node);
            }
        });
        found
    }
}

fn nodes_text(nodes: &[Node], skip: &[&str]) -> String {
    nodes.iter().map(|node| node.text_without(skip)).collect()
}

/// Source text of a node sequence.
pub fn nodes_source(nodes: &[Node]) -> String {
    nodes.iter().map(|node| node.to_string()).collect()
}

fn visit_children<'n>(node: &'n Node, f: &mut dyn FnMut(&'n Node)) {
    for arg in node.args() {
        visit(&arg.contents, f);
    }
    visit(node.children(), f);
}

fn visit<'n>(nodes: &'n [Node], f: &mut dyn FnMut(&'n Node)) {
    for node in nodes {
        f(node);
        visit_children(node, f);
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (open, close) = match self.kind {
            ArgKind::Required => ('{', '}'),
            ArgKind::Optional => ('[', ']'),
        };
        write!(f, "{}{}{}", open, nodes_source(&self.contents), close)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Text(text) => f.write_str(text),
            Node::Comment(text) => write!(f, "%{}", text),
            Node::Command { name, args } => {
                write!(f, "\\{}", name)?;
                for arg in args {
                    write!(f, "{}", arg)?;
                }
                Ok(())
            }
            Node::Environment { name, args, children } => {
                write!(f, "\\begin{{{}}}", name)?;
                for arg in args {
                    write!(f, "{}", arg)?;
                }
                write!(f, "{}\\end{{{}}}", nodes_source(children), name)
            }
            Node::Group(nodes) => write!(f, "{{{}}}", nodes_source(nodes)),
            Node::Math { delimiter, content } => {
                write!(f, "{}{}{}", delimiter.open(), content, delimiter.close())
            }
        }
    }
}

/// A parsed LaTeX source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TexTree {
    pub nodes: Vec<Node>,
}

impl TexTree {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }

    /// Parse a whole source in tolerant mode.
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        let mut parser = Parser { src: source, pos: 0, failed_brackets: HashSet::new() };
        let nodes = parser.parse_sequence(&Until::Eof)?;
        Ok(Self { nodes })
    }

    /// Every command or environment named after one of `names`, in document
    /// order.
    pub fn find_all<'n>(&'n self, names: &[&str]) -> Vec<&'n Node> {
        let mut found = Vec::new();
        visit(&self.nodes, &mut |node: &'n Node| {
            if node.name().is_some_and(|name| names.contains(&name)) {
                found.push(node);
            }
        });
        found
    }

    pub fn find(&self, name: &str) -> Option<&Node> {
        self.find_all(&[name]).into_iter().next()
    }

    /// The top-level `document` environment.
    pub fn document(&self) -> Option<&Node> {
        self.nodes
            .iter()
            .find(|node| matches!(node, Node::Environment { name, .. } if name == "document"))
    }

    pub fn plain_text(&self) -> String {
        nodes_text(&self.nodes, &[])
    }
}

impl fmt::Display for TexTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&nodes_source(&self.nodes))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Until {
    Eof,
    Brace,
    Bracket,
    End(String),
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    /// Offsets of `[` already known not to open a closed optional argument.
    failed_brackets: HashSet<usize>,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn error(&self, kind: ParseErrorKind) -> ParseError {
        ParseError { kind, offset: self.pos }
    }

    fn parse_sequence(&mut self, until: &Until) -> Result<Vec<Node>, ParseError> {
        let mut nodes = Vec::new();
        loop {
            let Some(c) = self.peek() else {
                return match until {
                    Until::Eof => Ok(nodes),
                    Until::Brace | Until::Bracket => Err(self.error(ParseErrorKind::UnclosedGroup)),
                    Until::End(name) => Err(self.error(ParseErrorKind::UnclosedEnvironment(name.clone()))),
                };
            };
            match c {
                '}' => {
                    if *until == Until::Brace {
                        self.bump();
                        return Ok(nodes);
                    }
                    return Err(self.error(ParseErrorKind::UnexpectedCloseBrace));
                }
                ']' => {
                    self.bump();
                    if *until == Until::Bracket {
                        return Ok(nodes);
                    }
                    push_text(&mut nodes, "]");
                }
                '{' => {
                    self.bump();
                    let inner = self.parse_sequence(&Until::Brace)?;
                    nodes.push(Node::Group(inner));
                }
                '%' => {
                    self.bump();
                    let line = self.take_line();
                    nodes.push(Node::Comment(line.to_string()));
                }
                '$' => nodes.push(self.parse_dollar_math()?),
                '\\' => match self.parse_control(until)? {
                    Some(node) => nodes.push(node),
                    None => return Ok(nodes),
                },
                _ => {
                    let text = self.take_text();
                    push_text(&mut nodes, text);
                }
            }
        }
    }

    fn take_text(&mut self) -> &'a str {
        let rest = self.rest();
        let end = rest
            .find(|c| matches!(c, '{' | '}' | '%' | '$' | '\\' | ']'))
            .unwrap_or(rest.len());
        self.pos += end;
        &rest[..end]
    }

    fn take_line(&mut self) -> &'a str {
        let rest = self.rest();
        let end = rest.find('\n').unwrap_or(rest.len());
        self.pos += end;
        &rest[..end]
    }

    fn take_name(&mut self) -> String {
        let rest = self.rest();
        let mut end = rest
            .find(|c: char| !(c.is_ascii_alphabetic() || c == '@'))
            .unwrap_or(rest.len());
        if rest[end..].starts_with('*') {
            end += 1;
        }
        self.pos += end;
        rest[..end].to_string()
    }

    fn skip_inline_space(&mut self) {
        while matches!(self.peek(), Some(' ') | Some('\t')) {
            self.bump();
        }
    }

    /// Reads `{name}` without parsing its content, as used by `\begin` and
    /// `\end`. Leaves the position untouched when there is no such argument.
    fn take_raw_brace_arg(&mut self) -> Option<String> {
        let checkpoint = self.pos;
        self.skip_inline_space();
        let rest = self.rest();
        if !rest.starts_with('{') {
            self.pos = checkpoint;
            return None;
        }
        match rest.find('}') {
            Some(close) if !rest[1..close].contains('{') => {
                self.pos += close + 1;
                Some(rest[1..close].trim().to_string())
            }
            _ => {
                self.pos = checkpoint;
                None
            }
        }
    }

    /// Returns `None` when the control sequence is the `\end` closing `until`.
    fn parse_control(&mut self, until: &Until) -> Result<Option<Node>, ParseError> {
        let start = self.pos;
        self.bump();
        let Some(c) = self.peek() else {
            return Ok(Some(Node::Text("\\".to_string())));
        };
        if c.is_ascii_alphabetic() || c == '@' {
            let name = self.take_name();
            if (name == "begin" || name == "end") && matches!(until, Until::Brace | Until::Bracket) {
                if let Some(node) = self.environment_marker_in_group(&name, until) {
                    return Ok(Some(node));
                }
            }
            if name == "begin" {
                return self.parse_environment().map(Some);
            }
            if name == "end" {
                let Some(found) = self.take_raw_brace_arg() else {
                    return Ok(Some(Node::Command { name, args: Vec::new() }));
                };
                return match until {
                    Until::End(expected) if *expected == found => Ok(None),
                    Until::End(expected) => Err(ParseError {
                        kind: ParseErrorKind::MismatchedEnd { expected: expected.clone(), found },
                        offset: start,
                    }),
                    _ => Err(ParseError { kind: ParseErrorKind::UnexpectedEnd(found), offset: start }),
                };
            }
            let args = self.parse_args(true)?;
            return Ok(Some(Node::Command { name, args }));
        }
        match c {
            '(' => {
                self.bump();
                self.parse_delimited_math(MathDelimiter::Paren, start).map(Some)
            }
            '[' => {
                self.bump();
                self.parse_delimited_math(MathDelimiter::Bracket, start).map(Some)
            }
            _ => {
                self.bump();
                Ok(Some(Node::Command { name: c.to_string(), args: Vec::new() }))
            }
        }
    }

    /// Inside a brace or bracket group, `\begin{x}` only opens an environment
    /// when its `\end{x}` follows before the group closes, and a stray
    /// `\end{x}` never closes anything. Otherwise both are kept as plain
    /// commands, as in `\newcommand{\be}{\begin{equation}}`.
    fn environment_marker_in_group(&mut self, name: &str, until: &Until) -> Option<Node> {
        let checkpoint = self.pos;
        let environment = self.take_raw_brace_arg()?;
        if name == "begin" && self.environment_closes_in_group(&environment, until) {
            self.pos = checkpoint;
            return None;
        }
        Some(Node::Command {
            name: name.to_string(),
            args: vec![Arg { kind: ArgKind::Required, contents: vec![Node::Text(environment)] }],
        })
    }

    /// Scans ahead for the `\end{name}` matching an environment opened at the
    /// current position, giving up at the end of the enclosing group.
    fn environment_closes_in_group(&self, name: &str, until: &Until) -> bool {
        let rest = self.rest();
        let begin = format!("\\begin{{{}}}", name);
        let end = format!("\\end{{{}}}", name);
        let bytes = rest.as_bytes();
        let mut depth = 0usize;
        let mut nesting = 0usize;
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'\\' => {
                    let tail = rest.get(i..).unwrap_or_default();
                    if tail.starts_with(&end) {
                        if nesting == 0 {
                            return depth == 0;
                        }
                        nesting -= 1;
                        i += end.len();
                    } else if tail.starts_with(&begin) {
                        nesting += 1;
                        i += begin.len();
                    } else {
                        i += 2;
                    }
                    continue;
                }
                b'%' => {
                    i += rest[i..].find('\n').unwrap_or(rest.len() - i);
                }
                b'{' => depth += 1,
                b'}' => {
                    if depth == 0 {
                        return false;
                    }
                    depth -= 1;
                }
                b']' if depth == 0 && *until == Until::Bracket => return false,
                _ => {}
            }
            i += 1;
        }
        false
    }

    fn parse_environment(&mut self) -> Result<Node, ParseError> {
        let start = self.pos;
        let Some(name) = self.take_raw_brace_arg() else {
            return Ok(Node::Command { name: "begin".to_string(), args: Vec::new() });
        };
        if VERBATIM_ENVIRONMENTS.contains(&name.as_str()) {
            let marker = format!("\\end{{{}}}", name);
            let rest = self.rest();
            return match rest.find(&marker) {
                Some(end) => {
                    let body = rest[..end].to_string();
                    self.pos += end + marker.len();
                    Ok(Node::Environment { name, args: Vec::new(), children: vec![Node::Text(body)] })
                }
                None => Err(ParseError { kind: ParseErrorKind::UnclosedEnvironment(name), offset: start }),
            };
        }
        let args = self.parse_args(false)?;
        let children = self.parse_sequence(&Until::End(name.clone()))?;
        Ok(Node::Environment { name, args, children })
    }

    /// Greedily attaches the `{...}` and `[...]` groups that follow a command.
    /// An optional argument that does not close cleanly is left as text.
    fn parse_args(&mut self, allow_leading_space: bool) -> Result<Vec<Arg>, ParseError> {
        let mut args = Vec::new();
        loop {
            let checkpoint = self.pos;
            if allow_leading_space && args.is_empty() {
                self.skip_inline_space();
            }
            match self.peek() {
                Some('{') => {
                    self.bump();
                    let contents = self.parse_sequence(&Until::Brace)?;
                    args.push(Arg { kind: ArgKind::Required, contents });
                }
                Some('[') => {
                    let open = self.pos;
                    if self.failed_brackets.contains(&open) {
                        self.pos = checkpoint;
                        break;
                    }
                    self.bump();
                    match self.parse_sequence(&Until::Bracket) {
                        Ok(contents) => args.push(Arg { kind: ArgKind::Optional, contents }),
                        Err(_) => {
                            self.failed_brackets.insert(open);
                            self.pos = checkpoint;
                            break;
                        }
                    }
                }
                _ => {
                    self.pos = checkpoint;
                    break;
                }
            }
        }
        Ok(args)
    }

    fn parse_dollar_math(&mut self) -> Result<Node, ParseError> {
        let start = self.pos;
        self.bump();
        let rest = self.rest();
        let mut escaped = false;
        for (i, c) in rest.char_indices() {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '$' => {
                    let content = rest[..i].to_string();
                    self.pos += i + 1;
                    return Ok(Node::Math { delimiter: MathDelimiter::Dollar, content });
                }
                _ => {}
            }
        }
        Err(ParseError { kind: ParseErrorKind::UnclosedMath, offset: start })
    }

    fn parse_delimited_math(&mut self, delimiter: MathDelimiter, start: usize) -> Result<Node, ParseError> {
        let closing = match delimiter {
            MathDelimiter::Paren => ')',
            _ => ']',
        };
        let rest = self.rest();
        let mut chars = rest.char_indices();
        while let Some((i, c)) = chars.next() {
            if c != '\\' {
                continue;
            }
            match chars.next() {
                Some((_, next)) if next == closing => {
                    let content = rest[..i].to_string();
                    self.pos += i + 2;
                    return Ok(Node::Math { delimiter, content });
                }
                Some(_) => {}
                None => break,
            }
        }
        Err(ParseError { kind: ParseErrorKind::UnclosedMath, offset: start })
    }
}

fn push_text(nodes: &mut Vec<Node>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Node::Text(last)) = nodes.last_mut() {
        last.push_str(text);
    } else {
        nodes.push(Node::Text(text.to_string()));
    }
}
