//! Expansion of routing regexes into OpenAPI path templates.
//!
//! Patterns are parsed into a small syntax tree and walked to enumerate every
//! concrete path the pattern admits: alternations fan out, optional groups
//! produce a path with and without the group, and named captures become
//! `{name}` parameters whatever they contain. Anything else that matches a
//! variable set of strings (classes, `.`, `*`, `+`, `{n,m}`) outside a named
//! capture cannot be expressed as an OpenAPI path and is rejected.

use std::collections::BTreeSet;

use super::OpenApiError;

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Empty,
    Literal(char),
    /// `^`, `$`, `\b` and friends; match no characters.
    Assertion,
    Class,
    AnyChar,
    Concat(Vec<Node>),
    Alternate(Vec<Node>),
    Group {
        name: Option<String>,
        inner: Box<Node>,
    },
    Quest(Box<Node>),
    /// `*`, `+` and `{n,m}`.
    Repeat(Box<Node>),
}

struct Parser<'a> {
    pattern: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(pattern: &'a str) -> Self {
        Self {
            pattern,
            chars: pattern.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, reason: impl Into<String>) -> OpenApiError {
        OpenApiError::InvalidPattern {
            pattern: self.pattern.to_string(),
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn parse(mut self) -> Result<Node, OpenApiError> {
        let node = self.parse_alternation()?;
        if self.pos < self.chars.len() {
            return Err(self.error(format!("unexpected {:?} at offset {}", self.chars[self.pos], self.pos)));
        }
        Ok(node)
    }

    fn parse_alternation(&mut self) -> Result<Node, OpenApiError> {
        let mut branches = vec![self.parse_concat()?];
        while self.eat('|') {
            branches.push(self.parse_concat()?);
        }
        Ok(if branches.len() == 1 {
            branches.remove(0)
        } else {
            Node::Alternate(branches)
        })
    }

    fn parse_concat(&mut self) -> Result<Node, OpenApiError> {
        let mut items = Vec::new();
        while let Some(c) = self.peek() {
            if c == '|' || c == ')' {
                break;
            }
            let atom = self.parse_atom()?;
            items.push(self.parse_quantifiers(atom)?);
        }
        Ok(match items.len() {
            0 => Node::Empty,
            1 => items.remove(0),
            _ => Node::Concat(items),
        })
    }

    fn parse_atom(&mut self) -> Result<Node, OpenApiError> {
        let Some(c) = self.bump() else {
            return Err(self.error("unexpected end of pattern"));
        };
        match c {
            '(' => self.parse_group(),
            '[' => self.parse_class(),
            '.' => Ok(Node::AnyChar),
            '^' | '$' => Ok(Node::Assertion),
            '\\' => self.parse_escape(),
            '*' | '+' | '?' => Err(self.error("missing argument to repetition operator")),
            other => Ok(Node::Literal(other)),
        }
    }

    fn parse_group(&mut self) -> Result<Node, OpenApiError> {
        let mut name = None;
        if self.eat('?') {
            if self.peek() == Some('P') && self.peek_at(1) == Some('<') {
                self.pos += 2;
                name = Some(self.parse_group_name()?);
            } else if self.eat('<') {
                name = Some(self.parse_group_name()?);
            } else if !self.eat(':') {
                return Err(self.error("unsupported group flags"));
            }
        }

        let inner = self.parse_alternation()?;
        if !self.eat(')') {
            return Err(self.error("missing closing )"));
        }
        Ok(Node::Group {
            name,
            inner: Box::new(inner),
        })
    }

    fn parse_group_name(&mut self) -> Result<String, OpenApiError> {
        let mut name = String::new();
        loop {
            match self.bump() {
                Some('>') if !name.is_empty() => return Ok(name),
                Some(c) if c.is_alphanumeric() || c == '_' => name.push(c),
                _ => return Err(self.error("invalid capture group name")),
            }
        }
    }

    fn parse_class(&mut self) -> Result<Node, OpenApiError> {
        self.eat('^');
        // A leading `]` is a literal member.
        self.eat(']');
        loop {
            match self.bump() {
                None => return Err(self.error("missing closing ]")),
                Some('\\') => {
                    if self.bump().is_none() {
                        return Err(self.error("trailing backslash"));
                    }
                }
                Some('[') if self.peek() == Some(':') => {
                    while let Some(c) = self.bump() {
                        if c == ']' {
                            break;
                        }
                    }
                }
                Some(']') => return Ok(Node::Class),
                Some(_) => {}
            }
        }
    }

    fn parse_escape(&mut self) -> Result<Node, OpenApiError> {
        let Some(c) = self.bump() else {
            return Err(self.error("trailing backslash"));
        };
        match c {
            'd' | 'D' | 'w' | 'W' | 's' | 'S' => Ok(Node::Class),
            'p' | 'P' => {
                if self.eat('{') {
                    while let Some(c) = self.bump() {
                        if c == '}' {
                            break;
                        }
                    }
                } else {
                    self.bump();
                }
                Ok(Node::Class)
            }
            'b' | 'B' | 'A' | 'z' => Ok(Node::Assertion),
            'n' => Ok(Node::Literal('\n')),
            't' => Ok(Node::Literal('\t')),
            c if c.is_ascii_alphanumeric() => Err(self.error(format!("unsupported escape \\{c}"))),
            c => Ok(Node::Literal(c)),
        }
    }

    /// Parses `{n}`, `{n,}` or `{n,m}` if present at the cursor.
    fn parse_counted(&mut self) -> bool {
        let start = self.pos;
        if !self.eat('{') {
            return false;
        }
        let mut digits = 0;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
            digits += 1;
        }
        if digits > 0 && self.eat(',') {
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if digits > 0 && self.eat('}') {
            return true;
        }
        self.pos = start;
        false
    }

    fn parse_quantifiers(&mut self, mut atom: Node) -> Result<Node, OpenApiError> {
        loop {
            atom = match self.peek() {
                Some('?') => {
                    self.pos += 1;
                    Node::Quest(Box::new(atom))
                }
                Some('*') | Some('+') => {
                    self.pos += 1;
                    Node::Repeat(Box::new(atom))
                }
                Some('{') if self.parse_counted() => Node::Repeat(Box::new(atom)),
                _ => return Ok(atom),
            };
            // Non-greedy marker
            self.eat('?');
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Collector {
    path: String,
    /// Length of `path` right after an optional `/` was appended.
    conditional_slash_at: usize,
}

fn collect(
    pattern: &str,
    node: &Node,
    mut appending: Vec<Collector>,
    captures: &mut BTreeSet<String>,
) -> Result<Vec<Collector>, OpenApiError> {
    match node {
        Node::Empty | Node::Assertion => Ok(appending),
        Node::Literal(c) => {
            for collector in &mut appending {
                collector.path.push(*c);
            }
            Ok(appending)
        }
        Node::Concat(items) => {
            for item in items {
                appending = collect(pattern, item, appending, captures)?;
            }
            Ok(appending)
        }
        Node::Alternate(branches) => {
            let mut out = Vec::new();
            for branch in branches {
                out.extend(collect(pattern, branch, appending.clone(), captures)?);
            }
            Ok(out)
        }
        Node::Group { name: Some(name), .. } => {
            captures.insert(name.clone());
            for collector in &mut appending {
                collector.path.push('{');
                collector.path.push_str(name);
                collector.path.push('}');
            }
            Ok(appending)
        }
        Node::Group { name: None, inner } => collect(pattern, inner, appending, captures),
        Node::Quest(inner) => {
            let mut with = collect(pattern, inner, appending.clone(), captures)?;
            if **inner == Node::Literal('/') {
                for collector in &mut with {
                    collector.conditional_slash_at = collector.path.len();
                }
            }
            appending.extend(with);
            Ok(appending)
        }
        Node::Class | Node::AnyChar | Node::Repeat(_) => Err(OpenApiError::UnsupportedRegex {
            pattern: pattern.to_string(),
        }),
    }
}

/// Expands a routing pattern into OpenAPI path templates.
///
/// Returns the paths in generation order along with the names of every named
/// capture in the pattern. Paths that differ only by an optional trailing `/`
/// are emitted once, without the slash.
///
/// # Errors
///
/// [`OpenApiError::UnsupportedRegex`] when the pattern uses variable-width
/// constructs outside named captures; [`OpenApiError::InvalidPattern`] when
/// it does not parse.
pub fn expand_pattern(pattern: &str) -> Result<(Vec<String>, BTreeSet<String>), OpenApiError> {
    let tree = Parser::new(pattern).parse()?;
    let mut captures = BTreeSet::new();
    let collectors = collect(pattern, &tree, vec![Collector::default()], &mut captures)?;

    let paths = collectors
        .into_iter()
        .filter(|c| c.conditional_slash_at != c.path.len())
        .map(|c| c.path)
        .collect();
    Ok((paths, captures))
}
