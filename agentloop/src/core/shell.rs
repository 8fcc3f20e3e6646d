//! Quote-aware decomposition of shell command strings into simple commands.
//!
//! This is not a shell. It understands enough of POSIX/bash syntax to find every
//! simple command a string would run: control operators, pipelines, subshells and
//! brace groups, command and process substitutions, redirections and
//! here-documents. Anything it cannot follow is reported as a [`ParseError`] and
//! the validator treats it as unparseable.

use std::fmt;

/// Maximum nesting of substitutions and `sh -c` scripts followed before giving up.
pub const MAX_NESTING: usize = 16;

/// Placeholder left in a word where a command or process substitution was.
pub const SUBSTITUTION_MARKER: &str = "$__substitution__";

/// One word after quote removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Word {
    pub text: String,
    /// True when any part of the word was quoted or escaped (no globbing or tilde expansion).
    pub quoted: bool,
}

impl Word {
    /// Word text contains a parameter expansion or substitution the parser cannot resolve.
    pub fn is_dynamic(&self) -> bool {
        self.text.contains('$') || self.text.contains('`')
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectOp {
    /// `<`
    Read,
    /// `>`, `>|`, `&>`
    Write,
    /// `>>`, `&>>`
    Append,
    /// `<>`
    ReadWrite,
    /// `>&N`, `<&N`, `>&-`
    Duplicate,
    /// `<<` or `<<-`; the target is the delimiter, the body is data.
    HereDoc,
    /// `<<<`; the target is a literal string.
    HereString,
}

impl RedirectOp {
    /// Whether the redirect target names a file.
    pub fn targets_path(self) -> bool {
        matches!(
            self,
            RedirectOp::Read | RedirectOp::Write | RedirectOp::Append | RedirectOp::ReadWrite
        )
    }

    pub fn writes(self) -> bool {
        matches!(
            self,
            RedirectOp::Write | RedirectOp::Append | RedirectOp::ReadWrite
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub fd: Option<u32>,
    pub op: RedirectOp,
    pub target: Word,
}

/// `NAME=value` prefix of a simple command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub name: String,
    pub value: Word,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimpleCommand {
    pub assignments: Vec<Assignment>,
    pub words: Vec<Word>,
    pub redirects: Vec<Redirect>,
    /// Terminated by a single `&`.
    pub background: bool,
    /// Stdin comes from a pipe.
    pub piped_input: bool,
    /// Nesting level: 0 for the top-level script, +1 per substitution.
    pub depth: usize,
}

impl SimpleCommand {
    fn is_empty(&self) -> bool {
        self.assignments.is_empty() && self.words.is_empty() && self.redirects.is_empty()
    }
}

/// Decomposed script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    /// Top-level commands in source order, followed by nested substitution commands.
    pub commands: Vec<SimpleCommand>,
    /// The last top-level command was sent to the background with `&`.
    pub trailing_background: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Empty,
    NulByte,
    Unterminated(&'static str),
    Unexpected(char),
    MissingRedirectTarget,
    TooDeep,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Empty => write!(f, "empty command"),
            ParseError::NulByte => write!(f, "NUL byte in command"),
            ParseError::Unterminated(what) => write!(f, "unterminated {what}"),
            ParseError::Unexpected(c) => write!(f, "unexpected `{c}`"),
            ParseError::MissingRedirectTarget => write!(f, "redirection without a target"),
            ParseError::TooDeep => write!(f, "nesting too deep"),
        }
    }
}

/// Decompose `script` into simple commands.
pub fn parse_script(script: &str) -> Result<Script, ParseError> {
    if script.contains('\0') {
        return Err(ParseError::NulByte);
    }
    if script.trim().is_empty() {
        return Err(ParseError::Empty);
    }
    let mut out = Script::default();
    let mut nested = Vec::new();
    let trailing = Lexer::new(script, 0).run(&mut out.commands, &mut nested)?;
    out.trailing_background = trailing;
    parse_nested(nested, 1, &mut out.commands)?;
    Ok(out)
}

fn parse_nested(
    bodies: Vec<String>,
    depth: usize,
    out: &mut Vec<SimpleCommand>,
) -> Result<(), ParseError> {
    if bodies.is_empty() {
        return Ok(());
    }
    if depth > MAX_NESTING {
        return Err(ParseError::TooDeep);
    }
    let mut deeper = Vec::new();
    for body in bodies {
        if body.trim().is_empty() {
            continue;
        }
        Lexer::new(&body, depth).run(out, &mut deeper)?;
    }
    parse_nested(deeper, depth + 1, out)
}

/// Words that open or close compound commands and are dropped at command start.
const RESERVED: &[&str] = &[
    "if", "then", "else", "elif", "fi", "do", "done", "while", "until", "!", "{", "}", "esac",
];

#[derive(Debug, Clone, Copy)]
struct PendingHereDoc {
    strip_tabs: bool,
    expand: bool,
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
    current: SimpleCommand,
    word: String,
    in_word: bool,
    pending_redirect: Option<(Option<u32>, RedirectOp)>,
    pending_heredoc_op: Option<PendingHereDoc>,
    heredocs: Vec<(String, PendingHereDoc)>,
    groups: usize,
    case_depth: usize,
    next_piped: bool,
    last_background: bool,
    emitted: bool,
}

impl Lexer {
    fn new(source: &str, depth: usize) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            depth,
            current: SimpleCommand {
                depth,
                ..SimpleCommand::default()
            },
            word: String::new(),
            in_word: false,
            pending_redirect: None,
            pending_heredoc_op: None,
            heredocs: Vec::new(),
            groups: 0,
            case_depth: 0,
            next_piped: false,
            last_background: false,
            emitted: false,
        }
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    /// Returns whether the final command was backgrounded.
    fn run(
        mut self,
        out: &mut Vec<SimpleCommand>,
        nested: &mut Vec<String>,
    ) -> Result<bool, ParseError> {
        while let Some(c) = self.peek(0) {
            match c {
                ' ' | '\t' | '\r' => {
                    self.finish_word()?;
                    self.pos += 1;
                }
                '\n' => {
                    self.finish_word()?;
                    self.pos += 1;
                    self.end_command(out, false)?;
                    self.read_heredoc_bodies(nested)?;
                }
                '#' if !self.in_word => self.skip_comment(),
                '\'' => {
                    self.in_word = true;
                    let body = read_single_quoted(&self.chars, &mut self.pos)?;
                    self.word.push('\'');
                    self.word.push_str(&body);
                    self.word.push('\'');
                }
                '"' => {
                    self.in_word = true;
                    let raw = read_double_quoted(&self.chars, &mut self.pos, nested)?;
                    self.word.push_str(&raw);
                }
                '\\' => {
                    match self.peek(1) {
                        Some('\n') => {}
                        Some(next) => {
                            self.in_word = true;
                            self.word.push('\\');
                            self.word.push(next);
                        }
                        None => return Err(ParseError::Unterminated("escape")),
                    }
                    self.pos += 2;
                }
                '$' => {
                    self.in_word = true;
                    let raw = read_dollar(&self.chars, &mut self.pos, nested)?;
                    self.word.push_str(&raw);
                }
                '`' => {
                    self.in_word = true;
                    let body = read_backtick(&self.chars, &mut self.pos)?;
                    nested.push(body);
                    self.word.push_str(SUBSTITUTION_MARKER);
                }
                '<' | '>' if self.peek(1) == Some('(') => {
                    self.in_word = true;
                    self.pos += 2;
                    let body = read_balanced(&self.chars, &mut self.pos)?;
                    nested.push(body);
                    self.word.push_str(SUBSTITUTION_MARKER);
                }
                '<' | '>' => self.read_redirect_op()?,
                '|' => {
                    self.finish_word()?;
                    let piped = match self.peek(1) {
                        Some('|') => {
                            self.pos += 2;
                            false
                        }
                        Some('&') => {
                            self.pos += 2;
                            true
                        }
                        _ => {
                            self.pos += 1;
                            true
                        }
                    };
                    self.end_command(out, false)?;
                    self.next_piped = piped;
                }
                '&' => {
                    self.finish_word()?;
                    match self.peek(1) {
                        Some('&') => {
                            self.pos += 2;
                            self.end_command(out, false)?;
                        }
                        Some('>') => {
                            let append = self.peek(2) == Some('>');
                            self.pos += if append { 3 } else { 2 };
                            let op = if append {
                                RedirectOp::Append
                            } else {
                                RedirectOp::Write
                            };
                            self.set_pending_redirect(None, op)?;
                        }
                        _ => {
                            self.pos += 1;
                            self.end_command(out, true)?;
                        }
                    }
                }
                ';' => {
                    self.finish_word()?;
                    self.pos += 1;
                    if matches!(self.peek(0), Some(';') | Some('&')) {
                        self.pos += 1;
                    }
                    self.end_command(out, false)?;
                }
                '(' => self.open_paren(out)?,
                ')' => {
                    self.finish_word()?;
                    self.pos += 1;
                    if self.case_depth > 0 && self.groups == 0 {
                        // `pattern)` inside a case body: the words so far were the pattern,
                        // possibly preceded by the `case WORD in` header.
                        let fresh = self.fresh_command();
                        let mut pattern = std::mem::replace(&mut self.current, fresh);
                        let is_header = pattern
                            .words
                            .first()
                            .is_some_and(|w| !w.quoted && w.text == "case");
                        if is_header && pattern.words.len() > 3 {
                            pattern.words.truncate(3);
                            pattern.redirects.clear();
                            out.push(pattern);
                            self.emitted = true;
                        }
                    } else if self.groups > 0 {
                        self.groups -= 1;
                        self.end_command(out, false)?;
                    } else {
                        return Err(ParseError::Unexpected(')'));
                    }
                }
                _ => {
                    self.in_word = true;
                    self.word.push(c);
                    self.pos += 1;
                }
            }
        }

        self.finish_word()?;
        self.end_command(out, false)?;
        if self.pending_redirect.is_some() {
            return Err(ParseError::MissingRedirectTarget);
        }
        if !self.heredocs.is_empty() {
            return Err(ParseError::Unterminated("here-document"));
        }
        if self.groups > 0 {
            return Err(ParseError::Unterminated("subshell"));
        }
        Ok(self.last_background)
    }

    fn fresh_command(&self) -> SimpleCommand {
        SimpleCommand {
            depth: self.depth,
            ..SimpleCommand::default()
        }
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek(0) {
            if c == '\n' {
                break;
            }
            self.pos += 1;
        }
    }

    fn open_paren(&mut self, out: &mut Vec<SimpleCommand>) -> Result<(), ParseError> {
        // `name=(a b c)` array assignment.
        if self.in_word && self.word.ends_with('=') {
            self.pos += 1;
            let body = read_balanced(&self.chars, &mut self.pos)?;
            self.word.push('(');
            self.word.push_str(&body);
            self.word.push(')');
            return Ok(());
        }
        self.finish_word()?;
        // `name() { ... }` function definition header.
        if self.peek(1) == Some(')') && self.current.words.len() == 1 {
            self.pos += 2;
            self.current = self.fresh_command();
            return Ok(());
        }
        let c_style_for = self.current.words.len() == 1
            && self.current.words[0].text == "for"
            && self.peek(1) == Some('(');
        if c_style_for {
            // `for (( init; cond; step ))` header.
            self.pos += 2;
            read_balanced(&self.chars, &mut self.pos)?;
            if self.peek(0) != Some(')') {
                return Err(ParseError::Unterminated("arithmetic for"));
            }
            self.pos += 1;
            self.current = self.fresh_command();
            return Ok(());
        }
        if !self.current.words.is_empty() {
            if self.case_depth > 0 {
                // Optional leading `(` of a case pattern.
                self.pos += 1;
                return Ok(());
            }
            return Err(ParseError::Unexpected('('));
        }
        // `(( arithmetic ))` evaluates no commands of its own.
        if self.peek(1) == Some('(') {
            self.pos += 2;
            let body = read_balanced(&self.chars, &mut self.pos)?;
            if self.peek(0) != Some(')') {
                return Err(ParseError::Unterminated("arithmetic command"));
            }
            self.pos += 1;
            if body.contains("$(") || body.contains('`') {
                let mut ignored = Vec::new();
                scan_expansions(&body, &mut ignored)?;
            }
            return Ok(());
        }
        self.pos += 1;
        self.groups += 1;
        self.end_command(out, false)
    }

    fn read_redirect_op(&mut self) -> Result<(), ParseError> {
        let fd = if self.in_word && !self.word.is_empty() && self.word.chars().all(|c| c.is_ascii_digit())
        {
            let fd = self.word.parse::<u32>().ok();
            self.word.clear();
            self.in_word = false;
            fd
        } else {
            self.finish_word()?;
            None
        };
        let first = self.chars[self.pos];
        let second = self.peek(1);
        let third = self.peek(2);
        let (op, len) = match (first, second, third) {
            ('<', Some('<'), Some('<')) => (RedirectOp::HereString, 3),
            ('<', Some('<'), Some('-')) => {
                self.pending_heredoc_op = Some(PendingHereDoc {
                    strip_tabs: true,
                    expand: true,
                });
                (RedirectOp::HereDoc, 3)
            }
            ('<', Some('<'), _) => {
                self.pending_heredoc_op = Some(PendingHereDoc {
                    strip_tabs: false,
                    expand: true,
                });
                (RedirectOp::HereDoc, 2)
            }
            ('<', Some('&'), _) => (RedirectOp::Duplicate, 2),
            ('<', Some('>'), _) => (RedirectOp::ReadWrite, 2),
            ('<', _, _) => (RedirectOp::Read, 1),
            ('>', Some('>'), _) => (RedirectOp::Append, 2),
            ('>', Some('|'), _) => (RedirectOp::Write, 2),
            ('>', Some('&'), _) => (RedirectOp::Duplicate, 2),
            _ => (RedirectOp::Write, 1),
        };
        self.pos += len;
        self.set_pending_redirect(fd, op)
    }

    fn set_pending_redirect(&mut self, fd: Option<u32>, op: RedirectOp) -> Result<(), ParseError> {
        if self.pending_redirect.is_some() {
            return Err(ParseError::MissingRedirectTarget);
        }
        self.pending_redirect = Some((fd, op));
        Ok(())
    }

    fn finish_word(&mut self) -> Result<(), ParseError> {
        if !self.in_word {
            return Ok(());
        }
        let raw = std::mem::take(&mut self.word);
        self.in_word = false;
        let quoted = raw.contains(['\'', '"', '\\']);
        let text = unquote(&raw)?;
        let word = Word { text, quoted };

        if let Some((fd, op)) = self.pending_redirect.take() {
            let op = match op {
                // `>&file` (not a descriptor) redirects both streams to a file.
                RedirectOp::Duplicate
                    if word.text != "-" && !word.text.chars().all(|c| c.is_ascii_digit()) =>
                {
                    RedirectOp::Write
                }
                other => other,
            };
            if op == RedirectOp::HereDoc {
                let mut pending = self.pending_heredoc_op.take().unwrap_or(PendingHereDoc {
                    strip_tabs: false,
                    expand: true,
                });
                pending.expand = !quoted;
                self.heredocs.push((word.text.clone(), pending));
            }
            self.current.redirects.push(Redirect {
                fd,
                op,
                target: word,
            });
            return Ok(());
        }

        if self.current.words.is_empty() {
            if !quoted && RESERVED.contains(&word.text.as_str()) {
                if word.text == "esac" {
                    self.case_depth = self.case_depth.saturating_sub(1);
                }
                return Ok(());
            }
            if !quoted && is_assignment(&word.text) {
                if let Some((name, value)) = word.text.split_once('=') {
                    let name = name.trim_end_matches('+').to_string();
                    self.current.assignments.push(Assignment {
                        name,
                        value: Word {
                            text: value.to_string(),
                            quoted,
                        },
                    });
                }
                return Ok(());
            }
            if !quoted && word.text == "case" {
                self.case_depth += 1;
            }
        } else if !quoted && word.text == "{" && self.current.words[0].text == "function" {
            // `function name {` header: drop it, the body follows.
            self.current = self.fresh_command();
            return Ok(());
        }
        self.current.words.push(word);
        Ok(())
    }

    fn end_command(
        &mut self,
        out: &mut Vec<SimpleCommand>,
        background: bool,
    ) -> Result<(), ParseError> {
        if self.pending_redirect.is_some() {
            return Err(ParseError::MissingRedirectTarget);
        }
        let fresh = self.fresh_command();
        let mut command = std::mem::replace(&mut self.current, fresh);
        let piped = std::mem::take(&mut self.next_piped);
        if command.is_empty() {
            if background {
                // `done &`, `} &`, `) &`: backgrounds the compound command just closed.
                if !self.emitted {
                    return Err(ParseError::Unexpected('&'));
                }
                if let Some(last) = out.last_mut() {
                    last.background = true;
                }
                self.last_background = true;
            }
            return Ok(());
        }
        command.background = background;
        command.piped_input = piped;
        self.last_background = background;
        self.emitted = true;
        out.push(command);
        Ok(())
    }

    fn read_heredoc_bodies(&mut self, nested: &mut Vec<String>) -> Result<(), ParseError> {
        for (delimiter, pending) in std::mem::take(&mut self.heredocs) {
            let mut body = String::new();
            let mut terminated = false;
            while self.pos < self.chars.len() {
                let start = self.pos;
                while self.pos < self.chars.len() && self.chars[self.pos] != '\n' {
                    self.pos += 1;
                }
                let line: String = self.chars[start..self.pos].iter().collect();
                if self.pos < self.chars.len() {
                    self.pos += 1;
                }
                let candidate = if pending.strip_tabs {
                    line.trim_start_matches('\t')
                } else {
                    line.as_str()
                };
                if candidate == delimiter {
                    terminated = true;
                    break;
                }
                body.push_str(&line);
                body.push('\n');
            }
            if !terminated {
                return Err(ParseError::Unterminated("here-document"));
            }
            if pending.expand {
                scan_expansions(&body, nested)?;
            }
        }
        Ok(())
    }
}

fn is_assignment(text: &str) -> bool {
    let Some((name, _)) = text.split_once('=') else {
        return false;
    };
    let name = name.strip_suffix('+').unwrap_or(name);
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Quote removal for one raw word.
fn unquote(raw: &str) -> Result<String, ParseError> {
    if !raw.contains(['\'', '"', '\\']) {
        return Ok(raw.to_string());
    }
    shell_words::split(raw)
        .map(|parts| parts.concat())
        .map_err(|_| ParseError::Unterminated("quote"))
}

/// Reads `'...'` starting at the opening quote and returns the body.
fn read_single_quoted(chars: &[char], pos: &mut usize) -> Result<String, ParseError> {
    *pos += 1;
    let start = *pos;
    while *pos < chars.len() {
        if chars[*pos] == '\'' {
            let body = chars[start..*pos].iter().collect();
            *pos += 1;
            return Ok(body);
        }
        *pos += 1;
    }
    Err(ParseError::Unterminated("single quote"))
}

/// Reads `"..."` starting at the opening quote, collecting substitution bodies.
/// Returns the raw text including quotes with substitutions replaced by a marker.
fn read_double_quoted(
    chars: &[char],
    pos: &mut usize,
    nested: &mut Vec<String>,
) -> Result<String, ParseError> {
    let mut raw = String::from("\"");
    *pos += 1;
    while *pos < chars.len() {
        match chars[*pos] {
            '"' => {
                *pos += 1;
                raw.push('"');
                return Ok(raw);
            }
            '\\' => {
                raw.push('\\');
                if let Some(&next) = chars.get(*pos + 1) {
                    raw.push(next);
                }
                *pos += 2;
            }
            '$' => raw.push_str(&read_dollar(chars, pos, nested)?),
            '`' => {
                nested.push(read_backtick(chars, pos)?);
                raw.push_str(SUBSTITUTION_MARKER);
            }
            c => {
                raw.push(c);
                *pos += 1;
            }
        }
    }
    Err(ParseError::Unterminated("double quote"))
}

/// Reads an expansion starting at `$`.
fn read_dollar(
    chars: &[char],
    pos: &mut usize,
    nested: &mut Vec<String>,
) -> Result<String, ParseError> {
    match chars.get(*pos + 1) {
        Some('(') => {
            *pos += 2;
            let body = read_balanced(chars, pos)?;
            if body.starts_with('(') && body.ends_with(')') {
                // $(( arithmetic ))
                scan_expansions(&body, nested)?;
                return Ok(format!("$({body})"));
            }
            nested.push(body);
            Ok(SUBSTITUTION_MARKER.to_string())
        }
        Some('{') => {
            *pos += 2;
            let body = read_braced(chars, pos)?;
            scan_expansions(&body, nested)?;
            Ok(format!("${{{body}}}"))
        }
        Some('\'') => {
            // $'ansi-c' quoting
            *pos += 1;
            let body = read_single_quoted(chars, pos)?;
            Ok(format!("'{body}'"))
        }
        _ => {
            *pos += 1;
            Ok("$".to_string())
        }
    }
}

/// Reads up to the `)` matching an already consumed `(`; returns the body.
fn read_balanced(chars: &[char], pos: &mut usize) -> Result<String, ParseError> {
    let start = *pos;
    let mut depth = 1usize;
    while *pos < chars.len() {
        match chars[*pos] {
            '\'' => {
                read_single_quoted(chars, pos)?;
                continue;
            }
            '"' => {
                let mut ignored = Vec::new();
                read_double_quoted(chars, pos, &mut ignored)?;
                continue;
            }
            '\\' => *pos += 1,
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    let body = chars[start..*pos].iter().collect();
                    *pos += 1;
                    return Ok(body);
                }
            }
            _ => {}
        }
        *pos += 1;
    }
    Err(ParseError::Unterminated("substitution"))
}

/// Reads up to the `}` matching an already consumed `${`.
fn read_braced(chars: &[char], pos: &mut usize) -> Result<String, ParseError> {
    let start = *pos;
    let mut depth = 1usize;
    while *pos < chars.len() {
        match chars[*pos] {
            '\'' => {
                read_single_quoted(chars, pos)?;
                continue;
            }
            '\\' => *pos += 1,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let body = chars[start..*pos].iter().collect();
                    *pos += 1;
                    return Ok(body);
                }
            }
            _ => {}
        }
        *pos += 1;
    }
    Err(ParseError::Unterminated("parameter expansion"))
}

/// Reads a backtick substitution starting at the opening backtick.
fn read_backtick(chars: &[char], pos: &mut usize) -> Result<String, ParseError> {
    *pos += 1;
    let mut body = String::new();
    while *pos < chars.len() {
        match chars[*pos] {
            '`' => {
                *pos += 1;
                return Ok(body);
            }
            '\\' if matches!(chars.get(*pos + 1), Some('`') | Some('\\') | Some('$')) => {
                body.push(chars[*pos + 1]);
                *pos += 2;
            }
            c => {
                body.push(c);
                *pos += 1;
            }
        }
    }
    Err(ParseError::Unterminated("backtick substitution"))
}

/// Collects command substitutions from text that undergoes expansion but not
/// word splitting (here-document bodies, `${...}` operands).
fn scan_expansions(text: &str, nested: &mut Vec<String>) -> Result<(), ParseError> {
    let chars: Vec<char> = text.chars().collect();
    let mut pos = 0;
    while pos < chars.len() {
        match chars[pos] {
            '\\' => pos += 2,
            '$' => {
                read_dollar(&chars, &mut pos, nested)?;
            }
            '`' => nested.push(read_backtick(&chars, &mut pos)?),
            _ => pos += 1,
        }
    }
    Ok(())
}
