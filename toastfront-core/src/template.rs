//! Directive templates.
//!
//! Pages carry template actions between a pair of delimiters (`<!--#` and
//! `-->` in HTML, `"{{` and `}}"` in CSS). The action language follows the
//! usual dot-path style:
//!
//! ```text
//! <!--#.title-->                      field of the page variables
//! <!--#if .user.admin-->…<!--#else if not .guest-->…<!--#else-->…<!--#end-->
//! <!--#range .links--><a href="<!--#.url-->"><!--#.text--></a><!--#end-->
//! <!--#range $name, $value := .meta--><!--#$name-->=<!--#$value--><!--#end-->
//! <!--#$first := index .links 0-->
//! <!--#if and (eq .lang "fr") (gt (len .links) 2)-->…<!--#end-->
//! ```
//!
//! Actions are lowered to a `tera` template and executed with autoescaping
//! on (safe mode) or off (raw mode). Everything outside the delimiters is
//! emitted byte for byte.

use std::collections::HashMap;

use tera::{Context, Tera, Value};
use thiserror::Error;

use crate::vars::VariableTree;

const TEMPLATE_NAME: &str = "page";
/// Whole page variables, for fields whose names tera reads as literals.
const ROOT_VAR: &str = "__page";
const RANGE_FILTER: &str = "range_values";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("invalid template: {0}")]
    Compile(String),

    #[error("{0}")]
    Render(String),
}

impl TemplateError {
    fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }

    fn from_tera(err: &tera::Error) -> String {
        let mut message = err.to_string();
        let mut source = std::error::Error::source(err);
        while let Some(inner) = source {
            message.push_str(": ");
            message.push_str(&inner.to_string());
            source = inner.source();
        }
        message
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delimiters {
    pub open: &'static str,
    pub close: &'static str,
}

pub const HTML_DELIMITERS: Delimiters = Delimiters {
    open: "<!--#",
    close: "-->",
};

pub const CSS_DELIMITERS: Delimiters = Delimiters {
    open: "\"{{",
    close: "}}\"",
};

/// How substituted values are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscapeMode {
    /// HTML-escape every substituted value.
    Html,
    /// Insert values as they are.
    Raw,
}

impl EscapeMode {
    pub fn from_unsafe_vars(unsafe_vars: bool) -> Self {
        if unsafe_vars {
            EscapeMode::Raw
        } else {
            EscapeMode::Html
        }
    }
}

pub struct DirectiveTemplate {
    tera: Tera,
    needs_root: bool,
}

impl DirectiveTemplate {
    pub fn parse(text: &str, delimiters: Delimiters, mode: EscapeMode) -> Result<Self, TemplateError> {
        let Lowered { text: lowered, uses_root } = Lowering::new(delimiters).run(text)?;

        let mut tera = Tera::default();
        match mode {
            EscapeMode::Html => tera.autoescape_on(vec![TEMPLATE_NAME]),
            EscapeMode::Raw => tera.autoescape_on(vec![]),
        }
        tera.register_filter(RANGE_FILTER, range_values);
        tera.add_raw_template(TEMPLATE_NAME, &lowered)
            .map_err(|e| TemplateError::Compile(TemplateError::from_tera(&e)))?;

        Ok(Self {
            tera,
            needs_root: uses_root,
        })
    }

    pub fn render(&self, vars: &VariableTree) -> Result<String, TemplateError> {
        let mut context = Context::from_serialize(vars)
            .map_err(|e| TemplateError::Render(TemplateError::from_tera(&e)))?;
        if self.needs_root {
            context.insert(ROOT_VAR, vars);
        }

        self.tera
            .render(TEMPLATE_NAME, &context)
            .map_err(|e| TemplateError::Render(TemplateError::from_tera(&e)))
    }
}

/// `range` walks the values of an object, in key order.
fn range_values(value: &Value, _: &HashMap<String, Value>) -> tera::Result<Value> {
    Ok(match value {
        Value::Object(map) => Value::Array(map.values().cloned().collect()),
        Value::Null => Value::Array(Vec::new()),
        other => other.clone(),
    })
}

/// Parse and execute in one go.
pub fn render(
    text: &str,
    delimiters: Delimiters,
    mode: EscapeMode,
    vars: &VariableTree,
) -> Result<String, TemplateError> {
    DirectiveTemplate::parse(text, delimiters, mode)?.render(vars)
}

#[derive(Debug)]
enum Block {
    If { has_else: bool },
    Range { binds_dot: bool },
}

struct Lowering {
    delimiters: Delimiters,
    out: String,
    blocks: Vec<Block>,
    /// What `.` refers to inside nested ranges. Empty means the page root.
    dots: Vec<String>,
    line: usize,
    uses_root: bool,
}

/// Tera source produced from a directive template.
struct Lowered {
    text: String,
    uses_root: bool,
}

impl Lowering {
    fn new(delimiters: Delimiters) -> Self {
        Self {
            delimiters,
            out: String::new(),
            blocks: Vec::new(),
            dots: Vec::new(),
            line: 1,
            uses_root: false,
        }
    }

    fn run(mut self, text: &str) -> Result<Lowered, TemplateError> {
        let Delimiters { open, close } = self.delimiters;
        let mut rest = text;

        while let Some(start) = rest.find(open) {
            self.push_text(&rest[..start]);

            let after = &rest[start + open.len()..];
            let end = after
                .find(close)
                .ok_or_else(|| TemplateError::parse(self.line, "unclosed action"))?;
            let action = &after[..end];

            self.action(action)?;
            self.line += action.matches('\n').count();
            rest = &after[end + close.len()..];
        }
        self.push_text(rest);

        if let Some(block) = self.blocks.last() {
            return Err(TemplateError::parse(
                self.line,
                format!("unexpected end of input: missing end for {block:?}"),
            ));
        }

        Ok(Lowered {
            text: self.out,
            uses_root: self.uses_root,
        })
    }

    fn push_text(&mut self, text: &str) {
        self.line += text.matches('\n').count();
        if text.is_empty() {
            return;
        }

        let needs_raw = text.contains("{{")
            || text.contains("{%")
            || text.contains("{#")
            || text.ends_with('{');
        if needs_raw {
            // A literal endraw tag would close the block early: split the word.
            self.out.push_str("{% raw %}");
            self.out.push_str(&text.replace("endraw", "end{% endraw %}{% raw %}raw"));
            self.out.push_str("{% endraw %}");
        } else {
            self.out.push_str(text);
        }
    }

    fn action(&mut self, raw: &str) -> Result<(), TemplateError> {
        let mut body = raw;
        let trim_left = body.starts_with("- ");
        if trim_left {
            body = &body[2..];
        }
        let trim_right = body.ends_with(" -");
        if trim_right {
            body = &body[..body.len() - 2];
        }
        let body = body.trim();

        if body.starts_with("/*") && body.ends_with("*/") {
            return Ok(());
        }
        if body.is_empty() {
            return Err(TemplateError::parse(self.line, "empty action"));
        }

        let (keyword, rest) = match body.split_once(char::is_whitespace) {
            Some((keyword, rest)) => (keyword, rest.trim()),
            None => (body, ""),
        };

        let (open, close) = (
            if trim_left { "{%-" } else { "{%" },
            if trim_right { "-%}" } else { "%}" },
        );

        match keyword {
            "if" => {
                let cond = self.condition(rest)?;
                self.blocks.push(Block::If { has_else: false });
                self.tag(open, &format!("if {cond}"), close);
            }
            "else" => {
                match self.blocks.last_mut() {
                    Some(Block::If { has_else }) if !*has_else => {
                        if let Some(cond) = rest.strip_prefix("if ") {
                            let cond = self.condition(cond)?;
                            self.tag(open, &format!("elif {cond}"), close);
                        } else if rest.is_empty() {
                            if let Some(Block::If { has_else }) = self.blocks.last_mut() {
                                *has_else = true;
                            }
                            self.tag(open, "else", close);
                        } else {
                            return Err(TemplateError::parse(self.line, format!("unexpected {rest:?} after else")));
                        }
                    }
                    Some(Block::Range { .. }) => {
                        return Err(TemplateError::parse(self.line, "else inside range is not supported"));
                    }
                    _ => return Err(TemplateError::parse(self.line, "unexpected else")),
                }
            }
            "end" => match self.blocks.pop() {
                Some(Block::If { .. }) => self.tag(open, "endif", close),
                Some(Block::Range { binds_dot }) => {
                    if binds_dot {
                        self.dots.pop();
                    }
                    self.tag(open, "endfor", close);
                }
                None => return Err(TemplateError::parse(self.line, "unexpected end")),
            },
            "range" => self.range(rest, open, close)?,
            "with" | "define" | "template" | "block" | "break" | "continue" => {
                return Err(TemplateError::parse(self.line, format!("{keyword} actions are not supported")));
            }
            _ if body.starts_with('$') && (body.contains(":=") || body.contains(" = ")) => {
                let (name, expr) = body
                    .split_once(":=")
                    .or_else(|| body.split_once(" = "))
                    .ok_or_else(|| TemplateError::parse(self.line, "bad assignment"))?;
                let name = self.variable_name(name.trim())?;
                let value = self.expression(expr.trim())?;
                self.tag(open, &format!("set {name} = {value}"), close);
            }
            _ => {
                let value = self.expression(body)?;
                let (open, close) = (
                    if trim_left { "{{-" } else { "{{" },
                    if trim_right { "-}}" } else { "}}" },
                );
                self.tag(open, &value, close);
            }
        }

        Ok(())
    }

    fn range(&mut self, spec: &str, open: &str, close: &str) -> Result<(), TemplateError> {
        let (vars, source) = match spec.split_once(":=") {
            Some((vars, source)) => (Some(vars.trim()), source.trim()),
            None => (None, spec),
        };
        let source = self.operand_expression(source)?;

        match vars {
            None => {
                let dot = format!("__dot{}", self.dots.len() + 1);
                self.tag(open, &format!("for {dot} in {source} | default(value=[]) | {RANGE_FILTER}"), close);
                self.dots.push(dot);
                self.blocks.push(Block::Range { binds_dot: true });
            }
            Some(vars) => {
                let names = vars
                    .split(',')
                    .map(|name| self.variable_name(name.trim()))
                    .collect::<Result<Vec<_>, _>>()?;
                match names.as_slice() {
                    [value] => {
                        self.tag(
                            open,
                            &format!("for {value} in {source} | default(value=[]) | {RANGE_FILTER}"),
                            close,
                        );
                        self.dots.push(value.clone());
                    }
                    [key, value] => {
                        self.tag(open, &format!("for {key}, {value} in {source}"), close);
                        self.dots.push(value.clone());
                    }
                    _ => return Err(TemplateError::parse(self.line, "range takes one or two variables")),
                }
                self.blocks.push(Block::Range { binds_dot: true });
            }
        }

        Ok(())
    }

    fn tag(&mut self, open: &str, body: &str, close: &str) {
        self.out.push_str(open);
        self.out.push(' ');
        self.out.push_str(body);
        self.out.push(' ');
        self.out.push_str(close);
    }

    fn variable_name(&self, raw: &str) -> Result<String, TemplateError> {
        let name = raw
            .strip_prefix('$')
            .ok_or_else(|| TemplateError::parse(self.line, format!("variable {raw:?} must start with $")))?;
        if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(TemplateError::parse(self.line, format!("bad variable name {raw:?}")));
        }
        Ok(name.to_string())
    }

    fn condition(&mut self, text: &str) -> Result<String, TemplateError> {
        Ok(self.parse_expression(text)?.text)
    }

    fn expression(&mut self, text: &str) -> Result<String, TemplateError> {
        Ok(self.parse_expression(text)?.text)
    }

    /// An expression usable where `tera` wants a plain value (range source).
    fn operand_expression(&mut self, text: &str) -> Result<String, TemplateError> {
        let lowered = self.parse_expression(text)?;
        if lowered.prec != Prec::Atom {
            return Err(TemplateError::parse(self.line, format!("can't range over {text:?}")));
        }
        Ok(lowered.text)
    }

    fn parse_expression(&mut self, text: &str) -> Result<Expr, TemplateError> {
        let tokens = tokenize(text).map_err(|message| TemplateError::parse(self.line, message))?;
        let mut parser = ExprParser {
            tokens: &tokens,
            pos: 0,
            dot: self.dots.last().map(String::as_str),
            uses_root: false,
        };
        let lowered = parser
            .call()
            .map_err(|message| TemplateError::parse(self.line, message))?;
        self.uses_root |= parser.uses_root;
        if parser.pos != tokens.len() {
            return Err(TemplateError::parse(
                self.line,
                format!("unexpected {:?} in {text:?}", tokens[parser.pos]),
            ));
        }
        Ok(lowered)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open,
    Close,
    Str(String),
    Word(String),
}

fn tokenize(text: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '"' | '`' => {
                let quote = c;
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some('\\') if quote == '"' => match chars.next() {
                            Some('n') => value.push('\n'),
                            Some('t') => value.push('\t'),
                            Some(other) => value.push(other),
                            None => return Err("unterminated string".into()),
                        },
                        Some(c) if c == quote => break,
                        Some(c) => value.push(c),
                        None => return Err("unterminated string".into()),
                    }
                }
                tokens.push(Token::Str(value));
            }
            '|' => return Err("pipelines are not supported".into()),
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || c == '(' || c == ')' || c == '|' {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
        }
    }

    Ok(tokens)
}

/// Binding strength of a lowered expression, used to decide on parentheses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Prec {
    Logic,
    Comparison,
    Atom,
}

#[derive(Debug, Clone)]
struct Expr {
    text: String,
    prec: Prec,
    /// Plain dotted path, usable as an `index` base.
    path: bool,
}

impl Expr {
    fn atom(text: String, path: bool) -> Self {
        Self {
            text,
            prec: Prec::Atom,
            path,
        }
    }

    fn wrapped(&self, at_least: Prec) -> String {
        if self.prec < at_least {
            format!("({})", self.text)
        } else {
            self.text.clone()
        }
    }
}

struct ExprParser<'t> {
    tokens: &'t [Token],
    pos: usize,
    dot: Option<&'t str>,
    uses_root: bool,
}

const FUNCTIONS: &[&str] = &[
    "not", "and", "or", "eq", "ne", "lt", "le", "gt", "ge", "len", "index",
];

impl ExprParser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    /// A function call with its arguments, or a single operand.
    fn call(&mut self) -> Result<Expr, String> {
        let name = match self.peek() {
            Some(Token::Word(word)) if FUNCTIONS.contains(&word.as_str()) => word.clone(),
            _ => return self.operand(),
        };
        self.pos += 1;

        let mut args = Vec::new();
        while !matches!(self.peek(), None | Some(Token::Close)) {
            args.push(self.operand()?);
        }

        let arity = |n: usize| -> Result<(), String> {
            if args.len() < n {
                Err(format!("{name} needs at least {n} argument(s)"))
            } else {
                Ok(())
            }
        };

        let lowered = match name.as_str() {
            "not" => {
                arity(1)?;
                Expr {
                    text: format!("not {}", args[0].wrapped(Prec::Comparison)),
                    prec: Prec::Logic,
                    path: false,
                }
            }
            "and" | "or" => {
                arity(2)?;
                let joined = args
                    .iter()
                    .map(|arg| arg.wrapped(Prec::Comparison))
                    .collect::<Vec<_>>()
                    .join(&format!(" {name} "));
                Expr {
                    text: joined,
                    prec: Prec::Logic,
                    path: false,
                }
            }
            "eq" => {
                arity(2)?;
                let lhs = args[0].wrapped(Prec::Atom);
                let alternatives: Vec<_> = args[1..]
                    .iter()
                    .map(|rhs| format!("{lhs} == {}", rhs.wrapped(Prec::Atom)))
                    .collect();
                if alternatives.len() == 1 {
                    Expr {
                        text: alternatives[0].clone(),
                        prec: Prec::Comparison,
                        path: false,
                    }
                } else {
                    Expr {
                        text: alternatives.join(" or "),
                        prec: Prec::Logic,
                        path: false,
                    }
                }
            }
            "ne" | "lt" | "le" | "gt" | "ge" => {
                arity(2)?;
                let op = match name.as_str() {
                    "ne" => "!=",
                    "lt" => "<",
                    "le" => "<=",
                    "gt" => ">",
                    _ => ">=",
                };
                Expr {
                    text: format!("{} {op} {}", args[0].wrapped(Prec::Atom), args[1].wrapped(Prec::Atom)),
                    prec: Prec::Comparison,
                    path: false,
                }
            }
            "len" => {
                arity(1)?;
                Expr::atom(format!("{} | length", args[0].wrapped(Prec::Atom)), false)
            }
            _ => {
                arity(2)?;
                let mut text = args[0].text.clone();
                if !args[0].path {
                    return Err("index needs a field or variable as its first argument".into());
                }
                for key in &args[1..] {
                    if key.text.chars().all(|c| c.is_ascii_digit()) {
                        text = format!("{text}.{}", key.text);
                    } else if key.path || key.text.starts_with('"') {
                        text = format!("{text}[{}]", key.text);
                    } else {
                        return Err(format!("can't index with {}", key.text));
                    }
                }
                Expr::atom(text, true)
            }
        };

        Ok(lowered)
    }

    fn operand(&mut self) -> Result<Expr, String> {
        let tokens = self.tokens;
        let token = tokens.get(self.pos).ok_or_else(|| "missing value".to_string())?;
        self.pos += 1;

        match token {
            Token::Open => {
                let inner = self.call()?;
                match self.peek() {
                    Some(Token::Close) => {
                        self.pos += 1;
                        Ok(inner)
                    }
                    _ => Err("unclosed parenthesis".into()),
                }
            }
            Token::Close => Err("unexpected )".into()),
            Token::Str(value) => Ok(Expr::atom(
                format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\"")),
                false,
            )),
            Token::Word(word) => self.word(word),
        }
    }

    fn word(&mut self, word: &str) -> Result<Expr, String> {
        if word == "." {
            let text = self.dot.unwrap_or("__tera_context").to_string();
            return Ok(Expr::atom(text, self.dot.is_some()));
        }
        if word == "$" {
            return Ok(Expr::atom("__tera_context".into(), false));
        }
        if word == "true" || word == "false" || is_number(word) {
            return Ok(Expr::atom(word.to_string(), false));
        }
        if word == "nil" {
            return Err("nil is not a value".into());
        }

        // (base, dotted field path): base is a bound name, `None` for the page.
        let (base, fields) = if let Some(fields) = word.strip_prefix("$.") {
            (None, fields)
        } else if let Some(var) = word.strip_prefix('$') {
            match var.split_once('.') {
                Some((name, fields)) => (Some(name), fields),
                None => (Some(var), ""),
            }
        } else if let Some(fields) = word.strip_prefix('.') {
            (self.dot, fields)
        } else {
            (None, word)
        };

        let valid = base.is_none_or(is_name)
            && (fields.is_empty() && base.is_some() || fields.split('.').all(is_name));
        if !valid {
            return Err(format!("bad field {word:?}"));
        }

        let mut path = String::new();
        for (i, field) in fields.split('.').filter(|f| !f.is_empty()).enumerate() {
            if i > 0 || base.is_some() {
                path.push('.');
                path.push_str(field);
            } else if clashes_with_literal(field) {
                self.uses_root = true;
                path = format!("{ROOT_VAR}[\"{field}\"]");
            } else {
                path.push_str(field);
            }
        }
        if let Some(base) = base {
            path.insert_str(0, base);
        }

        Ok(Expr::atom(path, true))
    }
}

fn is_name(part: &str) -> bool {
    !part.is_empty() && part.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// Root field names tera would parse as a literal, keyword or number.
fn clashes_with_literal(field: &str) -> bool {
    matches!(
        field,
        "true" | "false" | "True" | "False" | "and" | "or" | "not" | "in" | "is" | "loop"
    ) || field.starts_with(|c: char| c.is_ascii_digit())
}

fn is_number(word: &str) -> bool {
    let digits = word.strip_prefix('-').unwrap_or(word);
    !digits.is_empty()
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
        && digits.chars().filter(|c| *c == '.').count() <= 1
        && !digits.starts_with('.')
}
