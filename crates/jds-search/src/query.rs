//! Query parsing.
//!
//! Grammar, tokens separated by whitespace:
//!
//! - `word`: partial or exact match
//! - `"a phrase"`: partial or exact match, whitespace preserved
//! - `/pattern/flags`: regular expression (`i`, `m`, `s`, `x` flags)
//! - `=word` or `="a phrase"`: exact match only
//!
//! A query whose trimmed text begins with `=` is one exact token made of the
//! whole remainder, so `=Hello World` looks for exactly `Hello World`.

use serde::{Deserialize, Serialize};

/// How a token is matched against a candidate string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    /// Bare word: exact on equality, partial on substring.
    Word,
    /// Quoted phrase: same rules as a word.
    Phrase,
    /// `=literal`: exact equality only.
    Exact,
    /// `/pattern/flags`: exact on a full-string match, partial otherwise.
    Regex,
}

/// A normalized query token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    /// Literal text, or the regex pattern for [`TokenKind::Regex`].
    pub text: String,
    /// Regex flags as written after the closing slash, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<String>,
}

impl Token {
    pub fn word(text: impl Into<String>) -> Self {
        Self::literal(TokenKind::Word, text)
    }

    pub fn phrase(text: impl Into<String>) -> Self {
        Self::literal(TokenKind::Phrase, text)
    }

    pub fn exact(text: impl Into<String>) -> Self {
        Self::literal(TokenKind::Exact, text)
    }

    pub fn regex(pattern: impl Into<String>, flags: Option<&str>) -> Self {
        Self {
            kind: TokenKind::Regex,
            text: pattern.into(),
            flags: flags.filter(|f| !f.is_empty()).map(str::to_string),
        }
    }

    fn literal(kind: TokenKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            flags: None,
        }
    }
}

/// A search query: free text, or tokens the caller already structured.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Query {
    Text(String),
    Tokens(Vec<Token>),
}

impl Query {
    /// Normalize the query into its token list.
    pub fn tokens(&self) -> Vec<Token> {
        match self {
            Self::Text(text) => parse_query(text),
            Self::Tokens(tokens) => tokens.clone(),
        }
    }
}

impl From<&str> for Query {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Query {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<Token>> for Query {
    fn from(tokens: Vec<Token>) -> Self {
        Self::Tokens(tokens)
    }
}

/// Split free text into tokens.
pub fn parse_query(text: &str) -> Vec<Token> {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix('=') {
        return vec![Token::exact(unquote(rest.trim()))];
    }

    let chars: Vec<char> = trimmed.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        if chars[pos].is_whitespace() {
            pos += 1;
            continue;
        }
        match chars[pos] {
            '"' => {
                let (text, next) = read_quoted(&chars, pos);
                tokens.push(Token::phrase(text));
                pos = next;
            }
            '=' if chars.get(pos + 1) == Some(&'"') => {
                let (text, next) = read_quoted(&chars, pos + 1);
                tokens.push(Token::exact(text));
                pos = next;
            }
            '=' => {
                let (text, next) = read_word(&chars, pos + 1);
                tokens.push(Token::exact(text));
                pos = next;
            }
            '/' => match read_regex(&chars, pos) {
                Some((pattern, flags, next)) => {
                    tokens.push(Token::regex(pattern, Some(&flags)));
                    pos = next;
                }
                None => {
                    let (text, next) = read_word(&chars, pos);
                    tokens.push(Token::word(text));
                    pos = next;
                }
            },
            _ => {
                let (text, next) = read_word(&chars, pos);
                tokens.push(Token::word(text));
                pos = next;
            }
        }
    }

    tokens
}

fn unquote(text: &str) -> String {
    text.strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(text)
        .to_string()
}

/// Read a `"..."` phrase starting at the opening quote. An unclosed quote
/// runs to the end of the input.
fn read_quoted(chars: &[char], open: usize) -> (String, usize) {
    let mut pos = open + 1;
    let mut out = String::new();
    while pos < chars.len() && chars[pos] != '"' {
        out.push(chars[pos]);
        pos += 1;
    }
    (out, (pos + 1).min(chars.len()))
}

fn read_word(chars: &[char], start: usize) -> (String, usize) {
    let mut pos = start;
    while pos < chars.len() && !chars[pos].is_whitespace() {
        pos += 1;
    }
    (chars[start..pos].iter().collect(), pos)
}

/// Read `/pattern/flags`. Returns `None` when there is no closing slash or
/// the flags run into something other than whitespace.
fn read_regex(chars: &[char], open: usize) -> Option<(String, String, usize)> {
    let mut pos = open + 1;
    let mut pattern = String::new();
    loop {
        let c = *chars.get(pos)?;
        if c == '\\' {
            pattern.push(c);
            pattern.push(*chars.get(pos + 1)?);
            pos += 2;
            continue;
        }
        if c == '/' {
            break;
        }
        pattern.push(c);
        pos += 1;
    }
    if pattern.is_empty() {
        return None;
    }

    pos += 1;
    let mut flags = String::new();
    while pos < chars.len() && chars[pos].is_ascii_alphabetic() {
        flags.push(chars[pos]);
        pos += 1;
    }
    if pos < chars.len() && !chars[pos].is_whitespace() {
        return None;
    }
    Some((pattern, flags, pos))
}
