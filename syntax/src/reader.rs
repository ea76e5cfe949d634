//! S-expression reader.
//!
//! The reader establishes the initial (empty) scope set and the source
//! locations for every node it produces. Accepted concrete syntax: an
//! optional `#lang IDENT` header, lists `(...)`, vectors `[...]`,
//! R6RS-ish identifiers plus the literal identifiers `+`, `-`, `...` and
//! the `#%`-prefixed ones, booleans `#t`/`#true`/`#f`/`#false`, decimal
//! signal literals, and escaped strings. `;` starts a line comment.

use crate::scopes::ScopeSet;
use crate::syntax::{SrcLoc, Syntax, SyntaxKind};
use std::iter::Peekable;
use std::str::Chars;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReadError {
    #[error("{loc}: unexpected end of input")]
    UnexpectedEof { loc: SrcLoc },
    #[error("{loc}: unexpected character `{ch}`")]
    UnexpectedChar { ch: char, loc: SrcLoc },
    #[error("{loc}: unmatched `{ch}`")]
    UnmatchedDelimiter { ch: char, loc: SrcLoc },
    #[error("{loc}: bad string escape `\\{ch}`")]
    BadEscape { ch: char, loc: SrcLoc },
    #[error("{loc}: unknown `#` syntax `#{word}`")]
    UnknownHashSyntax { word: String, loc: SrcLoc },
    #[error("{loc}: signal literal does not fit in 64 bits")]
    SignalTooLarge { loc: SrcLoc },
    #[error("{loc}: `#lang` is only allowed at the start of a module")]
    MisplacedLangHeader { loc: SrcLoc },
    #[error("{loc}: `#lang` must be followed by an identifier")]
    BadLangHeader { loc: SrcLoc },
}

/// A whole source file: the optional `#lang` header plus the body forms.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceModule {
    pub lang: Option<Syntax>,
    pub body: Vec<Syntax>,
}

fn is_special_initial(c: char) -> bool {
    "!$%&*/:<=>?^_~".contains(c)
}

fn is_initial(c: char) -> bool {
    c.is_alphabetic() || is_special_initial(c)
}

fn is_subsequent(c: char) -> bool {
    is_initial(c) || c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | '@')
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | '[' | ']' | '"' | ';')
}

struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    file: Arc<str>,
    line: u32,
    col: u32,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str, file: Arc<str>) -> Self {
        Lexer {
            chars: input.chars().peekable(),
            file,
            line: 1,
            col: 1,
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn next(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn mark(&self) -> (u32, u32) {
        (self.line, self.col)
    }

    fn loc_from(&self, start: (u32, u32)) -> SrcLoc {
        SrcLoc::new(self.file.clone(), start, self.mark())
    }

    fn loc_here(&self) -> SrcLoc {
        SrcLoc::new(self.file.clone(), self.mark(), self.mark())
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.next();
            } else if c == ';' {
                while let Some(nc) = self.peek() {
                    if nc == '\n' {
                        break;
                    }
                    self.next();
                }
            } else {
                break;
            }
        }
    }

    fn at_delimiter(&mut self) -> bool {
        match self.peek() {
            Some(c) => is_delimiter(c),
            None => true,
        }
    }
}

pub struct Reader<'a> {
    lexer: Lexer<'a>,
}

impl<'a> Reader<'a> {
    pub fn new(input: &'a str, file: &str) -> Self {
        Reader {
            lexer: Lexer::new(input, Arc::from(file)),
        }
    }

    /// Read every form in the input. `#lang` headers are rejected here;
    /// use [`Reader::read_module`] for whole files.
    pub fn read_all(&mut self) -> Result<Vec<Syntax>, ReadError> {
        let mut forms = Vec::new();
        self.lexer.skip_whitespace();
        while self.lexer.peek().is_some() {
            forms.push(self.read_expr()?);
            self.lexer.skip_whitespace();
        }
        Ok(forms)
    }

    /// Read a whole file: an optional `#lang IDENT` header followed by the
    /// body forms.
    pub fn read_module(&mut self) -> Result<SourceModule, ReadError> {
        self.lexer.skip_whitespace();
        let mut lang = None;
        let mut body = Vec::new();
        // `#lang` shares its leading character with booleans and the
        // `#%` identifiers; read the hash word first and reinterpret a
        // non-header as the first body form.
        if self.lexer.peek() == Some('#') {
            let start = self.lexer.mark();
            self.lexer.next(); // eat '#'
            let word = self.read_word();
            if word == "lang" {
                self.lexer.skip_whitespace();
                let ident = self.read_expr()?;
                match &ident.kind {
                    SyntaxKind::Id(_) => lang = Some(ident),
                    _ => {
                        return Err(ReadError::BadLangHeader {
                            loc: self.lexer.loc_from(start),
                        })
                    }
                }
            } else {
                body.push(self.hash_form(&word, start)?);
            }
        }
        body.extend(self.read_all()?);
        Ok(SourceModule { lang, body })
    }

    fn read_word(&mut self) -> String {
        let mut word = String::new();
        while let Some(c) = self.lexer.peek() {
            if is_subsequent(c) {
                word.push(c);
                self.lexer.next();
            } else {
                break;
            }
        }
        word
    }

    fn read_expr(&mut self) -> Result<Syntax, ReadError> {
        self.lexer.skip_whitespace();
        let start = self.lexer.mark();
        match self.lexer.peek() {
            Some('(') => {
                self.lexer.next();
                self.read_sequence(start, ')')
            }
            Some('[') => {
                self.lexer.next();
                self.read_sequence(start, ']')
            }
            Some(ch @ (')' | ']')) => Err(ReadError::UnmatchedDelimiter {
                ch,
                loc: self.lexer.loc_here(),
            }),
            Some('"') => self.read_string(start),
            Some('#') => {
                self.lexer.next();
                let word = self.read_word();
                if word == "lang" {
                    return Err(ReadError::MisplacedLangHeader {
                        loc: self.lexer.loc_from(start),
                    });
                }
                self.hash_form(&word, start)
            }
            Some(c) if c.is_ascii_digit() => self.read_signal(start),
            Some(c @ ('+' | '-')) => {
                self.lexer.next();
                if self.lexer.at_delimiter() {
                    Ok(self.atom(SyntaxKind::Id(c.to_string()), start))
                } else {
                    Err(ReadError::UnexpectedChar {
                        ch: self.lexer.peek().unwrap_or('\0'),
                        loc: self.lexer.loc_here(),
                    })
                }
            }
            Some('.') => {
                let mut dots = String::new();
                while self.lexer.peek() == Some('.') {
                    dots.push('.');
                    self.lexer.next();
                }
                if dots == "..." && self.lexer.at_delimiter() {
                    Ok(self.atom(SyntaxKind::Id(dots), start))
                } else {
                    Err(ReadError::UnexpectedChar {
                        ch: '.',
                        loc: self.lexer.loc_from(start),
                    })
                }
            }
            Some(c) if is_initial(c) => self.read_identifier(start),
            Some(ch) => Err(ReadError::UnexpectedChar {
                ch,
                loc: self.lexer.loc_here(),
            }),
            None => Err(ReadError::UnexpectedEof {
                loc: self.lexer.loc_here(),
            }),
        }
    }

    fn read_sequence(&mut self, start: (u32, u32), close: char) -> Result<Syntax, ReadError> {
        let mut items = Vec::new();
        loop {
            self.lexer.skip_whitespace();
            match self.lexer.peek() {
                Some(c) if c == close => {
                    self.lexer.next();
                    let loc = self.lexer.loc_from(start);
                    let kind = if close == ')' {
                        SyntaxKind::List(items)
                    } else {
                        SyntaxKind::Vec(items)
                    };
                    return Ok(Syntax::new(kind, ScopeSet::empty(), loc));
                }
                Some(ch @ (')' | ']')) => {
                    return Err(ReadError::UnmatchedDelimiter {
                        ch,
                        loc: self.lexer.loc_here(),
                    })
                }
                None => {
                    return Err(ReadError::UnexpectedEof {
                        loc: self.lexer.loc_here(),
                    })
                }
                _ => items.push(self.read_expr()?),
            }
        }
    }

    fn read_string(&mut self, start: (u32, u32)) -> Result<Syntax, ReadError> {
        self.lexer.next(); // eat opening quote
        let mut out = String::new();
        loop {
            match self.lexer.next() {
                None => {
                    return Err(ReadError::UnexpectedEof {
                        loc: self.lexer.loc_here(),
                    })
                }
                Some('"') => return Ok(self.atom(SyntaxKind::Str(out), start)),
                Some('\\') => match self.lexer.next() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('\\') => out.push('\\'),
                    Some('"') => out.push('"'),
                    Some(ch) => {
                        return Err(ReadError::BadEscape {
                            ch,
                            loc: self.lexer.loc_here(),
                        })
                    }
                    None => {
                        return Err(ReadError::UnexpectedEof {
                            loc: self.lexer.loc_here(),
                        })
                    }
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn read_signal(&mut self, start: (u32, u32)) -> Result<Syntax, ReadError> {
        let mut digits = String::new();
        while let Some(c) = self.lexer.peek() {
            if c.is_ascii_digit() {
                digits.push(c);
                self.lexer.next();
            } else {
                break;
            }
        }
        let n: u64 = digits
            .parse()
            .map_err(|_| ReadError::SignalTooLarge {
                loc: self.lexer.loc_from(start),
            })?;
        Ok(self.atom(SyntaxKind::Sig(n), start))
    }

    fn read_identifier(&mut self, start: (u32, u32)) -> Result<Syntax, ReadError> {
        let word = self.read_word();
        Ok(self.atom(SyntaxKind::Id(word), start))
    }

    fn hash_form(&mut self, word: &str, start: (u32, u32)) -> Result<Syntax, ReadError> {
        match word {
            "t" | "true" => Ok(self.atom(SyntaxKind::Bool(true), start)),
            "f" | "false" => Ok(self.atom(SyntaxKind::Bool(false), start)),
            _ if word.starts_with('%') && word.len() > 1 => {
                Ok(self.atom(SyntaxKind::Id(format!("#{}", word)), start))
            }
            _ => Err(ReadError::UnknownHashSyntax {
                word: word.to_string(),
                loc: self.lexer.loc_from(start),
            }),
        }
    }

    fn atom(&self, kind: SyntaxKind, start: (u32, u32)) -> Syntax {
        Syntax::new(kind, ScopeSet::empty(), self.lexer.loc_from(start))
    }
}

/// Convenience wrapper: read every form of `input`.
pub fn read_all(input: &str, file: &str) -> Result<Vec<Syntax>, ReadError> {
    Reader::new(input, file).read_all()
}

/// Convenience wrapper: read a whole module, header included.
pub fn read_module(input: &str, file: &str) -> Result<SourceModule, ReadError> {
    Reader::new(input, file).read_module()
}
