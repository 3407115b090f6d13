//! Splits one input line into a flat token sequence.
//!
//! `|`, `<`, `>`, `>>` and `&` are operator tokens even without surrounding
//! whitespace; quoted spans make whitespace and operator characters literal
//! and the quote characters themselves are stripped.

use std::iter::Peekable;
use std::str::Chars;

use thiserror::Error;

/// Upper bound on tokens per line.
pub const MAX_TOKENS: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
	Word(String),
	Pipe,
	RedirectIn,
	RedirectOut,
	RedirectAppend,
	Background,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenizeError {
	#[error("too many tokens on one line (max {0})")]
	TooManyTokens(usize),
}

fn is_space(c: char) -> bool {
	matches!(c, ' ' | '\t' | '\n')
}

fn is_operator(c: char) -> bool {
	matches!(c, '|' | '<' | '>' | '&')
}

/// Reads a word token: runs until unquoted whitespace or an unquoted
/// operator character. A quote may open mid-word; an unterminated quote
/// consumes the rest of the line.
fn read_word(chars: &mut Peekable<Chars>) -> String {
	let mut word = String::new();
	let mut quote: Option<char> = None;
	while let Some(&c) = chars.peek() {
		match quote {
			Some(q) if c == q => quote = None,
			Some(_) => word.push(c),
			None => match c {
				'\'' | '"' => quote = Some(c),
				c if is_space(c) || is_operator(c) => break,
				c => word.push(c),
			},
		}
		chars.next();
	}
	word
}

pub fn tokenize(line: &str) -> Result<Vec<Token>, TokenizeError> {
	let mut tokens = Vec::new();
	let mut chars = line.chars().peekable();
	loop {
		while chars.peek().is_some_and(|&c| is_space(c)) {
			chars.next();
		}
		let Some(&c) = chars.peek() else { break };
		let token = match c {
			'|' => {
				chars.next();
				Token::Pipe
			}
			'&' => {
				chars.next();
				Token::Background
			}
			'<' => {
				chars.next();
				Token::RedirectIn
			}
			'>' => {
				chars.next();
				// one character of lookahead distinguishes > from >>
				if chars.peek() == Some(&'>') {
					chars.next();
					Token::RedirectAppend
				} else {
					Token::RedirectOut
				}
			}
			_ => Token::Word(read_word(&mut chars)),
		};
		if tokens.len() == MAX_TOKENS {
			return Err(TokenizeError::TooManyTokens(MAX_TOKENS));
		}
		tokens.push(token);
	}
	Ok(tokens)
}
