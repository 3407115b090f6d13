//! Turns a token sequence into a pipeline of command stages.

use std::mem;

use thiserror::Error;

use crate::token::Token;

/// Upper bound on stages per pipeline.
pub const MAX_STAGES: usize = 64;

/// One command within a pipeline: its argument vector (first element is the
/// program name by convention) and optional per-stage redirections.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Stage {
	pub argv: Vec<String>,
	pub stdin_file: Option<String>,
	pub stdout_file: Option<String>,
	/// Append instead of truncate; meaningful only with `stdout_file`.
	pub append: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Pipeline {
	pub stages: Vec<Stage>,
	/// Applies to the whole pipeline, not to individual stages.
	pub background: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
	#[error("syntax error: `{0}` needs a file")]
	MissingTarget(&'static str),
	#[error("too many pipeline segments (max {0})")]
	TooManyStages(usize),
}

fn expect_word(
	tokens: &mut impl Iterator<Item = Token>,
	op: &'static str,
) -> Result<String, ParseError> {
	match tokens.next() {
		Some(Token::Word(w)) => Ok(w),
		_ => Err(ParseError::MissingTarget(op)),
	}
}

/// Consumes the token sequence left to right exactly once.
pub fn parse(tokens: Vec<Token>) -> Result<Pipeline, ParseError> {
	let mut stages: Vec<Stage> = Vec::new();
	let mut current = Stage::default();
	let mut background = false;

	let mut tokens = tokens.into_iter();
	while let Some(token) = tokens.next() {
		match token {
			Token::Word(w) => current.argv.push(w),
			Token::Pipe => {
				if stages.len() + 1 == MAX_STAGES {
					return Err(ParseError::TooManyStages(MAX_STAGES));
				}
				stages.push(mem::take(&mut current));
			}
			Token::RedirectIn => {
				current.stdin_file = Some(expect_word(&mut tokens, "<")?);
			}
			Token::RedirectOut => {
				current.stdout_file = Some(expect_word(&mut tokens, ">")?);
				current.append = false;
			}
			Token::RedirectAppend => {
				current.stdout_file = Some(expect_word(&mut tokens, ">>")?);
				current.append = true;
			}
			// may appear anywhere; does not open a new stage
			Token::Background => background = true,
		}
	}
	stages.push(current);

	Ok(Pipeline { stages, background })
}

impl Stage {
	pub fn has_redirect(&self) -> bool {
		self.stdin_file.is_some() || self.stdout_file.is_some()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::token::tokenize;

	fn parse_line(line: &str) -> Result<Pipeline, ParseError> {
		parse(tokenize(line).unwrap())
	}

	fn argv(stage: &Stage) -> Vec<&str> {
		stage.argv.iter().map(String::as_str).collect()
	}

	#[test]
	fn single_stage_keeps_word_order() {
		let p = parse_line("echo one 'two three' four").unwrap();
		assert_eq!(p.stages.len(), 1);
		assert_eq!(argv(&p.stages[0]), ["echo", "one", "two three", "four"]);
		assert!(!p.background);
		assert!(!p.stages[0].has_redirect());
	}

	#[test]
	fn pipe_opens_new_stage() {
		let p = parse_line("a | b | c").unwrap();
		assert_eq!(p.stages.len(), 3);
		assert_eq!(argv(&p.stages[0]), ["a"]);
		assert_eq!(argv(&p.stages[1]), ["b"]);
		assert_eq!(argv(&p.stages[2]), ["c"]);
	}

	#[test]
	fn redirections_attach_to_their_stage() {
		let p = parse_line("sort < in.txt | uniq > out.txt").unwrap();
		assert_eq!(p.stages[0].stdin_file.as_deref(), Some("in.txt"));
		assert_eq!(p.stages[0].stdout_file, None);
		assert_eq!(p.stages[1].stdout_file.as_deref(), Some("out.txt"));
		assert!(!p.stages[1].append);
	}

	#[test]
	fn append_flag_only_for_double_arrow() {
		let p = parse_line("echo x >> log").unwrap();
		assert_eq!(p.stages[0].stdout_file.as_deref(), Some("log"));
		assert!(p.stages[0].append);
		let p = parse_line("echo x >> log > log2").unwrap();
		assert_eq!(p.stages[0].stdout_file.as_deref(), Some("log2"));
		assert!(!p.stages[0].append);
	}

	#[test]
	fn background_anywhere() {
		assert!(parse_line("sleep 1 &").unwrap().background);
		let p = parse_line("a & | b").unwrap();
		assert!(p.background);
		assert_eq!(p.stages.len(), 2);
		assert_eq!(argv(&p.stages[0]), ["a"]);
	}

	#[test]
	fn missing_redirect_target() {
		assert_eq!(parse_line("cat <"), Err(ParseError::MissingTarget("<")));
		assert_eq!(parse_line("cat >"), Err(ParseError::MissingTarget(">")));
		assert_eq!(
			parse_line("cat >> | x"),
			Err(ParseError::MissingTarget(">>"))
		);
	}

	#[test]
	fn trailing_pipe_yields_empty_stage() {
		let p = parse_line("echo hi |").unwrap();
		assert_eq!(p.stages.len(), 2);
		assert!(p.stages[1].argv.is_empty());
	}

	#[test]
	fn stage_bound_is_an_error() {
		let line = vec!["x"; MAX_STAGES + 1].join(" | ");
		assert_eq!(
			parse_line(&line),
			Err(ParseError::TooManyStages(MAX_STAGES))
		);
		let line = vec!["x"; MAX_STAGES].join(" | ");
		assert_eq!(parse_line(&line).unwrap().stages.len(), MAX_STAGES);
	}
}
