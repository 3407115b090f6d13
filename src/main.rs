mod builtin;
mod exec;
mod job;
mod parser;
mod signal;
mod token;

use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::{Arc, Mutex};

use job::JobTable;

const PROMPT: &[u8] = b"msh$ ";

fn main() {
	env_logger::init();

	let table = Arc::new(Mutex::new(JobTable::new()));
	// the reaper must be live before the first pipeline launches
	if let Err(e) = signal::spawn_reaper(Arc::clone(&table)) {
		eprintln!("msh: cannot install signal handling: {}", e);
		std::process::exit(1);
	}

	let stdin = io::stdin();
	let interactive = stdin.is_terminal();
	let mut input = stdin.lock();
	let mut stdout = io::stdout();

	loop {
		for notice in job::lock(&table).drain_notices() {
			println!("{}", notice);
		}
		if interactive {
			let _ = stdout.write_all(PROMPT);
			let _ = stdout.flush();
		}

		let mut line = String::new();
		match input.read_line(&mut line) {
			Ok(0) => {
				if interactive {
					println!();
				}
				break;
			}
			Ok(_) => {}
			Err(e) => {
				eprintln!("msh: read: {}", e);
				continue;
			}
		}
		let line = line.trim();
		if line.is_empty() {
			continue;
		}
		run_line(&table, line);
	}
}

/// Tokenize, parse, and dispatch one input line. All failures are local to
/// the line; the loop continues.
fn run_line(table: &Mutex<JobTable>, line: &str) {
	let tokens = match token::tokenize(line) {
		Ok(tokens) => tokens,
		Err(e) => {
			eprintln!("msh: {}", e);
			return;
		}
	};
	if tokens.is_empty() {
		return;
	}
	let pipeline = match parser::parse(tokens) {
		Ok(pipeline) => pipeline,
		Err(e) => {
			eprintln!("msh: {}", e);
			return;
		}
	};
	log::debug!("parsed {:?}", pipeline);

	// a single redirection-free stage may be a builtin; everything else,
	// builtin-named or not, is a pipeline of external commands
	if let [stage] = pipeline.stages.as_slice() {
		if !stage.has_redirect() {
			if let Some(func) = stage.argv.first().and_then(|name| builtin::match_builtin(name)) {
				func(table, &stage.argv[1..]);
				return;
			}
		}
	}

	if let Err(e) = exec::run_pipeline(table, &pipeline, line) {
		eprintln!("msh: {}", e);
	}
}
