//! Commands that run inside the interpreter's own process.
//!
//! Only a single-stage pipeline with no redirections is dispatched here;
//! anything else is a plain one-stage pipeline for the executor.

use std::env;
use std::process;
use std::sync::Mutex;

use crate::job::{self, JobTable};

type Builtin = fn(&Mutex<JobTable>, &[String]) -> i32;

/// `cd [dir]`: change the process-wide working directory, defaulting to
/// `$HOME`. Failure is reported and the interpreter continues.
fn builtin_cd(_table: &Mutex<JobTable>, args: &[String]) -> i32 {
	let dir = match args.first() {
		Some(arg) => arg.clone(),
		None => match env::var("HOME") {
			Ok(home) => home,
			Err(_) => {
				eprintln!("cd: HOME not set");
				return 1;
			}
		},
	};
	if let Err(e) = env::set_current_dir(&dir) {
		eprintln!("cd: {}: {}", dir, e);
		return 1;
	}
	0
}

/// `exit`: end the interpreter with status 0. Outstanding background jobs
/// are reported but neither waited for nor killed.
fn builtin_exit(table: &Mutex<JobTable>, _args: &[String]) -> i32 {
	let running = job::lock(table).active_count();
	if running > 0 {
		eprintln!("exit: leaving {} background job(s) behind", running);
	}
	process::exit(0)
}

/// `jobs`: print every active job record in slot order.
fn builtin_jobs(table: &Mutex<JobTable>, _args: &[String]) -> i32 {
	for (slot, job) in job::lock(table).active() {
		println!("[{}] {}  {}", slot, job.pid, job.cmdline);
	}
	0
}

pub fn match_builtin(name: &str) -> Option<Builtin> {
	match name {
		"cd" => Some(builtin_cd),
		"exit" => Some(builtin_exit),
		"jobs" => Some(builtin_jobs),
		_ => None,
	}
}
