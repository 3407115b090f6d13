//! Pipeline execution: pipe creation, one forked child per stage, stream
//! rewiring, and foreground wait / background job recording.
//!
//! Pipe ends are `OwnedFd`, so every end the parent no longer needs is
//! closed by drop on every path. Pipes are opened with `O_CLOEXEC`; `dup2`
//! clears the flag on fds 0/1, so no stray pipe end survives `execvp`. A
//! surviving writable duplicate would keep the downstream reader from ever
//! seeing end-of-stream.

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::Mutex;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::wait::waitpid;
use nix::unistd::{dup2, execvp, fork, pipe2, ForkResult, Pid};
use thiserror::Error;

use crate::job::{self, JobTable};
use crate::parser::{Pipeline, Stage};

/// Parent-side failure; abandons the whole pipeline for this line.
#[derive(Debug, Error)]
pub enum ExecError {
	#[error("pipe: {0}")]
	Pipe(Errno),
	#[error("fork: {0}")]
	Fork(Errno),
}

/// Child-side failure, reported by the one affected stage before it exits.
#[derive(Debug, Error)]
enum StageError {
	#[error("{path}: {err}")]
	Open { path: String, err: std::io::Error },
	#[error("{0}: {1}")]
	Exec(String, Errno),
	#[error("dup2: {0}")]
	Dup(Errno),
	#[error("{0}: argument contains NUL byte")]
	Nul(String),
}

impl StageError {
	fn exit_code(&self) -> i32 {
		match self {
			StageError::Exec(..) => 127,
			_ => 1,
		}
	}
}

/// Launches every stage, then either records the pipeline in the job table
/// (background) or waits for the last stage (foreground). Earlier stages are
/// reaped asynchronously by the reaper thread.
pub fn run_pipeline(
	table: &Mutex<JobTable>,
	pipeline: &Pipeline,
	cmdline: &str,
) -> Result<(), ExecError> {
	let n = pipeline.stages.len();
	let mut prev_read: Option<OwnedFd> = None;
	let mut last_pid: Option<Pid> = None;

	for (i, stage) in pipeline.stages.iter().enumerate() {
		let next = if i + 1 < n {
			Some(pipe2(OFlag::O_CLOEXEC).map_err(ExecError::Pipe)?)
		} else {
			None
		};
		// SAFETY: the child only rewires descriptors and execs
		match unsafe { fork() }.map_err(ExecError::Fork)? {
			ForkResult::Child => {
				let pipe_out = next.map(|(_read, write)| write);
				run_stage(stage, prev_read.take(), pipe_out);
			}
			ForkResult::Parent { child } => {
				log::debug!("spawned pid {} for stage {}", child, i);
				last_pid = Some(child);
				// drops the previous read end and this pipe's write end
				prev_read = next.map(|(read, _write)| read);
			}
		}
	}

	let Some(last) = last_pid else { return Ok(()) };

	if pipeline.background {
		match job::lock(table).add(last, cmdline) {
			Ok(slot) => println!("[{}] {}", slot, last),
			Err(job::TableFull) => {
				eprintln!("msh: job table full, pid {} runs untracked", last)
			}
		}
	} else {
		wait_foreground(last);
	}
	Ok(())
}

/// Blocks until the pipeline's last stage terminates. Interruption by the
/// reaper firing mid-wait is retried, not surfaced.
fn wait_foreground(pid: Pid) {
	loop {
		match waitpid(pid, None) {
			Ok(_) => return,
			Err(Errno::EINTR) => continue,
			// the reaper thread consumed the status first
			Err(Errno::ECHILD) => return,
			Err(e) => {
				eprintln!("msh: waitpid: {}", e);
				return;
			}
		}
	}
}

/// Forked-child entry point; never returns into the interpreter's loop.
fn run_stage(stage: &Stage, pipe_in: Option<OwnedFd>, pipe_out: Option<OwnedFd>) -> ! {
	let code = match exec_stage(stage, pipe_in, pipe_out) {
		Ok(code) => code,
		Err(e) => {
			eprintln!("msh: {}", e);
			e.exit_code()
		}
	};
	unsafe { libc::_exit(code) }
}

fn exec_stage(
	stage: &Stage,
	pipe_in: Option<OwnedFd>,
	pipe_out: Option<OwnedFd>,
) -> Result<i32, StageError> {
	if let Some(fd) = &pipe_in {
		dup2(fd.as_raw_fd(), libc::STDIN_FILENO).map_err(StageError::Dup)?;
	}
	if let Some(fd) = &pipe_out {
		dup2(fd.as_raw_fd(), libc::STDOUT_FILENO).map_err(StageError::Dup)?;
	}
	drop(pipe_in);
	drop(pipe_out);

	// an explicit redirection overrides the pipe connection, on any stage
	if let Some(path) = &stage.stdin_file {
		let file = File::open(path).map_err(|err| StageError::Open {
			path: path.clone(),
			err,
		})?;
		dup2(file.as_raw_fd(), libc::STDIN_FILENO).map_err(StageError::Dup)?;
	}
	if let Some(path) = &stage.stdout_file {
		let mut options = OpenOptions::new();
		options.write(true).create(true);
		if stage.append {
			options.append(true);
		} else {
			options.truncate(true);
		}
		let file = options.open(path).map_err(|err| StageError::Open {
			path: path.clone(),
			err,
		})?;
		dup2(file.as_raw_fd(), libc::STDOUT_FILENO).map_err(StageError::Dup)?;
	}

	// an empty stage (e.g. trailing `|`) is a successful no-op
	let Some(name) = stage.argv.first() else {
		return Ok(0);
	};

	let argv = stage
		.argv
		.iter()
		.map(|arg| CString::new(arg.as_str()))
		.collect::<Result<Vec<_>, _>>()
		.map_err(|_| StageError::Nul(name.clone()))?;
	match execvp(&argv[0], &argv) {
		Ok(infallible) => match infallible {},
		Err(e) => Err(StageError::Exec(name.clone(), e)),
	}
}
