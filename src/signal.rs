//! Signal wiring.
//!
//! SIGCHLD and SIGINT are received on a dedicated thread via `signal_hook`,
//! keeping the handlers out of async-signal context. The thread must be
//! running before the first pipeline is launched, or early exits would pile
//! up as zombies.

use std::io::{self, IsTerminal, Write};
use std::sync::{Arc, Mutex};
use std::thread;

use signal_hook::consts::{SIGCHLD, SIGINT};
use signal_hook::iterator::Signals;

use crate::job::{self, JobTable};

pub fn spawn_reaper(table: Arc<Mutex<JobTable>>) -> io::Result<()> {
	let mut signals = Signals::new([SIGCHLD, SIGINT])?;
	thread::Builder::new()
		.name("reaper".to_string())
		.spawn(move || {
			for signal in signals.forever() {
				match signal {
					SIGCHLD => job::reap_children(&table),
					// the interpreter survives Ctrl-C; a foreground child
					// shares the terminal's process group and may die.
					// the newline drops the ^C echo, so only on a terminal
					SIGINT => {
						if io::stdin().is_terminal() {
							let mut stdout = io::stdout();
							let _ = stdout.write_all(b"\n");
							let _ = stdout.flush();
						}
					}
					_ => {}
				}
			}
		})?;
	Ok(())
}
