//! Background-job bookkeeping.
//!
//! The table is shared between the main flow and the reaper thread, so every
//! access goes through a `Mutex`. The reaper only records; completion notices
//! are queued here and printed by the main loop between prompts.

use std::collections::VecDeque;
use std::sync::Mutex;

use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

/// Upper bound on concurrently tracked jobs.
pub const MAX_JOBS: usize = 128;
/// Saved command lines longer than this are truncated.
pub const CMDLINE_MAX: usize = 512;
/// Bound on remembered statuses of children reaped before registration.
const EARLY_REAPED_MAX: usize = 32;

#[derive(Debug)]
pub struct Job {
	pub pid: Pid,
	pub cmdline: String,
}

/// Fixed-capacity slot table. Slots are allocated first-fit by lowest free
/// index, displayed 1-based, and reused after a job retires.
#[derive(Debug, Default)]
pub struct JobTable {
	slots: Vec<Option<Job>>,
	notices: VecDeque<String>,
	// statuses that arrived before the spawner recorded the job: a fast
	// child can be reaped between fork and `add`
	early_reaped: VecDeque<(Pid, String)>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct TableFull;

impl JobTable {
	pub fn new() -> JobTable {
		JobTable::default()
	}

	/// Records a backgrounded pipeline by its last-spawned pid. Returns the
	/// 1-based slot index, or `TableFull` with the job left untracked. A job
	/// whose child was already reaped is retired on the spot, so a record
	/// never outlives its process.
	pub fn add(&mut self, pid: Pid, cmdline: &str) -> Result<usize, TableFull> {
		let slot = self.insert(pid, cmdline)?;
		if let Some(i) = self.early_reaped.iter().position(|(p, _)| *p == pid) {
			if let Some((_, outcome)) = self.early_reaped.remove(i) {
				if let Some(job) = self.slots[slot - 1].take() {
					self.push_notice(slot, pid, &outcome, &job.cmdline);
				}
			}
		}
		Ok(slot)
	}

	fn insert(&mut self, pid: Pid, cmdline: &str) -> Result<usize, TableFull> {
		let job = Job {
			pid,
			cmdline: cmdline.chars().take(CMDLINE_MAX).collect(),
		};
		if let Some(i) = self.slots.iter().position(Option::is_none) {
			self.slots[i] = Some(job);
			return Ok(i + 1);
		}
		if self.slots.len() < MAX_JOBS {
			self.slots.push(Some(job));
			return Ok(self.slots.len());
		}
		Err(TableFull)
	}

	fn push_notice(&mut self, slot: usize, pid: Pid, outcome: &str, cmdline: &str) {
		self.notices.push_back(format!(
			"Job [{}] {} {}: {}",
			slot, pid, outcome, cmdline
		));
	}

	/// Marks the job with `pid` inactive and queues its completion notice.
	/// A pid with no active record is remembered in a bounded list in case
	/// its registration is still in flight; stale entries age out.
	pub fn retire(&mut self, status: WaitStatus) {
		let (pid, outcome) = match status {
			WaitStatus::Exited(pid, code) => (pid, format!("finished (exit {})", code)),
			WaitStatus::Signaled(pid, signal, _) => {
				(pid, format!("killed by signal {}", signal as i32))
			}
			_ => return,
		};
		for i in 0..self.slots.len() {
			if let Some(job) = self.slots[i].take_if(|job| job.pid == pid) {
				self.push_notice(i + 1, pid, &outcome, &job.cmdline);
				return;
			}
		}
		// either a foreground child reaped incidentally, or a background
		// child that beat its own registration; keep the status so `add`
		// can retire the job on arrival
		if self.early_reaped.len() == EARLY_REAPED_MAX {
			self.early_reaped.pop_front();
		}
		self.early_reaped.push_back((pid, outcome));
		log::debug!("reaped pid {} with no active record", pid);
	}

	/// Active jobs in slot order, with their 1-based display index.
	pub fn active(&self) -> impl Iterator<Item = (usize, &Job)> {
		self.slots
			.iter()
			.enumerate()
			.filter_map(|(i, slot)| slot.as_ref().map(|job| (i + 1, job)))
	}

	pub fn active_count(&self) -> usize {
		self.active().count()
	}

	pub fn drain_notices(&mut self) -> Vec<String> {
		self.notices.drain(..).collect()
	}
}

pub(crate) fn lock(table: &Mutex<JobTable>) -> std::sync::MutexGuard<'_, JobTable> {
	// a poisoned table is still usable; no invariant spans the panic point
	table.lock().unwrap_or_else(|e| e.into_inner())
}

/// Drains all currently-terminated children without blocking. Several exits
/// may collapse into a single SIGCHLD wake-up, hence the loop.
pub fn reap_children(table: &Mutex<JobTable>) {
	loop {
		match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
			Ok(WaitStatus::StillAlive) => break,
			Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => {
				log::debug!("reaped {:?}", status);
				lock(table).retire(status);
			}
			Ok(_) => continue,
			Err(Errno::ECHILD) => break,
			Err(Errno::EINTR) => continue,
			Err(e) => {
				log::debug!("waitpid failed in reaper: {}", e);
				break;
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn pid(n: i32) -> Pid {
		Pid::from_raw(n)
	}

	#[test]
	fn slots_allocate_first_fit() {
		let mut table = JobTable::new();
		assert_eq!(table.add(pid(10), "a"), Ok(1));
		assert_eq!(table.add(pid(11), "b"), Ok(2));
		assert_eq!(table.add(pid(12), "c"), Ok(3));

		table.retire(WaitStatus::Exited(pid(11), 0));
		assert_eq!(table.active_count(), 2);
		// lowest free slot is reused, later slots keep their index
		assert_eq!(table.add(pid(13), "d"), Ok(2));
		let indices: Vec<usize> = table.active().map(|(i, _)| i).collect();
		assert_eq!(indices, [1, 2, 3]);
	}

	#[test]
	fn retire_queues_one_notice() {
		let mut table = JobTable::new();
		table.add(pid(42), "sleep 1 &").unwrap();
		table.retire(WaitStatus::Exited(pid(42), 0));

		let notices = table.drain_notices();
		assert_eq!(notices, ["Job [1] 42 finished (exit 0): sleep 1 &"]);
		assert_eq!(table.active_count(), 0);
		assert!(table.drain_notices().is_empty());
	}

	#[test]
	fn signaled_notice_names_the_signal() {
		let mut table = JobTable::new();
		table.add(pid(7), "cat").unwrap();
		table.retire(WaitStatus::Signaled(
			pid(7),
			nix::sys::signal::Signal::SIGKILL,
			false,
		));
		assert_eq!(table.drain_notices(), ["Job [1] 7 killed by signal 9: cat"]);
	}

	#[test]
	fn unknown_pid_is_discarded() {
		let mut table = JobTable::new();
		table.add(pid(1), "a").unwrap();
		table.retire(WaitStatus::Exited(pid(99), 0));
		assert_eq!(table.active_count(), 1);
		assert!(table.drain_notices().is_empty());
	}

	#[test]
	fn child_reaped_before_add_is_retired_on_arrival() {
		let mut table = JobTable::new();
		// the reaper can collect a fast child before the spawner records it
		table.retire(WaitStatus::Exited(pid(42), 0));
		assert!(table.drain_notices().is_empty());

		assert_eq!(table.add(pid(42), "true &"), Ok(1));
		assert_eq!(
			table.drain_notices(),
			["Job [1] 42 finished (exit 0): true &"]
		);
		assert_eq!(table.active_count(), 0);
		// the slot is free again
		assert_eq!(table.add(pid(43), "sleep 1 &"), Ok(1));
	}

	#[test]
	fn early_reap_memory_is_bounded() {
		let mut table = JobTable::new();
		for n in 0..=EARLY_REAPED_MAX {
			table.retire(WaitStatus::Exited(pid(100 + n as i32), 0));
		}
		// the oldest status was evicted, so its job stays active
		assert_eq!(table.add(pid(100), "a &"), Ok(1));
		assert_eq!(table.active_count(), 1);
		assert!(table.drain_notices().is_empty());
		// the newest is still remembered and retires immediately
		assert_eq!(
			table.add(pid(100 + EARLY_REAPED_MAX as i32), "b &"),
			Ok(2)
		);
		assert_eq!(table.active_count(), 1);
		assert_eq!(table.drain_notices().len(), 1);
	}

	#[test]
	fn table_full_reports_and_keeps_existing() {
		let mut table = JobTable::new();
		for n in 0..MAX_JOBS {
			table.add(pid(n as i32 + 1), "x").unwrap();
		}
		assert_eq!(table.add(pid(9999), "y"), Err(TableFull));
		assert_eq!(table.active_count(), MAX_JOBS);
	}

	#[test]
	fn cmdline_is_truncated() {
		let mut table = JobTable::new();
		let long = "x".repeat(CMDLINE_MAX + 100);
		table.add(pid(5), &long).unwrap();
		let (_, job) = table.active().next().unwrap();
		assert_eq!(job.cmdline.len(), CMDLINE_MAX);
	}
}
