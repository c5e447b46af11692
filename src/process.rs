use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind, Users};
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub user: String,
    pub state: String,
}

impl ProcessInfo {
    /// Case-insensitive match against name, user or pid.
    pub fn matches(&self, filter: &str) -> bool {
        let filter = filter.trim();
        if filter.is_empty() {
            return true;
        }
        let needle = filter.to_lowercase();
        self.name.to_lowercase().contains(&needle)
            || self.user.to_lowercase().contains(&needle)
            || self.pid.to_string().contains(&needle)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessEntry {
    pub info: ProcessInfo,
    /// Set once the pid is missing from an enumeration; cleared if it shows up again.
    pub exited: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub added: usize,
    pub updated: usize,
    pub exited: usize,
}

/// The displayed process collection.
///
/// Merging never drops entries: processes that vanish between two
/// enumerations stay in the list, flagged as exited.
#[derive(Clone, Debug, Default)]
pub struct ProcessList {
    entries: BTreeMap<u32, ProcessEntry>,
}

impl ProcessList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, fresh: Vec<ProcessInfo>) -> MergeSummary {
        let mut summary = MergeSummary::default();
        let mut seen: HashMap<u32, ProcessInfo> =
            fresh.into_iter().map(|p| (p.pid, p)).collect();

        for (pid, entry) in self.entries.iter_mut() {
            match seen.remove(pid) {
                Some(info) => {
                    if entry.exited || entry.info != info {
                        entry.info = info;
                        entry.exited = false;
                        summary.updated += 1;
                    }
                }
                None if !entry.exited => {
                    entry.exited = true;
                    summary.exited += 1;
                }
                None => {}
            }
        }

        summary.added = seen.len();
        for (pid, info) in seen {
            self.entries.insert(pid, ProcessEntry { info, exited: false });
        }

        debug!(
            "Merged processes: {} added, {} updated, {} exited",
            summary.added, summary.updated, summary.exited
        );
        summary
    }

    pub fn get(&self, pid: u32) -> Option<&ProcessEntry> {
        self.entries.get(&pid)
    }

    pub fn is_live(&self, pid: u32) -> bool {
        self.entries.get(&pid).map(|e| !e.exited).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rows matching `filter`, sorted by name then pid.
    pub fn filtered(&self, filter: &str) -> Vec<&ProcessEntry> {
        let mut rows: Vec<_> = self
            .entries
            .values()
            .filter(|e| e.info.matches(filter))
            .collect();
        rows.sort_by(|a, b| {
            a.info
                .name
                .to_lowercase()
                .cmp(&b.info.name.to_lowercase())
                .then(a.info.pid.cmp(&b.info.pid))
        });
        rows
    }

    /// Live processes, the hint handed to the next enumeration.
    pub fn snapshot(&self) -> Vec<ProcessInfo> {
        self.entries
            .values()
            .filter(|e| !e.exited)
            .map(|e| e.info.clone())
            .collect()
    }
}

/// Source of process listings. Runs off the UI thread.
pub trait ProcessEnumerator: Send + Sync {
    fn enumerate(&self, previous: &[ProcessInfo]) -> Vec<ProcessInfo>;
}

/// Enumerates OS processes with `sysinfo`, keeping one `System` alive so
/// repeated refreshes are incremental.
pub struct SystemProcesses {
    system: Mutex<System>,
    users: Mutex<Users>,
}

impl SystemProcesses {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            users: Mutex::new(Users::new_with_refreshed_list()),
        }
    }
}

impl Default for SystemProcesses {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessEnumerator for SystemProcesses {
    fn enumerate(&self, previous: &[ProcessInfo]) -> Vec<ProcessInfo> {
        let known: HashMap<u32, &ProcessInfo> = previous.iter().map(|p| (p.pid, p)).collect();
        let own_pid = std::process::id();

        let mut system = self.system.lock();
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing()
                .with_cmd(UpdateKind::OnlyIfNotSet)
                .with_user(UpdateKind::OnlyIfNotSet),
        );

        let mut users = self.users.lock();
        let mut users_refreshed = false;
        let mut result = Vec::with_capacity(system.processes().len());

        for (pid, process) in system.processes() {
            let pid_u32 = pid.as_u32();
            // kernel threads have no command line
            if pid_u32 == own_pid || process.cmd().is_empty() {
                continue;
            }
            // threads show up as their own entries on Linux
            if process.thread_kind().is_some() {
                continue;
            }

            let name = process.name().to_string_lossy().into_owned();
            let user = match known.get(&pid_u32) {
                Some(prev) if prev.name == name && !prev.user.is_empty() => prev.user.clone(),
                _ => {
                    let lookup = |users: &Users| {
                        process
                            .user_id()
                            .and_then(|uid| users.get_user_by_id(uid))
                            .map(|u| u.name().to_string())
                    };
                    match lookup(&*users) {
                        Some(found) => found,
                        None if !users_refreshed && process.user_id().is_some() => {
                            *users = Users::new_with_refreshed_list();
                            users_refreshed = true;
                            lookup(&*users).unwrap_or_default()
                        }
                        None => String::new(),
                    }
                }
            };

            result.push(ProcessInfo {
                pid: pid_u32,
                name,
                user,
                state: process.status().to_string(),
            });
        }

        debug!("Enumerated {} processes", result.len());
        result
    }
}

/// Whether a pid currently exists on this system.
pub fn process_exists(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[Pid::from_u32(pid)]),
        false,
        ProcessRefreshKind::nothing(),
    );
    system.process(Pid::from_u32(pid)).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proc(pid: u32, name: &str) -> ProcessInfo {
        ProcessInfo {
            pid,
            name: name.to_string(),
            user: "alice".to_string(),
            state: "Sleeping".to_string(),
        }
    }

    #[test]
    fn merge_adds_unseen_and_keeps_known() {
        let mut list = ProcessList::new();
        list.merge(vec![proc(1, "init"), proc(2, "bash"), proc(3, "vim")]);
        assert_eq!(list.len(), 3);

        let summary = list.merge(vec![proc(1, "init"), proc(10, "perf"), proc(11, "top")]);
        assert_eq!(summary.added, 2);
        assert_eq!(summary.exited, 2);
        assert_eq!(list.len(), 5);
        for pid in [1, 2, 3, 10, 11] {
            assert!(list.get(pid).is_some(), "pid {pid} missing after merge");
        }
    }

    #[test]
    fn vanished_processes_are_flagged_and_revived() {
        let mut list = ProcessList::new();
        list.merge(vec![proc(1, "init"), proc(2, "bash")]);

        list.merge(vec![proc(1, "init")]);
        assert!(list.get(2).unwrap().exited);
        assert!(!list.is_live(2));
        assert_eq!(list.snapshot(), vec![proc(1, "init")]);

        let summary = list.merge(vec![proc(1, "init"), proc(2, "bash")]);
        assert_eq!(summary.updated, 1);
        assert!(list.is_live(2));
    }

    #[test]
    fn merge_updates_changed_entries() {
        let mut list = ProcessList::new();
        list.merge(vec![proc(5, "sleep")]);

        let mut running = proc(5, "sleep");
        running.state = "Run".to_string();
        let summary = list.merge(vec![running.clone()]);
        assert_eq!(summary, MergeSummary { added: 0, updated: 1, exited: 0 });
        assert_eq!(list.get(5).unwrap().info, running);

        let summary = list.merge(vec![running]);
        assert_eq!(summary, MergeSummary::default());
    }

    #[test]
    fn filter_matches_name_user_and_pid_case_insensitively() {
        let mut list = ProcessList::new();
        list.merge(vec![proc(42, "Firefox"), proc(7, "bash"), proc(420, "sshd")]);

        let names = |rows: Vec<&ProcessEntry>| -> Vec<u32> { rows.iter().map(|e| e.info.pid).collect() };
        assert_eq!(names(list.filtered("fire")), vec![42]);
        assert_eq!(names(list.filtered("42")), vec![42, 420]);
        assert_eq!(names(list.filtered("ALICE")).len(), 3);
        assert_eq!(names(list.filtered("")), vec![7, 42, 420]);
    }

    #[test]
    fn system_enumeration_lists_live_processes() {
        let enumerator = SystemProcesses::new();
        let first = enumerator.enumerate(&[]);
        assert!(!first.is_empty());
        assert!(first.iter().all(|p| p.pid != std::process::id()));

        let second = enumerator.enumerate(&first);
        assert!(!second.is_empty());
    }

    fn thread_group_of(pid: u32) -> Option<u32> {
        let status = std::fs::read_to_string(format!("/proc/{}/status", pid)).ok()?;
        status
            .lines()
            .find_map(|line| line.strip_prefix("Tgid:"))
            .and_then(|tgid| tgid.trim().parse().ok())
    }

    #[test]
    fn threads_are_not_listed_as_processes() {
        let stop = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let stop = stop.clone();
                std::thread::spawn(move || {
                    while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                        std::thread::sleep(std::time::Duration::from_millis(10));
                    }
                })
            })
            .collect();

        let listed = SystemProcesses::new().enumerate(&[]);

        stop.store(true, std::sync::atomic::Ordering::Relaxed);
        for worker in workers {
            worker.join().unwrap();
        }

        for info in &listed {
            if let Some(tgid) = thread_group_of(info.pid) {
                assert_eq!(tgid, info.pid, "thread {} ({}) listed as a process", info.pid, info.name);
            }
        }
    }

    #[test]
    fn own_process_exists() {
        assert!(process_exists(std::process::id()));
        assert!(!process_exists(u32::MAX - 1));
    }
}
