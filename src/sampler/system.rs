//! Process source backed by the operating system process table.

use super::{window_titles, ProcessInfo, ProcessSource};
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

/// Reads processes through `sysinfo` and attaches window titles from the
/// platform's window manager.
pub struct SystemProcessSource {
    system: System,
}

impl SystemProcessSource {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SystemProcessSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSource for SystemProcessSource {
    fn processes(&mut self) -> Vec<ProcessInfo> {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_exe(UpdateKind::OnlyIfNotSet),
        );

        let titles = window_titles();

        self.system
            .processes()
            .iter()
            .map(|(pid, process)| {
                let pid = pid.as_u32();
                ProcessInfo {
                    pid,
                    name: process.name().to_string_lossy().into_owned(),
                    window_title: titles.get(&pid).cloned(),
                    // Unreadable (access denied, already exited) paths come back as None.
                    path: process.exe().map(|p| p.to_path_buf()),
                }
            })
            .collect()
    }
}
