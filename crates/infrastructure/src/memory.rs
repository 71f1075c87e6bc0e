use std::sync::Mutex;

use application::MemoryProbe;
use sysinfo::{Pid, ProcessesToUpdate, System};

/// 通过 sysinfo 采样当前进程的常驻内存
pub struct SysinfoMemoryProbe {
    pid: Option<Pid>,
    system: Mutex<System>,
}

impl SysinfoMemoryProbe {
    pub fn new() -> Self {
        Self {
            pid: sysinfo::get_current_pid().ok(),
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SysinfoMemoryProbe {
    fn resident_bytes(&self) -> Option<u64> {
        let pid = self.pid?;
        let mut system = self.system.lock().ok()?;
        let _ = system.refresh_processes(ProcessesToUpdate::Some(&[pid]), false);
        system.process(pid).map(sysinfo::Process::memory)
    }
}
