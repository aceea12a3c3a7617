//! Per-trace process state
//!
//! The engine does not reconstruct process state itself: state analyses
//! install hooks (usually at [`Priority::STATE`](crate::hooks::Priority::STATE))
//! that update a trace's [`TraceState`]. The replay loop only looks up the
//! process running on the event's cpu so filters and later hooks can see it.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TraceError;
use crate::time::TraceTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    UserMode,
    Syscall,
    Trap,
    Irq,
    #[default]
    Unknown,
}

impl ExecutionMode {
    pub const ALL: [ExecutionMode; 5] = [
        ExecutionMode::UserMode,
        ExecutionMode::Syscall,
        ExecutionMode::Trap,
        ExecutionMode::Irq,
        ExecutionMode::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::UserMode => "user mode",
            ExecutionMode::Syscall => "system call",
            ExecutionMode::Trap => "trap",
            ExecutionMode::Irq => "irq",
            ExecutionMode::Unknown => "unknown execution mode",
        }
    }

    fn ident(&self) -> &'static str {
        match self {
            ExecutionMode::UserMode => "user_mode",
            ExecutionMode::Syscall => "syscall",
            ExecutionMode::Trap => "trap",
            ExecutionMode::Irq => "irq",
            ExecutionMode::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = TraceError;

    /// Accepts the display name (`system call`) or the identifier (`syscall`)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ExecutionMode::ALL
            .into_iter()
            .find(|m| m.as_str() == s || m.ident() == s)
            .ok_or_else(|| TraceError::InvalidLiteral {
                field: "state.execution_mode".to_string(),
                value: s.to_string(),
                reason: "unknown execution mode".to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    #[default]
    Unnamed,
    WaitFork,
    WaitCpu,
    Exit,
    Zombie,
    Wait,
    Run,
    Dead,
}

impl ProcessStatus {
    pub const ALL: [ProcessStatus; 8] = [
        ProcessStatus::Unnamed,
        ProcessStatus::WaitFork,
        ProcessStatus::WaitCpu,
        ProcessStatus::Exit,
        ProcessStatus::Zombie,
        ProcessStatus::Wait,
        ProcessStatus::Run,
        ProcessStatus::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Unnamed => "unnamed",
            ProcessStatus::WaitFork => "wait fork",
            ProcessStatus::WaitCpu => "wait for cpu",
            ProcessStatus::Exit => "exiting",
            ProcessStatus::Zombie => "zombie",
            ProcessStatus::Wait => "wait for I/O",
            ProcessStatus::Run => "running",
            ProcessStatus::Dead => "dead",
        }
    }

    fn ident(&self) -> &'static str {
        match self {
            ProcessStatus::Unnamed => "unnamed",
            ProcessStatus::WaitFork => "wait_fork",
            ProcessStatus::WaitCpu => "wait_cpu",
            ProcessStatus::Exit => "exit",
            ProcessStatus::Zombie => "zombie",
            ProcessStatus::Wait => "wait",
            ProcessStatus::Run => "run",
            ProcessStatus::Dead => "dead",
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessStatus {
    type Err = TraceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ProcessStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s || st.ident() == s)
            .ok_or_else(|| TraceError::InvalidLiteral {
                field: "state.process_status".to_string(),
                value: s.to_string(),
                reason: "unknown process status".to_string(),
            })
    }
}

/// One process as seen by a state analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessState {
    pub pid: u32,
    pub ppid: u32,
    pub creation_time: TraceTime,
    pub insertion_time: TraceTime,
    pub name: String,
    pub execution_mode: ExecutionMode,
    /// System call, trap or irq name while not in user mode
    pub execution_submode: String,
    pub status: ProcessStatus,
    pub cpu: u32,
}

impl ProcessState {
    pub fn new(pid: u32, name: impl Into<String>) -> Self {
        Self {
            pid,
            ppid: 0,
            creation_time: TraceTime::ZERO,
            insertion_time: TraceTime::ZERO,
            name: name.into(),
            execution_mode: ExecutionMode::Unknown,
            execution_submode: String::new(),
            status: ProcessStatus::Unnamed,
            cpu: 0,
        }
    }

    pub fn with_parent(mut self, ppid: u32) -> Self {
        self.ppid = ppid;
        self
    }

    pub fn on_cpu(mut self, cpu: u32) -> Self {
        self.cpu = cpu;
        self
    }
}

/// Process table of one trace plus the process running on each cpu
#[derive(Debug, Clone, Default)]
pub struct TraceState {
    processes: HashMap<u32, ProcessState>,
    running: HashMap<u32, u32>,
}

impl TraceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a process
    pub fn upsert(&mut self, process: ProcessState) {
        self.processes.insert(process.pid, process);
    }

    pub fn process(&self, pid: u32) -> Option<&ProcessState> {
        self.processes.get(&pid)
    }

    pub fn process_mut(&mut self, pid: u32) -> Option<&mut ProcessState> {
        self.processes.get_mut(&pid)
    }

    /// Remove a process; cpus it was running on become idle
    pub fn remove(&mut self, pid: u32) -> Option<ProcessState> {
        self.running.retain(|_, running| *running != pid);
        self.processes.remove(&pid)
    }

    /// Mark `pid` as running on `cpu`
    pub fn schedule(&mut self, cpu: u32, pid: u32) {
        self.running.insert(cpu, pid);
        if let Some(process) = self.processes.get_mut(&pid) {
            process.cpu = cpu;
            process.status = ProcessStatus::Run;
        }
    }

    pub fn running_pid(&self, cpu: u32) -> Option<u32> {
        self.running.get(&cpu).copied()
    }

    pub fn running_process(&self, cpu: u32) -> Option<&ProcessState> {
        self.running.get(&cpu).and_then(|pid| self.processes.get(pid))
    }

    pub fn processes(&self) -> impl Iterator<Item = &ProcessState> {
        self.processes.values()
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    pub fn clear(&mut self) {
        self.processes.clear();
        self.running.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_and_status_names() {
        assert_eq!(ExecutionMode::Syscall.to_string(), "system call");
        assert_eq!("syscall".parse::<ExecutionMode>().unwrap(), ExecutionMode::Syscall);
        assert_eq!("user mode".parse::<ExecutionMode>().unwrap(), ExecutionMode::UserMode);
        assert!("kernel".parse::<ExecutionMode>().is_err());

        assert_eq!(ProcessStatus::Wait.to_string(), "wait for I/O");
        assert_eq!("wait_cpu".parse::<ProcessStatus>().unwrap(), ProcessStatus::WaitCpu);
    }

    #[test]
    fn test_running_process_per_cpu() {
        let mut state = TraceState::new();
        state.upsert(ProcessState::new(42, "bash").with_parent(1));
        state.upsert(ProcessState::new(7, "sshd"));
        state.schedule(0, 42);
        state.schedule(1, 7);

        let running = state.running_process(0).unwrap();
        assert_eq!(running.name, "bash");
        assert_eq!(running.status, ProcessStatus::Run);
        assert_eq!(state.running_pid(1), Some(7));

        state.remove(7);
        assert!(state.running_process(1).is_none());
        assert_eq!(state.len(), 1);
    }
}
