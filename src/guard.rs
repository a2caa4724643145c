//! ReentrancyGuard
//!
//! Shared between the command path and the polling scheduler. While any
//! command scope is alive the scheduler skips refreshes; when the last scope
//! drops, a post-command poll burst is armed for the scheduler to pick up.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

pub struct ReentrancyGuard {
    depth: AtomicUsize,
    armed_burst: AtomicU32,
    burst_size: u32,
}

impl ReentrancyGuard {
    pub fn new(burst_size: u32) -> Self {
        Self {
            depth: AtomicUsize::new(0),
            armed_burst: AtomicU32::new(0),
            burst_size,
        }
    }

    /// Enter a command. The returned scope exits on drop, on every path.
    pub fn enter(&self) -> CommandScope<'_> {
        self.depth.fetch_add(1, Ordering::SeqCst);
        CommandScope { guard: self }
    }

    fn exit(&self) {
        self.depth.fetch_sub(1, Ordering::SeqCst);
        self.on_command_completed();
    }

    pub fn in_command(&self) -> bool {
        self.depth.load(Ordering::SeqCst) > 0
    }

    pub fn should_poll(&self) -> bool {
        !self.in_command()
    }

    /// Arm the post-command burst. Called for failed commands too: a failed
    /// call may still have changed backend state.
    pub fn on_command_completed(&self) {
        self.armed_burst.store(self.burst_size, Ordering::SeqCst);
    }

    /// Hand the armed burst to the scheduler, disarming it.
    pub fn take_armed_burst(&self) -> Option<u32> {
        match self.armed_burst.swap(0, Ordering::SeqCst) {
            0 => None,
            burst => Some(burst),
        }
    }

    pub fn burst_size(&self) -> u32 {
        self.burst_size
    }
}

/// RAII command scope returned by [`ReentrancyGuard::enter`].
#[must_use = "the command is only guarded while the scope is alive"]
pub struct CommandScope<'a> {
    guard: &'a ReentrancyGuard,
}

impl Drop for CommandScope<'_> {
    fn drop(&mut self) {
        self.guard.exit();
    }
}
