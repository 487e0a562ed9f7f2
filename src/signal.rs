use std::collections::VecDeque;
use std::io::Result;
use std::os::unix::net::UnixStream as StdUnixStream;

use log::{debug, info};
use signal_hook::consts::signal::{SIGINT, SIGTERM, SIGUSR1, SIGUSR2};
use signal_hook::iterator::Signals;
use tokio::net::UnixStream;

/// What a received signal asks of the reactor
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SignalAction {
    /// SIGTERM / SIGINT
    Shutdown,
    /// SIGUSR1: reload configuration
    Reload,
    /// SIGUSR2: reload configuration and restart helper processes
    FullReload,
}

fn action_for(signal: i32) -> Option<SignalAction> {
    match signal {
        SIGTERM | SIGINT => Some(SignalAction::Shutdown),
        SIGUSR1 => Some(SignalAction::Reload),
        SIGUSR2 => Some(SignalAction::FullReload),
        _ => None,
    }
}

/// Deduplicated signal queue over a self-pipe.
///
/// OS handlers only write a wakeup byte; the reactor drains the queue
/// on its own schedule. Signals delivered before `mark_ready()` are
/// buffered in arrival order instead of being acted on (or lost) during
/// startup; `rearm()` promotes the next buffered signal.
pub struct SignalQueue {
    signals: Signals,
    wake: UnixStream,
    ready: bool,
    pending: VecDeque<SignalAction>,
    active: Option<SignalAction>,
}

impl SignalQueue {
    pub fn new() -> Result<SignalQueue> {
        let (read_end, write_end) = StdUnixStream::pair()?;
        read_end.set_nonblocking(true)?;
        write_end.set_nonblocking(true)?;
        for signal in [SIGTERM, SIGINT, SIGUSR1, SIGUSR2] {
            signal_hook::low_level::pipe::register(signal, write_end.try_clone()?)?;
        }
        let signals = Signals::new([SIGTERM, SIGINT, SIGUSR1, SIGUSR2])?;
        Ok(SignalQueue {
            signals,
            wake: UnixStream::from_std(read_end)?,
            ready: false,
            pending: VecDeque::new(),
            active: None,
        })
    }

    /// Wait until a signal arrives, then drain it into the queue
    pub async fn recv(&mut self) {
        loop {
            if self.wake.readable().await.is_err() {
                return;
            }
            let mut buf = [0u8; 16];
            match self.wake.try_read(&mut buf) {
                Ok(0) => return,
                Ok(_) => break,
                Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => continue,
                Err(_) => return,
            }
        }
        self.drain();
    }

    /// Pull everything the OS queued, deduplicating repeats
    pub fn drain(&mut self) {
        for signal in self.signals.pending() {
            if let Some(action) = action_for(signal) {
                self.push(action);
            }
        }
    }

    /// Enqueue an action as the signal handler would. Duplicates of an
    /// already-queued (or active) action collapse.
    pub fn push(&mut self, action: SignalAction) {
        if self.active == Some(action) || self.pending.contains(&action) {
            debug!("Deduplicating repeated signal {:?}", action);
            return;
        }
        if !self.ready {
            info!("Deferring {:?} until the reactor is ready", action);
        }
        self.pending.push_back(action);
        self.promote();
    }

    /// The reactor has entered its loop; pending signals become live
    pub fn mark_ready(&mut self) {
        self.ready = true;
        self.promote();
    }

    /// The currently active signal, if any
    pub fn active(&self) -> Option<SignalAction> {
        self.active
    }

    /// Done handling the active signal; arm the next one
    pub fn rearm(&mut self) {
        self.active = None;
        self.promote();
    }

    fn promote(&mut self) {
        if self.ready && self.active.is_none() {
            self.active = self.pending.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> SignalQueue {
        SignalQueue::new().unwrap()
    }

    #[tokio::test]
    async fn test_signals_deferred_until_ready() {
        let mut signals = queue();
        signals.push(SignalAction::Reload);
        signals.push(SignalAction::Shutdown);
        assert_eq!(signals.active(), None);

        // FIFO once ready
        signals.mark_ready();
        assert_eq!(signals.active(), Some(SignalAction::Reload));
        signals.rearm();
        assert_eq!(signals.active(), Some(SignalAction::Shutdown));
        signals.rearm();
        assert_eq!(signals.active(), None);
    }

    #[tokio::test]
    async fn test_duplicate_signals_collapse() {
        let mut signals = queue();
        signals.push(SignalAction::Reload);
        signals.push(SignalAction::Reload);
        signals.push(SignalAction::FullReload);
        signals.push(SignalAction::Reload);
        signals.mark_ready();
        assert_eq!(signals.active(), Some(SignalAction::Reload));
        signals.rearm();
        assert_eq!(signals.active(), Some(SignalAction::FullReload));
        signals.rearm();
        assert_eq!(signals.active(), None);
    }

    #[tokio::test]
    async fn test_active_signal_dedupes_repeats() {
        let mut signals = queue();
        signals.mark_ready();
        signals.push(SignalAction::Shutdown);
        assert_eq!(signals.active(), Some(SignalAction::Shutdown));
        signals.push(SignalAction::Shutdown);
        signals.rearm();
        assert_eq!(signals.active(), None);
    }
}
