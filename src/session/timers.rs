use std::fmt;

use tokio::time::{interval, Duration, Instant, Interval};

use super::SessionError;

/// Hold and keepalive scheduling for one session.
///
/// Everything hangs off two monotonic marks: when we last heard from
/// the peer (hold expiry counts up from here) and when we last wrote to
/// it (a KEEPALIVE is owed once a third of the hold time has passed).
/// A negotiated hold time of zero switches the whole mechanism off.
#[derive(Debug)]
pub struct SessionTimers {
    hold_time: Duration,
    keepalive: Duration,
    heard: Instant,
    wrote: Instant,
    /// Paces expiry checks so an idle session does not busy-poll
    tick: Interval,
}

impl SessionTimers {
    pub fn new(hold_seconds: u16) -> SessionTimers {
        let hold_time = Duration::from_secs(hold_seconds.into());
        let now = Instant::now();
        SessionTimers {
            hold_time,
            // RFC 4271 4.4: keepalive at one third of the hold time
            keepalive: hold_time / 3,
            heard: now,
            wrote: now,
            tick: interval(Duration::from_millis(100)),
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.hold_time.is_zero()
    }

    pub fn hold_seconds(&self) -> u16 {
        self.hold_time.as_secs() as u16
    }

    /// The peer spoke; push the hold deadline out
    pub fn mark_heard(&mut self) {
        self.heard = Instant::now();
    }

    /// We spoke; push the next keepalive out
    pub fn mark_wrote(&mut self) {
        self.wrote = Instant::now();
    }

    /// Hold time left before the peer must speak again
    pub fn remaining(&self) -> Duration {
        self.hold_time
            .checked_sub(self.heard.elapsed())
            .unwrap_or_default()
    }

    /// Waits for the next pacing tick, then reports whether a KEEPALIVE
    /// is owed. Errors once the peer has been silent for the hold time.
    pub async fn keepalive_due(&mut self) -> Result<bool, SessionError> {
        if self.is_disabled() {
            return Ok(false);
        }
        self.tick.tick().await;
        if self.heard.elapsed() >= self.hold_time {
            return Err(SessionError::HoldTimeExpired(self.hold_seconds()));
        }
        Ok(self.wrote.elapsed() >= self.keepalive)
    }
}

impl fmt::Display for SessionTimers {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}s", self.remaining().as_secs())
    }
}
