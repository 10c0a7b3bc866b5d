//! Single-shot timers that fire into the FSM event queue.
//!
//! A timer never touches the FSM itself: on expiry its task only enqueues an
//! [`Event::TimerFired`] tagged with the generation of the arm call. The
//! dispatcher admits the event through [`Timer::accept_fire`], which rejects
//! fires from a canceled or re-armed countdown that were already in flight.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

use super::event::{Event, InternalControlMessage};

/// The per-connection timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Handshake,
    ProverHandshake,
    VerifierHandshake,
    Dat,
    Rat,
}

impl TimerKind {
    pub const ALL: [TimerKind; 5] = [
        TimerKind::Handshake,
        TimerKind::ProverHandshake,
        TimerKind::VerifierHandshake,
        TimerKind::Dat,
        TimerKind::Rat,
    ];

    /// Control signal raised when this timer fires.
    pub fn signal(self) -> InternalControlMessage {
        match self {
            TimerKind::Handshake | TimerKind::ProverHandshake | TimerKind::VerifierHandshake => {
                InternalControlMessage::Timeout
            }
            TimerKind::Dat => InternalControlMessage::DatTimerExpired,
            TimerKind::Rat => InternalControlMessage::RepeatRat,
        }
    }
}

struct Armed {
    generation: u64,
    deadline: Instant,
    task: JoinHandle<()>,
}

/// Resettable, cancelable countdown.
pub struct Timer {
    kind: TimerKind,
    events: mpsc::UnboundedSender<Event>,
    runtime: Handle,
    generation: u64,
    armed: Option<Armed>,
}

impl Timer {
    pub fn new(kind: TimerKind, events: mpsc::UnboundedSender<Event>, runtime: Handle) -> Self {
        Self {
            kind,
            events,
            runtime,
            generation: 0,
            armed: None,
        }
    }

    pub fn kind(&self) -> TimerKind {
        self.kind
    }

    /// Start the countdown, replacing any pending one.
    pub fn arm(&mut self, delay: Duration) {
        self.cancel();
        self.generation += 1;

        let generation = self.generation;
        let deadline = deadline_after(delay);
        let kind = self.kind;
        let events = self.events.clone();
        let task = self.runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = events.send(Event::TimerFired {
                timer: kind,
                generation,
            });
        });

        trace!(timer = ?kind, ?delay, generation, "timer armed");
        self.armed = Some(Armed {
            generation,
            deadline,
            task,
        });
    }

    /// Stop the countdown. No-op when not armed.
    pub fn cancel(&mut self) {
        if let Some(armed) = self.armed.take() {
            armed.task.abort();
            trace!(timer = ?self.kind, generation = armed.generation, "timer canceled");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.armed.as_ref().map(|armed| armed.deadline)
    }

    /// Admit a fire event. Only the current arm is accepted, and accepting
    /// it disarms the timer.
    pub fn accept_fire(&mut self, generation: u64) -> bool {
        match &self.armed {
            Some(armed) if armed.generation == generation => {
                self.armed = None;
                true
            }
            _ => false,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Deadlines further out than this are clamped to it.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay.min(FAR_FUTURE))
        .or_else(|| now.checked_add(Duration::from_secs(u32::MAX as u64)))
        .unwrap_or(now)
}

/// All timers owned by one connection.
pub struct Timers {
    pub handshake: Timer,
    pub prover_handshake: Timer,
    pub verifier_handshake: Timer,
    pub dat: Timer,
    pub rat: Timer,
}

impl Timers {
    pub fn new(events: mpsc::UnboundedSender<Event>, runtime: Handle) -> Self {
        let timer = |kind| Timer::new(kind, events.clone(), runtime.clone());
        Self {
            handshake: timer(TimerKind::Handshake),
            prover_handshake: timer(TimerKind::ProverHandshake),
            verifier_handshake: timer(TimerKind::VerifierHandshake),
            dat: timer(TimerKind::Dat),
            rat: timer(TimerKind::Rat),
        }
    }

    pub fn get(&self, kind: TimerKind) -> &Timer {
        match kind {
            TimerKind::Handshake => &self.handshake,
            TimerKind::ProverHandshake => &self.prover_handshake,
            TimerKind::VerifierHandshake => &self.verifier_handshake,
            TimerKind::Dat => &self.dat,
            TimerKind::Rat => &self.rat,
        }
    }

    pub fn get_mut(&mut self, kind: TimerKind) -> &mut Timer {
        match kind {
            TimerKind::Handshake => &mut self.handshake,
            TimerKind::ProverHandshake => &mut self.prover_handshake,
            TimerKind::VerifierHandshake => &mut self.verifier_handshake,
            TimerKind::Dat => &mut self.dat,
            TimerKind::Rat => &mut self.rat,
        }
    }

    pub fn cancel_all(&mut self) {
        for kind in TimerKind::ALL {
            self.get_mut(kind).cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer(kind: TimerKind) -> (Timer, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Timer::new(kind, tx, Handle::current()), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_delay() {
        let (mut timer, mut rx) = timer(TimerKind::Handshake);
        timer.arm(Duration::from_secs(5));
        assert!(timer.is_armed());

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let event = rx.recv().await.unwrap();
        let Event::TimerFired { timer: kind, generation } = event else {
            panic!("unexpected event {:?}", event);
        };
        assert_eq!(kind, TimerKind::Handshake);
        assert!(timer.accept_fire(generation));
        assert!(!timer.is_armed());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent() {
        let (mut timer, mut rx) = timer(TimerKind::Dat);
        timer.cancel();
        timer.arm(Duration::from_secs(1));
        timer.cancel();
        timer.cancel();
        assert!(!timer.is_armed());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_rejects_stale_fire() {
        let (mut timer, mut rx) = timer(TimerKind::Rat);
        timer.arm(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(2)).await;
        let Some(Event::TimerFired { generation: stale, .. }) = rx.recv().await else {
            panic!("timer did not fire");
        };

        // Re-armed before the first fire was dispatched
        timer.arm(Duration::from_secs(10));
        assert!(!timer.accept_fire(stale));
        assert!(timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fire_after_cancel_is_rejected() {
        let (mut timer, mut rx) = timer(TimerKind::VerifierHandshake);
        timer.arm(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(20)).await;
        timer.cancel();

        let Some(Event::TimerFired { generation, .. }) = rx.recv().await else {
            panic!("timer did not fire");
        };
        assert!(!timer.accept_fire(generation));
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_delay_is_clamped() {
        let (mut timer, mut rx) = timer(TimerKind::Dat);
        timer.arm(Duration::MAX);
        assert!(timer.is_armed());
        let deadline = timer.deadline().unwrap();
        assert!(deadline > Instant::now() + Duration::from_secs(365 * 24 * 60 * 60));

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert!(rx.try_recv().is_err());
        timer.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = Timers::new(tx, Handle::current());
        for kind in TimerKind::ALL {
            timers.get_mut(kind).arm(Duration::from_secs(1));
        }
        timers.cancel_all();
        assert!(TimerKind::ALL.iter().all(|kind| !timers.get(*kind).is_armed()));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());
    }
}
