//! First-settled-wins arbitration.
//!
//! [`first_settled`] races two futures and drops the loser. [`Epoch`] is
//! the guard behind every state transition: a transition carries the
//! [`Ticket`] it was started with and only applies while that ticket is
//! current. Any settlement advances the epoch, so whatever arrives later
//! holds a stale ticket and is ignored.

use std::future::Future;

/// Which side of a race finished first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled<L, R> {
    Left(L),
    Right(R),
}

/// Await whichever future completes first. The other is dropped without
/// being polled again.
///
/// Both sides are polled on every wake, left first; if both are ready in
/// the same poll, left wins.
pub async fn first_settled<L, R>(left: L, right: R) -> Settled<L::Output, R::Output>
where
    L: Future,
    R: Future,
{
    tokio::select! {
        biased;
        l = left => Settled::Left(l),
        r = right => Settled::Right(r),
    }
}

/// Proof that a pending operation was started in a given epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

/// Monotonic generation counter.
#[derive(Debug, Default)]
pub struct Epoch {
    current: u64,
}

impl Epoch {
    pub fn ticket(&self) -> Ticket {
        Ticket(self.current)
    }

    pub fn is_current(&self, ticket: Ticket) -> bool {
        ticket.0 == self.current
    }

    /// Invalidate every outstanding ticket.
    pub fn advance(&mut self) -> Ticket {
        self.current += 1;
        Ticket(self.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::sleep;

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_faster_side_wins() {
        let out = first_settled(
            async {
                sleep(Duration::from_secs(5)).await;
                "geo"
            },
            async {
                sleep(Duration::from_secs(2)).await;
                "timer"
            },
        )
        .await;
        assert_eq!(out, Settled::Right("timer"));

        let out = first_settled(
            async {
                sleep(Duration::from_millis(10)).await;
                1
            },
            sleep(Duration::from_secs(2)),
        )
        .await;
        assert_eq!(out, Settled::Left(1));
    }

    #[tokio::test]
    async fn test_tie_goes_left() {
        let out = first_settled(async { 'l' }, async { 'r' }).await;
        assert_eq!(out, Settled::Left('l'));
    }

    #[tokio::test(start_paused = true)]
    async fn test_loser_is_dropped() {
        let dropped = Arc::new(AtomicBool::new(false));
        let flag = DropFlag(dropped.clone());
        let loser = async move {
            let _flag = flag;
            std::future::pending::<()>().await;
        };

        let out = first_settled(loser, sleep(Duration::from_secs(1))).await;
        assert_eq!(out, Settled::Right(()));
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_epoch_invalidates_old_tickets() {
        let mut epoch = Epoch::default();
        let first = epoch.ticket();
        assert!(epoch.is_current(first));

        let second = epoch.advance();
        assert!(!epoch.is_current(first));
        assert!(epoch.is_current(second));
        assert_eq!(epoch.ticket(), second);
    }
}
