//! Client-side movement prediction and reconciliation
//!
//! Moves apply locally the moment the key is pressed; each carries a
//! monotonically increasing sequence number and waits for the server's
//! `POSITION_ACK`. An ack prunes that sequence and everything older. When
//! the server's position differs from what the acked move expected, the
//! move was rejected: all remaining predictions are flushed and the client
//! snaps to the server position. Otherwise the remaining pending moves are
//! replayed on top of the authoritative position.

use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMove {
    pub seq: u32,
    pub dx: i32,
    pub dy: i32,
    pub expected: (u16, u16),
}

#[derive(Debug, Default)]
pub struct Prediction {
    next_seq: u32,
    pending: VecDeque<PendingMove>,
}

fn offset((x, y): (u16, u16), dx: i32, dy: i32) -> (u16, u16) {
    (
        x.saturating_add_signed(dx as i16),
        y.saturating_add_signed(dy as i16),
    )
}

impl Prediction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Forget every in-flight move (level transition, rejection).
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Record a locally applied move. Returns its sequence number and the
    /// predicted position.
    pub fn predict(&mut self, from: (u16, u16), dx: i32, dy: i32) -> (u32, (u16, u16)) {
        self.next_seq += 1;
        let expected = offset(from, dx, dy);
        self.pending.push_back(PendingMove {
            seq: self.next_seq,
            dx,
            dy,
            expected,
        });
        (self.next_seq, expected)
    }

    /// Process `POSITION_ACK(seq, server)`. Returns the position the client
    /// should display after reconciliation.
    pub fn reconcile(
        &mut self,
        seq: u32,
        server: (u16, u16),
        walkable: impl Fn(u16, u16) -> bool,
    ) -> (u16, u16) {
        let acked_expectation = self
            .pending
            .iter()
            .find(|m| m.seq == seq)
            .map(|m| m.expected);

        // This ack covers its seq and everything older
        self.pending.retain(|m| m.seq > seq);

        if let Some(expected) = acked_expectation {
            if expected != server {
                // Rejected move: drop the rest of the queue and snap
                self.pending.clear();
                return server;
            }
        }

        // Replay what is still in flight on top of the authoritative spot
        let mut position = server;
        for pending in &self.pending {
            let next = offset(position, pending.dx, pending.dy);
            if walkable(next.0, next.1) {
                position = next;
            }
        }
        position
    }
}
