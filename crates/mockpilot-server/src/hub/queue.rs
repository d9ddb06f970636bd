//! Bounded per-connection outbound queue with priority shedding.
//!
//! Capacity is counted in messages and in payload bytes; whichever bound is
//! hit first triggers shedding. On overflow the oldest entry of the lowest
//! priority present is dropped, as long as that priority does not outrank
//! the incoming frame. If everything queued outranks the incoming frame,
//! the incoming frame is rejected instead. Either way the newest frame of
//! the highest priority always survives.
//!
//! Control frames (`slow`) live in their own lane: they bypass capacity and
//! are delivered before queued events.

use std::collections::VecDeque;
use std::sync::Arc;

use serde_json::value::RawValue;

use super::frame::{OutboundKind, Priority};

/// One queued outbound frame body.
#[derive(Clone, Debug)]
pub struct QueuedFrame {
    /// Frame kind.
    pub kind: OutboundKind,
    /// Serialized body, shared across connections.
    pub data: Arc<RawValue>,
}

impl QueuedFrame {
    /// Create a queued frame.
    #[must_use]
    pub fn new(kind: OutboundKind, data: Arc<RawValue>) -> Self {
        Self { kind, data }
    }

    fn size(&self) -> usize {
        self.data.get().len()
    }
}

/// Result of [`OutboundQueue::push`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PushOutcome {
    /// The incoming frame was queued.
    pub accepted: bool,
    /// Older frames dropped to make room.
    pub shed: usize,
    /// A `slow` notice should be sent to the client now.
    pub slow_notice: bool,
}

/// Bounded outbound queue.
#[derive(Debug)]
pub struct OutboundQueue {
    entries: VecDeque<QueuedFrame>,
    control: VecDeque<QueuedFrame>,
    bytes: usize,
    max_messages: usize,
    max_bytes: usize,
    slow_armed: bool,
    shed_total: u64,
}

impl OutboundQueue {
    /// Create a queue bounded by `max_messages` and `max_bytes`.
    #[must_use]
    pub fn new(max_messages: usize, max_bytes: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            control: VecDeque::new(),
            bytes: 0,
            max_messages: max_messages.max(1),
            max_bytes: max_bytes.max(1),
            slow_armed: true,
            shed_total: 0,
        }
    }

    /// Queue an event frame, shedding or rejecting on overflow.
    ///
    /// A frame larger than the byte bound is still accepted into an empty
    /// queue so it can be delivered at all.
    pub fn push(&mut self, frame: QueuedFrame) -> PushOutcome {
        let incoming = frame.kind.priority();
        let size = frame.size();
        let mut outcome = PushOutcome::default();

        while !self.entries.is_empty() && self.would_overflow(size) {
            let Some(victim) = self.lowest_priority() else {
                break;
            };
            if victim > incoming {
                self.shed_total += 1;
                self.note_shed(incoming, &mut outcome);
                return outcome;
            }
            let Some(index) = self.entries.iter().position(|e| e.kind.priority() == victim) else {
                break;
            };
            if let Some(old) = self.entries.remove(index) {
                self.bytes -= old.size();
                outcome.shed += 1;
                self.shed_total += 1;
                self.note_shed(victim, &mut outcome);
            }
        }

        self.bytes += size;
        self.entries.push_back(frame);
        outcome.accepted = true;
        outcome
    }

    /// Queue a control frame ahead of events, outside capacity accounting.
    pub fn push_control(&mut self, frame: QueuedFrame) {
        self.control.push_back(frame);
    }

    /// Next frame to deliver. Control frames go first.
    pub fn pop(&mut self) -> Option<QueuedFrame> {
        if let Some(frame) = self.control.pop_front() {
            return Some(frame);
        }
        let frame = self.entries.pop_front()?;
        self.bytes -= frame.size();
        if !self.slow_armed
            && self.entries.len() * 2 < self.max_messages
            && self.bytes * 2 < self.max_bytes
        {
            self.slow_armed = true;
        }
        Some(frame)
    }

    /// Queued frames, control lane included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len() + self.control.len()
    }

    /// Whether nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.control.is_empty()
    }

    /// Payload bytes held by event frames.
    #[must_use]
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// Frames shed or rejected since creation.
    #[must_use]
    pub fn shed_total(&self) -> u64 {
        self.shed_total
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.control.clear();
        self.bytes = 0;
    }

    fn would_overflow(&self, size: usize) -> bool {
        self.entries.len() + 1 > self.max_messages || self.bytes + size > self.max_bytes
    }

    fn lowest_priority(&self) -> Option<Priority> {
        self.entries.iter().map(|e| e.kind.priority()).min()
    }

    // Analytics shedding is silent; the first loss of anything more
    // time-sensitive warns the client once until the queue recovers.
    fn note_shed(&mut self, priority: Priority, outcome: &mut PushOutcome) {
        if priority > Priority::Low && self.slow_armed {
            self.slow_armed = false;
            outcome.slow_notice = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::frame::to_raw;

    fn frame(kind: OutboundKind, n: u64) -> QueuedFrame {
        QueuedFrame::new(kind, to_raw(&serde_json::json!({ "n": n })).unwrap())
    }

    fn drain(q: &mut OutboundQueue) -> Vec<(OutboundKind, u64)> {
        std::iter::from_fn(|| q.pop())
            .map(|f| {
                let v: serde_json::Value = serde_json::from_str(f.data.get()).unwrap();
                (f.kind, v["n"].as_u64().unwrap())
            })
            .collect()
    }

    #[test]
    fn fifo_under_capacity() {
        let mut q = OutboundQueue::new(4, 1 << 20);
        for n in 0..3 {
            assert!(q.push(frame(OutboundKind::Transcript, n)).accepted);
        }
        assert_eq!(q.len(), 3);
        let out: Vec<u64> = drain(&mut q).into_iter().map(|(_, n)| n).collect();
        assert_eq!(out, vec![0, 1, 2]);
        assert!(q.is_empty());
        assert_eq!(q.bytes(), 0);
    }

    #[test]
    fn sheds_analytics_before_transcripts() {
        let mut q = OutboundQueue::new(3, 1 << 20);
        let _ = q.push(frame(OutboundKind::Transcript, 0));
        let _ = q.push(frame(OutboundKind::Insight, 1));
        let _ = q.push(frame(OutboundKind::Transcript, 2));

        let outcome = q.push(frame(OutboundKind::Transcript, 3));
        assert!(outcome.accepted);
        assert_eq!(outcome.shed, 1);
        assert!(!outcome.slow_notice, "analytics loss is silent");

        let kinds: Vec<_> = drain(&mut q).into_iter().map(|(k, _)| k).collect();
        assert!(!kinds.contains(&OutboundKind::Insight));
    }

    #[test]
    fn sheds_oldest_not_newest() {
        let mut q = OutboundQueue::new(2, 1 << 20);
        let _ = q.push(frame(OutboundKind::Transcript, 0));
        let _ = q.push(frame(OutboundKind::Transcript, 1));
        let outcome = q.push(frame(OutboundKind::Transcript, 2));
        assert!(outcome.accepted);
        assert!(outcome.slow_notice);

        let out: Vec<u64> = drain(&mut q).into_iter().map(|(_, n)| n).collect();
        assert_eq!(out, vec![1, 2]);
    }

    #[test]
    fn rejects_low_priority_when_everything_outranks_it() {
        let mut q = OutboundQueue::new(2, 1 << 20);
        let _ = q.push(frame(OutboundKind::Artifact, 0));
        let _ = q.push(frame(OutboundKind::Intent, 1));

        let outcome = q.push(frame(OutboundKind::Insight, 2));
        assert!(!outcome.accepted);
        assert_eq!(outcome.shed, 0);
        assert!(!outcome.slow_notice);
        assert_eq!(q.shed_total(), 1);

        // A normal-priority newcomer displaces the older normal one.
        let outcome = q.push(frame(OutboundKind::Request, 3));
        assert!(outcome.accepted);
        assert!(outcome.slow_notice);
        let out = drain(&mut q);
        assert_eq!(out, vec![(OutboundKind::Artifact, 0), (OutboundKind::Request, 3)]);
    }

    #[test]
    fn slow_notice_once_until_half_empty() {
        let mut q = OutboundQueue::new(4, 1 << 20);
        for n in 0..4 {
            let _ = q.push(frame(OutboundKind::Transcript, n));
        }
        assert!(q.push(frame(OutboundKind::Transcript, 4)).slow_notice);
        assert!(!q.push(frame(OutboundKind::Transcript, 5)).slow_notice);

        // Down to 1 of 4 re-arms.
        for _ in 0..3 {
            let _ = q.pop();
        }
        for n in 6..9 {
            let _ = q.push(frame(OutboundKind::Transcript, n));
        }
        assert!(q.push(frame(OutboundKind::Transcript, 9)).slow_notice);
    }

    #[test]
    fn byte_bound_applies() {
        let one = frame(OutboundKind::Transcript, 0).size();
        let mut q = OutboundQueue::new(100, one * 2);
        let _ = q.push(frame(OutboundKind::Transcript, 0));
        let _ = q.push(frame(OutboundKind::Transcript, 1));
        let outcome = q.push(frame(OutboundKind::Transcript, 2));
        assert_eq!(outcome.shed, 1);
        assert_eq!(q.len(), 2);
        assert!(q.bytes() <= one * 2);
    }

    #[test]
    fn oversized_frame_accepted_into_empty_queue() {
        let mut q = OutboundQueue::new(10, 4);
        assert!(q.push(frame(OutboundKind::Artifact, 123_456)).accepted);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn control_lane_bypasses_capacity_and_goes_first() {
        let mut q = OutboundQueue::new(1, 1 << 20);
        let _ = q.push(frame(OutboundKind::Transcript, 0));
        q.push_control(frame(OutboundKind::Slow, 99));
        assert_eq!(q.len(), 2);
        let out = drain(&mut q);
        assert_eq!(out[0], (OutboundKind::Slow, 99));
        assert_eq!(out[1], (OutboundKind::Transcript, 0));
    }

    #[test]
    fn newest_highest_priority_survives_sustained_overflow() {
        let mut q = OutboundQueue::new(8, 1 << 20);
        let kinds = [
            OutboundKind::Insight,
            OutboundKind::Transcript,
            OutboundKind::Intent,
            OutboundKind::Artifact,
        ];
        for n in 0..200u64 {
            let kind = kinds[(n % 4) as usize];
            let _ = q.push(frame(kind, n));
        }
        let out = drain(&mut q);
        // Last high-priority frame pushed was n = 199 (artifact).
        assert!(out.contains(&(OutboundKind::Artifact, 199)));
        assert!(out.iter().all(|(k, _)| *k != OutboundKind::Insight));
    }
}
