//! Window state.

use crate::policy::WindowPolicy;
use eddy_core::{Error, EventId, EventType, Result, SharedEvent};
use std::collections::VecDeque;
use tracing::trace;

/// Events that became visible and events that expired in one step.
#[derive(Clone, Debug, Default)]
pub struct WindowOutput {
    pub inserted: Vec<SharedEvent>,
    pub expired: Vec<SharedEvent>,
}

impl WindowOutput {
    fn inserted(event: SharedEvent) -> Self {
        Self {
            inserted: vec![event],
            expired: Vec::new(),
        }
    }

    /// Returns true if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.expired.is_empty()
    }
}

/// The retained events of one stream.
#[derive(Debug)]
pub struct Window {
    policy: WindowPolicy,
    /// Position of the timestamp field for externally timed windows.
    timestamp_field: Option<usize>,
    /// Visible events with the time they are stamped with.
    retained: VecDeque<(i64, SharedEvent)>,
    /// Pending batch for batch policies.
    buffer: Vec<SharedEvent>,
    next_boundary: Option<i64>,
    watermark: i64,
}

impl Window {
    /// Creates a window, validating the policy against the stream schema.
    pub fn new(policy: WindowPolicy, schema: &EventType) -> Result<Self> {
        policy.validate(schema)?;
        let timestamp_field = match &policy {
            WindowPolicy::ExternallyTimed { field, .. } => Some(schema.require_field(field)?),
            _ => None,
        };
        Ok(Self {
            policy,
            timestamp_field,
            retained: VecDeque::new(),
            buffer: Vec::new(),
            next_boundary: None,
            watermark: i64::MIN,
        })
    }

    /// Returns the policy.
    #[inline]
    pub fn policy(&self) -> &WindowPolicy {
        &self.policy
    }

    /// Returns the visible events, oldest first. Externally timed windows
    /// order by event timestamp.
    pub fn retained(&self) -> impl Iterator<Item = &SharedEvent> {
        self.retained.iter().map(|(_, e)| e)
    }

    /// Returns the number of visible events.
    #[inline]
    pub fn len(&self) -> usize {
        self.retained.len()
    }

    /// Returns true if no event is visible.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.retained.is_empty()
    }

    /// Returns the number of events waiting for the next batch.
    #[inline]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Removes an event that was deleted out-of-band.
    ///
    /// Pending batch events are removed as well. Returns the removed event.
    pub fn remove(&mut self, id: EventId) -> Option<SharedEvent> {
        if let Some(pos) = self.retained.iter().position(|(_, e)| e.id() == id) {
            return self.retained.remove(pos).map(|(_, e)| e);
        }
        let pos = self.buffer.iter().position(|e| e.id() == id)?;
        Some(self.buffer.remove(pos))
    }

    /// Checks that the window can admit `event` without admitting it.
    pub fn check(&self, event: &SharedEvent) -> Result<()> {
        if self.timestamp_field.is_some() {
            self.event_time(event)?;
        }
        Ok(())
    }

    /// Admits one event at logical time `now`.
    pub fn admit(&mut self, event: SharedEvent, now: i64) -> Result<WindowOutput> {
        let output = match &self.policy {
            WindowPolicy::KeepAll => {
                self.retained.push_back((now, event.clone()));
                WindowOutput::inserted(event)
            }
            WindowPolicy::Length { size } => {
                let size = *size;
                self.retained.push_back((now, event.clone()));
                let mut output = WindowOutput::inserted(event);
                while self.retained.len() > size {
                    if let Some((_, old)) = self.retained.pop_front() {
                        output.expired.push(old);
                    }
                }
                output
            }
            WindowPolicy::LengthBatch { size } => {
                let size = *size;
                self.buffer.push(event);
                if self.buffer.len() >= size {
                    self.flush(now)
                } else {
                    WindowOutput::default()
                }
            }
            WindowPolicy::Time { span_ms } => {
                let span_ms = *span_ms;
                self.retained.push_back((now, event.clone()));
                let mut output = WindowOutput::inserted(event);
                output.expired = self.expire_spanned(now, span_ms);
                output
            }
            WindowPolicy::ExternallyTimed { span_ms, .. } => {
                let span_ms = *span_ms;
                let ts = self.event_time(&event)?;
                self.watermark = self.watermark.max(ts);
                // retained stays sorted by timestamp; a late event may already be out of span
                let pos = self.retained.partition_point(|(t, _)| *t <= ts);
                self.retained.insert(pos, (ts, event.clone()));
                let mut output = WindowOutput::inserted(event);
                output.expired = self.expire_spanned(self.watermark, span_ms);
                output
            }
            WindowPolicy::TimeBatch { span_ms } => {
                if self.next_boundary.is_none() {
                    self.next_boundary = now.checked_add(*span_ms);
                }
                self.buffer.push(event);
                WindowOutput::default()
            }
        };
        trace!(
            inserted = output.inserted.len(),
            expired = output.expired.len(),
            retained = self.retained.len(),
            "Window: admitted event"
        );
        Ok(output)
    }

    /// Advances logical time, returning one output per boundary crossed.
    pub fn advance_time(&mut self, now: i64) -> Vec<WindowOutput> {
        match self.policy {
            WindowPolicy::Time { span_ms } => {
                let expired = self.expire_spanned(now, span_ms);
                if expired.is_empty() {
                    Vec::new()
                } else {
                    vec![WindowOutput {
                        inserted: Vec::new(),
                        expired,
                    }]
                }
            }
            WindowPolicy::TimeBatch { span_ms } => {
                let mut outputs = Vec::new();
                while let Some(boundary) = self.next_boundary {
                    if now < boundary {
                        break;
                    }
                    let output = self.flush(boundary);
                    if output.is_empty() {
                        // nothing pending and nothing to expire: stop the clock
                        self.next_boundary = None;
                    } else {
                        // a boundary past the end of time is never reached
                        self.next_boundary = boundary.checked_add(span_ms);
                        outputs.push(output);
                    }
                }
                outputs
            }
            _ => Vec::new(),
        }
    }

    /// Releases the pending batch and expires the previous one.
    fn flush(&mut self, now: i64) -> WindowOutput {
        let inserted = std::mem::take(&mut self.buffer);
        let expired: Vec<SharedEvent> = self.retained.drain(..).map(|(_, e)| e).collect();
        self.retained
            .extend(inserted.iter().map(|e| (now, e.clone())));
        trace!(
            inserted = inserted.len(),
            expired = expired.len(),
            "Window: flushed batch"
        );
        WindowOutput { inserted, expired }
    }

    /// Expires events whose stamp plus `span_ms` is at or before `now`.
    fn expire_spanned(&mut self, now: i64, span_ms: i64) -> Vec<SharedEvent> {
        let mut expired = Vec::new();
        while let Some((ts, _)) = self.retained.front() {
            if i128::from(*ts) + i128::from(span_ms) > i128::from(now) {
                break;
            }
            if let Some((_, e)) = self.retained.pop_front() {
                expired.push(e);
            }
        }
        expired
    }

    fn event_time(&self, event: &SharedEvent) -> Result<i64> {
        let idx = self.timestamp_field.unwrap_or_default();
        event.get(idx).and_then(|v| v.as_i64()).ok_or_else(|| {
            Error::invalid_operation(format!(
                "event of type '{}' carries no timestamp",
                event.event_type().name()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eddy_core::{DataType, Event, EventTypeBuilder, Value};
    use std::sync::Arc;

    fn tick_type() -> Arc<EventType> {
        EventTypeBuilder::new("Tick")
            .unwrap()
            .field("v", DataType::Int32)
            .unwrap()
            .field("ts", DataType::Int64)
            .unwrap()
            .build()
    }

    fn tick(ty: &Arc<EventType>, v: i32, ts: i64) -> SharedEvent {
        Arc::new(Event::new(ty.clone(), vec![Value::Int32(v), Value::Int64(ts)]).unwrap())
    }

    fn ids(events: &[SharedEvent]) -> Vec<u64> {
        events.iter().map(|e| e.id()).collect()
    }

    #[test]
    fn test_keep_all_never_expires() {
        let ty = tick_type();
        let mut window = Window::new(WindowPolicy::KeepAll, &ty).unwrap();
        for v in 0..100 {
            let out = window.admit(tick(&ty, v, 0), v as i64).unwrap();
            assert!(out.expired.is_empty());
        }
        assert_eq!(window.len(), 100);
        assert!(window.advance_time(1_000_000).is_empty());
    }

    #[test]
    fn test_length_expires_oldest() {
        let ty = tick_type();
        let mut window = Window::new(WindowPolicy::Length { size: 3 }, &ty).unwrap();
        let events: Vec<_> = (0..5).map(|v| tick(&ty, v, 0)).collect();
        for e in &events[..3] {
            assert!(window.admit(e.clone(), 0).unwrap().expired.is_empty());
        }
        let out = window.admit(events[3].clone(), 0).unwrap();
        assert_eq!(ids(&out.expired), ids(&events[..1]));
        let out = window.admit(events[4].clone(), 0).unwrap();
        assert_eq!(ids(&out.expired), ids(&events[1..2]));
        assert_eq!(
            window.retained().map(|e| e.id()).collect::<Vec<_>>(),
            ids(&events[2..])
        );
    }

    #[test]
    fn test_time_batch_flushes_at_boundary() {
        let ty = tick_type();
        let mut window = Window::new(WindowPolicy::TimeBatch { span_ms: 1000 }, &ty).unwrap();
        let first: Vec<_> = (0..3).map(|v| tick(&ty, v, 0)).collect();
        for e in &first {
            assert!(window.admit(e.clone(), 1000).unwrap().is_empty());
        }
        assert!(window.advance_time(1999).is_empty());

        let outputs = window.advance_time(2000);
        assert_eq!(outputs.len(), 1);
        assert_eq!(ids(&outputs[0].inserted), ids(&first));
        assert!(outputs[0].expired.is_empty());
        assert_eq!(window.len(), 3);

        let late = tick(&ty, 9, 0);
        window.admit(late.clone(), 2500).unwrap();
        let outputs = window.advance_time(3000);
        assert_eq!(ids(&outputs[0].inserted), vec![late.id()]);
        assert_eq!(ids(&outputs[0].expired), ids(&first));
    }

    #[test]
    fn test_time_batch_multiple_boundaries_then_stops() {
        let ty = tick_type();
        let mut window = Window::new(WindowPolicy::TimeBatch { span_ms: 100 }, &ty).unwrap();
        let e = tick(&ty, 1, 0);
        window.admit(e.clone(), 0).unwrap();

        // boundary 100 releases e, 200 expires it, 300 has nothing and stops the clock
        let outputs = window.advance_time(1000);
        assert_eq!(outputs.len(), 2);
        assert_eq!(ids(&outputs[0].inserted), vec![e.id()]);
        assert!(outputs[1].inserted.is_empty());
        assert_eq!(ids(&outputs[1].expired), vec![e.id()]);
        assert!(window.advance_time(5000).is_empty());

        // the next event restarts the clock relative to its own arrival
        window.admit(tick(&ty, 2, 0), 5050).unwrap();
        assert!(window.advance_time(5149).is_empty());
        assert_eq!(window.advance_time(5150).len(), 1);
    }

    #[test]
    fn test_remove_frees_capacity() {
        let ty = tick_type();
        let mut window = Window::new(WindowPolicy::Length { size: 2 }, &ty).unwrap();
        let a = tick(&ty, 1, 0);
        let b = tick(&ty, 2, 0);
        window.admit(a.clone(), 0).unwrap();
        window.admit(b.clone(), 0).unwrap();
        assert_eq!(window.remove(a.id()).map(|e| e.id()), Some(a.id()));
        assert!(window.remove(a.id()).is_none());

        let out = window.admit(tick(&ty, 3, 0), 0).unwrap();
        assert!(out.expired.is_empty());
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_length_batch() {
        let ty = tick_type();
        let mut window = Window::new(WindowPolicy::LengthBatch { size: 2 }, &ty).unwrap();
        let events: Vec<_> = (0..4).map(|v| tick(&ty, v, 0)).collect();
        assert!(window.admit(events[0].clone(), 0).unwrap().is_empty());
        let out = window.admit(events[1].clone(), 0).unwrap();
        assert_eq!(ids(&out.inserted), ids(&events[..2]));
        window.admit(events[2].clone(), 0).unwrap();
        let out = window.admit(events[3].clone(), 0).unwrap();
        assert_eq!(ids(&out.inserted), ids(&events[2..]));
        assert_eq!(ids(&out.expired), ids(&events[..2]));
    }

    #[test]
    fn test_sliding_time() {
        let ty = tick_type();
        let mut window = Window::new(WindowPolicy::Time { span_ms: 100 }, &ty).unwrap();
        let a = tick(&ty, 1, 0);
        let b = tick(&ty, 2, 0);
        window.admit(a.clone(), 0).unwrap();
        window.admit(b.clone(), 50).unwrap();

        let outputs = window.advance_time(100);
        assert_eq!(ids(&outputs[0].expired), vec![a.id()]);
        let outputs = window.advance_time(149);
        assert!(outputs.is_empty());
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_externally_timed() {
        let ty = tick_type();
        let policy = WindowPolicy::ExternallyTimed {
            field: "ts".into(),
            span_ms: 10,
        };
        let mut window = Window::new(policy, &ty).unwrap();
        let a = tick(&ty, 1, 100);
        window.admit(a.clone(), 0).unwrap();
        assert!(window.admit(tick(&ty, 2, 105), 0).unwrap().expired.is_empty());
        let out = window.admit(tick(&ty, 3, 110), 0).unwrap();
        assert_eq!(ids(&out.expired), vec![a.id()]);

        let untimed = Arc::new(Event::new(ty.clone(), vec![Value::Int32(4), Value::Null]).unwrap());
        assert!(window.check(&untimed).is_err());
        assert!(window.admit(untimed, 0).is_err());
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_externally_timed_out_of_order() {
        let ty = tick_type();
        let policy = WindowPolicy::ExternallyTimed {
            field: "ts".into(),
            span_ms: 10,
        };
        let mut window = Window::new(policy, &ty).unwrap();
        let first = tick(&ty, 1, 200);
        window.admit(first.clone(), 0).unwrap();

        // already older than the watermark allows: in and out in one step
        let stale = tick(&ty, 2, 100);
        let out = window.admit(stale.clone(), 0).unwrap();
        assert_eq!(ids(&out.inserted), vec![stale.id()]);
        assert_eq!(ids(&out.expired), vec![stale.id()]);

        let out = window.admit(tick(&ty, 3, 205), 0).unwrap();
        assert!(out.expired.is_empty());
        assert_eq!(window.len(), 2);
        assert!(window.retained().all(|e| e.id() != stale.id()));

        // a late event within span expires by its own timestamp, not arrival
        let late = tick(&ty, 4, 198);
        assert!(window.admit(late.clone(), 0).unwrap().expired.is_empty());
        let out = window.admit(tick(&ty, 5, 209), 0).unwrap();
        assert_eq!(ids(&out.expired), vec![late.id()]);
        let out = window.admit(tick(&ty, 6, 210), 0).unwrap();
        assert_eq!(ids(&out.expired), vec![first.id()]);
    }

    #[test]
    fn test_time_near_minimum_does_not_overflow() {
        let ty = tick_type();
        let mut window = Window::new(WindowPolicy::Time { span_ms: 100 }, &ty).unwrap();
        let e = tick(&ty, 1, 0);
        assert!(window.admit(e.clone(), i64::MIN).unwrap().expired.is_empty());
        assert!(window.advance_time(i64::MIN + 50).is_empty());
        let outputs = window.advance_time(i64::MIN + 100);
        assert_eq!(ids(&outputs[0].expired), vec![e.id()]);

        let policy = WindowPolicy::ExternallyTimed {
            field: "ts".into(),
            span_ms: 10,
        };
        let mut window = Window::new(policy, &ty).unwrap();
        let out = window.admit(tick(&ty, 1, i64::MIN), 0).unwrap();
        assert!(out.expired.is_empty());

        let mut window = Window::new(WindowPolicy::TimeBatch { span_ms: 100 }, &ty).unwrap();
        window.admit(tick(&ty, 1, 0), i64::MAX - 150).unwrap();
        assert_eq!(window.advance_time(i64::MAX).len(), 1);
        assert!(window.advance_time(i64::MAX).is_empty());
    }
}
