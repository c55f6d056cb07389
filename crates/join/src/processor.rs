//! Incremental join maintenance.
//!
//! The processor keeps the join's current result materialized. When events
//! enter or leave stream `S`, only a region of that result can change:
//!
//! - rows holding one of the changed events in slot `S`;
//! - rows where `S` is null next to an event that one of the changed events
//!   joins with, since that null may have become (or stopped being) valid.
//!
//! The region is recomputed by enumerating rows from seeds drawn from the
//! changed events and their join partners, and diffed against the
//! materialized rows. Outer-join completion therefore surfaces as a removed
//! null-padded row plus an inserted matched row in the same delta.

use crate::graph::{JoinGraph, StreamIndex};
use crate::store::StreamStore;
use eddy_core::{Error, EventId, Result, Row, RowDelta, RowKey, RowSchema, SharedEvent};
use hashbrown::{HashMap, HashSet};
use std::collections::{BTreeMap, VecDeque};
use tracing::trace;

/// Assignment of one stream in a partial row.
#[derive(Clone, Debug)]
enum Slot {
    Undecided,
    Null,
    Event(SharedEvent),
}

impl Slot {
    #[inline]
    fn event(&self) -> Option<&SharedEvent> {
        match self {
            Slot::Event(e) => Some(e),
            _ => None,
        }
    }
}

type Partial = Vec<Slot>;

/// The current result rows, in the order they were first emitted.
#[derive(Debug, Default)]
struct Materialized {
    rows: HashMap<RowKey, (u64, Row)>,
    order: BTreeMap<u64, RowKey>,
    by_event: HashMap<EventId, HashSet<RowKey>>,
    next_seq: u64,
}

impl Materialized {
    fn insert(&mut self, row: Row) {
        let key = row.key();
        for id in key.iter().flatten() {
            self.by_event.entry(*id).or_default().insert(key.clone());
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, key.clone());
        self.rows.insert(key, (seq, row));
    }

    fn remove(&mut self, key: &RowKey) -> Option<Row> {
        let (seq, row) = self.rows.remove(key)?;
        self.order.remove(&seq);
        for id in key.iter().flatten() {
            if let Some(keys) = self.by_event.get_mut(id) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_event.remove(id);
                }
            }
        }
        Some(row)
    }

    fn seq(&self, key: &RowKey) -> Option<u64> {
        self.rows.get(key).map(|(seq, _)| *seq)
    }

    fn containing(&self, id: EventId) -> impl Iterator<Item = &RowKey> {
        self.by_event.get(&id).into_iter().flatten()
    }

    fn rows(&self) -> impl Iterator<Item = &Row> {
        self.order.values().filter_map(|key| self.rows.get(key).map(|(_, r)| r))
    }

    fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Maintains the result of an N-way join under arbitrary arrival order.
#[derive(Debug)]
pub struct JoinProcessor {
    graph: JoinGraph,
    schema: RowSchema,
    stores: Vec<StreamStore>,
    result: Materialized,
}

impl JoinProcessor {
    /// Creates a processor, building each stream's window and probe indexes.
    pub fn new(graph: JoinGraph) -> Result<Self> {
        let stores = (0..graph.len())
            .map(|s| StreamStore::new(&graph, s))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            schema: graph.row_schema(),
            graph,
            stores,
            result: Materialized::default(),
        })
    }

    /// Returns the join graph.
    #[inline]
    pub fn graph(&self) -> &JoinGraph {
        &self.graph
    }

    /// Returns the schema of result rows.
    #[inline]
    pub fn schema(&self) -> &RowSchema {
        &self.schema
    }

    /// Returns the current result rows in first-emission order.
    pub fn rows(&self) -> Vec<Row> {
        self.result.rows().cloned().collect()
    }

    /// Returns the number of current result rows.
    #[inline]
    pub fn len(&self) -> usize {
        self.result.len()
    }

    /// Returns true if the result is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.result.len() == 0
    }

    /// Returns the number of events retained by a stream.
    pub fn retained(&self, stream: StreamIndex) -> usize {
        self.stores.get(stream).map(StreamStore::len).unwrap_or(0)
    }

    /// Returns the number of probe indexes a stream maintains.
    pub fn index_count(&self, stream: StreamIndex) -> usize {
        self.stores.get(stream).map(StreamStore::index_count).unwrap_or(0)
    }

    fn check_stream(&self, stream: StreamIndex) -> Result<()> {
        if stream >= self.stores.len() {
            return Err(Error::NotFound {
                kind: "stream",
                id: stream as u64,
            });
        }
        Ok(())
    }

    /// Admits an event on `stream` through its window at logical time `now`
    /// and returns the change to the join result.
    ///
    /// An event whose join fields cannot be compared with the neighbouring
    /// streams is rejected before any state changes.
    pub fn on_event(&mut self, stream: StreamIndex, event: SharedEvent, now: i64) -> Result<RowDelta> {
        self.check_stream(stream)?;
        self.graph.check_event(stream, &event)?;
        let output = self.stores[stream].window.admit(event, now)?;
        self.apply(stream, output.inserted, output.expired)
    }

    /// Applies events entering and leaving `stream` directly, bypassing its
    /// window. Used for inputs whose retention is managed upstream, such as
    /// a named dataset.
    pub fn on_change(
        &mut self,
        stream: StreamIndex,
        inserted: Vec<SharedEvent>,
        removed: Vec<SharedEvent>,
    ) -> Result<RowDelta> {
        self.check_stream(stream)?;
        for event in &inserted {
            self.graph.check_event(stream, event)?;
        }
        self.apply(stream, inserted, removed)
    }

    /// Advances logical time on every stream window. Returns one delta per
    /// window output, in stream order; a batch boundary whose join result
    /// did not change yields an empty delta.
    pub fn advance_time(&mut self, now: i64) -> Result<Vec<RowDelta>> {
        let mut deltas = Vec::new();
        for stream in 0..self.stores.len() {
            for output in self.stores[stream].window.advance_time(now) {
                deltas.push(self.apply(stream, output.inserted, output.expired)?);
            }
        }
        Ok(deltas)
    }

    fn apply(
        &mut self,
        stream: StreamIndex,
        added: Vec<SharedEvent>,
        expired: Vec<SharedEvent>,
    ) -> Result<RowDelta> {
        for event in &added {
            self.stores[stream].insert(event.clone());
        }
        for event in &expired {
            self.stores[stream].remove(event);
        }

        // Join partners of every changed event.
        let mut partners: Vec<(StreamIndex, SharedEvent)> = Vec::new();
        let mut seen_partners = HashSet::new();
        for event in added.iter().chain(expired.iter()) {
            for adj in self.graph.adjacency(stream) {
                for partner in self.stores[adj.stream].probe(&self.graph, stream, event)? {
                    if seen_partners.insert((adj.stream, partner.id())) {
                        partners.push((adj.stream, partner));
                    }
                }
            }
        }

        // Region of the current result that may change.
        let changed: HashSet<EventId> = added.iter().chain(expired.iter()).map(|e| e.id()).collect();
        let mut old_region: Vec<(u64, RowKey)> = Vec::new();
        let mut in_old = HashSet::new();
        for id in &changed {
            for key in self.result.containing(*id) {
                if key[stream] == Some(*id) && in_old.insert(key.clone()) {
                    old_region.push((self.result.seq(key).unwrap_or_default(), key.clone()));
                }
            }
        }
        for (partner_stream, partner) in &partners {
            for key in self.result.containing(partner.id()) {
                if key[*partner_stream] == Some(partner.id())
                    && key[stream].is_none()
                    && in_old.insert(key.clone())
                {
                    old_region.push((self.result.seq(key).unwrap_or_default(), key.clone()));
                }
            }
        }
        old_region.sort_unstable_by_key(|(seq, _)| *seq);

        // Recompute the region from seeds.
        let width = self.graph.len();
        let mut seeds = Vec::new();
        for event in &added {
            if self.stores[stream].contains(event.id()) {
                let mut partial = vec![Slot::Undecided; width];
                partial[stream] = Slot::Event(event.clone());
                seeds.push(partial);
            }
        }
        if !self.graph.is_required(stream) {
            for (partner_stream, partner) in &partners {
                let mut partial = vec![Slot::Undecided; width];
                partial[*partner_stream] = Slot::Event(partner.clone());
                partial[stream] = Slot::Null;
                seeds.push(partial);
            }
        }
        let new_region = self.enumerate(seeds)?;
        let in_new: HashSet<RowKey> = new_region.iter().map(Row::key).collect();

        let mut removed = Vec::new();
        for (_, key) in &old_region {
            if !in_new.contains(key) {
                if let Some(row) = self.result.remove(key) {
                    removed.push(row);
                }
            }
        }
        let mut inserted = Vec::new();
        for row in new_region {
            if !in_old.contains(&row.key()) {
                self.result.insert(row.clone());
                inserted.push(row);
            }
        }

        let mut delta = RowDelta::from_parts(inserted, removed);
        delta.elide();
        trace!(
            stream = %self.graph.streams()[stream].alias,
            added = added.len(),
            expired = expired.len(),
            inserted = delta.inserted.len(),
            removed = delta.removed.len(),
            "JoinProcessor: applied change"
        );
        Ok(delta)
    }

    /// Enumerates every valid row reachable from the seeds, in discovery
    /// order. Each step decides the lowest-numbered undecided stream joined
    /// to an already assigned event.
    fn enumerate(&self, seeds: Vec<Partial>) -> Result<Vec<Row>> {
        let mut queue: VecDeque<Partial> = seeds.into();
        let mut rows = Vec::new();
        let mut seen = HashSet::new();

        while let Some(mut partial) = queue.pop_front() {
            if let Some(frontier) = self.frontier(&partial) {
                for candidate in self.matching(frontier, &partial)? {
                    let mut next = partial.clone();
                    next[frontier] = Slot::Event(candidate);
                    queue.push_back(next);
                }
                if self.may_be_null(frontier, &partial) {
                    partial[frontier] = Slot::Null;
                    queue.push_back(partial);
                }
                continue;
            }

            for slot in partial.iter_mut() {
                if matches!(slot, Slot::Undecided) {
                    *slot = Slot::Null;
                }
            }
            if self.is_valid(&partial)? {
                let row = Row::from_slots(partial.into_iter().map(|s| s.event().cloned()).collect());
                if seen.insert(row.key()) {
                    rows.push(row);
                }
            }
        }
        Ok(rows)
    }

    fn frontier(&self, partial: &Partial) -> Option<StreamIndex> {
        (0..partial.len()).find(|&s| {
            matches!(partial[s], Slot::Undecided)
                && self
                    .graph
                    .adjacency(s)
                    .iter()
                    .any(|adj| partial[adj.stream].event().is_some())
        })
    }

    /// Events of `stream` that satisfy every edge to the assigned events.
    fn matching(&self, stream: StreamIndex, partial: &Partial) -> Result<Vec<SharedEvent>> {
        let mut neighbours = self
            .graph
            .adjacency(stream)
            .iter()
            .filter_map(|adj| partial[adj.stream].event().map(|e| (adj.stream, e)));
        let Some((first, event)) = neighbours.next() else {
            return Ok(self.stores[stream].events().cloned().collect());
        };
        let mut candidates = self.stores[stream].probe(&self.graph, first, event)?;
        for (other, event) in neighbours {
            if let Some(adj) = self.graph.adjacent(other, stream) {
                candidates.retain(|c| adj.matches(event, c));
            }
        }
        Ok(candidates)
    }

    /// Whether `stream` may be null given the events assigned so far.
    fn may_be_null(&self, stream: StreamIndex, partial: &Partial) -> bool {
        !self.graph.is_required(stream)
            && self.graph.adjacency(stream).iter().all(|adj| {
                partial[adj.stream].event().is_none()
                    || self
                        .graph
                        .adjacent(adj.stream, stream)
                        .is_some_and(|back| back.preserved)
            })
    }

    fn is_valid(&self, partial: &Partial) -> Result<bool> {
        if partial.iter().all(|s| s.event().is_none()) {
            return Ok(false);
        }
        for stream in 0..partial.len() {
            if partial[stream].event().is_some() {
                continue;
            }
            if !self.may_be_null(stream, partial) {
                return Ok(false);
            }
            let next_to_event = self
                .graph
                .adjacency(stream)
                .iter()
                .any(|adj| partial[adj.stream].event().is_some());
            if next_to_event && !self.matching(stream, partial)?.is_empty() {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Condition, JoinEdge, JoinKind, JoinStream};
    use eddy_core::{DataType, Event, EventType, EventTypeBuilder, Value};
    use eddy_window::WindowPolicy;
    use std::sync::Arc;

    fn bean() -> Arc<EventType> {
        EventTypeBuilder::new("SupportBean")
            .unwrap()
            .field("theString", DataType::String)
            .unwrap()
            .field("intPrimitive", DataType::Int32)
            .unwrap()
            .build()
    }

    fn event(ty: &Arc<EventType>, s: &str, i: i32) -> SharedEvent {
        Arc::new(Event::new(ty.clone(), vec![s.into(), Value::Int32(i)]).unwrap())
    }

    fn two_way(kind: JoinKind, window: WindowPolicy) -> (Arc<EventType>, JoinProcessor) {
        let ty = bean();
        let graph = JoinGraph::new(
            vec![
                JoinStream::new("a", ty.clone(), window.clone()),
                JoinStream::new("b", ty.clone(), window),
            ],
            vec![JoinEdge::new(
                "a",
                kind,
                "b",
                vec![Condition::equals("theString", "theString")],
            )],
        )
        .unwrap();
        (ty, JoinProcessor::new(graph).unwrap())
    }

    fn ids(row: &Row) -> Vec<Option<EventId>> {
        row.key()
    }

    #[test]
    fn test_inner_join_waits_for_both_sides() {
        let (ty, mut join) = two_way(JoinKind::Inner, WindowPolicy::KeepAll);
        let a = event(&ty, "E1", 1);
        assert!(join.on_event(0, a.clone(), 0).unwrap().is_empty());

        let b = event(&ty, "E1", 2);
        let delta = join.on_event(1, b.clone(), 0).unwrap();
        assert!(delta.removed.is_empty());
        assert_eq!(ids(&delta.inserted[0]), vec![Some(a.id()), Some(b.id())]);
        assert_eq!(join.index_count(0), 1);
    }

    #[test]
    fn test_left_join_retracts_and_replaces() {
        let (ty, mut join) = two_way(JoinKind::Left, WindowPolicy::KeepAll);
        let a = event(&ty, "E1", 1);
        let delta = join.on_event(0, a.clone(), 0).unwrap();
        assert_eq!(ids(&delta.inserted[0]), vec![Some(a.id()), None]);

        // a right-only event produces nothing under a left join
        assert!(join.on_event(1, event(&ty, "E2", 0), 0).unwrap().is_empty());

        let b = event(&ty, "E1", 2);
        let delta = join.on_event(1, b.clone(), 0).unwrap();
        assert_eq!(ids(&delta.removed[0]), vec![Some(a.id()), None]);
        assert_eq!(ids(&delta.inserted[0]), vec![Some(a.id()), Some(b.id())]);
        assert_eq!(join.len(), 1);
    }

    #[test]
    fn test_full_join_restores_null_row_on_expiry() {
        let (ty, mut join) = two_way(JoinKind::Full, WindowPolicy::Length { size: 1 });
        let a = event(&ty, "E1", 1);
        let b = event(&ty, "E1", 2);
        join.on_event(0, a.clone(), 0).unwrap();
        join.on_event(1, b.clone(), 0).unwrap();

        // b leaves its length(1) window
        let c = event(&ty, "E9", 3);
        let delta = join.on_event(1, c.clone(), 0).unwrap();
        let removed: Vec<_> = delta.removed.iter().map(ids).collect();
        let inserted: Vec<_> = delta.inserted.iter().map(ids).collect();
        assert_eq!(removed, vec![vec![Some(a.id()), Some(b.id())]]);
        assert!(inserted.contains(&vec![Some(a.id()), None]));
        assert!(inserted.contains(&vec![None, Some(c.id())]));
        assert_eq!(join.len(), 2);
    }

    #[test]
    fn test_multiple_matches_in_arrival_order() {
        let (ty, mut join) = two_way(JoinKind::Inner, WindowPolicy::KeepAll);
        let b1 = event(&ty, "E1", 1);
        let b2 = event(&ty, "E1", 2);
        join.on_event(1, b1.clone(), 0).unwrap();
        join.on_event(1, b2.clone(), 0).unwrap();

        let a = event(&ty, "E1", 0);
        let delta = join.on_event(0, a.clone(), 0).unwrap();
        let inserted: Vec<_> = delta.inserted.iter().map(ids).collect();
        assert_eq!(
            inserted,
            vec![vec![Some(a.id()), Some(b1.id())], vec![Some(a.id()), Some(b2.id())]]
        );
    }

    #[test]
    fn test_type_mismatch_leaves_state_untouched() {
        let (ty, mut join) = two_way(JoinKind::Left, WindowPolicy::KeepAll);
        let bad = Arc::new(Event::new(ty, vec![Value::Int64(5), Value::Int32(0)]).unwrap());
        assert!(matches!(
            join.on_event(0, bad, 0),
            Err(Error::TypeMismatch { .. })
        ));
        assert_eq!(join.retained(0), 0);
        assert!(join.is_empty());
    }

    #[test]
    fn test_time_batch_input_joins_per_boundary() {
        let (ty, mut join) = two_way(JoinKind::Inner, WindowPolicy::TimeBatch { span_ms: 1_000 });
        assert!(join.on_event(0, event(&ty, "E1", 1), 0).unwrap().is_empty());
        assert!(join.on_event(1, event(&ty, "E1", 2), 0).unwrap().is_empty());

        let deltas = join.advance_time(1_000).unwrap();
        let inserted: usize = deltas.iter().map(|d| d.inserted.len()).sum();
        assert_eq!(inserted, 1);

        // both batches expire at the next boundary
        let deltas = join.advance_time(2_000).unwrap();
        let removed: usize = deltas.iter().map(|d| d.removed.len()).sum();
        assert_eq!(removed, 1);
        assert!(join.is_empty());
    }

    #[test]
    fn test_single_stream_passes_events_through() {
        let ty = bean();
        let graph = JoinGraph::single(JoinStream::new(
            "s",
            ty.clone(),
            WindowPolicy::Length { size: 2 },
        ))
        .unwrap();
        let mut join = JoinProcessor::new(graph).unwrap();
        let first = event(&ty, "E1", 1);
        join.on_event(0, first.clone(), 0).unwrap();
        join.on_event(0, event(&ty, "E2", 2), 0).unwrap();
        let delta = join.on_event(0, event(&ty, "E3", 3), 0).unwrap();
        assert_eq!(delta.inserted.len(), 1);
        assert_eq!(ids(&delta.removed[0]), vec![Some(first.id())]);
    }
}
