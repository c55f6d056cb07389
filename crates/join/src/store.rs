//! Per-stream retained events and the indexes used to probe them.

use crate::graph::{CompareOp, JoinGraph, StreamIndex};
use eddy_core::{Event, EventId, Result, SharedEvent, Value};
use eddy_index::{IndexHandle, IndexRegistry, KeyShape};
use eddy_window::Window;
use std::collections::BTreeMap;

/// How events of one neighbour probe this stream.
#[derive(Debug)]
struct ProbePlan {
    from: StreamIndex,
    index: Option<IndexHandle>,
    /// Positions in the probing event of each index key column.
    key: Vec<usize>,
}

/// The retained events of one join input.
#[derive(Debug)]
pub(crate) struct StreamStore {
    stream: StreamIndex,
    pub(crate) window: Window,
    /// Visible events in arrival order. Event ids grow monotonically.
    events: BTreeMap<EventId, SharedEvent>,
    indexes: IndexRegistry,
    plans: Vec<ProbePlan>,
}

impl StreamStore {
    /// Creates the store of `stream`, with one equality index per neighbour
    /// whose edge carries equality conditions.
    pub(crate) fn new(graph: &JoinGraph, stream: StreamIndex) -> Result<Self> {
        let input = &graph.streams()[stream];
        let window = Window::new(input.window.clone(), &input.event_type)?;
        let mut indexes = IndexRegistry::new(input.event_type.clone());
        let mut plans = Vec::new();

        for adj in graph.adjacency(stream) {
            let Some(incoming) = graph.adjacent(adj.stream, stream) else {
                continue;
            };
            let equalities: Vec<_> = incoming
                .conditions
                .iter()
                .filter(|c| c.op == CompareOp::Eq)
                .collect();
            if equalities.is_empty() {
                plans.push(ProbePlan {
                    from: adj.stream,
                    index: None,
                    key: Vec::new(),
                });
                continue;
            }
            let fields = input.event_type.fields();
            let shape = KeyShape::equality(equalities.iter().map(|c| fields[c.other].name.clone()));
            let handle = indexes.get_or_create(shape, std::iter::empty::<&Event>())?;
            let key = handle
                .shape()
                .equality_fields()
                .iter()
                .filter_map(|name| {
                    equalities
                        .iter()
                        .find(|c| &fields[c.other].name == name)
                        .map(|c| c.own)
                })
                .collect();
            plans.push(ProbePlan {
                from: adj.stream,
                index: Some(handle),
                key,
            });
        }

        Ok(Self {
            stream,
            window,
            events: BTreeMap::new(),
            indexes,
            plans,
        })
    }

    pub(crate) fn insert(&mut self, event: SharedEvent) {
        self.indexes.insert(&event);
        self.events.insert(event.id(), event);
    }

    pub(crate) fn remove(&mut self, event: &Event) -> bool {
        match self.events.remove(&event.id()) {
            Some(current) => {
                self.indexes.delete(&current);
                true
            }
            None => false,
        }
    }

    pub(crate) fn contains(&self, id: EventId) -> bool {
        self.events.contains_key(&id)
    }

    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }

    pub(crate) fn events(&self) -> impl Iterator<Item = &SharedEvent> {
        self.events.values()
    }

    pub(crate) fn index_count(&self) -> usize {
        self.indexes.len()
    }

    /// Returns the retained events joined to `event` of stream `from` on
    /// their edge, in arrival order.
    pub(crate) fn probe(
        &self,
        graph: &JoinGraph,
        from: StreamIndex,
        event: &Event,
    ) -> Result<Vec<SharedEvent>> {
        let Some(adj) = graph.adjacent(from, self.stream) else {
            return Ok(Vec::new());
        };
        let plan = self.plans.iter().find(|p| p.from == from);
        let candidates: Vec<&SharedEvent> = match plan.and_then(|p| p.index.as_ref().map(|h| (p, h))) {
            Some((plan, handle)) => {
                let key: Vec<Value> = plan
                    .key
                    .iter()
                    .map(|&i| event.get(i).cloned().unwrap_or(Value::Null))
                    .collect();
                let mut ids = self.indexes.lookup(handle, &key)?;
                ids.sort_unstable();
                ids.iter().filter_map(|id| self.events.get(id)).collect()
            }
            None => self.events.values().collect(),
        };
        Ok(candidates
            .into_iter()
            .filter(|candidate| adj.matches(event, candidate))
            .cloned()
            .collect())
    }
}
