//! Join graphs.
//!
//! A [`JoinGraph`] is the static shape of a join: one node per input stream
//! and one edge per joined pair, each edge typed inner or outer and carrying
//! the comparison conditions between the two streams' fields.

use eddy_core::{DataType, Error, Event, EventType, Result, RowSchema, Value, MAX_SLOTS};
use eddy_window::WindowPolicy;
use serde::Deserialize;
use std::cmp::Ordering;
use std::sync::Arc;

/// Position of a stream in a join, and of its slot in result rows.
pub type StreamIndex = usize;

/// Join type of an edge, read left to right.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    #[default]
    Inner,
    /// Left rows are kept when no right row matches.
    Left,
    /// Right rows are kept when no left row matches.
    Right,
    Full,
}

impl JoinKind {
    /// Returns true if unmatched left rows are emitted.
    #[inline]
    pub fn preserves_left(&self) -> bool {
        matches!(self, JoinKind::Left | JoinKind::Full)
    }

    /// Returns true if unmatched right rows are emitted.
    #[inline]
    pub fn preserves_right(&self) -> bool {
        matches!(self, JoinKind::Right | JoinKind::Full)
    }
}

/// Comparison operator of a join condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
pub enum CompareOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
}

impl CompareOp {
    /// Evaluates `left op right`. A Null on either side never matches.
    pub fn eval(&self, left: &Value, right: &Value) -> bool {
        let Some(ord) = left.compare(right) else {
            return false;
        };
        match self {
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::Ne => ord != Ordering::Equal,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::Le => ord != Ordering::Greater,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::Ge => ord != Ordering::Less,
        }
    }

    /// Returns the operator with its operands swapped.
    pub fn flip(&self) -> Self {
        match self {
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::Le => CompareOp::Ge,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::Ge => CompareOp::Le,
            other => *other,
        }
    }
}

/// `left_field op right_field` between the two streams of an edge.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Condition {
    pub left_field: String,
    pub op: CompareOp,
    pub right_field: String,
}

impl Condition {
    /// Creates a condition.
    pub fn new(left_field: impl Into<String>, op: CompareOp, right_field: impl Into<String>) -> Self {
        Self {
            left_field: left_field.into(),
            op,
            right_field: right_field.into(),
        }
    }

    /// Creates an equality condition.
    pub fn equals(left_field: impl Into<String>, right_field: impl Into<String>) -> Self {
        Self::new(left_field, CompareOp::Eq, right_field)
    }
}

/// One input of a join.
#[derive(Clone, Debug)]
pub struct JoinStream {
    pub alias: String,
    pub event_type: Arc<EventType>,
    pub window: WindowPolicy,
}

impl JoinStream {
    /// Creates a stream input.
    pub fn new(alias: impl Into<String>, event_type: Arc<EventType>, window: WindowPolicy) -> Self {
        Self {
            alias: alias.into(),
            event_type,
            window,
        }
    }
}

/// A join edge between two streams named by alias.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct JoinEdge {
    pub left: String,
    pub right: String,
    #[serde(default)]
    pub kind: JoinKind,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl JoinEdge {
    /// Creates an edge.
    pub fn new(
        left: impl Into<String>,
        kind: JoinKind,
        right: impl Into<String>,
        conditions: Vec<Condition>,
    ) -> Self {
        Self {
            left: left.into(),
            right: right.into(),
            kind,
            conditions,
        }
    }
}

/// A condition resolved to field positions and seen from one stream.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Oriented {
    /// Field of the stream the adjacency belongs to.
    pub(crate) own: usize,
    pub(crate) op: CompareOp,
    /// Field of the neighbouring stream.
    pub(crate) other: usize,
    /// Declared type of the neighbouring field.
    pub(crate) other_type: DataType,
}

/// One edge as seen from one of its streams.
#[derive(Clone, Debug)]
pub(crate) struct Adjacency {
    pub(crate) stream: StreamIndex,
    pub(crate) kind: JoinKind,
    /// Whether this side is kept when the neighbour has no match.
    pub(crate) preserved: bool,
    pub(crate) conditions: Vec<Oriented>,
}

impl Adjacency {
    /// Returns true if `own` (an event of this side) and `other` (an event of
    /// the neighbour) satisfy every condition of the edge.
    pub(crate) fn matches(&self, own: &Event, other: &Event) -> bool {
        self.conditions.iter().all(|c| {
            match (own.get(c.own), other.get(c.other)) {
                (Some(a), Some(b)) => c.op.eval(a, b),
                _ => false,
            }
        })
    }
}

/// The validated shape of a join.
#[derive(Clone, Debug)]
pub struct JoinGraph {
    streams: Vec<JoinStream>,
    edges: Vec<JoinEdge>,
    adjacency: Vec<Vec<Adjacency>>,
    required: Vec<bool>,
}

impl JoinGraph {
    /// Validates and builds a join graph.
    ///
    /// Aliases must be unique, every edge must name two distinct known
    /// streams, conditions must compare fields of comparable types, and a
    /// graph of more than one stream must be connected.
    pub fn new(streams: Vec<JoinStream>, edges: Vec<JoinEdge>) -> Result<Self> {
        if streams.is_empty() {
            return Err(Error::config("a join needs at least one stream"));
        }
        if streams.len() > MAX_SLOTS {
            return Err(Error::config(format!(
                "a join supports at most {} streams, got {}",
                MAX_SLOTS,
                streams.len()
            )));
        }
        for (i, stream) in streams.iter().enumerate() {
            if streams[..i].iter().any(|s| s.alias == stream.alias) {
                return Err(Error::DuplicateName {
                    kind: "stream",
                    name: stream.alias.clone(),
                });
            }
            stream.window.validate(&stream.event_type)?;
        }

        let resolve = |alias: &str| {
            streams
                .iter()
                .position(|s| s.alias == alias)
                .ok_or_else(|| Error::UnknownStream {
                    name: alias.to_string(),
                })
        };

        let mut adjacency: Vec<Vec<Adjacency>> = vec![Vec::new(); streams.len()];
        let mut required = vec![false; streams.len()];
        for edge in &edges {
            let l = resolve(&edge.left)?;
            let r = resolve(&edge.right)?;
            if l == r {
                return Err(Error::config(format!(
                    "stream '{}' cannot be joined with itself; use two aliases",
                    edge.left
                )));
            }
            if adjacency[l].iter().any(|a| a.stream == r) {
                return Err(Error::config(format!(
                    "streams '{}' and '{}' are joined twice",
                    edge.left, edge.right
                )));
            }

            let (lt, rt) = (&streams[l].event_type, &streams[r].event_type);
            let mut from_left = Vec::with_capacity(edge.conditions.len());
            let mut from_right = Vec::with_capacity(edge.conditions.len());
            for cond in &edge.conditions {
                let lf = field_of(&streams[l], &cond.left_field)?;
                let rf = field_of(&streams[r], &cond.right_field)?;
                let l_type = lt.fields()[lf].data_type;
                let r_type = rt.fields()[rf].data_type;
                if !l_type.is_comparable_with(r_type) {
                    return Err(Error::config(format!(
                        "cannot compare {}.{} ({:?}) with {}.{} ({:?})",
                        edge.left, cond.left_field, l_type, edge.right, cond.right_field, r_type
                    )));
                }
                from_left.push(Oriented {
                    own: lf,
                    op: cond.op,
                    other: rf,
                    other_type: r_type,
                });
                from_right.push(Oriented {
                    own: rf,
                    op: cond.op.flip(),
                    other: lf,
                    other_type: l_type,
                });
            }

            if edge.kind == JoinKind::Inner {
                required[l] = true;
                required[r] = true;
            }
            adjacency[l].push(Adjacency {
                stream: r,
                kind: edge.kind,
                preserved: edge.kind.preserves_left(),
                conditions: from_left,
            });
            adjacency[r].push(Adjacency {
                stream: l,
                kind: edge.kind,
                preserved: edge.kind.preserves_right(),
                conditions: from_right,
            });
        }
        for list in &mut adjacency {
            list.sort_by_key(|a| a.stream);
        }

        let graph = Self {
            streams,
            edges,
            adjacency,
            required,
        };
        if let Some(stray) = graph.unreachable() {
            return Err(Error::config(format!(
                "stream '{}' is not joined to the other streams",
                graph.streams[stray].alias
            )));
        }
        Ok(graph)
    }

    /// Builds the graph of a single, unjoined stream.
    pub fn single(stream: JoinStream) -> Result<Self> {
        Self::new(vec![stream], Vec::new())
    }

    fn unreachable(&self) -> Option<StreamIndex> {
        let mut seen = vec![false; self.streams.len()];
        let mut stack = vec![0];
        seen[0] = true;
        while let Some(s) = stack.pop() {
            for adj in &self.adjacency[s] {
                if !seen[adj.stream] {
                    seen[adj.stream] = true;
                    stack.push(adj.stream);
                }
            }
        }
        seen.iter().position(|s| !s)
    }

    /// Returns the input streams.
    #[inline]
    pub fn streams(&self) -> &[JoinStream] {
        &self.streams
    }

    /// Returns the edges as declared.
    #[inline]
    pub fn edges(&self) -> &[JoinEdge] {
        &self.edges
    }

    /// Returns the number of streams.
    #[inline]
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Returns true if the graph has no stream. Never true for a built graph.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Returns the stream with this alias.
    pub fn stream_index(&self, alias: &str) -> Option<StreamIndex> {
        self.streams.iter().position(|s| s.alias == alias)
    }

    /// Returns whether a stream must be non-null in every result row,
    /// i.e. whether it takes part in an inner edge.
    #[inline]
    pub fn is_required(&self, stream: StreamIndex) -> bool {
        self.required[stream]
    }

    /// Returns the kind of the edge between two streams, read from `a` to `b`.
    pub fn edge_kind(&self, a: StreamIndex, b: StreamIndex) -> Option<JoinKind> {
        self.adjacency
            .get(a)?
            .iter()
            .find(|adj| adj.stream == b)
            .map(|adj| adj.kind)
    }

    pub(crate) fn adjacency(&self, stream: StreamIndex) -> &[Adjacency] {
        &self.adjacency[stream]
    }

    pub(crate) fn adjacent(&self, a: StreamIndex, b: StreamIndex) -> Option<&Adjacency> {
        self.adjacency[a].iter().find(|adj| adj.stream == b)
    }

    /// Returns the row schema of the join's result rows.
    pub fn row_schema(&self) -> RowSchema {
        RowSchema::new(
            self.streams
                .iter()
                .map(|s| (s.alias.clone(), s.event_type.clone()))
                .collect(),
        )
    }

    /// Checks that the join fields of an event arriving on `stream` can be
    /// compared with the neighbouring streams' declared types.
    pub fn check_event(&self, stream: StreamIndex, event: &Event) -> Result<()> {
        for adj in &self.adjacency[stream] {
            for cond in &adj.conditions {
                event.check_comparable(cond.own, cond.other_type)?;
            }
        }
        Ok(())
    }
}

fn field_of(stream: &JoinStream, field: &str) -> Result<usize> {
    stream
        .event_type
        .field_index(field)
        .ok_or_else(|| Error::UnknownField {
            scope: stream.alias.clone(),
            field: field.to_string(),
        })
}
