//! Boundary processing: ordering, grouping and discretization.

use crate::order::{OrderKey, RowOrder};
use crate::policy::{DeliveryDescriptor, DeliveryPolicy};
use eddy_core::{FieldPath, Result, Row, RowDelta, RowSchema, Value};
use hashbrown::HashMap;
use tracing::trace;

/// Rows handed to subscribers in one delivery.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeliveredBatch {
    pub inserted: Vec<Row>,
    pub removed: Vec<Row>,
    /// Grouping key of this batch under grouped delivery.
    pub group: Option<Vec<Value>>,
}

impl DeliveredBatch {
    /// Returns true if the batch carries no rows.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.removed.is_empty()
    }
}

/// Turns the delta of each collection boundary into delivered batches.
#[derive(Clone, Debug)]
pub struct OutputProcessor {
    policy: DeliveryPolicy,
    order: RowOrder,
    deliver_empty: bool,
}

impl OutputProcessor {
    /// Validates the delivery descriptor and order-by list against the
    /// statement's row schema.
    pub fn new(
        schema: &RowSchema,
        descriptor: &DeliveryDescriptor,
        order_by: &[OrderKey],
        deliver_empty: bool,
    ) -> Result<Self> {
        Ok(Self {
            policy: DeliveryPolicy::from_descriptor(descriptor, schema)?,
            order: RowOrder::resolve(order_by, schema)?,
            deliver_empty,
        })
    }

    /// Returns the delivery policy.
    #[inline]
    pub fn policy(&self) -> &DeliveryPolicy {
        &self.policy
    }

    /// Processes one boundary.
    ///
    /// Inserted and removed rows are sorted independently, then delivered
    /// per the policy. A boundary without rows yields no batch unless empty
    /// boundaries were requested.
    pub fn consume(&self, mut delta: RowDelta) -> Vec<DeliveredBatch> {
        delta.elide();
        if delta.is_empty() {
            return if self.deliver_empty {
                vec![DeliveredBatch::default()]
            } else {
                Vec::new()
            };
        }

        self.order.sort(&mut delta.inserted);
        self.order.sort(&mut delta.removed);

        let batches = match &self.policy {
            DeliveryPolicy::Immediate | DeliveryPolicy::Discrete => vec![DeliveredBatch {
                inserted: delta.inserted,
                removed: delta.removed,
                group: None,
            }],
            DeliveryPolicy::Grouped(paths) => group(paths, delta),
        };
        trace!(batches = batches.len(), "OutputProcessor: boundary delivered");
        batches
    }
}

/// Partitions a boundary by group key. Groups are emitted in order of first
/// occurrence, inserted rows before removed rows.
fn group(paths: &[FieldPath], delta: RowDelta) -> Vec<DeliveredBatch> {
    let mut batches: Vec<DeliveredBatch> = Vec::new();
    let mut positions: HashMap<Vec<Value>, usize> = HashMap::new();

    let mut batch_for = |row: &Row, batches: &mut Vec<DeliveredBatch>| -> usize {
        let key: Vec<Value> = paths.iter().map(|p| row.value(*p).index_key()).collect();
        *positions.entry(key).or_insert_with(|| {
            batches.push(DeliveredBatch {
                group: Some(paths.iter().map(|p| row.value(*p).clone()).collect()),
                ..Default::default()
            });
            batches.len() - 1
        })
    };

    for row in delta.inserted {
        let pos = batch_for(&row, &mut batches);
        batches[pos].inserted.push(row);
    }
    for row in delta.removed {
        let pos = batch_for(&row, &mut batches);
        batches[pos].removed.push(row);
    }
    batches
}
