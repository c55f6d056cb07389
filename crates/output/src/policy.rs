//! Delivery policies.

use eddy_core::{Error, FieldPath, Result, RowSchema};
use serde::Deserialize;

/// Delivery descriptor as declared on a statement.
///
/// ```toml
/// keyword = "grouped_delivery"
/// expressions = ["theString"]
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct DeliveryDescriptor {
    /// `none`, `discrete_delivery` or `grouped_delivery`. Absent means none.
    #[serde(default)]
    pub keyword: Option<String>,
    /// Grouping expressions; field references into the result row.
    #[serde(default)]
    pub expressions: Vec<String>,
}

impl DeliveryDescriptor {
    /// Row-at-a-time delivery.
    pub fn immediate() -> Self {
        Self::default()
    }

    /// One undivided batch per boundary.
    pub fn discrete() -> Self {
        Self {
            keyword: Some("discrete_delivery".into()),
            expressions: Vec::new(),
        }
    }

    /// One batch per distinct value of the grouping expressions.
    pub fn grouped<I, S>(expressions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keyword: Some("grouped_delivery".into()),
            expressions: expressions.into_iter().map(Into::into).collect(),
        }
    }
}

/// A validated delivery policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeliveryPolicy {
    /// Each boundary's delta is delivered as produced.
    Immediate,
    /// Each boundary is delivered as one batch, never split.
    Discrete,
    /// Each boundary is split by the values at these paths.
    Grouped(Vec<FieldPath>),
}

impl DeliveryPolicy {
    /// Validates a descriptor against the statement's row schema.
    pub fn from_descriptor(descriptor: &DeliveryDescriptor, schema: &RowSchema) -> Result<Self> {
        let keyword = descriptor
            .keyword
            .as_deref()
            .map(|k| k.trim().to_ascii_lowercase());
        match keyword.as_deref() {
            None | Some("none") => {
                if !descriptor.expressions.is_empty() {
                    return Err(Error::config(
                        "delivery expressions require the grouped_delivery keyword",
                    ));
                }
                Ok(DeliveryPolicy::Immediate)
            }
            Some("discrete_delivery") => {
                if !descriptor.expressions.is_empty() {
                    return Err(Error::config(
                        "discrete_delivery does not take grouping expressions",
                    ));
                }
                Ok(DeliveryPolicy::Discrete)
            }
            Some("grouped_delivery") => {
                if descriptor.expressions.is_empty() {
                    return Err(Error::config(
                        "grouped_delivery requires at least one grouping expression",
                    ));
                }
                let paths = descriptor
                    .expressions
                    .iter()
                    .map(|e| schema.resolve(e))
                    .collect::<Result<Vec<_>>>()?;
                Ok(DeliveryPolicy::Grouped(paths))
            }
            Some(other) => Err(Error::config(format!(
                "unrecognized delivery keyword '{}'",
                other
            ))),
        }
    }
}
