//! The unit of flow between pipeline stages.

/// A unit of work flowing between stages.
///
/// Records are opaque to the engine; nothing in the core inspects their
/// structure. End-of-stream is a variant of this type rather than a
/// sentinel object, so it can never collide with real data: it is
/// propagated stage to stage as an ordinary value and every stage
/// forwards it instead of processing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item<T> {
    /// A single record.
    Record(T),
    /// An ordered group of records produced by a gather stage and
    /// consumed as one unit by the stages downstream of it.
    Batch(Vec<T>),
    /// End-of-stream. Exactly one reaches each stage per run; the
    /// consumer callback never observes it.
    End,
}

impl<T> Item<T> {
    /// Returns `true` for the end-of-stream sentinel.
    #[must_use]
    pub fn is_end(&self) -> bool {
        matches!(self, Self::End)
    }

    /// Number of records carried by this unit (zero for `End`).
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Record(_) => 1,
            Self::Batch(values) => values.len(),
            Self::End => 0,
        }
    }

    /// Returns `true` when the unit carries no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consumes the unit, returning the records it carries in order.
    #[must_use]
    pub fn into_records(self) -> Vec<T> {
        match self {
            Self::Record(value) => vec![value],
            Self::Batch(values) => values,
            Self::End => Vec::new(),
        }
    }
}

/// Emptiness test backing the `non_blank` convenience filter.
///
/// The originating application feeds catalog records through pipelines
/// and routinely has to discard null or empty entries before real
/// processing begins; this trait is the hook that stage uses.
pub trait Blank {
    /// Returns `true` if the value carries no usable content.
    fn is_blank(&self) -> bool;
}

impl Blank for String {
    fn is_blank(&self) -> bool {
        self.is_empty()
    }
}

impl Blank for &str {
    fn is_blank(&self) -> bool {
        self.is_empty()
    }
}

impl<T> Blank for Option<T> {
    fn is_blank(&self) -> bool {
        self.is_none()
    }
}

impl<T> Blank for Vec<T> {
    fn is_blank(&self) -> bool {
        self.is_empty()
    }
}

impl Blank for serde_json::Value {
    fn is_blank(&self) -> bool {
        match self {
            serde_json::Value::Null => true,
            serde_json::Value::String(s) => s.is_empty(),
            serde_json::Value::Array(a) => a.is_empty(),
            serde_json::Value::Object(o) => o.is_empty(),
            _ => false,
        }
    }
}
