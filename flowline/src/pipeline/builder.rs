//! Declarative accumulation of pipeline stages.

use crate::item::Blank;
use crate::stages::Stage;

/// An ordered accumulator of stage declarations.
///
/// Each method appends one constructed stage; nothing is wired together
/// until [`Pipeline::setup`](crate::pipeline::Pipeline::setup) assembles
/// the chain, and the builder is discarded once it has. Every stage gets
/// a diagnostic name: callers may supply one through the `*_named`
/// variants, otherwise one is synthesized from the stage's kind and
/// ordinal position.
pub struct Builder<T> {
    stages: Vec<Stage<T>>,
}

impl<T: Clone + 'static> Builder<T> {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    fn auto_name(&self, kind: &str) -> String {
        format!("{kind}-{}", self.stages.len() + 1)
    }

    /// Declares a filter stage: records rejected by `predicate` are
    /// dropped silently.
    #[must_use]
    pub fn filter<P>(self, predicate: P) -> Self
    where
        P: FnMut(&T) -> bool + 'static,
    {
        let name = self.auto_name("filter");
        self.filter_named(name, predicate)
    }

    /// Declares a named filter stage.
    #[must_use]
    pub fn filter_named<P>(mut self, name: impl Into<String>, predicate: P) -> Self
    where
        P: FnMut(&T) -> bool + 'static,
    {
        self.stages.push(Stage::filter(name, predicate));
        self
    }

    /// Declares a transform stage mapping each record through
    /// `transform`; a failed transform skips that record only.
    #[must_use]
    pub fn transform<F>(self, transform: F) -> Self
    where
        F: FnMut(T) -> anyhow::Result<T> + 'static,
    {
        let name = self.auto_name("transform");
        self.transform_named(name, transform)
    }

    /// Declares a named transform stage.
    #[must_use]
    pub fn transform_named<F>(mut self, name: impl Into<String>, transform: F) -> Self
    where
        F: FnMut(T) -> anyhow::Result<T> + 'static,
    {
        self.stages.push(Stage::transform(name, transform));
        self
    }

    /// Declares a gather stage grouping records into batches of at most
    /// `capacity`. A partial final batch is flushed, never dropped.
    #[must_use]
    pub fn gather(self, capacity: usize) -> Self {
        let name = self.auto_name("gather");
        self.gather_named(capacity, name)
    }

    /// Declares a named gather stage.
    #[must_use]
    pub fn gather_named(mut self, capacity: usize, name: impl Into<String>) -> Self {
        self.stages.push(Stage::gather(name, capacity));
        self
    }

    /// Declares a stage that materializes every unit as an array:
    /// batches pass through, lone records become one-element batches.
    #[must_use]
    pub fn to_array(mut self) -> Self {
        let name = self.auto_name("to_array");
        self.stages.push(Stage::to_array(name));
        self
    }

    /// Declares a scatter stage turning gather output back into single
    /// records, in order.
    #[must_use]
    pub fn scatter(self) -> Self {
        let name = self.auto_name("scatter");
        self.scatter_named(name)
    }

    /// Declares a named scatter stage.
    #[must_use]
    pub fn scatter_named(mut self, name: impl Into<String>) -> Self {
        self.stages.push(Stage::scatter(name));
        self
    }

    /// Declares a stage that terminates the run at the first record
    /// rejected by `predicate`; subsequent stages see end-of-stream.
    #[must_use]
    pub fn take_while<P>(self, predicate: P) -> Self
    where
        P: FnMut(&T) -> bool + 'static,
    {
        let name = self.auto_name("take_while");
        self.take_while_named(name, predicate)
    }

    /// Declares a named take-while stage.
    #[must_use]
    pub fn take_while_named<P>(mut self, name: impl Into<String>, predicate: P) -> Self
    where
        P: FnMut(&T) -> bool + 'static,
    {
        self.stages.push(Stage::take_while(name, predicate));
        self
    }

    /// Declares a stage that hands each record to `effect` and forwards
    /// it unchanged. The effect must not rely on mutating the record.
    #[must_use]
    pub fn peek<F>(self, effect: F) -> Self
    where
        F: FnMut(&T) -> anyhow::Result<()> + 'static,
    {
        let name = self.auto_name("peek");
        self.peek_named(name, effect)
    }

    /// Declares a named peek stage.
    #[must_use]
    pub fn peek_named<F>(mut self, name: impl Into<String>, effect: F) -> Self
    where
        F: FnMut(&T) -> anyhow::Result<()> + 'static,
    {
        self.stages.push(Stage::peek(name, effect, false));
        self
    }

    /// Declares a peek stage whose effect receives a defensive clone,
    /// shielding downstream stages from effects that exploit shared or
    /// interior mutability. Cloning every record is not free; prefer
    /// [`peek`](Self::peek) with a well-behaved effect.
    #[must_use]
    pub fn peek_unsafe<F>(mut self, effect: F) -> Self
    where
        F: FnMut(&T) -> anyhow::Result<()> + 'static,
    {
        let name = self.auto_name("peek");
        self.stages.push(Stage::peek(name, effect, true));
        self
    }

    /// Declares a filter that drops blank records (nulls, empties).
    #[must_use]
    pub fn non_blank(self) -> Self
    where
        T: Blank,
    {
        self.filter_named("non-blank", |value: &T| !value.is_blank())
    }

    /// Appends a prebuilt stage, for callers constructing stages by
    /// hand rather than through the declaration methods.
    #[must_use]
    pub fn stage(mut self, stage: Stage<T>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Number of stages declared so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns `true` when no stages have been declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub(crate) fn into_stages(self) -> Vec<Stage<T>> {
        self.stages
    }
}

impl Builder<String> {
    /// Sample zero-argument named stage: upper-cases string records.
    #[must_use]
    pub fn upcase(self) -> Self {
        self.transform_named("upcase", |s: String| Ok(s.to_uppercase()))
    }
}

impl<T: Clone + 'static> Default for Builder<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_names_are_synthesized_from_kind_and_ordinal() {
        let builder = Builder::<String>::new()
            .filter(|s| !s.is_empty())
            .upcase()
            .gather(10)
            .scatter();
        let names: Vec<String> = builder
            .into_stages()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, vec!["filter-1", "upcase", "gather-3", "scatter-4"]);
    }

    #[test]
    fn test_explicit_names_are_kept() {
        let builder = Builder::<i32>::new()
            .filter_named("drop-negatives", |n| *n >= 0)
            .transform_named("square", |n| Ok(n * n));
        let stages = builder.into_stages();
        assert_eq!(stages[0].name(), "drop-negatives");
        assert_eq!(stages[1].name(), "square");
    }

    #[test]
    fn test_declaration_order_is_preserved() {
        let builder = Builder::<i32>::new()
            .take_while(|n| *n < 100)
            .peek(|_| Ok(()))
            .to_array();
        assert_eq!(builder.len(), 3);
        assert!(!builder.is_empty());
        let names: Vec<String> = builder
            .into_stages()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, vec!["take_while-1", "peek-2", "to_array-3"]);
    }

    #[test]
    fn test_prebuilt_stages_can_be_appended() {
        let builder =
            Builder::<i32>::new().stage(Stage::transform("negate", |n: i32| Ok(-n)));
        let stages = builder.into_stages();
        assert_eq!(stages.len(), 1);
        assert_eq!(stages[0].name(), "negate");
    }
}
