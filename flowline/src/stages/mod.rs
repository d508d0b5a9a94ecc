//! Stage state machines and the pull protocol.
//!
//! A stage pulls exactly what it needs from its upstream on demand and
//! returns one unit per activation. The original design modeled each
//! stage as a suspended coroutine; resuming a coroutine that died
//! mid-execution is undefined in most runtimes, so here every stage is
//! an explicit state machine instead: `activate` is a plain call, and
//! all resume state (a gatherer's buffer, a scatterer's pending queue)
//! lives on the stage itself. A failure while processing one record
//! leaves the stage coherent for the next.

use std::collections::VecDeque;
use std::fmt;

use crate::errors::PipelineError;
use crate::item::Item;

/// Anything a stage can pull units from: the preceding stage in the
/// chain, or the pipeline's synthetic head wrapping the input sequence.
pub trait Source<T> {
    /// Produces the next unit, pulling from further upstream as needed.
    ///
    /// # Errors
    ///
    /// Record-level failures from stage bodies surface here, as does the
    /// fatal error of pulling from an exhausted source.
    fn pull(&mut self) -> Result<Item<T>, PipelineError>;
}

type Predicate<T> = Box<dyn FnMut(&T) -> bool>;
type Transform<T> = Box<dyn FnMut(T) -> anyhow::Result<T>>;
type Effect<T> = Box<dyn FnMut(&T) -> anyhow::Result<()>>;
type Hook = Box<dyn FnMut() -> anyhow::Result<()>>;

/// One composable step in a processing chain.
///
/// Stages are built once per pipeline and owned exclusively by it.
/// Besides its processing body, a stage carries a name (diagnostics
/// only), an exhaustion flag, and optional start/finish hooks so
/// stateful bodies can acquire expensive resources lazily and release
/// them when the run ends.
pub struct Stage<T> {
    name: String,
    kind: Kind<T>,
    exhausted: bool,
    // Member failures inside a batch unit; the unit itself still flows,
    // so these are held here until the driver collects them.
    deferred: Vec<PipelineError>,
    on_start: Option<Hook>,
    on_finish: Option<Hook>,
}

enum Kind<T> {
    /// The default stage: a filter predicate followed by a transform.
    /// Records rejected by the predicate are dropped silently and the
    /// stage keeps pulling until a value survives or the stream ends.
    Apply {
        predicate: Option<Predicate<T>>,
        transform: Option<Transform<T>>,
    },
    /// Forwards its input unchanged after handing it to a side-effect
    /// function. With `deep_copy` the effect sees a defensive clone,
    /// shielding downstream stages from effects that exploit shared or
    /// interior mutability.
    Peek { effect: Effect<T>, deep_copy: bool },
    /// Forwards values while the predicate holds; on the first failure
    /// emits end-of-stream instead of the value. The only stage that
    /// locally originates end-of-stream.
    TakeWhile { predicate: Predicate<T>, cut: bool },
    /// Buffers records and emits them as one batch per `capacity`
    /// inputs, flushing a partial batch when the upstream ends.
    Gather {
        capacity: usize,
        buffer: Vec<T>,
        upstream_done: bool,
    },
    /// The inverse of gather: queues each incoming batch and emits its
    /// members one record per activation, preserving order.
    Scatter { pending: VecDeque<T> },
    /// Normalizes units to materialized arrays: batches pass through,
    /// lone records are lifted into one-element batches.
    ToArray,
}

impl<T> Kind<T> {
    fn label(&self) -> &'static str {
        match self {
            Self::Apply {
                predicate,
                transform,
            } => match (predicate, transform) {
                (Some(_), None) => "filter",
                (None, Some(_)) => "transform",
                _ => "apply",
            },
            Self::Peek { .. } => "peek",
            Self::TakeWhile { .. } => "take_while",
            Self::Gather { .. } => "gather",
            Self::Scatter { .. } => "scatter",
            Self::ToArray => "to_array",
        }
    }
}

impl<T: 'static> Stage<T> {
    fn new(name: impl Into<String>, kind: Kind<T>) -> Self {
        Self {
            name: name.into(),
            kind,
            exhausted: false,
            deferred: Vec::new(),
            on_start: None,
            on_finish: None,
        }
    }

    /// A stage that keeps records matching `predicate` and drops the
    /// rest.
    pub fn filter<P>(name: impl Into<String>, predicate: P) -> Self
    where
        P: FnMut(&T) -> bool + 'static,
    {
        Self::new(
            name,
            Kind::Apply {
                predicate: Some(Box::new(predicate)),
                transform: None,
            },
        )
    }

    /// A stage that maps each record through `transform`. A failed
    /// transform skips that record and leaves the run going.
    pub fn transform<F>(name: impl Into<String>, transform: F) -> Self
    where
        F: FnMut(T) -> anyhow::Result<T> + 'static,
    {
        Self::new(
            name,
            Kind::Apply {
                predicate: None,
                transform: Some(Box::new(transform)),
            },
        )
    }

    /// A stage that invokes `effect` on each record before forwarding
    /// it unchanged. With `deep_copy` the effect is handed a clone.
    pub fn peek<F>(name: impl Into<String>, effect: F, deep_copy: bool) -> Self
    where
        F: FnMut(&T) -> anyhow::Result<()> + 'static,
    {
        Self::new(
            name,
            Kind::Peek {
                effect: Box::new(effect),
                deep_copy,
            },
        )
    }

    /// A stage that ends the stream at the first record rejected by
    /// `predicate`; no record after it is ever delivered downstream.
    pub fn take_while<P>(name: impl Into<String>, predicate: P) -> Self
    where
        P: FnMut(&T) -> bool + 'static,
    {
        Self::new(
            name,
            Kind::TakeWhile {
                predicate: Box::new(predicate),
                cut: false,
            },
        )
    }

    /// A stage that groups records into batches of at most `capacity`.
    /// A partial final batch is emitted, never dropped.
    pub fn gather(name: impl Into<String>, capacity: usize) -> Self {
        Self::new(
            name,
            Kind::Gather {
                capacity,
                buffer: Vec::new(),
                upstream_done: false,
            },
        )
    }

    /// A stage that unbatches gather output back into single records.
    pub fn scatter(name: impl Into<String>) -> Self {
        Self::new(name, Kind::Scatter {
            pending: VecDeque::new(),
        })
    }

    /// A stage that materializes every unit as an array.
    pub fn to_array(name: impl Into<String>) -> Self {
        Self::new(name, Kind::ToArray)
    }

    /// Installs a hook fired when a run starts, before any record is
    /// processed. A failing start hook aborts the run.
    #[must_use]
    pub fn with_start<H>(mut self, hook: H) -> Self
    where
        H: FnMut() -> anyhow::Result<()> + 'static,
    {
        self.on_start = Some(Box::new(hook));
        self
    }

    /// Installs a hook fired when a run ends. Failures are reported but
    /// never prevent the remaining stages from finishing.
    #[must_use]
    pub fn with_finish<H>(mut self, hook: H) -> Self
    where
        H: FnMut() -> anyhow::Result<()> + 'static,
    {
        self.on_finish = Some(Box::new(hook));
        self
    }

    /// The stage's diagnostic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if let Kind::Gather { capacity: 0, .. } = self.kind {
            return Err(format!(
                "gather stage '{}' must have a capacity of at least 1",
                self.name
            ));
        }
        Ok(())
    }

    /// Drains the failures recorded while processing members of a batch
    /// unit. Each is record-level: the member was skipped, the rest of
    /// its batch flowed on.
    pub(crate) fn take_deferred(&mut self) -> Vec<PipelineError> {
        std::mem::take(&mut self.deferred)
    }

    /// Resets run-scoped state and fires the start hook.
    pub(crate) fn start(&mut self) -> Result<(), PipelineError> {
        self.exhausted = false;
        self.deferred.clear();
        match &mut self.kind {
            Kind::TakeWhile { cut, .. } => *cut = false,
            Kind::Gather {
                buffer,
                upstream_done,
                ..
            } => {
                buffer.clear();
                *upstream_done = false;
            }
            Kind::Scatter { pending } => pending.clear(),
            _ => {}
        }
        if let Some(hook) = &mut self.on_start {
            hook().map_err(|e| PipelineError::Start {
                stage: self.name.clone(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Fires the finish hook, if any.
    pub(crate) fn finish(&mut self) -> anyhow::Result<()> {
        match &mut self.on_finish {
            Some(hook) => hook(),
            None => Ok(()),
        }
    }
}

impl<T: Clone + 'static> Stage<T> {
    /// Performs one step of processing: pulls from `source` as needed
    /// and returns the next unit this stage produces.
    ///
    /// # Errors
    ///
    /// Returns a record-level error when this stage's body fails on the
    /// unit in progress, and [`PipelineError::Exhausted`] when activated
    /// again after emitting end-of-stream.
    pub fn activate(&mut self, source: &mut dyn Source<T>) -> Result<Item<T>, PipelineError> {
        if self.exhausted {
            return Err(PipelineError::Exhausted {
                stage: self.name.clone(),
            });
        }
        let unit = self.next_unit(source)?;
        if unit.is_end() {
            self.exhausted = true;
        }
        Ok(unit)
    }

    fn next_unit(&mut self, source: &mut dyn Source<T>) -> Result<Item<T>, PipelineError> {
        let name = &self.name;
        let deferred = &mut self.deferred;
        match &mut self.kind {
            Kind::Apply {
                predicate,
                transform,
            } => loop {
                match source.pull()? {
                    Item::End => return Ok(Item::End),
                    Item::Record(value) => {
                        if predicate.as_mut().map_or(true, |keep| keep(&value)) {
                            let value = match transform.as_mut() {
                                Some(map) => {
                                    map(value).map_err(|e| PipelineError::record(name, e))?
                                }
                                None => value,
                            };
                            return Ok(Item::Record(value));
                        }
                    }
                    Item::Batch(values) => {
                        // Record-level stages lift element-wise over a
                        // batch; a batch emptied by the filter is dropped.
                        // A member the transform fails on is skipped like
                        // any other failed record, never its whole batch.
                        let mut kept = Vec::with_capacity(values.len());
                        for value in values {
                            if predicate.as_mut().map_or(true, |keep| keep(&value)) {
                                match transform.as_mut() {
                                    Some(map) => match map(value) {
                                        Ok(value) => kept.push(value),
                                        Err(e) => {
                                            deferred.push(PipelineError::record(name, e));
                                        }
                                    },
                                    None => kept.push(value),
                                }
                            }
                        }
                        if !kept.is_empty() {
                            return Ok(Item::Batch(kept));
                        }
                    }
                }
            },

            Kind::Peek { effect, deep_copy } => loop {
                match source.pull()? {
                    Item::End => return Ok(Item::End),
                    Item::Record(value) => {
                        let observed = if *deep_copy {
                            effect(&value.clone())
                        } else {
                            effect(&value)
                        };
                        observed.map_err(|e| PipelineError::record(name, e))?;
                        return Ok(Item::Record(value));
                    }
                    Item::Batch(values) => {
                        // Same member-level isolation as the apply arm: a
                        // failed effect skips its member, and a batch with
                        // no survivors is dropped.
                        let mut kept = Vec::with_capacity(values.len());
                        for value in values {
                            let observed = if *deep_copy {
                                effect(&value.clone())
                            } else {
                                effect(&value)
                            };
                            match observed {
                                Ok(()) => kept.push(value),
                                Err(e) => deferred.push(PipelineError::record(name, e)),
                            }
                        }
                        if !kept.is_empty() {
                            return Ok(Item::Batch(kept));
                        }
                    }
                }
            },

            Kind::TakeWhile { predicate, cut } => {
                if *cut {
                    return Ok(Item::End);
                }
                match source.pull()? {
                    Item::End => Ok(Item::End),
                    Item::Record(value) => {
                        if predicate(&value) {
                            Ok(Item::Record(value))
                        } else {
                            *cut = true;
                            Ok(Item::End)
                        }
                    }
                    Item::Batch(values) => {
                        let total = values.len();
                        let mut prefix = Vec::with_capacity(total);
                        for value in values {
                            if !predicate(&value) {
                                break;
                            }
                            prefix.push(value);
                        }
                        if prefix.len() < total {
                            *cut = true;
                        }
                        if prefix.is_empty() {
                            Ok(Item::End)
                        } else {
                            Ok(Item::Batch(prefix))
                        }
                    }
                }
            }

            Kind::Gather {
                capacity,
                buffer,
                upstream_done,
            } => {
                // Once the upstream has ended it must not be pulled
                // again; remaining buffered records drain from here.
                while !*upstream_done && buffer.len() < *capacity {
                    match source.pull()? {
                        Item::Record(value) => buffer.push(value),
                        Item::Batch(values) => buffer.extend(values),
                        Item::End => *upstream_done = true,
                    }
                }
                if buffer.is_empty() {
                    Ok(Item::End)
                } else {
                    let take = buffer.len().min(*capacity);
                    let rest = buffer.split_off(take);
                    Ok(Item::Batch(std::mem::replace(buffer, rest)))
                }
            }

            Kind::Scatter { pending } => loop {
                if let Some(value) = pending.pop_front() {
                    return Ok(Item::Record(value));
                }
                match source.pull()? {
                    Item::End => return Ok(Item::End),
                    Item::Record(value) => return Ok(Item::Record(value)),
                    Item::Batch(values) => pending.extend(values),
                }
            },

            Kind::ToArray => Ok(match source.pull()? {
                Item::End => Item::End,
                Item::Record(value) => Item::Batch(vec![value]),
                Item::Batch(values) => Item::Batch(values),
            }),
        }
    }
}

impl<T> fmt::Debug for Stage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field("kind", &self.kind.label())
            .field("exhausted", &self.exhausted)
            .finish()
    }
}
