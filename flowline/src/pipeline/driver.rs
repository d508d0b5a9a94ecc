//! The pipeline driver: input adaptation, lifecycle, and the pull loop.

use std::collections::HashSet;
use std::ops::ControlFlow;

use tracing::{debug, error, warn};

use super::builder::Builder;
use crate::errors::PipelineError;
use crate::item::Item;
use crate::report::RunReport;
use crate::stages::{Source, Stage};

/// Callback invoked with the last head-of-chain input and the error when
/// a record-level failure occurs. `None` when the failure happened
/// before any record was pulled from the source.
pub type ErrorHandler<T> = Box<dyn FnMut(Option<&T>, &PipelineError)>;

/// An assembled, runnable chain of stages.
///
/// A pipeline sends each input record through its stages one at a time,
/// so memory stays bounded regardless of input size, and a failure while
/// processing one record is isolated to that record. Scheduling is
/// single-threaded and pull-based: activating the tail stage
/// synchronously cascades pulls up the chain until one unit of output
/// is produced.
///
/// The assembled chain is reusable: `run` may be called repeatedly
/// (stage-local state is reset at the start of each run), but runs are
/// never concurrent on one pipeline, which `&mut self` enforces.
///
/// ```
/// use flowline::prelude::*;
///
/// let mut pipeline = Pipeline::setup(|b| {
///     b.filter(|word: &String| !word.contains('\'')).upcase()
/// })
/// .unwrap();
///
/// let words = ["I've", "got", "a", "match"].map(String::from);
/// let mut results = Vec::new();
/// pipeline
///     .run(words, |item| results.extend(item.into_records()))
///     .unwrap();
/// assert_eq!(results, vec!["GOT", "A", "MATCH"]);
/// ```
pub struct Pipeline<T> {
    stages: Vec<Stage<T>>,
    error_handler: Option<ErrorHandler<T>>,
}

impl<T: Clone + 'static> Pipeline<T> {
    /// Builds a pipeline from a declaration closure evaluated against a
    /// fresh [`Builder`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Setup`] for a malformed chain: duplicate
    /// stage names or a zero-capacity gather.
    pub fn setup<F>(configure: F) -> Result<Self, PipelineError>
    where
        F: FnOnce(Builder<T>) -> Builder<T>,
    {
        Self::assemble(configure(Builder::new()))
    }

    /// Assembles a pipeline from an already-populated builder.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Setup`] for a malformed chain.
    pub fn assemble(builder: Builder<T>) -> Result<Self, PipelineError> {
        let stages = builder.into_stages();
        let mut names = HashSet::new();
        for stage in &stages {
            stage.validate().map_err(PipelineError::Setup)?;
            if !names.insert(stage.name().to_string()) {
                return Err(PipelineError::Setup(format!(
                    "duplicate stage name '{}'",
                    stage.name()
                )));
            }
        }
        Ok(Self {
            stages,
            error_handler: None,
        })
    }

    /// Installs a handler for record-level errors. Without one, such
    /// errors are logged and the record is skipped.
    #[must_use]
    pub fn with_error_handler<H>(mut self, handler: H) -> Self
    where
        H: FnMut(Option<&T>, &PipelineError) + 'static,
    {
        self.error_handler = Some(Box::new(handler));
        self
    }

    /// Ordered stage names, head to tail. Diagnostics only.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(Stage::name).collect()
    }

    /// Renders the chain for display.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut out = String::from("(input)");
        for stage in &self.stages {
            out.push_str(" -> ");
            out.push_str(stage.name());
        }
        out.push_str(" -> (output)");
        out
    }

    /// Runs the pipeline over `input`, invoking `consumer` once per unit
    /// that survives the chain.
    ///
    /// # Errors
    ///
    /// Returns a fatal error if a stage's start hook fails; record-level
    /// errors are reported to the error handler (or logged) and the run
    /// continues.
    pub fn run<I, C>(&mut self, input: I, mut consumer: C) -> Result<RunReport, PipelineError>
    where
        I: IntoIterator<Item = T>,
        C: FnMut(Item<T>),
    {
        self.run_until(input, |item| {
            consumer(item);
            ControlFlow::Continue(())
        })
    }

    /// Like [`run`](Self::run), but the consumer may stop the run early
    /// by returning [`ControlFlow::Break`]. Finish hooks still fire.
    ///
    /// # Errors
    ///
    /// Same contract as [`run`](Self::run).
    pub fn run_until<I, C>(
        &mut self,
        input: I,
        mut consumer: C,
    ) -> Result<RunReport, PipelineError>
    where
        I: IntoIterator<Item = T>,
        C: FnMut(Item<T>) -> ControlFlow<()>,
    {
        let mut report = RunReport::begin();
        debug!(run_id = %report.run_id, pipeline = %self.describe(), "starting pipeline run");
        self.start_stages()?;

        let mut head = Head::new(input.into_iter());
        let outcome = self.drive(&mut head, &mut consumer, &mut report);
        self.finish_stages();

        report.records_in = head.count;
        report.complete();
        debug!(
            run_id = %report.run_id,
            records_in = report.records_in,
            delivered = report.delivered,
            failed = report.failed,
            "pipeline run complete"
        );
        outcome.map(|()| report)
    }

    fn drive<I, C>(
        &mut self,
        head: &mut Head<I, T>,
        consumer: &mut C,
        report: &mut RunReport,
    ) -> Result<(), PipelineError>
    where
        I: Iterator<Item = T>,
        C: FnMut(Item<T>) -> ControlFlow<()>,
    {
        loop {
            let pulled = Chain {
                stages: self.stages.as_mut_slice(),
                head: &mut *head,
            }
            .pull();
            self.report_member_failures(head.last.as_ref(), report);
            match pulled {
                Ok(Item::End) => return Ok(()),
                Ok(item) => {
                    report.delivered += 1;
                    if consumer(item).is_break() {
                        report.stopped_early = true;
                        debug!("consumer stopped the run");
                        return Ok(());
                    }
                }
                Err(err) if err.is_record_level() => {
                    report.failed += 1;
                    match self.error_handler.as_mut() {
                        Some(handler) => handler(head.last.as_ref(), &err),
                        None => warn!(error = %err, "record processing failed, skipping record"),
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    // A failure on one member of a batch skips that member while the
    // rest of its batch flows on, so the error cannot surface through
    // the pull itself; stages hold such failures and the driver collects
    // them here after every pull.
    fn report_member_failures(&mut self, last: Option<&T>, report: &mut RunReport) {
        for stage in &mut self.stages {
            for err in stage.take_deferred() {
                report.failed += 1;
                match self.error_handler.as_mut() {
                    Some(handler) => handler(last, &err),
                    None => warn!(error = %err, "record processing failed, skipping record"),
                }
            }
        }
    }

    fn start_stages(&mut self) -> Result<(), PipelineError> {
        for stage in &mut self.stages {
            stage.start()?;
        }
        Ok(())
    }

    // Teardown is best-effort: one stage failing to finish never
    // prevents the remaining stages from finishing.
    fn finish_stages(&mut self) {
        for stage in &mut self.stages {
            if let Err(err) = stage.finish() {
                error!(stage = %stage.name(), error = %err, "error finishing stage");
            }
        }
    }
}

impl<T> std::fmt::Debug for Pipeline<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stages)
            .finish_non_exhaustive()
    }
}

/// The synthetic head of the chain: adapts the caller's input sequence
/// so the first declared stage can pull from it like any other source.
/// Tracks the running record count and a copy of the last value pulled,
/// which the error handler receives alongside record-level failures.
struct Head<I, T> {
    input: I,
    last: Option<T>,
    count: u64,
    done: bool,
}

impl<I, T> Head<I, T> {
    fn new(input: I) -> Self {
        Self {
            input,
            last: None,
            count: 0,
            done: false,
        }
    }
}

impl<I, T> Source<T> for Head<I, T>
where
    I: Iterator<Item = T>,
    T: Clone,
{
    fn pull(&mut self) -> Result<Item<T>, PipelineError> {
        if self.done {
            return Err(PipelineError::Exhausted {
                stage: "(input)".to_string(),
            });
        }
        match self.input.next() {
            Some(value) => {
                self.count += 1;
                self.last = Some(value.clone());
                Ok(Item::Record(value))
            }
            None => {
                self.done = true;
                Ok(Item::End)
            }
        }
    }
}

/// A borrowed view of the chain: the tail stage plus everything before
/// it. Pulling activates the tail, which recursively pulls from the
/// rest; an empty view pulls straight from the head.
struct Chain<'a, T> {
    stages: &'a mut [Stage<T>],
    head: &'a mut dyn Source<T>,
}

impl<T: Clone + 'static> Source<T> for Chain<'_, T> {
    fn pull(&mut self) -> Result<Item<T>, PipelineError> {
        match self.stages.split_last_mut() {
            Some((tail, rest)) => {
                let mut upstream = Chain {
                    stages: rest,
                    head: &mut *self.head,
                };
                tail.activate(&mut upstream)
            }
            None => self.head.pull(),
        }
    }
}
