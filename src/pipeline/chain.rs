//! Pipeline execution
//!
//! A `Pipeline` runs a message through its stages in insertion order. The
//! pipeline owns no I/O and does no logging; callers that want diagnostics use
//! [`Pipeline::process_detailed`] and log the returned [`ProcessReport`].

use std::fmt;
use std::time::{Duration, Instant};

use crate::pipeline::message::Message;
use crate::pipeline::stage::{ErrorHandler, Outcome, Stage};
use crate::utils::error::StageError;

struct NamedStage {
    name: String,
    stage: Box<dyn Stage>,
}

pub struct Pipeline {
    name: String,
    stages: Vec<NamedStage>,
    error_handler: Option<Box<dyn ErrorHandler>>,
}

/// Everything `process_detailed` learned while running one message.
#[derive(Debug)]
pub struct ProcessReport {
    pub outcome: Outcome,
    /// Stage whose failure triggered recovery (or the drop).
    pub failed_stage: Option<String>,
    /// Error raised by `failed_stage`, or by the error handler when it failed.
    pub error: Option<StageError>,
    /// The error handler produced a message and processing continued.
    pub recovered: bool,
    /// The error handler itself failed.
    pub handler_failed: bool,
    pub timings: Vec<(String, Duration)>,
}

impl ProcessReport {
    fn new() -> Self {
        Self {
            outcome: Outcome::Drop,
            failed_stage: None,
            error: None,
            recovered: false,
            handler_failed: false,
            timings: Vec::new(),
        }
    }

    /// True when a message came out and no stage failed along the way.
    pub fn succeeded(&self) -> bool {
        !self.outcome.is_drop() && self.failed_stage.is_none()
    }

    pub fn total_time(&self) -> Duration {
        self.timings.iter().map(|(_, elapsed)| *elapsed).sum()
    }
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            error_handler: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a stage. Stages run in the order they were added.
    pub fn add_stage<S>(mut self, name: impl Into<String>, stage: S) -> Self
    where
        S: Stage + 'static,
    {
        self.stages.push(NamedStage {
            name: name.into(),
            stage: Box::new(stage),
        });
        self
    }

    /// Install the recovery policy, replacing any previous one.
    pub fn set_error_handler<H>(&mut self, handler: H) -> &mut Self
    where
        H: ErrorHandler + 'static,
    {
        self.error_handler = Some(Box::new(handler));
        self
    }

    pub fn with_error_handler<H>(mut self, handler: H) -> Self
    where
        H: ErrorHandler + 'static,
    {
        self.set_error_handler(handler);
        self
    }

    pub fn has_error_handler(&self) -> bool {
        self.error_handler.is_some()
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Remove every stage and the error handler.
    pub fn reset(&mut self) {
        self.stages.clear();
        self.error_handler = None;
    }

    /// Run `message` through every stage and return the final outcome.
    pub fn process(&self, message: Message) -> Outcome {
        self.process_detailed(message).outcome
    }

    pub fn process_detailed(&self, message: Message) -> ProcessReport {
        let mut report = ProcessReport::new();
        // the handler must see the input as it arrived
        let original = self.error_handler.as_ref().map(|_| message.clone());
        let mut current = Outcome::Forward(message);

        for NamedStage { name, stage } in &self.stages {
            let input = match current {
                Outcome::Forward(message) => message,
                Outcome::Drop => {
                    report.outcome = Outcome::Drop;
                    return report;
                }
            };

            let started = Instant::now();
            let result = stage.process(input);
            report.timings.push((name.clone(), started.elapsed()));

            current = match result {
                Ok(outcome) => outcome,
                Err(error) => {
                    report.failed_stage = Some(name.clone());
                    let (Some(handler), Some(original)) = (&self.error_handler, &original) else {
                        report.error = Some(error);
                        report.outcome = Outcome::Drop;
                        return report;
                    };

                    match handler.recover(original, &error, name) {
                        Ok(Outcome::Forward(recovered)) => {
                            report.error = Some(error);
                            report.recovered = true;
                            Outcome::Forward(recovered)
                        }
                        Ok(Outcome::Drop) => {
                            report.error = Some(error);
                            report.outcome = Outcome::Drop;
                            return report;
                        }
                        Err(handler_error) => {
                            report.error = Some(handler_error);
                            report.handler_failed = true;
                            report.outcome = Outcome::Drop;
                            return report;
                        }
                    }
                }
            };
        }

        report.outcome = current;
        report
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("stages", &self.stage_names())
            .field("error_handler", &self.has_error_handler())
            .finish()
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.stage_names().join(" -> "))
    }
}
