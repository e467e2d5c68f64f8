//! Event logging for resolution activity.
//!
//! Every classification, recovered edge, patch, queue operation and failure is recorded
//! as an [`Event`] in an [`EventLog`]. The log is append-only and can be written from
//! several threads through a shared reference. It complements the `log` output with a
//! history that callers and tests can query.
//!
//! # Example
//!
//! ```rust
//! use flowmend::analysis::FunctionId;
//! use flowmend::deobfuscation::{EventKind, EventLog};
//!
//! let log = EventLog::new();
//! log.record(EventKind::ReturnResolved)
//!     .at(FunctionId(0x401000), 0x401040)
//!     .resolver("return")
//!     .message("target 0x401050");
//! log.record(EventKind::QueueDrained).function(FunctionId(0x401000));
//!
//! assert_eq!(log.count_kind(EventKind::ReturnResolved), 1);
//! assert_eq!(log.summary(), "1 return resolved");
//! ```

use std::{collections::HashMap, fmt};

use strum::{EnumIter, IntoStaticStr};

use crate::analysis::FunctionId;

/// Categories of events that can be logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    /// An address was classified as a candidate site.
    SiteClassified,
    /// A return with a computed target was replaced by a direct jump.
    ReturnResolved,
    /// A mirrored branch pair was collapsed.
    BranchResolved,
    /// Bytes were written to the binary.
    PatchApplied,
    /// Bytes written by a failed attempt were restored.
    PatchReverted,
    /// An address was added to a function's queue.
    TargetQueued,
    /// An address was not queued because it is empty or was seen before.
    TargetSkipped,
    /// A settled signal found nothing left to do.
    QueueDrained,
    /// A resolution attempt failed.
    ResolutionFailed,
}

impl EventKind {
    /// Returns a human-readable description of this event kind.
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            Self::SiteClassified => "site classified",
            Self::ReturnResolved => "return resolved",
            Self::BranchResolved => "branch resolved",
            Self::PatchApplied => "patch applied",
            Self::PatchReverted => "patch reverted",
            Self::TargetQueued => "target queued",
            Self::TargetSkipped => "target skipped",
            Self::QueueDrained => "queue drained",
            Self::ResolutionFailed => "resolution failed",
        }
    }

    /// Short identifier, e.g. `return_resolved`.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Returns true if this event represents a recovered control-flow edge.
    #[must_use]
    pub fn is_recovery(&self) -> bool {
        matches!(self, Self::ReturnResolved | Self::BranchResolved)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A single logged event.
#[derive(Debug, Clone)]
pub struct Event {
    /// The type of event.
    pub kind: EventKind,
    /// The function the event concerns (if applicable).
    pub function: Option<FunctionId>,
    /// Native address the event concerns.
    pub address: Option<u64>,
    /// Human-readable description.
    pub message: String,
    /// Name of the resolver that produced the event.
    pub resolver: Option<String>,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.kind)?;
        if let Some(function) = self.function {
            write!(f, " {function}")?;
        }
        if let Some(address) = self.address {
            write!(f, " @0x{address:x}")?;
        }
        write!(f, " {}", self.message)
    }
}

/// Builder for creating events with a fluent API.
///
/// Created by [`EventLog::record`]. The event is added to the log when the builder is
/// dropped.
pub struct EventBuilder<'a> {
    log: &'a EventLog,
    kind: EventKind,
    function: Option<FunctionId>,
    address: Option<u64>,
    message: Option<String>,
    resolver: Option<String>,
}

impl<'a> EventBuilder<'a> {
    fn new(log: &'a EventLog, kind: EventKind) -> Self {
        Self {
            log,
            kind,
            function: None,
            address: None,
            message: None,
            resolver: None,
        }
    }

    /// Sets the function and address the event concerns.
    pub fn at(mut self, function: FunctionId, address: u64) -> Self {
        self.function = Some(function);
        self.address = Some(address);
        self
    }

    /// Sets only the function.
    pub fn function(mut self, function: FunctionId) -> Self {
        self.function = Some(function);
        self
    }

    /// Sets only the address.
    pub fn address(mut self, address: u64) -> Self {
        self.address = Some(address);
        self
    }

    /// Sets a custom message describing the event.
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Associates this event with a resolver.
    pub fn resolver(mut self, name: impl Into<String>) -> Self {
        self.resolver = Some(name.into());
        self
    }
}

impl Drop for EventBuilder<'_> {
    fn drop(&mut self) {
        let message = self
            .message
            .take()
            .unwrap_or_else(|| self.kind.description().to_string());

        self.log.events.push(Event {
            kind: self.kind,
            function: self.function.take(),
            address: self.address.take(),
            message,
            resolver: self.resolver.take(),
        });
    }
}

/// Append-only collection of events.
///
/// This type is thread-safe: events can be appended concurrently from multiple threads
/// using shared references (`&self`).
#[derive(Debug, Default)]
pub struct EventLog {
    events: boxcar::Vec<Event>,
}

impl Clone for EventLog {
    fn clone(&self) -> Self {
        self.iter().cloned().collect()
    }
}

impl EventLog {
    /// Creates an empty event log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if no events have been logged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.count() == 0
    }

    /// Returns the total number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.count()
    }

    /// Starts building a new event of the given kind.
    ///
    /// The event is added when the builder is dropped.
    pub fn record(&self, kind: EventKind) -> EventBuilder<'_> {
        EventBuilder::new(self, kind)
    }

    /// Returns true if any event of the given kind exists.
    #[must_use]
    pub fn has(&self, kind: EventKind) -> bool {
        self.iter().any(|e| e.kind == kind)
    }

    /// Counts events of the given kind.
    #[must_use]
    pub fn count_kind(&self, kind: EventKind) -> usize {
        self.iter().filter(|e| e.kind == kind).count()
    }

    /// Returns an iterator over all events.
    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter().map(|(_, e)| e)
    }

    /// Returns an iterator over events of a specific kind.
    pub fn filter_kind(&self, kind: EventKind) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(move |e| e.kind == kind)
    }

    /// Returns an iterator over events for a specific function.
    pub fn filter_function(&self, function: FunctionId) -> impl Iterator<Item = &Event> + '_ {
        self.iter().filter(move |e| e.function == Some(function))
    }

    /// Counts events grouped by kind.
    #[must_use]
    pub fn count_by_kind(&self) -> HashMap<EventKind, usize> {
        let mut counts = HashMap::new();
        for event in self.iter() {
            *counts.entry(event.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Generates a human-readable summary of recovered edges.
    #[must_use]
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "no events".to_string();
        }

        let mut parts: Vec<String> = self
            .count_by_kind()
            .iter()
            .filter(|(k, _)| k.is_recovery())
            .map(|(kind, count)| format!("{} {}", count, kind.description()))
            .collect();

        if parts.is_empty() {
            return format!("{} events", self.len());
        }

        parts.sort();
        parts.join(", ")
    }
}

impl FromIterator<Event> for EventLog {
    fn from_iter<T: IntoIterator<Item = Event>>(iter: T) -> Self {
        let log = Self::new();
        for event in iter {
            log.events.push(event);
        }
        log
    }
}
