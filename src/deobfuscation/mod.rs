//! Recovery of direct control flow.
//!
//! # Architecture
//!
//! - [`resolver`] - The [`Resolver`] trait and per-attempt [`ResolveContext`]
//! - [`ret`] - [`ReturnResolver`], returns whose target is a constant pushed through a
//!   value chain
//! - [`branch`] - [`BranchResolver`], branches duplicated with a negated copy
//! - [`engine`] - [`Engine`], classification and transactional patching
//! - [`queue`] / [`scheduler`] - Worklists and the settled-signal loop
//! - [`config`] / [`events`] - Configuration and the event log
//!
//! # Usage
//!
//! ```rust,no_run
//! use crossbeam_channel::unbounded;
//! use flowmend::analysis::FunctionId;
//! use flowmend::deobfuscation::{AnalysisHost, Engine, EngineConfig, Scheduler, Settled};
//!
//! fn drive<H: AnalysisHost>(host: &mut H, entry: u64) {
//!     let (_tx, rx) = unbounded::<Settled>();
//!     let scheduler = Scheduler::new(Engine::new(EngineConfig::x86()));
//!     scheduler.enqueue(FunctionId(entry), Some(entry));
//!     host.watch_settled(FunctionId(entry));
//!     let summary = scheduler.run(host, &rx);
//!     println!("{} edges recovered", summary.resolved);
//! }
//! ```

pub mod branch;
pub mod config;
pub mod engine;
pub mod events;
pub mod queue;
pub mod resolver;
pub mod ret;
pub mod scheduler;

pub use branch::BranchResolver;
pub use config::EngineConfig;
pub use engine::Engine;
pub use events::{Event, EventBuilder, EventKind, EventLog};
pub use queue::TargetQueue;
pub use resolver::{Resolution, ResolveContext, Resolver};
pub use ret::ReturnResolver;
pub use scheduler::{AnalysisHost, RunSummary, Scheduler, Settled, Step};
