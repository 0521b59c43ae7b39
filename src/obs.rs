//! Optional observability helpers for flow execution.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `authn_broker.flow` with
//!   the `stage` (call site) field.
//! - Enable `metrics` to increment the `authn_broker_flow_total` counter for
//!   every start/step/completion/failure, labeled by `stage` + `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Flow-engine stages observed by the broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowStage {
	/// One engine step over a flow context.
	Step,
	/// Session-bridge translation around the engine.
	Bridge,
	/// Declarative resource load during startup.
	DeclarativeLoad,
}
impl FlowStage {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowStage::Step => "step",
			FlowStage::Bridge => "bridge",
			FlowStage::DeclarativeLoad => "declarative_load",
		}
	}
}
impl Display for FlowStage {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for flow activity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowOutcome {
	/// A new flow context was created.
	Started,
	/// One executor step ran.
	Stepped,
	/// A flow terminated with an assertion.
	Completed,
	/// A flow terminated with a failure.
	Failed,
}
impl FlowOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowOutcome::Started => "started",
			FlowOutcome::Stepped => "stepped",
			FlowOutcome::Completed => "completed",
			FlowOutcome::Failed => "failed",
		}
	}
}
impl Display for FlowOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
