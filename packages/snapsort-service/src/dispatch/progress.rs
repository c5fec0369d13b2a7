use serde::Serialize;
use tokio::{
	sync::{oneshot, watch},
	task::JoinHandle,
};

use crate::{Error, Result};
use snapsort_domain::{ExecutionStrategy, SortResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortStage {
	Queued,
	CheckingCache,
	Classifying,
	Executing(ExecutionStrategy),
	Ranking,
	Done,
	Failed,
	Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SortProgress {
	pub stage: SortStage,
	/// Units of work finished in the current stage, e.g. atlases analyzed.
	pub completed: u32,
	pub total: u32,
	pub message: Option<String>,
}
impl SortProgress {
	pub fn at(stage: SortStage) -> Self {
		Self { stage, completed: 0, total: 0, message: None }
	}

	pub fn is_terminal(&self) -> bool {
		matches!(self.stage, SortStage::Done | SortStage::Failed | SortStage::Cancelled)
	}
}

/// Publishing side of a sort's progress. Sends never fail, even with nobody watching.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
	tx: watch::Sender<SortProgress>,
}
impl ProgressReporter {
	pub fn channel() -> (Self, watch::Receiver<SortProgress>) {
		let (tx, rx) = watch::channel(SortProgress::at(SortStage::Queued));

		(Self { tx }, rx)
	}

	/// A reporter nobody listens to.
	pub fn detached() -> Self {
		Self::channel().0
	}

	pub fn stage(&self, stage: SortStage) {
		self.tx.send_replace(SortProgress::at(stage));
	}

	pub fn step(&self, completed: u32, total: u32, message: Option<String>) {
		self.tx.send_modify(|progress| {
			progress.completed = completed;
			progress.total = total;
			progress.message = message;
		});
	}
}

/// A sort running in the background. Poll or await `progress` for status, `cancel` to stop it.
#[derive(Debug)]
pub struct SortHandle {
	pub(crate) progress: watch::Receiver<SortProgress>,
	pub(crate) cancel: Option<oneshot::Sender<()>>,
	pub(crate) task: JoinHandle<Result<SortResponse>>,
}
impl SortHandle {
	pub fn progress(&self) -> SortProgress {
		self.progress.borrow().clone()
	}

	/// A receiver that wakes on every progress change.
	pub fn subscribe(&self) -> watch::Receiver<SortProgress> {
		self.progress.clone()
	}

	/// Requests cancellation. Outstanding provider calls are dropped and `join` returns
	/// [`Error::Cancelled`].
	pub fn cancel(&mut self) {
		if let Some(cancel) = self.cancel.take() {
			let _ = cancel.send(());
		}
	}

	pub fn is_finished(&self) -> bool {
		self.task.is_finished()
	}

	pub async fn join(self) -> Result<SortResponse> {
		self.task.await.map_err(Error::from)?
	}
}
