//! Caller-driven cancellation for in-flight queries.

use tokio::sync::watch;

/// Owning side of a cancellation pair. Dropping it cancels, so a handle tied to a client
/// connection fires when the connection goes away.
#[derive(Debug)]
pub struct CancelHandle {
	tx: watch::Sender<bool>,
}
impl CancelHandle {
	pub fn new() -> (Self, CancelSignal) {
		let (tx, rx) = watch::channel(false);

		(Self { tx }, CancelSignal { rx })
	}

	pub fn cancel(&self) {
		self.tx.send_replace(true);
	}

	pub fn signal(&self) -> CancelSignal {
		CancelSignal { rx: self.tx.subscribe() }
	}
}
impl Drop for CancelHandle {
	fn drop(&mut self) {
		self.tx.send_replace(true);
	}
}

#[derive(Clone, Debug)]
pub struct CancelSignal {
	rx: watch::Receiver<bool>,
}
impl CancelSignal {
	/// A signal that never fires.
	pub fn never() -> Self {
		let (_, rx) = watch::channel(false);

		Self { rx }
	}

	pub fn is_cancelled(&self) -> bool {
		*self.rx.borrow()
	}

	/// Resolves once cancellation is requested. Pending forever for [`CancelSignal::never`].
	pub async fn cancelled(&self) {
		let mut rx = self.rx.clone();

		if rx.wait_for(|cancelled| *cancelled).await.is_err() {
			std::future::pending::<()>().await;
		}
	}
}
