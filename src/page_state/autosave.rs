//! Form Auto-Save Module
//!
//! Debounced background saving of form drafts.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use crate::page_state::PageStateManager;

enum AutoSaveMsg {
    Change(Value),
    Flush(oneshot::Sender<()>),
}

// == Form Auto Saver ==
/// Saves a form draft `debounce` after the last change.
///
/// Dropping the saver stops the task after writing any pending change.
#[derive(Debug)]
pub struct FormAutoSaver {
    changes: mpsc::UnboundedSender<AutoSaveMsg>,
    handle: JoinHandle<()>,
}

impl FormAutoSaver {
    /// Spawns the debounce task for `form`.
    pub fn spawn(manager: PageStateManager, form: impl Into<String>, debounce: Duration) -> Self {
        let (changes, inbox) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_auto_saver(manager, form.into(), debounce, inbox));
        Self { changes, handle }
    }

    /// Records a change; restarts the debounce window.
    pub fn update(&self, data: Value) {
        if self.changes.send(AutoSaveMsg::Change(data)).is_err() {
            warn!("Form auto-saver stopped; change dropped");
        }
    }

    /// Saves any pending change now and waits for it.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.changes.send(AutoSaveMsg::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// Stops accepting changes and waits for the final save.
    pub async fn shutdown(self) {
        let Self { changes, handle } = self;
        drop(changes);
        let _ = handle.await;
    }
}

async fn run_auto_saver(
    manager: PageStateManager,
    form: String,
    debounce: Duration,
    mut inbox: mpsc::UnboundedReceiver<AutoSaveMsg>,
) {
    let mut pending: Option<Value> = None;
    let mut deadline = Instant::now();

    loop {
        tokio::select! {
            msg = inbox.recv() => match msg {
                Some(AutoSaveMsg::Change(data)) => {
                    pending = Some(data);
                    deadline = Instant::now() + debounce;
                }
                Some(AutoSaveMsg::Flush(done)) => {
                    save(&manager, &form, pending.take()).await;
                    let _ = done.send(());
                }
                None => {
                    save(&manager, &form, pending.take()).await;
                    break;
                }
            },
            _ = sleep_until(deadline), if pending.is_some() => {
                save(&manager, &form, pending.take()).await;
            }
        }
    }
    debug!(form = %form, "Form auto-saver stopped");
}

async fn save(manager: &PageStateManager, form: &str, data: Option<Value>) {
    if let Some(data) = data {
        if let Err(err) = manager.save_form_draft(form, data).await {
            warn!(form = %form, error = %err, "Form auto-save failed");
        }
    }
}
