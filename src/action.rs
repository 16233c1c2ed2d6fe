use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::system::snapshot::AppSetFilter;
use crate::view_model::ViewState;

/// Requests queued to the task that owns the view state.
#[derive(Debug)]
pub enum Command {
    Initialize,
    Refresh,
    SelectFilter(AppSetFilter),
    ClearBackgroundTasks,
    Subscribe(mpsc::UnboundedSender<Arc<ViewState>>),
    Current(oneshot::Sender<Arc<ViewState>>),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Initialize => "initialize",
            Command::Refresh => "refresh",
            Command::SelectFilter(_) => "select_filter",
            Command::ClearBackgroundTasks => "clear_background_tasks",
            Command::Subscribe(_) => "subscribe",
            Command::Current(_) => "current",
        }
    }
}
