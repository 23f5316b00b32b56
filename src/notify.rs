use std::sync::{Arc, Mutex};

/// Severity of a user-visible notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum NoticeKind {
    Info,
    Warning,
    Error,
}

/// Toast-equivalent channel for user-visible messages (repair performed,
/// zombie reset, illegal transition attempted). The engine has no UI
/// dependency; hosts plug in whatever surface they have.
pub trait Notifier: Send {
    fn notify(&self, kind: NoticeKind, message: &str);
}

/// Routes notices to the `log` facade. Useful for headless hosts.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, kind: NoticeKind, message: &str) {
        match kind {
            NoticeKind::Info => log::info!("{message}"),
            NoticeKind::Warning => log::warn!("{message}"),
            NoticeKind::Error => log::error!("{message}"),
        }
    }
}

/// Swallows every notice.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _kind: NoticeKind, _message: &str) {}
}

/// Captures notices for assertions. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    notices: Arc<Mutex<Vec<(NoticeKind, String)>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<(NoticeKind, String)> {
        self.notices.lock().unwrap().clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.notices
            .lock()
            .unwrap()
            .iter()
            .filter(|(kind, _)| *kind == NoticeKind::Warning)
            .map(|(_, msg)| msg.clone())
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, kind: NoticeKind, message: &str) {
        self.notices.lock().unwrap().push((kind, message.to_string()));
    }
}
