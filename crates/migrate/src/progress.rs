//! Progress checkpoints
//!
//! Every checkpoint goes to `tracing` and, when configured, to the caller's
//! [`MigrationLogger`]. Nothing reads these back.

use crate::config::MigrationLogger;

#[derive(Debug, Clone, Default)]
pub(crate) struct Progress {
    sink: Option<MigrationLogger>,
}

impl Progress {
    pub(crate) fn new(sink: Option<MigrationLogger>) -> Self {
        Self { sink }
    }

    pub(crate) fn report(&self, message: &str) {
        tracing::info!("{}", message);
        if let Some(sink) = &self.sink {
            sink.log(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_report_reaches_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = seen.clone();
        let progress = Progress::new(Some(MigrationLogger::new(move |msg| {
            captured.lock().unwrap().push(msg.to_string());
        })));

        progress.report("Loading migrations");
        Progress::default().report("dropped");

        assert_eq!(*seen.lock().unwrap(), vec!["Loading migrations".to_string()]);
    }
}
