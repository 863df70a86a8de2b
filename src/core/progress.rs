//! Progress notifications for a running request.
//!
//! The orchestrator reports every stage transition through a
//! [`ProgressSink`]. Callers forward these to whatever front-end they drive
//! (a terminal, a websocket, a status field). All methods default to no-ops.

use uuid::Uuid;

use crate::domain::PipelineStage;

/// Receives progress events for one or more requests.
///
/// Must be `Send + Sync`: concurrently admitted requests may report through
/// the same sink from different tasks.
pub trait ProgressSink: Send + Sync {
    /// Called when a request enters `stage`
    fn on_stage(&self, request_id: Uuid, stage: PipelineStage) {
        let _ = (request_id, stage);
    }

    /// Called with a short human-readable notice
    fn on_notice(&self, request_id: Uuid, message: &str) {
        let _ = (request_id, message);
    }
}

/// Sink that ignores every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        stages: Mutex<Vec<PipelineStage>>,
    }

    impl ProgressSink for Recording {
        fn on_stage(&self, _request_id: Uuid, stage: PipelineStage) {
            self.stages.lock().unwrap().push(stage);
        }
    }

    #[test]
    fn noop_sink_does_not_panic() {
        let sink = NoopProgress;
        sink.on_stage(Uuid::new_v4(), PipelineStage::Compiling);
        sink.on_notice(Uuid::new_v4(), "Generating the PDF document");
    }

    #[test]
    fn dyn_sink_receives_stages() {
        let recording = Recording::default();
        let sink: &dyn ProgressSink = &recording;
        sink.on_stage(Uuid::nil(), PipelineStage::Validating);
        sink.on_stage(Uuid::nil(), PipelineStage::Done);
        // Default notice handler is a no-op
        sink.on_notice(Uuid::nil(), "ignored");

        assert_eq!(
            *recording.stages.lock().unwrap(),
            vec![PipelineStage::Validating, PipelineStage::Done]
        );
    }
}
