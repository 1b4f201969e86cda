//! Run state gathered from control events

use serde::Serialize;

use super::ControlKind;

/// Run parameters seen in control events
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunInfo {
    pub run_number: u32,
    pub run_type: u32,
    pub prestart_time: Option<u32>,
    pub go_time: Option<u32>,
    pub end_time: Option<u32>,
    /// Event count reported by the last sync/pause/end event
    pub event_count: u32,
}

impl RunInfo {
    /// Update from a control event buffer
    ///
    /// Prestart is `[len, hdr, time, run, run_type]`; the others are
    /// `[len, hdr, time, reserved, event_count]`. Short buffers only update
    /// the fields they carry.
    pub fn apply(&mut self, kind: ControlKind, event: &[u32]) {
        let time = event.get(2).copied();
        match kind {
            ControlKind::Prestart => {
                *self = Self {
                    prestart_time: time,
                    run_number: event.get(3).copied().unwrap_or(0),
                    run_type: event.get(4).copied().unwrap_or(0),
                    ..Self::default()
                };
            }
            ControlKind::Go => {
                self.go_time = time;
                self.update_count(event);
            }
            ControlKind::End => {
                self.end_time = time;
                self.update_count(event);
            }
            ControlKind::Sync | ControlKind::Pause => self.update_count(event),
        }
    }

    fn update_count(&mut self, event: &[u32]) {
        if let Some(&count) = event.get(4) {
            self.event_count = count;
        }
    }
}
