// THEORY:
// `BusSink` plugs the engine's debug side channel into the visualizer. Every frame
// becomes a `Meta` message plus a rendered panel on the `FrameBus`; whoever is
// subscribed (the web server, a test) gets them, and nobody subscribed is fine too.

use crate::overlay::{encode_jpeg, render_panel, OverlayScale};
use crate::{FrameBus, FrameFormat, FramePacket, Meta};
use log::warn;
use rally_vision::core_modules::rally_state_machine::ProvisionalSegment;
use rally_vision::{DebugSink, FrameDebug};

const JPEG_QUALITY: u8 = 80;

pub struct BusSink {
    bus: FrameBus,
    scale: OverlayScale,
    segments_closed: u64,
    render_frames: bool,
}

impl BusSink {
    pub fn new(bus: FrameBus, scale: OverlayScale) -> Self {
        Self {
            bus,
            scale,
            segments_closed: 0,
            render_frames: true,
        }
    }

    /// Publish metadata only, skipping panel rendering.
    pub fn meta_only(mut self) -> Self {
        self.render_frames = false;
        self
    }

    pub fn segments_closed(&self) -> u64 {
        self.segments_closed
    }
}

impl DebugSink for BusSink {
    fn on_frame(&mut self, frame: &FrameDebug) {
        // Send errors only mean nobody is listening.
        let _ = self.bus.meta_tx.send(Meta::from_frame(frame, self.segments_closed));

        if !self.render_frames || self.bus.frames_tx.receiver_count() == 0 {
            return;
        }
        let panel = render_panel(frame, &self.scale);
        match encode_jpeg(&panel, JPEG_QUALITY) {
            Ok(bytes) => {
                let _ = self.bus.frames_tx.send(FramePacket {
                    ts_millis: (frame.timestamp * 1000.0).round() as u64,
                    width: panel.width(),
                    height: panel.height(),
                    format: FrameFormat::Jpeg,
                    data: bytes.into(),
                });
            }
            Err(err) => warn!("dropping overlay for frame {}: {err:#}", frame.index),
        }
    }

    fn on_segment_closed(&mut self, _segment: &ProvisionalSegment) {
        self.segments_closed += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rally_vision::FrameLabel;

    fn frame(index: u64) -> FrameDebug {
        FrameDebug {
            index,
            timestamp: index as f64 / 15.0,
            label: FrameLabel::Active,
            minimal_movement: false,
            stability_score: 0.8,
            movement_score: 300_000.0,
            rally_open: true,
            low_movement_run: 0,
        }
    }

    fn scale() -> OverlayScale {
        OverlayScale {
            stability_threshold: 0.62,
            movement_threshold: 240_000.0,
        }
    }

    #[test]
    fn frames_and_meta_reach_subscribers() {
        let bus = FrameBus::new(8);
        let mut frames = bus.frames_tx.subscribe();
        let mut meta = bus.meta_tx.subscribe();
        let mut sink = BusSink::new(bus, scale());

        sink.on_frame(&frame(30));
        sink.on_segment_closed(&ProvisionalSegment {
            start_frame: 0,
            end_frame: 30,
            contains_service_prep: false,
        });
        sink.on_frame(&frame(32));

        let first = meta.try_recv().unwrap();
        assert_eq!(first.index, 30);
        assert_eq!(first.label, "ACTIVE");
        assert_eq!(first.segments_closed, 0);
        assert_eq!(meta.try_recv().unwrap().segments_closed, 1);

        let packet = frames.try_recv().unwrap();
        assert_eq!(packet.ts_millis, 2000);
        assert_eq!(&packet.data[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn a_sink_without_listeners_is_harmless() {
        let mut sink = BusSink::new(FrameBus::new(1), scale()).meta_only();
        for index in 0..10 {
            sink.on_frame(&frame(index));
        }
        assert_eq!(sink.segments_closed(), 0);
    }
}
