pub mod analysis_window;
pub mod debug_sink;
pub mod frame_classifier;
pub mod frame_sample;
pub mod frame_source;
pub mod profile;
pub mod rally_state_machine;
pub mod segment_post_processor;
pub mod signal_extractor;
pub mod template;
pub mod trim_plan;
