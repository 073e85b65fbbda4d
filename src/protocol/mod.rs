//! Protocol module - scale frame format and streaming decoder.
//!
//! This module implements the device side of the link:
//! - 18-byte frame layout and classification
//! - Frame decoder for resynchronizing on arbitrary chunk boundaries
//! - Weight readings in the local mass unit

mod frame_buffer;
mod reading;
mod wire_format;

pub use frame_buffer::{DecoderStats, FrameDecoder};
pub use reading::WeightReading;
pub use wire_format::{
    classify_frame, encode_frame, parse_weight_field, FrameOutcome, FRAME_SIZE, HEADER_LEN,
    HEADER_OFFSET, START_MARKER, TERMINATOR, TERMINATOR_OFFSET, UNIT_FACTOR, VALUE_LEN,
    VALUE_OFFSET,
};
