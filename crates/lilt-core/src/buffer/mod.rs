//! Sample buffering between decode and real-time delivery

mod ring_buffer;

pub use ring_buffer::RingBuffer;
