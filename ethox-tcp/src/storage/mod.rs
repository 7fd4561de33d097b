//! Byte buffers backing the connection streams.
//!
//! Every connection owns one buffer for each direction, allocated with a fixed capacity when the
//! connection is created. They never grow. A full send buffer is reported to the writer and a
//! full receive buffer shrinks the advertised window to zero.
mod ring;

pub use ring::RingBuffer;
