//! Lock-free SPSC ring buffer between the input callback and the framing thread,
//! plus the typed blocks that flow through the session.
//!
//! Uses `ringbuf::HeapRb<f32>` which provides a wait-free `push_slice`
//! safe to call from the real-time audio callback.

pub mod assembler;
pub mod frame;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Producer};

/// Producer half, held by the input device callback.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Consumer half, held by the capture framing thread.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// 2^18 = 262 144 f32 samples ≈ 5.4 s at 48 kHz. The framing thread drains
/// every few milliseconds, so this only fills if that thread is starved.
pub const RING_CAPACITY: usize = 1 << 18;

/// Create a matched producer/consumer pair backed by a heap-allocated ring buffer.
pub fn create_audio_ring() -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(RING_CAPACITY).split()
}
