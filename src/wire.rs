//! Flat POD (de)serialization for frames crossing the IPC boundary.
//!
//! Every frame in [`crate::frames`] is `repr(C)` and `Copy`; the wire
//! representation is just its native-endian byte image, the same layout
//! the ring and journal already use. Cross-host interop is explicitly out
//! of scope (`spec.md` §6), so no byte-swapping is performed.

/// Reinterprets `frame` as its raw byte image. `T` must be `repr(C)`
/// (enforced by every type this is called with via their `size_of`
/// assertions) and `Copy` (no destructor to skip).
pub fn as_bytes<T: Copy>(frame: &T) -> &[u8] {
    unsafe { std::slice::from_raw_parts((frame as *const T) as *const u8, std::mem::size_of::<T>()) }
}

/// Reconstructs a `T` from its raw byte image. Returns `None` if `bytes`
/// is not exactly `size_of::<T>()` long.
pub fn from_bytes<T: Copy>(bytes: &[u8]) -> Option<T> {
    if bytes.len() != std::mem::size_of::<T>() {
        return None;
    }
    Some(unsafe { std::ptr::read_unaligned(bytes.as_ptr() as *const T) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::{MarketEvent, MarketEventType};

    #[test]
    fn roundtrips_a_pod_frame() {
        let event = MarketEvent::new(1, 2, MarketEventType::Ticker, 0, 0, 1.0, 0.9, 1.1, 10.0, 1.0);
        let bytes = as_bytes(&event).to_vec();
        let back: MarketEvent = from_bytes(&bytes).unwrap();
        assert_eq!(back.seq, event.seq);
        assert_eq!(back.last, event.last);
    }

    #[test]
    fn rejects_wrong_length() {
        let short = [0u8; 4];
        assert!(from_bytes::<MarketEvent>(&short).is_none());
    }
}
