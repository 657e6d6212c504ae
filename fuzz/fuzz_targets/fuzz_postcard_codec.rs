//! Fuzz target for the persisted record codec.
//!
//! Arbitrary bytes decoded as checkpoint records or their parts must never
//! panic, and anything that decodes must encode back to an equal value.

#![no_main]

use libfuzzer_sys::fuzz_target;

use blockvol_types::codec::{decode, encode};
use blockvol_types::{BlockRange, CheckpointRequest, CompositeRequestId, PartitionDescriptor};

fuzz_target!(|data: &[u8]| {
    let Some((&selector, payload)) = data.split_first() else {
        return;
    };

    match selector % 4 {
        0 => try_roundtrip::<CheckpointRequest>(payload),
        1 => try_roundtrip::<BlockRange>(payload),
        2 => try_roundtrip::<CompositeRequestId>(payload),
        _ => try_roundtrip::<PartitionDescriptor>(payload),
    }
});

fn try_roundtrip<T>(data: &[u8])
where
    T: serde::Serialize + serde::de::DeserializeOwned + PartialEq + std::fmt::Debug,
{
    let Ok(value) = decode::<T>(data) else {
        return;
    };
    let bytes = encode(&value).expect("encode after successful decode");
    let again = decode::<T>(&bytes).expect("decode of re-encoded value");
    assert_eq!(value, again, "codec roundtrip changed the value");
}
