// Push event stream: framing, path inflation, and the reconnecting session.

mod decoder;
mod inflate;
mod session;

pub use decoder::{
    EventFramer, MAX_FRAME_BYTES, PatchKind, PathPatch, RawEvent, decode_event, decode_patches,
};
pub use inflate::{EntityUpdate, InflatedPatch, inflate};
pub use session::{Connector, StreamConfig, StreamEvent, StreamSession, StreamState};
