//! Wire protocol for the datagram socket between the mode control entity and
//! the device-state manager (DSME). Frames are opaque length-prefixed
//! messages with a 32-bit type tag (spec §4.2); unknown types are logged and
//! ignored rather than treated as an error.

mod codec;
mod message;
mod state;

pub use codec::{DsmeCodec, ProtoError};
pub use message::{IncomingMessage, OutgoingMessage};
pub use state::{RawSystemState, SystemState};
