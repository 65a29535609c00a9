//! Protocol module containing the UDP discovery datagrams and the JSON
//! session frames.

pub mod discovery;
pub mod messages;

pub use discovery::{parse_advertisement, AdvertisementError};
pub use messages::{decode_inbound, encode_outbound, InboundMessage, OutboundMessage, ProtocolError};
