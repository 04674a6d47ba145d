pub mod udp;

pub use udp::{LinkEvent, LinkMessage, LinkSender, UdpLink};
