//! Broker Adapters
//!
//! One [`FeedAdapter`] drives every broker; the differences live in a
//! [`BrokerProtocol`] per broker.
//!
//! | Broker  | Framing                                   | Tick kind                 |
//! |---------|-------------------------------------------|---------------------------|
//! | zerodha | big-endian binary, packet-counted frames  | complete                  |
//! | angel   | little-endian binary, text `ping`         | complete                  |
//! | dhan    | little-endian binary with 8-byte header   | ticker/OI/close partial   |
//! | shoonya | JSON both ways, login after open          | `tf`/`df` partial         |
//! | upstox  | JSON control, protobuf ticks              | LTPC-only partial         |

pub mod adapter;
pub mod angel;
pub mod codec;
pub mod dhan;
pub mod protocol;
pub mod registry;
pub mod shoonya;
pub mod upstox;
pub mod zerodha;

pub use adapter::{AdapterDeps, FeedAdapter};
pub use angel::AngelProtocol;
pub use codec::CodecError;
pub use dhan::DhanProtocol;
pub use protocol::{BrokerProtocol, Control, Inbound};
pub use registry::AdapterRegistry;
pub use shoonya::ShoonyaProtocol;
pub use upstox::UpstoxProtocol;
pub use zerodha::ZerodhaProtocol;
