//! Manager interface client.
//!
//! Pipeline, leaves first:
//! - `transport`: [`Connector`](transport::Connector) capability producing a
//!   fresh read/write pair per connection generation.
//! - `reader`: per-generation task forwarding raw bytes and reporting the
//!   single link-failure signal.
//! - `codec`: `Key: Value\r\n` frame decoder/encoder.
//! - `parser`: long-lived task turning bytes into [`Record`](record::Record)s.
//! - `classifier`: long-lived task splitting records into responses and events.
//! - `writer`: per-generation task serializing outbound actions.
//! - `supervisor`: bounded reconnect loop with credential replay.
//! - `adapter`: the [`Adapter`](adapter::Adapter) façade.

pub mod adapter;
pub mod classifier;
pub mod codec;
pub mod parser;
pub mod reader;
pub mod record;
pub mod supervisor;
pub mod transport;
pub mod writer;

pub use adapter::{Adapter, Credentials, EventStream};
pub use record::Record;
pub use supervisor::LinkState;
