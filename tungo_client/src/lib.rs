//! A reverse HTTP tunnel client: dials a rendezvous server, performs the
//! hello handshake, and proxies inbound streams to a local origin server.
//!
//! ```no_run
//! # async fn run() -> tungo_client::Result<()> {
//! let options = tungo_client::Options::builder(8080)
//!     .server_url("wss://tunnel.example.com")
//!     .build()?;
//! let events = tungo_client::Events::builder()
//!     .on_connect(|info| println!("tunnel live at {}", info.url))
//!     .build();
//!
//! let client = tungo_client::TunnelClient::new(options, events)?;
//! let info = client.start().await?;
//! println!("forwarding {} -> 127.0.0.1:8080", info.url);
//! # client.stop().await;
//! # Ok(())
//! # }
//! ```

mod engine;
mod error;
mod events;
mod multiplexer;
mod options;
mod request;

pub use engine::TunnelClient;
pub use error::{Result, TunnelError};
pub use events::{Events, EventsBuilder};
pub use options::{Options, OptionsBuilder, TunnelInfo};
pub use request::RequestParseError;

pub use tungo_protocol::ProtocolError;
