#![forbid(unsafe_code)]

//! Asynchronous client for the PBX manager interface.
//!
//! ```no_run
//! use ami_link::ami::{Adapter, Record};
//!
//! # async fn demo() -> ami_link::Result<()> {
//! let adapter = Adapter::connect_host("pbx.example.net").await?;
//! let mut events = adapter.login("admin", "secret").await?;
//!
//! let reply = adapter.exec(Record::action("CoreStatus")).await?;
//! println!("{reply:?}");
//!
//! while let Some(event) = events.next_event().await {
//!     println!("{:?}", event.event());
//! }
//! # Ok(())
//! # }
//! ```

pub mod ami;
pub mod config;
pub mod errors;

pub use config::AdapterConfig;
pub use errors::{AppError, Result};
