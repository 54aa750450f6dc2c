//! Session client for the tether core
//!
//! [`SessionClient`] owns the state store, RPC correlator and permission
//! broker for one session and drives them from the transport's event stream.
//!
//! ```rust,ignore
//! let config = TetherConfig::load_from_file("tether.toml").await?;
//! tracing_utils::init_logging(&config.logging);
//!
//! let (client, channels) = SessionClient::new(session_id, transport, keys, &config);
//! client.start().await?;
//! let keep_alive = client.spawn_keep_alive();
//! client.clone().run(transport_events).await;
//! ```

mod client;
mod error;
pub mod tracing_utils;

pub use client::{SessionChannels, SessionClient};
pub use error::{SessionError, SessionResult};
