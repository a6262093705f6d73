//! # webnn-wire
//!
//! Client/server wire protocol for the WebNN graph-building API.
//!
//! API calls made on proxy objects in one process are serialized into
//! commands, carried over a byte transport and executed against native
//! objects in another process.
//!
//! ## Architecture
//!
//! - **Client** ([`client`]): typed proxies, id allocation, pending callbacks
//! - **Server** ([`server`]): id → native object table, command dispatch
//! - **Protocol** ([`protocol`]): records, command tables, chunked framing
//! - **Transport** ([`transport`]): in-memory pipe, Unix socket / Named Pipe
//! - **Native** ([`native`]): the graph-building API the server calls
//! - **Control Plane** ([`control`]): JSON `$init` handshake over stdout
//!
//! ## Example
//!
//! ```ignore
//! use webnn_wire::transport::memory_pipe;
//! use webnn_wire::{Client, Server, WireConfig};
//!
//! let config = WireConfig::default();
//! let (to_server, mut server_rx) = memory_pipe(config.max_allocation_size);
//! let (to_client, mut client_rx) = memory_pipe(config.max_allocation_size);
//! let mut client = Client::new(Box::new(to_server), config);
//! let procs = Arc::new(NativeProcs::null());
//! let mut server = Server::new(procs.clone(), Box::new(to_client), config);
//!
//! let instance = client.reserve_instance()?;
//! server.inject_instance(instance.handle(), procs.create_instance())?;
//! let context = client.instance_create_context(instance, Default::default())?;
//! client.flush()?;
//! server_rx.deliver(&mut server)?;
//! client_rx.deliver(&mut client)?;
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod control;
pub mod error;
pub mod host;
pub mod native;
pub mod object;
pub mod protocol;
pub mod server;
pub mod transport;
pub mod writer;

pub use client::{Client, Proxy};
pub use config::{ErrorPolicy, WireConfig};
pub use error::{Result, WireError};
pub use object::{ObjectHandle, ObjectId, ObjectType};
pub use server::{ConnectionState, DisconnectReason, Server};
