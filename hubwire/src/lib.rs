#![forbid(unsafe_code)]

//! Transport-agnostic RPC runtime.
//!
//! A trait annotated with [`service`] becomes a call contract: the generated
//! `<Trait>Service` wraps an implementation so a [`Router`] can serve it, and
//! the generated `<Trait>Client` forwards every method call over the router's
//! transport. Any [`Transport`] and any [`Codec`] can be combined.

extern crate self as hubwire;

pub use hubwire_macro::service;

mod error;
pub use error::{Error, ErrorKind, Result};

mod msg;
pub use msg::{Message, MessageKind, SessionId};

pub mod codec;
pub use codec::{ArgWriter, Arguments, Codec, JsonCodec, MessagePackCodec};

pub mod transport;
pub use transport::{
    Frame, MemoryTransport, Received, TcpTransport, Transport, TransportEvent, WebSocketTransport,
};

mod waiter;
pub use waiter::{Waiter, encode_id};

mod receiver;
pub use receiver::Receiver;

mod task_supervisor;
pub use task_supervisor::TaskSupervisor;

mod config;
pub use config::{CodecType, RouterConfig, TransportConfig, TransportType};

mod skeleton;
pub use skeleton::{Method, MethodEntry, Service, ServiceBuilder, Skeleton};

mod client;
pub use client::{Client, Interface};

mod router;
pub use router::{Router, RouterEvent};
