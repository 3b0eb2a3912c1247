#![doc = include_str!("../README.md")]
#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]
#![warn(
    clippy::clone_on_ref_ptr,
    clippy::dbg_macro,
    clippy::explicit_iter_loop,
    clippy::future_not_send,
    clippy::todo,
    clippy::unimplemented,
    clippy::use_self,
    clippy::doc_markdown,
    clippy::print_stdout,
    missing_debug_implementations,
    unused_crate_dependencies,
    unreachable_pub,
    missing_docs
)]

mod errors;
pub use errors::Error;

mod version;
pub use version::{ObexVersion, OBEX_VERSION};

mod header;
pub use header::Header;

mod packet;

mod request;
pub use request::{Request, RequestKind, SetPathFlags};

mod response;
pub use response::{Response, ResponseKind};

mod transport;
pub use transport::{ObexListener, ObexStream, ServiceDirectory};

mod client;
pub use client::Client;

mod server;
pub use server::{resolve_set_path, Connection, Handler, PathTarget, ReceivedObject, Server};

// Unused crate lint workaround for dev dependency.
#[cfg(test)]
use criterion as _;
