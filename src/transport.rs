//! The byte-stream boundary the protocol engines drive.
//!
//! OBEX runs over any reliable, ordered byte stream. Bluetooth RFCOMM is the
//! usual carrier, but the engines only ever see the [`ObexStream`] trait, so
//! the host environment supplies whatever transport it has - an RFCOMM
//! socket wrapper, loopback TCP in tests, a serial line.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};

use crate::Error;

/// A reliable, ordered byte stream carrying one OBEX session.
///
/// The trait is object safe: the server engine hands connections to
/// handlers as `&mut dyn ObexStream`.
pub trait ObexStream {
    /// Hands the whole of `buf` to the transport, looping until every byte
    /// is accepted.
    fn send_all(&mut self, buf: &[u8]) -> Result<(), Error>;

    /// Fills the whole of `buf` from the transport, looping until the exact
    /// byte count is obtained.
    ///
    /// EOF before `buf` is full is [`Error::TransportClosed`].
    fn recv_exact(&mut self, buf: &mut [u8]) -> Result<(), Error>;

    /// Closes the stream. Closing an already-closed stream is a no-op.
    fn close(&mut self) -> Result<(), Error>;
}

impl ObexStream for TcpStream {
    fn send_all(&mut self, buf: &[u8]) -> Result<(), Error> {
        self.write_all(buf)?;
        Ok(())
    }

    fn recv_exact(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        self.read_exact(buf)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        match self.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// A listening endpoint producing [`ObexStream`] sessions.
///
/// The peer is surfaced in display form for the server's
/// [`accept_connection`](crate::Handler::accept_connection) veto and for
/// logging.
pub trait ObexListener {
    /// The stream type produced for each accepted connection.
    type Stream: ObexStream;

    /// Blocks until the next inbound connection arrives.
    fn accept(&mut self) -> Result<(Self::Stream, String), Error>;
}

impl ObexListener for TcpListener {
    type Stream = TcpStream;

    fn accept(&mut self) -> Result<(TcpStream, String), Error> {
        let (stream, peer) = TcpListener::accept(self)?;
        Ok((stream, peer.to_string()))
    }
}

/// Service lookup and advertisement, supplied by the host environment.
///
/// OBEX services are found and advertised out of band (over SDP on
/// Bluetooth). The engines never perform discovery themselves - a client is
/// built from an already-connected stream and a server from a ready
/// listener - but hosts that do discovery implement this trait next to
/// their [`ObexStream`] transport.
pub trait ServiceDirectory {
    /// Resolves the port (RFCOMM channel) of the named service on a device.
    fn find_service(&mut self, name: &str, address: &str) -> Result<u16, Error>;

    /// Registers the named service at `port` with the host's directory.
    fn advertise_service(&mut self, name: &str, port: u16) -> Result<(), Error>;

    /// Withdraws a previously advertised service.
    fn stop_advertising(&mut self, name: &str) -> Result<(), Error>;
}
