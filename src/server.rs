//! The OBEX server: accepts sessions, dispatches decoded requests and emits
//! segmented responses.

use log::{debug, info, warn};

use crate::header::Header;
use crate::request::{Request, RequestKind, SetPathFlags};
use crate::response::{Response, ResponseKind};
use crate::transport::{ObexListener, ObexStream};
use crate::version::ObexVersion;
use crate::Error;

/// The largest packet this implementation is willing to receive.
const DEFAULT_MAX_PACKET_LENGTH: u16 = 0xffff;

/// The application side of a server: the override points for the requests
/// a profile actually serves.
///
/// Every method defaults to rejecting with FORBIDDEN, so a handler
/// implements only what its profile supports. CONNECT and DISCONNECT are
/// driven by the engine itself - version checking and the session state
/// transitions are not overridable.
pub trait Handler {
    /// Vetoes an inbound connection before any packet is read. The default
    /// accepts everyone.
    fn accept_connection(&mut self, _peer: &str) -> bool {
        true
    }

    /// Serves a GET request. Reply through
    /// [`Connection::send_response`]; large bodies are segmented
    /// automatically.
    fn get(&mut self, conn: &mut Connection<'_>, _request: Request) -> Result<(), Error> {
        conn.reject()
    }

    /// Serves a PUT request. [`Connection::receive_object`] assembles the
    /// full object across however many packets the client sends.
    fn put(&mut self, conn: &mut Connection<'_>, _request: Request) -> Result<(), Error> {
        conn.reject()
    }

    /// Serves a SETPATH request. [`resolve_set_path`] maps the flags and
    /// name onto a navigation target.
    fn set_path(&mut self, conn: &mut Connection<'_>, _request: Request) -> Result<(), Error> {
        conn.reject()
    }
}

/// One accepted session, handed to [`Handler`] methods.
///
/// Holds the session's stream and the client's advertised maximum packet
/// length, which bounds every response packet sent back.
pub struct Connection<'a> {
    stream: &'a mut dyn ObexStream,
    remote_max: u16,
    connected: bool,
}

impl std::fmt::Debug for Connection<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("remote_max", &self.remote_max)
            .field("connected", &self.connected)
            .finish_non_exhaustive()
    }
}

impl Connection<'_> {
    /// The client's advertised maximum packet length (0xFFFF before its
    /// CONNECT arrives).
    pub fn remote_max_packet_length(&self) -> u16 {
        self.remote_max
    }

    /// Sends a response, splitting it across as many packets as the
    /// client's receive window requires.
    ///
    /// Every buffer except the last goes out with the CONTINUE opcode, and
    /// after each one the client must answer with a bare GET_FINAL before
    /// the next is sent; anything else is a protocol violation.
    pub fn send_response(&mut self, response: Response) -> Result<(), Error> {
        let chunks = response.encode_chunks(self.remote_max)?;
        let last = chunks.len() - 1;

        for chunk in &chunks[..last] {
            self.stream.send_all(chunk)?;

            let request = Request::read_from(self.stream)?;
            if !matches!(request.kind(), RequestKind::GetFinal) {
                return Err(Error::ProtocolViolation(
                    "expected GET_FINAL between response chunks",
                ));
            }
        }

        self.stream.send_all(&chunks[last])
    }

    /// Rejects the current request with FORBIDDEN.
    pub fn reject(&mut self) -> Result<(), Error> {
        self.send_response(Response::new(ResponseKind::Forbidden))
    }

    /// Assembles the object a PUT request sequence carries, starting from
    /// the request the handler was dispatched with.
    ///
    /// Body and End-Of-Body payloads are drained into the accumulator and
    /// every other header kept in arrival order; each non-final PUT is
    /// answered with CONTINUE. Returns once the PUT_FINAL packet has been
    /// drained - the final reply (SUCCESS, or an application-chosen error)
    /// is the caller's to send.
    pub fn receive_object(&mut self, mut request: Request) -> Result<ReceivedObject, Error> {
        let mut object = ReceivedObject {
            headers: Vec::new(),
            body: Vec::new(),
        };

        loop {
            for h in request.take_headers() {
                match h {
                    Header::Body(d) | Header::EndOfBody(d) => object.body.extend_from_slice(&d),
                    other => object.headers.push(other),
                }
            }

            if request.is_final() {
                return Ok(object);
            }

            // Ask for more data.
            self.send_response(Response::new(ResponseKind::Continue))?;

            request = Request::read_from(self.stream)?;
            if !matches!(request.kind(), RequestKind::Put | RequestKind::PutFinal) {
                return Err(Error::ProtocolViolation("expected PUT continuation"));
            }
        }
    }
}

/// An object assembled from a PUT request sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedObject {
    /// Every non-body header observed, in arrival order (typically `Name`,
    /// `Length`, `Type`, `App-Parameters`).
    pub headers: Vec<Header>,

    /// The Body and End-Of-Body payloads, concatenated.
    pub body: Vec<u8>,
}

impl ReceivedObject {
    /// Returns the value of the first `Name` header, if any.
    pub fn name(&self) -> Option<&str> {
        self.headers.iter().find_map(|h| match h {
            Header::Name(s) => Some(s.as_str()),
            _ => None,
        })
    }
}

/// Where a SETPATH request navigates to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathTarget {
    /// Move to the parent of the current directory.
    Parent,

    /// Reset to the root of the served tree.
    Root,

    /// Descend into the named child, creating it if `create` is set.
    Child {
        /// The directory name.
        name: String,

        /// Whether the server may create a missing directory rather than
        /// fail.
        create: bool,
    },
}

/// Maps a SETPATH request's flags and `Name` header onto the navigation it
/// asks for. How the target applies to the backing store is the
/// application's decision.
pub fn resolve_set_path(request: &Request) -> Result<PathTarget, Error> {
    let RequestKind::SetPath { flags, .. } = request.kind() else {
        return Err(Error::ProtocolViolation("not a SETPATH request"));
    };

    let name = request.name().unwrap_or("");
    if flags.contains(SetPathFlags::NAVIGATE_TO_PARENT) {
        Ok(PathTarget::Parent)
    } else if name.is_empty() && flags.contains(SetPathFlags::DONT_CREATE_DIR) {
        Ok(PathTarget::Root)
    } else {
        Ok(PathTarget::Child {
            name: name.to_string(),
            create: !flags.contains(SetPathFlags::DONT_CREATE_DIR),
        })
    }
}

/// An OBEX server: an accept loop dispatching decoded requests to a
/// [`Handler`].
#[derive(Debug)]
pub struct Server<H: Handler> {
    handler: H,
    version: ObexVersion,
    max_packet_length: u16,
}

impl<H: Handler> Server<H> {
    /// Construct a server around the given handler.
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            version: ObexVersion::default(),
            max_packet_length: DEFAULT_MAX_PACKET_LENGTH,
        }
    }

    /// Sets the maximum packet length advertised in CONNECT replies.
    pub fn with_max_packet_length(mut self, max_packet_length: u16) -> Self {
        self.max_packet_length = max_packet_length;
        self
    }

    /// The wrapped handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Serves connections from `listener` until it fails.
    ///
    /// A transport or protocol error inside one session is logged and ends
    /// only that session; the accept loop carries on with the next
    /// connection.
    pub fn serve<L: ObexListener>(&mut self, listener: &mut L) -> Result<(), Error> {
        loop {
            let (mut stream, peer) = listener.accept()?;

            if !self.handler.accept_connection(&peer) {
                info!("refusing connection from {}", peer);
                if let Err(e) = stream.close() {
                    warn!("error closing refused connection: {}", e);
                }
                continue;
            }

            info!("accepted connection from {}", peer);
            if let Err(e) = self.session(&mut stream) {
                warn!("session with {} ended: {}", peer, e);
            }
            if let Err(e) = stream.close() {
                warn!("error closing connection to {}: {}", peer, e);
            }
        }
    }

    /// Runs one session to completion: decode, dispatch, repeat until the
    /// client disconnects or the transport fails.
    fn session(&mut self, stream: &mut dyn ObexStream) -> Result<(), Error> {
        let mut conn = Connection {
            stream,
            remote_max: DEFAULT_MAX_PACKET_LENGTH,
            connected: true,
        };

        while conn.connected {
            let request = Request::read_from(conn.stream)?;
            self.dispatch(&mut conn, request)?;
        }

        Ok(())
    }

    fn dispatch(&mut self, conn: &mut Connection<'_>, request: Request) -> Result<(), Error> {
        debug!("dispatching request {:#04x}", request.opcode());

        match request.kind() {
            RequestKind::Connect {
                version,
                max_packet_length,
                ..
            } => {
                if let Err(e) = self.check_version(*version) {
                    warn!("{}", e);
                    return conn.reject();
                }

                conn.remote_max = *max_packet_length;
                conn.send_response(Response::new(ResponseKind::ConnectSuccess {
                    version: self.version,
                    flags: 0,
                    max_packet_length: self.max_packet_length,
                }))
            }
            RequestKind::Disconnect => {
                conn.send_response(Response::new(ResponseKind::Success))?;
                conn.connected = false;
                Ok(())
            }
            RequestKind::Get | RequestKind::GetFinal => self.handler.get(conn, request),
            RequestKind::Put | RequestKind::PutFinal => self.handler.put(conn, request),
            RequestKind::SetPath { .. } => self.handler.set_path(conn, request),
            _ => conn.reject(),
        }
    }

    /// Rejects clients announcing a protocol version newer than ours.
    fn check_version(&self, version: ObexVersion) -> Result<(), Error> {
        if version > self.version {
            return Err(Error::VersionMismatch {
                major: version.major(),
                minor: version.minor(),
            });
        }
        Ok(())
    }
}
