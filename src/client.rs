//! The OBEX client: drives one session's operations over a byte stream.

use log::{debug, warn};

use crate::header::Header;
use crate::request::{Request, RequestKind, SetPathFlags};
use crate::response::{Response, ResponseKind};
use crate::transport::ObexStream;
use crate::version::ObexVersion;
use crate::Error;

/// The largest packet this implementation is willing to receive.
const DEFAULT_MAX_PACKET_LENGTH: u16 = 0xffff;

/// Bytes reserved per body chunk: the packet prefix plus the Body header
/// prefix.
const BODY_CHUNK_OVERHEAD: usize = 6;

/// An OBEX client session over a connected byte stream.
///
/// One `Client` drives one session: CONNECT negotiates the peer's maximum
/// packet length and (optionally) a Connection-ID, the operation methods
/// run their request/response state machines strictly one at a time, and
/// DISCONNECT tears the session down. A client is single use - after
/// [`disconnect`](Client::disconnect) no further operations are valid.
///
/// Peer failure responses surface as [`Error::Failure`] carrying the full
/// response for inspection.
#[derive(Debug)]
pub struct Client<S: ObexStream> {
    stream: S,
    version: ObexVersion,
    max_packet_length: u16,

    /// The peer's advertised maximum packet length, learnt from the
    /// CONNECT reply.
    remote_max: u16,

    /// The Connection-ID issued by the server, sent as the first header of
    /// every subsequent operation.
    connection_id: Option<u32>,

    connected: bool,
}

impl<S: ObexStream> Client<S> {
    /// Construct a client over an already-connected stream.
    ///
    /// The stream is typically an RFCOMM socket to a port found through the
    /// host's [`ServiceDirectory`](crate::ServiceDirectory).
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            version: ObexVersion::default(),
            max_packet_length: DEFAULT_MAX_PACKET_LENGTH,
            remote_max: DEFAULT_MAX_PACKET_LENGTH,
            connection_id: None,
            connected: false,
        }
    }

    /// Sets the maximum packet length announced in CONNECT.
    ///
    /// Defaults to 0xFFFF; the server bounds its response packets by this
    /// value.
    pub fn with_max_packet_length(mut self, max_packet_length: u16) -> Self {
        self.max_packet_length = max_packet_length;
        self
    }

    /// The Connection-ID issued by the server, if any.
    pub fn connection_id(&self) -> Option<u32> {
        self.connection_id
    }

    /// The peer's advertised maximum packet length (0xFFFF before CONNECT).
    pub fn remote_max_packet_length(&self) -> u16 {
        self.remote_max
    }

    /// True between a successful CONNECT and the following DISCONNECT.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Opens the session: sends CONNECT announcing version 1.0 and this
    /// client's receive window, and records the server's negotiation reply.
    ///
    /// A `Target` header (and any other caller headers) can be supplied to
    /// address a specific service behind the port.
    ///
    /// Note that CONNECT has no non-final form: if the supplied headers
    /// overflow a single packet the header flushing loop will emit multiple
    /// CONNECT-coded packets, which not every peer accepts. Callers should
    /// keep CONNECT headers within one packet.
    pub fn connect(&mut self, headers: Vec<Header>) -> Result<Response, Error> {
        let mut request = Request::new(RequestKind::Connect {
            version: self.version,
            flags: 0,
            max_packet_length: self.max_packet_length,
        });

        let response = self.send_headers(&mut request, headers)?;

        match response.kind() {
            ResponseKind::ConnectSuccess {
                max_packet_length, ..
            } => {
                self.remote_max = *max_packet_length;
                for h in response.headers() {
                    if let Header::ConnectionId(id) = h {
                        // Recycled as the mandatory first header of every
                        // subsequent request.
                        self.connection_id = Some(*id);
                    }
                }
                self.connected = true;

                debug!(
                    "connected, remote max packet {}, connection id {:?}",
                    self.remote_max, self.connection_id
                );
                Ok(response)
            }
            _ => {
                self.close_stream();
                Err(fail(response, "unexpected response to CONNECT"))
            }
        }
    }

    /// Closes the session with DISCONNECT.
    ///
    /// The stream is closed and the session state cleared whatever the
    /// peer's answer; a non-SUCCESS reply is still reported as an error.
    pub fn disconnect(&mut self, headers: Vec<Header>) -> Result<Response, Error> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        let mut request = Request::new(RequestKind::Disconnect);
        let result = self.send_headers(&mut request, headers);

        self.connected = false;
        self.connection_id = None;
        self.close_stream();

        let response = result?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(fail(response, "unexpected response to DISCONNECT"))
        }
    }

    /// Sends an object to the server's current directory.
    ///
    /// The first packet carries synthesized `Name` and `Length` headers
    /// (then any caller headers); the object bytes follow as Body chunks
    /// sized to the peer's receive window, with `End-Of-Body` closing the
    /// stream.
    pub fn put(&mut self, name: &str, data: &[u8], headers: Vec<Header>) -> Result<Response, Error> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        debug!("put {:?}, {} bytes", name, data.len());

        let mut header_list = vec![
            Header::Name(name.to_string()),
            Header::Length(data.len() as u32),
        ];
        header_list.extend(headers);

        let mut request = Request::new(RequestKind::Put);
        let response = self.send_headers(&mut request, header_list)?;

        if response.is_success() {
            // The peer completed the operation without asking for a body.
            return Ok(response);
        }
        if !response.is_continue() {
            return Err(fail(response, "unexpected response to PUT"));
        }

        // Each chunk rides in its own packet: the peer's window minus the
        // packet prefix and the Body header prefix.
        let chunk_size = (self.remote_max as usize)
            .saturating_sub(BODY_CHUNK_OVERHEAD)
            .max(1);

        let chunks: Vec<&[u8]> = if data.is_empty() {
            // An empty object still needs its End-Of-Body packet.
            vec![&[]]
        } else {
            data.chunks(chunk_size).collect()
        };

        for chunk in &chunks[..chunks.len() - 1] {
            let mut request = Request::new(RequestKind::Put);
            request.push_header(Header::Body(chunk.to_vec()));
            self.stream.send_all(&request.encode(self.remote_max)?)?;

            let response = Response::read_from(&mut self.stream)?;
            if !response.is_continue() {
                return Err(fail(response, "expected CONTINUE mid-PUT"));
            }
        }

        let mut request = Request::new(RequestKind::PutFinal);
        request.push_header(Header::EndOfBody(chunks[chunks.len() - 1].to_vec()));
        self.stream.send_all(&request.encode(self.remote_max)?)?;

        let response = Response::read_from(&mut self.stream)?;
        if response.is_success() {
            Ok(response)
        } else {
            Err(fail(response, "expected SUCCESS closing PUT"))
        }
    }

    /// Fetches an object from the server's current directory.
    ///
    /// Returns the response headers (Body parts removed) and the object
    /// bytes reassembled across however many CONTINUE packets the server
    /// needed.
    pub fn get(
        &mut self,
        name: Option<&str>,
        headers: Vec<Header>,
    ) -> Result<(Vec<Header>, Vec<u8>), Error> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        debug!("get {:?}", name);

        let mut header_list = Vec::new();
        if let Some(name) = name {
            header_list.push(Header::Name(name.to_string()));
        }
        header_list.extend(headers);

        // The flushing loop promotes the last header-bearing packet to
        // GET_FINAL.
        let mut request = Request::new(RequestKind::Get);
        let mut response = self.send_headers(&mut request, header_list)?;

        let mut collected = Vec::new();
        loop {
            if !response.is_continue() && !response.is_success() {
                return Err(fail(response, "unexpected response to GET"));
            }

            let done = response.is_success();
            collected.extend(response.take_headers());
            if done {
                break;
            }

            // Pull the next chunk with a bare GET_FINAL.
            let request = Request::new(RequestKind::GetFinal);
            self.stream.send_all(&request.encode(self.remote_max)?)?;
            response = Response::read_from(&mut self.stream)?;
        }

        Ok(collect_parts(collected))
    }

    /// Changes the server's current directory for the session.
    ///
    /// An empty `name` resets to the root (or, with `to_parent`, moves up
    /// one level). With `create_dir` the server may create the named
    /// directory instead of failing.
    pub fn set_path(
        &mut self,
        name: &str,
        create_dir: bool,
        to_parent: bool,
        headers: Vec<Header>,
    ) -> Result<Response, Error> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        debug!("set_path {:?}", name);

        let mut flags = SetPathFlags::empty();
        if !create_dir {
            flags |= SetPathFlags::DONT_CREATE_DIR;
        }
        if to_parent {
            flags |= SetPathFlags::NAVIGATE_TO_PARENT;
        }

        let mut header_list = vec![Header::Name(name.to_string())];
        header_list.extend(headers);

        let mut request = Request::new(RequestKind::SetPath {
            flags,
            constants: 0,
        });
        let response = self.send_headers(&mut request, header_list)?;

        if response.is_success() {
            Ok(response)
        } else {
            Err(fail(response, "unexpected response to SETPATH"))
        }
    }

    /// Deletes the named object from the server's current directory.
    ///
    /// On the wire this is a PUT_FINAL carrying only a `Name` header and no
    /// body.
    pub fn delete(&mut self, name: &str, headers: Vec<Header>) -> Result<Response, Error> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        debug!("delete {:?}", name);

        let mut header_list = vec![Header::Name(name.to_string())];
        header_list.extend(headers);

        let mut request = Request::new(RequestKind::PutFinal);
        let response = self.send_headers(&mut request, header_list)?;

        if response.is_success() {
            Ok(response)
        } else {
            Err(fail(response, "unexpected response to DELETE"))
        }
    }

    /// Aborts the operation in progress.
    ///
    /// Only useful to callers re-implementing operations on a client they
    /// own exclusively: the engine itself never leaves an operation
    /// half-driven.
    pub fn abort(&mut self, headers: Vec<Header>) -> Result<Response, Error> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        let mut request = Request::new(RequestKind::Abort);
        let response = self.send_headers(&mut request, headers)?;

        if response.is_success() {
            Ok(response)
        } else {
            Err(fail(response, "unexpected response to ABORT"))
        }
    }

    /// Adds headers to `request` and sends it as one or more packets.
    ///
    /// Headers are packed greedily up to the peer's receive window. When
    /// they overflow, the packet is sent as-is (non-final), a CONTINUE is
    /// expected back, and packing restarts with an empty header list; any
    /// other response ends the loop early and is returned. At least one
    /// packet is always sent, even with no headers at all.
    fn send_headers(
        &mut self,
        request: &mut Request,
        mut header_list: Vec<Header>,
    ) -> Result<Response, Error> {
        // Any Connection-ID information is sent first.
        if let Some(id) = self.connection_id {
            header_list.insert(0, Header::ConnectionId(id));
        }

        let is_connect = matches!(request.kind(), RequestKind::Connect { .. });

        while !header_list.is_empty() {
            if request.add_header(&header_list[0], self.remote_max) {
                header_list.remove(0);
                continue;
            }

            if request.headers().is_empty() {
                // This header alone can never fit a packet.
                return Err(Error::OversizedHeader {
                    id: header_list[0].id(),
                    len: header_list[0].serialised_len(),
                    max: self.remote_max,
                });
            }

            self.stream.send_all(&request.encode(self.remote_max)?)?;
            let response = self.read_response(is_connect)?;
            if !response.is_continue() {
                return Ok(response);
            }
            request.reset_headers();
        }

        // Always send at least one request. The last GET packet carrying
        // the headers becomes GET_FINAL.
        if matches!(request.kind(), RequestKind::Get) {
            request.finalise();
        }

        self.stream.send_all(&request.encode(self.remote_max)?)?;
        self.read_response(is_connect)
    }

    fn read_response(&mut self, is_connect: bool) -> Result<Response, Error> {
        if is_connect {
            Response::read_connect_reply(&mut self.stream)
        } else {
            Response::read_from(&mut self.stream)
        }
    }

    fn close_stream(&mut self) {
        if let Err(e) = self.stream.close() {
            warn!("error closing stream: {}", e);
        }
    }
}

/// Splits collected response headers into (non-body headers, reassembled
/// body bytes).
fn collect_parts(headers: Vec<Header>) -> (Vec<Header>, Vec<u8>) {
    let mut body = Vec::new();
    let mut rest = Vec::new();

    for h in headers {
        match h {
            Header::Body(d) | Header::EndOfBody(d) => body.extend_from_slice(&d),
            other => rest.push(other),
        }
    }

    (rest, body)
}

/// Classifies an unexpected response: peer failures ride in
/// [`Error::Failure`], anything else (a success where it makes no sense) is
/// a protocol violation.
fn fail(response: Response, context: &'static str) -> Error {
    if response.is_failure() {
        Error::Failure(response)
    } else {
        Error::ProtocolViolation(context)
    }
}
