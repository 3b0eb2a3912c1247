//! End-to-end sessions: a real client against a real server over loopback
//! TCP, exercising negotiation, segmentation in both directions, directory
//! navigation and teardown.

use std::collections::HashMap;
use std::net::{TcpListener, TcpStream};
use std::thread;

use obex_core::{
    resolve_set_path, Client, Connection, Error, Handler, Header, PathTarget, Request, Response,
    ResponseKind, Server,
};

/// An in-memory object store with SETPATH navigation.
#[derive(Default)]
struct VaultHandler {
    objects: HashMap<String, Vec<u8>>,
    cwd: Vec<String>,
}

impl VaultHandler {
    fn key(&self, name: &str) -> String {
        let mut path = self.cwd.join("/");
        if !path.is_empty() {
            path.push('/');
        }
        path.push_str(name);
        path
    }
}

impl Handler for VaultHandler {
    fn get(&mut self, conn: &mut Connection<'_>, request: Request) -> Result<(), Error> {
        let Some(name) = request.name().map(str::to_string) else {
            return conn.send_response(Response::new(ResponseKind::BadRequest));
        };

        let Some(data) = self.objects.get(&self.key(&name)).cloned() else {
            return conn.send_response(Response::new(ResponseKind::NotFound));
        };

        // Pre-chunk the body so no single header outgrows the client's
        // receive window; the encoder splits the packets.
        let chunk_size = (conn.remote_max_packet_length() as usize)
            .saturating_sub(6)
            .max(1);

        let mut response = Response::new(ResponseKind::Success);
        response.push_header(Header::Length(data.len() as u32));
        let mut chunks: Vec<&[u8]> = data.chunks(chunk_size).collect();
        let last = chunks.pop().unwrap_or(&[]);
        for chunk in chunks {
            response.push_header(Header::Body(chunk.to_vec()));
        }
        response.push_header(Header::EndOfBody(last.to_vec()));

        conn.send_response(response)
    }

    fn put(&mut self, conn: &mut Connection<'_>, request: Request) -> Result<(), Error> {
        let object = conn.receive_object(request)?;

        let Some(name) = object.name().map(str::to_string) else {
            return conn.send_response(Response::new(ResponseKind::BadRequest));
        };
        let key = self.key(&name);

        // A PUT with neither body nor Length is a delete.
        let has_length = object
            .headers
            .iter()
            .any(|h| matches!(h, Header::Length(_)));
        if object.body.is_empty() && !has_length {
            self.objects.remove(&key);
        } else {
            self.objects.insert(key, object.body);
        }

        conn.send_response(Response::new(ResponseKind::Success))
    }

    fn set_path(&mut self, conn: &mut Connection<'_>, request: Request) -> Result<(), Error> {
        match resolve_set_path(&request)? {
            PathTarget::Root => self.cwd.clear(),
            PathTarget::Parent => {
                if self.cwd.pop().is_none() {
                    return conn.send_response(Response::new(ResponseKind::NotFound));
                }
            }
            PathTarget::Child { name, .. } => self.cwd.push(name),
        }

        conn.send_response(Response::new(ResponseKind::Success))
    }
}

fn spawn_server(max_packet_length: u16) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind failed");
    let port = listener.local_addr().expect("no local addr").port();

    thread::spawn(move || {
        let mut listener = listener;
        let mut server =
            Server::new(VaultHandler::default()).with_max_packet_length(max_packet_length);
        let _ = server.serve(&mut listener);
    });

    port
}

fn connect(port: u16, client_max: u16) -> Client<TcpStream> {
    let stream = TcpStream::connect(("127.0.0.1", port)).expect("tcp connect failed");
    let mut client = Client::new(stream).with_max_packet_length(client_max);
    client.connect(vec![]).expect("obex connect failed");
    client
}

#[test]
fn test_push_then_fetch_round_trip() {
    let port = spawn_server(0x0400);
    let mut client = connect(port, 0xffff);
    assert_eq!(client.remote_max_packet_length(), 0x0400);

    // 10,000 bytes against the server's 1 KiB window: the client streams
    // the body across multiple PUT round-trips.
    let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    client.put("blob.bin", &data, vec![]).expect("put failed");

    let (headers, body) = client.get(Some("blob.bin"), vec![]).expect("get failed");
    assert_eq!(body, data);
    assert!(headers.contains(&Header::Length(10_000)));

    client.disconnect(vec![]).expect("disconnect failed");
    assert!(!client.is_connected());
}

#[test]
fn test_small_client_window_segments_response() {
    let port = spawn_server(0xffff);

    // A 64 byte receive window forces the server to answer the GET across
    // many CONTINUE chunks, each pulled with a bare GET_FINAL.
    let mut client = connect(port, 64);

    let data = vec![0x5a_u8; 500];
    client.put("big", &data, vec![]).expect("put failed");

    let (_, body) = client.get(Some("big"), vec![]).expect("get failed");
    assert_eq!(body, data);
}

#[test]
fn test_empty_object_round_trip() {
    let port = spawn_server(0x0400);
    let mut client = connect(port, 0xffff);

    client.put("empty", b"", vec![]).expect("put failed");

    let (headers, body) = client.get(Some("empty"), vec![]).expect("get failed");
    assert!(body.is_empty());
    assert!(headers.contains(&Header::Length(0)));
}

#[test]
fn test_set_path_navigation() {
    let port = spawn_server(0x0400);
    let mut client = connect(port, 0xffff);

    client
        .set_path("photos", true, false, vec![])
        .expect("set_path failed");
    client.put("pic", b"jpeg bytes", vec![]).expect("put failed");

    // The object is not visible from the root.
    client.set_path("", false, false, vec![]).expect("reset failed");
    match client.get(Some("pic"), vec![]) {
        Err(Error::Failure(r)) => assert_eq!(*r.kind(), ResponseKind::NotFound),
        v => panic!("expected not-found, got {:?}", v),
    }

    // Back inside the directory it is.
    client
        .set_path("photos", false, false, vec![])
        .expect("set_path failed");
    let (_, body) = client.get(Some("pic"), vec![]).expect("get failed");
    assert_eq!(body, b"jpeg bytes");

    // And up one level it is gone again.
    client.set_path("", false, true, vec![]).expect("to-parent failed");
    assert!(client.get(Some("pic"), vec![]).is_err());
}

#[test]
fn test_delete_removes_object() {
    let port = spawn_server(0x0400);
    let mut client = connect(port, 0xffff);

    client.put("doomed", b"payload", vec![]).expect("put failed");
    client.delete("doomed", vec![]).expect("delete failed");

    match client.get(Some("doomed"), vec![]) {
        Err(Error::Failure(r)) => assert_eq!(*r.kind(), ResponseKind::NotFound),
        v => panic!("expected not-found, got {:?}", v),
    }
}

#[test]
fn test_unsupported_operation_is_forbidden() {
    let port = spawn_server(0x0400);
    let mut client = connect(port, 0xffff);

    // The handler serves no ABORT; the engine rejects it.
    match client.abort(vec![]) {
        Err(Error::Failure(r)) => assert_eq!(*r.kind(), ResponseKind::Forbidden),
        v => panic!("expected forbidden, got {:?}", v),
    }
}
