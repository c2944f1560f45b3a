use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::thread;

use assert_matches::assert_matches;

use mdbench::error::{FetchCause, MdError};
use mdbench::fetch::{ArchiveFetcher, HttpArchiveFetcher};

/// Answers a single request with `status` and `body`.
fn serve_once(status: &'static str, body: &'static [u8]) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap();
    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut line = String::new();
        while reader.read_line(&mut line).unwrap() > 0 {
            if line == "\r\n" {
                break;
            }
            line.clear();
        }
        let mut stream = stream;
        write!(
            stream,
            "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        )
        .unwrap();
        stream.write_all(body).unwrap();
    });
    format!("http://{address}/aspirin_dft.npz")
}

#[test]
fn successful_download_writes_body() {
    let url = serve_once("200 OK", b"archive-bytes");
    let temp = tempfile::tempdir().unwrap();
    let destination = temp.path().join("aspirin_dft.npz");

    HttpArchiveFetcher::new()
        .unwrap()
        .fetch(&url, &destination)
        .unwrap();
    assert_eq!(std::fs::read(&destination).unwrap(), b"archive-bytes");
}

#[test]
fn not_found_is_a_status_failure() {
    let url = serve_once("404 Not Found", b"missing");
    let temp = tempfile::tempdir().unwrap();
    let destination = temp.path().join("aspirin_dft.npz");

    let result = HttpArchiveFetcher::new().unwrap().fetch(&url, &destination);
    assert_matches!(
        result,
        Err(MdError::Fetch { cause: FetchCause::Status(404), url: failed }) if failed == url
    );
    assert!(!destination.exists());
}

#[test]
fn unreachable_host_is_a_transport_failure() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let temp = tempfile::tempdir().unwrap();
    let url = format!("http://127.0.0.1:{port}/aspirin_dft.npz");

    let result = HttpArchiveFetcher::new()
        .unwrap()
        .fetch(&url, &temp.path().join("aspirin_dft.npz"));
    match result {
        Err(MdError::Fetch { cause, .. }) => {
            assert!(cause.is_transport(), "unexpected cause {cause:?}")
        }
        other => panic!("expected fetch failure, got {other:?}"),
    }
}
