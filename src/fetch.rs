use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::error::{FetchCause, MdError};

pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

pub trait ArchiveFetcher: Send + Sync {
    /// Download `url` into `destination`, replacing any existing file.
    fn fetch(&self, url: &str, destination: &Path) -> Result<(), MdError>;
}

#[derive(Clone)]
pub struct HttpArchiveFetcher {
    client: Client,
}

impl HttpArchiveFetcher {
    pub fn new() -> Result<Self, MdError> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, MdError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("mdbench/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| MdError::Filesystem(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| MdError::Fetch {
                url: String::new(),
                cause: FetchCause::Transport(err.to_string()),
            })?;
        Ok(Self { client })
    }
}

impl ArchiveFetcher for HttpArchiveFetcher {
    fn fetch(&self, url: &str, destination: &Path) -> Result<(), MdError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|err| MdError::Fetch {
                url: url.to_string(),
                cause: classify_request_error(&err),
            })?;
        if !response.status().is_success() {
            return Err(MdError::Fetch {
                url: url.to_string(),
                cause: FetchCause::Status(response.status().as_u16()),
            });
        }

        let mut file = File::create(destination).map_err(|err| {
            MdError::Filesystem(format!("create {}: {err}", destination.display()))
        })?;
        if let Err(err) = copy_body(&mut response, &mut file, url, destination) {
            drop(file);
            if let Err(cleanup) = fs::remove_file(destination) {
                tracing::warn!(
                    path = %destination.display(),
                    "failed to remove partial download: {cleanup}"
                );
            }
            return Err(err);
        }
        Ok(())
    }
}

/// Stream `body` into `file`; read failures are fetch failures, write
/// failures are filesystem failures.
fn copy_body(
    body: &mut impl Read,
    file: &mut File,
    url: &str,
    destination: &Path,
) -> Result<(), MdError> {
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let read = match body.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                let cause = if err.kind() == io::ErrorKind::TimedOut {
                    FetchCause::Timeout
                } else {
                    FetchCause::Transport(err.to_string())
                };
                return Err(MdError::Fetch {
                    url: url.to_string(),
                    cause,
                });
            }
        };
        file.write_all(&buffer[..read]).map_err(|err| {
            MdError::Filesystem(format!("write {}: {err}", destination.display()))
        })?;
    }
    file.flush()
        .map_err(|err| MdError::Filesystem(format!("write {}: {err}", destination.display())))
}

fn classify_request_error(err: &reqwest::Error) -> FetchCause {
    if err.is_timeout() {
        FetchCause::Timeout
    } else if err.is_connect() {
        FetchCause::Connect(err.to_string())
    } else {
        FetchCause::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use assert_matches::assert_matches;

    use super::*;

    struct FailingBody(io::ErrorKind);

    impl Read for FailingBody {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::from(self.0))
        }
    }

    #[test]
    fn body_read_errors_are_fetch_failures() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("body.npz");
        let mut file = File::create(&path).unwrap();

        let reset = copy_body(
            &mut FailingBody(io::ErrorKind::ConnectionReset),
            &mut file,
            "http://archive.test/a.npz",
            &path,
        );
        assert_matches!(
            reset,
            Err(MdError::Fetch { cause: FetchCause::Transport(_), .. })
        );
        let timed_out = copy_body(
            &mut FailingBody(io::ErrorKind::TimedOut),
            &mut file,
            "http://archive.test/a.npz",
            &path,
        );
        assert_matches!(
            timed_out,
            Err(MdError::Fetch { cause: FetchCause::Timeout, .. })
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn full_disk_is_a_filesystem_failure() {
        let path = Path::new("/dev/full");
        let mut file = File::options().write(true).open(path).unwrap();
        let result = copy_body(
            &mut Cursor::new(vec![7u8; 1024]),
            &mut file,
            "http://archive.test/a.npz",
            path,
        );
        assert_matches!(result, Err(MdError::Filesystem(message)) if message.contains("/dev/full"));
    }
}
