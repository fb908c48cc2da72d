//! read-only warehouses over http(s)

use std::io::Read;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use tracing::debug;

use crate::error::{Error, Result};
use crate::hash::CommitId;

use super::{SiloUri, WareWriter, Warehouse};

const USER_AGENT: &str = concat!("ware-transmat/", env!("CARGO_PKG_VERSION"));
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// `http(s)://` and `http(s)+ca://` warehouses
pub struct HttpWarehouse {
    uri: SiloUri,
    client: Client,
}

impl HttpWarehouse {
    pub fn new(uri: SiloUri) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            // wares can be large, only the connect is bounded
            .timeout(None)
            .build()
            .map_err(|e| Error::WarehouseUnavailable {
                uri: uri.to_string(),
                reason: format!("failed to build http client: {}", e),
            })?;
        Ok(Self { uri, client })
    }

    fn unavailable(&self, reason: impl ToString) -> Error {
        Error::WarehouseUnavailable {
            uri: self.uri.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl Warehouse for HttpWarehouse {
    fn uri(&self) -> &SiloUri {
        &self.uri
    }

    /// any http response at all counts as reachable
    fn ping(&self) -> Result<()> {
        self.client
            .head(self.uri.location())
            .send()
            .map(|_| ())
            .map_err(|e| self.unavailable(e))
    }

    fn open_reader(&self, id: &CommitId) -> Result<Box<dyn Read + Send>> {
        let url = self
            .uri
            .ware_url(id)
            .ok_or_else(|| self.unavailable("not an http warehouse"))?;
        debug!(%url, "fetching ware");

        let response = self.client.get(&url).send().map_err(|e| self.unavailable(e))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::WareNotFound {
                uri: self.uri.to_string(),
                id: id.clone(),
            });
        }
        if !status.is_success() {
            return Err(self.unavailable(format!("GET {} returned {}", url, status)));
        }
        Ok(Box::new(response))
    }

    fn open_writer(&self) -> Result<Box<dyn WareWriter>> {
        Err(Error::ReadOnlyWarehouse(self.uri.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    /// answer up to `conns` requests with a fixed status and body
    fn serve(status: &'static str, body: Vec<u8>, conns: usize) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            for stream in listener.incoming().take(conns) {
                let Ok(mut stream) = stream else { break };
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut request_line = String::new();
                reader.read_line(&mut request_line).unwrap();
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).unwrap() == 0 || line == "\r\n" {
                        break;
                    }
                }
                let head = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    status,
                    body.len()
                );
                stream.write_all(head.as_bytes()).unwrap();
                if request_line.starts_with("GET") {
                    stream.write_all(&body).unwrap();
                }
            }
        });
        format!("127.0.0.1:{}", addr.port())
    }

    fn warehouse(uri: &str) -> HttpWarehouse {
        HttpWarehouse::new(SiloUri::parse(uri).unwrap()).unwrap()
    }

    #[test]
    fn test_unreachable_is_unavailable() {
        let wh = warehouse("http+ca://127.0.0.1:1/wares");
        assert_eq!(wh.ping().unwrap_err().kind(), ErrorKind::WarehouseUnavailable);
        let err = wh.open_reader(&CommitId::parse("abc").unwrap()).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::WarehouseUnavailable);
    }

    #[test]
    fn test_404_is_not_found() {
        let addr = serve("404 Not Found", vec![], 2);
        let wh = warehouse(&format!("http+ca://{}/wares", addr));
        wh.ping().unwrap();
        let err = wh.open_reader(&CommitId::parse("abc").unwrap()).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::WareNotFound);
    }

    #[test]
    fn test_server_error_is_unavailable() {
        let addr = serve("500 Internal Server Error", vec![], 1);
        let wh = warehouse(&format!("http://{}/ware.tgz", addr));
        let err = wh.open_reader(&CommitId::parse("abc").unwrap()).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::WarehouseUnavailable);
    }

    #[test]
    fn test_fetch_body() {
        let addr = serve("200 OK", b"ware bytes".to_vec(), 1);
        let wh = warehouse(&format!("http+ca://{}/wares", addr));
        let mut body = String::new();
        wh.open_reader(&CommitId::parse("abc").unwrap())
            .unwrap()
            .read_to_string(&mut body)
            .unwrap();
        assert_eq!(body, "ware bytes");
    }

    #[test]
    fn test_writes_rejected() {
        let wh = warehouse("https://example.com/ware.tgz");
        let err = wh.open_writer().err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Config);
    }
}
