use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use url::Url;

use crate::error::{Error, Result};
use crate::hash::CommitId;

/// how a warehouse is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    File,
    Http,
    Https,
}

/// parsed warehouse location
///
/// `file://path` and `http(s)://url` name a single ware; the `+ca` variants
/// name a content-addressed directory holding wares at `<location>/<id>`.
#[derive(Clone, PartialEq, Eq)]
pub struct SiloUri {
    raw: String,
    transport: Transport,
    content_addressed: bool,
    /// filesystem path for file transports, full url for http(s)
    location: String,
}

impl SiloUri {
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidUri {
            uri: raw.to_string(),
            reason: reason.to_string(),
        };

        let (scheme, rest) = raw
            .split_once("://")
            .ok_or_else(|| invalid("missing scheme"))?;
        let (base, content_addressed) = match scheme.strip_suffix("+ca") {
            Some(base) => (base, true),
            None => (scheme, false),
        };
        if rest.is_empty() {
            return Err(invalid("empty location"));
        }

        let (transport, location) = match base {
            "file" => (Transport::File, rest.to_string()),
            "http" | "https" => {
                let location = format!("{}://{}", base, rest);
                let url = Url::parse(&location).map_err(|e| invalid(&e.to_string()))?;
                if url.host_str().is_none() {
                    return Err(invalid("missing host"));
                }
                let transport = if base == "http" {
                    Transport::Http
                } else {
                    Transport::Https
                };
                (transport, location)
            }
            _ => return Err(invalid("unsupported scheme")),
        };

        Ok(Self {
            raw: raw.to_string(),
            transport,
            content_addressed,
            location,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn is_content_addressed(&self) -> bool {
        self.content_addressed
    }

    /// filesystem path or url, without the `+ca` marker
    pub fn location(&self) -> &str {
        &self.location
    }

    /// local path of the warehouse itself, for file transports
    pub fn local_path(&self) -> Option<PathBuf> {
        match self.transport {
            Transport::File => Some(PathBuf::from(&self.location)),
            Transport::Http | Transport::Https => None,
        }
    }

    /// local path where ware `id` lives, for file transports
    pub fn ware_path(&self, id: &CommitId) -> Option<PathBuf> {
        let base = self.local_path()?;
        if self.content_addressed {
            Some(base.join(id.as_str()))
        } else {
            Some(base)
        }
    }

    /// url where ware `id` lives, for http transports
    pub fn ware_url(&self, id: &CommitId) -> Option<String> {
        match self.transport {
            Transport::File => None,
            Transport::Http | Transport::Https if self.content_addressed => Some(format!(
                "{}/{}",
                self.location.trim_end_matches('/'),
                id
            )),
            Transport::Http | Transport::Https => Some(self.location.clone()),
        }
    }
}

impl fmt::Display for SiloUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl fmt::Debug for SiloUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SiloUri({})", self.raw)
    }
}

impl FromStr for SiloUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
