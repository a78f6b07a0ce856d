use std::{
    error::Error as StdError,
    io,
    time::Duration,
};

use tracing::{debug, trace};

use crate::{
    core::manage::download_with_progress,
    error::ModpackError,
    model::{DownloadTarget, ModpackConfig, USER_AGENT},
};

/// Result of a metadata-only existence check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    Found,
    /// The server definitively said the resource isn't there
    Missing,
}

/// Lightweight existence checks against a remote resource
#[cfg_attr(test, mockall::automock)]
pub trait Probe {
    fn probe(&self, url: &str, timeout: Duration) -> Result<ProbeStatus, ModpackError>;
}

/// Streamed downloads to a local file
pub trait Fetch {
    /// Download `target.url` into `target.destination`, overwriting anything there.
    /// `progress` receives a percentage in `0..=100`.
    ///
    /// Returns the number of bytes written
    fn fetch(
        &self,
        target: &DownloadTarget,
        progress: &mut dyn FnMut(u8),
    ) -> Result<u64, ModpackError>;
}

/// HTTP client used for probing and downloading modpack files
pub struct HttpTransport {
    agent: ureq::Agent,
}

impl HttpTransport {
    pub fn new(config: &ModpackConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .user_agent(USER_AGENT)
            .timeout_connect(config.connect_timeout())
            .timeout(config.download_timeout())
            .build();

        Self { agent }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(&ModpackConfig::default())
    }
}

impl Probe for HttpTransport {
    fn probe(&self, url: &str, timeout: Duration) -> Result<ProbeStatus, ModpackError> {
        trace!("HEAD {url}");
        match self.agent.head(url).timeout(timeout).call() {
            Ok(res) => {
                debug!("{url} exists ({})", res.status());
                Ok(ProbeStatus::Found)
            }
            Err(ureq::Error::Status(404 | 410, _)) => {
                debug!("{url} not found");
                Ok(ProbeStatus::Missing)
            }
            Err(e) => Err(map_error(url, e)),
        }
    }
}

impl Fetch for HttpTransport {
    fn fetch(
        &self,
        target: &DownloadTarget,
        progress: &mut dyn FnMut(u8),
    ) -> Result<u64, ModpackError> {
        debug!("GET {}", target.url);
        let res = self
            .agent
            .get(&target.url)
            .call()
            .map_err(|e| map_error(&target.url, e))?;

        let total = res
            .header("Content-Length")
            .and_then(|len| len.parse::<u64>().ok())
            .or(target.expected_size);
        debug!("Downloading file size: {:?}", total);

        download_with_progress(res.into_reader(), target, total, progress)
    }
}

fn map_error(url: &str, err: ureq::Error) -> ModpackError {
    match err {
        ureq::Error::Status(status, _) => ModpackError::HttpStatus {
            url: url.into(),
            status,
        },
        ureq::Error::Transport(t) => {
            let timed_out = t
                .source()
                .and_then(|s| s.downcast_ref::<io::Error>())
                .is_some_and(is_timeout);
            if timed_out {
                ModpackError::Timeout(url.into())
            } else {
                ModpackError::Transport {
                    url: url.into(),
                    source: Box::new(t),
                }
            }
        }
    }
}

/// Whether an io error raised by a socket read means a deadline passed
pub(crate) fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}
