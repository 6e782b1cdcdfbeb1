//! FTP-backed remote source
//!
//! suppaftp's blocking client is driven from `spawn_blocking`; the control
//! connection is moved into each blocking task and handed back afterwards so
//! one login serves a whole run.
//!
//! # Examples
//!
//! ```rust,ignore
//! use plantfeed_server::ingest::source::{FtpSource, RemoteSource};
//!
//! let source = FtpSource::new(config.source.clone());
//! let mut session = source.connect("/reports").await?;
//! let files = session.list().await?;
//! let body = session.download(&files[0].name).await?;
//! session.close().await;
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs};
use suppaftp::FtpStream;
use tracing::{debug, info, warn};

use super::{RemoteFile, RemoteSession, RemoteSource};
use crate::ingest::config::FtpSourceConfig;
use crate::ingest::error::{IngestError, IngestResult};

pub struct FtpSource {
    config: FtpSourceConfig,
}

impl FtpSource {
    pub fn new(config: FtpSourceConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RemoteSource for FtpSource {
    async fn connect(&self, remote_path: &str) -> IngestResult<Box<dyn RemoteSession>> {
        let max_attempts = self.config.max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            debug!(
                host = %self.config.host,
                remote_path = %remote_path,
                attempt,
                max_attempts,
                "Connecting to FTP server"
            );

            let config = self.config.clone();
            let path = remote_path.to_string();
            match tokio::task::spawn_blocking(move || open_stream(&config, &path)).await {
                Ok(Ok(stream)) => {
                    info!(host = %self.config.host, remote_path = %remote_path, "FTP session established");
                    return Ok(Box::new(FtpSession {
                        stream: Some(stream),
                        remote_path: remote_path.to_string(),
                    }));
                },
                Ok(Err(e)) => {
                    last_error = e;
                    if attempt < max_attempts {
                        warn!(
                            attempt,
                            max_attempts,
                            error = %last_error,
                            retry_in_secs = self.config.retry_delay_secs,
                            "FTP connection attempt failed"
                        );
                        tokio::time::sleep(self.config.retry_delay()).await;
                    }
                },
                Err(e) => {
                    return Err(IngestError::Internal(format!("FTP connect task panicked: {}", e)));
                },
            }
        }

        Err(IngestError::ConnectionFailed(format!(
            "{} unreachable after {} attempts: {}",
            self.config.address(),
            max_attempts,
            last_error
        )))
    }

    fn file_location(&self, remote_path: &str, file_name: &str) -> String {
        self.config.file_url(remote_path, file_name)
    }
}

/// One acquisition attempt: connect, log in, switch to binary and change
/// directory. A failed directory change fails the whole attempt.
fn open_stream(config: &FtpSourceConfig, remote_path: &str) -> Result<FtpStream, String> {
    let addr = resolve(config)?;
    let mut stream = FtpStream::connect_timeout(addr, config.timeout())
        .map_err(|e| format!("connect failed: {}", e))?;

    if let Err(e) = stream.get_ref().set_read_timeout(Some(config.timeout())) {
        warn!(error = %e, "Could not set FTP read timeout");
    }
    stream.set_mode(suppaftp::Mode::Passive);

    stream
        .login(&config.username, &config.password)
        .map_err(|e| format!("login failed: {}", e))?;
    stream
        .transfer_type(suppaftp::types::FileType::Binary)
        .map_err(|e| format!("could not switch to binary mode: {}", e))?;

    if !remote_path.is_empty() {
        if let Err(e) = stream.cwd(remote_path) {
            let _ = stream.quit();
            return Err(format!("directory change failed for '{}': {}", remote_path, e));
        }
    }

    Ok(stream)
}

fn resolve(config: &FtpSourceConfig) -> Result<SocketAddr, String> {
    config
        .address()
        .to_socket_addrs()
        .map_err(|e| format!("could not resolve {}: {}", config.address(), e))?
        .next()
        .ok_or_else(|| format!("{} resolved to no addresses", config.address()))
}

pub struct FtpSession {
    stream: Option<FtpStream>,
    remote_path: String,
}

impl FtpSession {
    /// Run `op` on the control connection in a blocking task and put the
    /// connection back afterwards.
    async fn with_stream<T, F>(&mut self, op: F) -> Result<T, String>
    where
        T: Send + 'static,
        F: FnOnce(&mut FtpStream) -> Result<T, String> + Send + 'static,
    {
        let mut stream = self
            .stream
            .take()
            .ok_or_else(|| "FTP session is no longer usable".to_string())?;

        let (stream, result) = tokio::task::spawn_blocking(move || {
            let result = op(&mut stream);
            (stream, result)
        })
        .await
        .map_err(|e| format!("FTP task panicked: {}", e))?;

        self.stream = Some(stream);
        result
    }
}

#[async_trait]
impl RemoteSession for FtpSession {
    async fn list(&mut self) -> IngestResult<Vec<RemoteFile>> {
        let (names, lines) = self
            .with_stream(|stream| {
                let names = stream.nlst(None).map_err(|e| format!("NLST failed: {}", e))?;
                // Details are optional; some servers refuse LIST.
                let lines = stream.list(None).unwrap_or_default();
                Ok((names, lines))
            })
            .await
            .map_err(|e| IngestError::ConnectionFailed(format!("listing '{}': {}", self.remote_path, e)))?;

        let files = merge_listing(&names, &lines);
        debug!(remote_path = %self.remote_path, count = files.len(), "Listed remote directory");
        Ok(files)
    }

    async fn download(&mut self, file_name: &str) -> IngestResult<Vec<u8>> {
        let name = file_name.to_string();
        let data = self
            .with_stream(move |stream| {
                stream
                    .retr_as_buffer(&name)
                    .map(|cursor| cursor.into_inner())
                    .map_err(|e| e.to_string())
            })
            .await
            .map_err(|reason| IngestError::DownloadFailed {
                file: file_name.to_string(),
                reason,
            })?;

        debug!(file = %file_name, bytes = data.len(), "Downloaded remote file");
        Ok(data)
    }

    async fn close(mut self: Box<Self>) {
        let Some(mut stream) = self.stream.take() else {
            return;
        };
        let outcome = tokio::task::spawn_blocking(move || stream.quit()).await;
        match outcome {
            Ok(Ok(())) => debug!("FTP session closed"),
            Ok(Err(e)) => warn!(error = %e, "Failed to quit FTP session gracefully"),
            Err(e) => warn!(error = %e, "FTP quit task panicked"),
        }
    }
}

/// Bare file name; some servers answer NLST with a path prefix.
fn base_name(entry: &str) -> &str {
    entry.trim().rsplit('/').next().unwrap_or(entry)
}

/// Combine NLST names with whatever size/date details LIST produced.
fn merge_listing(names: &[String], list_lines: &[String]) -> Vec<RemoteFile> {
    let details: HashMap<String, suppaftp::list::File> = list_lines
        .iter()
        .filter_map(|line| line.parse::<suppaftp::list::File>().ok())
        .filter(|entry| entry.is_file())
        .map(|entry| (entry.name().to_string(), entry))
        .collect();

    names
        .iter()
        .map(|raw| base_name(raw))
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .map(|name| match details.get(name) {
            Some(entry) => RemoteFile {
                name: name.to_string(),
                size: Some(entry.size() as u64),
                modified_at: Some(DateTime::<Utc>::from(entry.modified())),
            },
            None => RemoteFile::named(name),
        })
        .collect()
}
