// 🌐 Fetcher - streaming HTTP downloads with progress
// POSTs the BER register form or GETs a plain file, writing the body to disk in small chunks

use crate::config::DownloadForm;
use crate::error::IbsgError;
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Bytes read from the response per write
pub const CHUNK_SIZE: usize = 4096;

pub struct Fetcher {
    client: Client,
    show_progress: bool,
}

impl Fetcher {
    /// Client whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Fetcher {
            client,
            show_progress: true,
        })
    }

    pub fn without_progress(mut self) -> Self {
        self.show_progress = false;
        self
    }

    /// POST the form-encoded body with its headers and cookies, saving the response to `dest`
    pub fn post_form(&self, form: &DownloadForm, dest: &Path) -> Result<u64> {
        let mut headers = build_headers(&form.headers)?;
        if let Some(cookie) = cookie_header(&form.cookies) {
            headers.insert(COOKIE, HeaderValue::from_str(&cookie).context("Invalid cookie value")?);
        }

        let request = self.client.post(&form.url).headers(headers).form(&form.data);
        self.download(request, &form.url, dest)
    }

    /// GET `url`, saving the response to `dest`
    pub fn get(&self, url: &str, dest: &Path) -> Result<u64> {
        self.download(self.client.get(url), url, dest)
    }

    fn download(&self, request: RequestBuilder, url: &str, dest: &Path) -> Result<u64> {
        info!(url, dest = %dest.display(), "downloading");
        let response = request
            .send()
            .with_context(|| format!("Request to {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(IbsgError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            }
            .into());
        }

        let total = progress_total(response.content_length());
        let progress = self.progress_bar(total, dest);

        // Stream beside the destination; only a complete body takes its name
        let part = part_path(dest);
        let result = stream_to_file(response, &part, &progress).and_then(|bytes| {
            fs::rename(&part, dest)
                .with_context(|| format!("Failed to move {:?} to {:?}", part, dest))?;
            Ok(bytes)
        });
        progress.finish_and_clear();

        match result {
            Ok(bytes) => {
                info!(bytes, dest = %dest.display(), "download complete");
                Ok(bytes)
            }
            Err(e) => {
                warn!(part = %part.display(), "download failed, removing partial file");
                let _ = fs::remove_file(&part);
                Err(e)
            }
        }
    }

    fn progress_bar(&self, total: u64, dest: &Path) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let bar = if total > 0 {
            let bar = ProgressBar::new(total);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            bar
        } else {
            ProgressBar::new_spinner()
        };
        bar.set_message(dest.display().to_string());
        bar
    }
}

fn stream_to_file<R: Read>(mut body: R, dest: &Path, progress: &ProgressBar) -> Result<u64> {
    let file = File::create(dest).with_context(|| format!("Failed to create {:?}", dest))?;
    let mut out = BufWriter::new(file);

    let mut buf = [0u8; CHUNK_SIZE];
    let mut written = 0u64;
    loop {
        let n = body.read(&mut buf).context("Failed to read response body")?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])
            .with_context(|| format!("Failed to write {:?}", dest))?;
        written += n as u64;
        progress.inc(n as u64);
    }
    out.flush()?;
    Ok(written)
}

/// `BERPublicsearch.zip` is written as `BERPublicsearch.zip.part` until complete
pub fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

/// Progress total from `Content-Length`; 0 means unknown
pub fn progress_total(content_length: Option<u64>) -> u64 {
    content_length.unwrap_or(0)
}

/// `name=value; name=value`, or nothing when there are no cookies
pub fn cookie_header(cookies: &BTreeMap<String, String>) -> Option<String> {
    if cookies.is_empty() {
        return None;
    }
    Some(
        cookies
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("; "),
    )
}

pub fn build_headers(headers: &BTreeMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("Invalid header name {:?}", name))?;
        let value = HeaderValue::from_str(value)
            .with_context(|| format!("Invalid value for header {:?}", name))?;
        map.insert(name, value);
    }
    Ok(map)
}
