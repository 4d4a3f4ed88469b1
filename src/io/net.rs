use crate::{error::Result, io::progress::emit_download_progress};
use reqwest::blocking::{Client, Response};
use std::{
    fs::{self, File},
    io::{BufWriter, Read, Write},
    path::Path,
    time::Duration,
};
use tracing::{debug, warn};

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

pub fn http_client() -> Result<Client> {
    let client = Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(60 * 60))
        .build()?;
    Ok(client)
}

/// Streams `url` into `dest` through a `.part` file. The partial file is
/// removed if the transfer fails, so `dest` only ever holds a full download.
pub fn download_with_progress(client: &Client, url: &str, dest: &Path) -> Result<()> {
    let part = dest.with_extension("part");

    let resp = client.get(url).send()?.error_for_status()?;
    let total = resp.content_length().unwrap_or(0);
    debug!(%url, total, "download started");

    if let Err(e) = stream_to(resp, &part, total) {
        warn!(%url, error = %e, "download interrupted");
        fs::remove_file(&part).ok();
        return Err(e);
    }

    if dest.exists() {
        fs::remove_file(dest).ok();
    }
    fs::rename(&part, dest)?;
    Ok(())
}

fn stream_to(mut resp: Response, part: &Path, total: u64) -> Result<()> {
    emit_download_progress(0, total);

    let mut out = BufWriter::new(File::create(part)?);
    let mut downloaded: u64 = 0;
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = resp.read(&mut buf)?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
        downloaded += n as u64;
        emit_download_progress(downloaded, total);
    }
    out.flush()?;

    let done = total.max(downloaded);
    emit_download_progress(done, done);
    Ok(())
}
