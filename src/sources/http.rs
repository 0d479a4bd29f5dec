use std::{io, time::Duration};

use futures::TryStreamExt;
use reqwest::header::RANGE;
use tokio_util::io::StreamReader;
use tracing::debug;

use crate::{
    common::errors::{PlayerError, PlayerResult},
    encoder::InputStream,
};

/// Client for audio bodies. A stream is read at playback speed and may sit
/// idle through a pause, so only connecting is bounded in time.
pub fn stream_client(user_agent: &str, connect_timeout: Duration) -> PlayerResult<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(user_agent)
        .connect_timeout(connect_timeout)
        .build()?)
}

/// Opens `url` as a streaming body suitable for the transcoder's stdin.
pub async fn open_stream(client: &reqwest::Client, url: &str) -> PlayerResult<InputStream> {
    let res = client.get(url).header(RANGE, "bytes=0-").send().await?;

    let status = res.status();
    if !status.is_success() {
        return Err(PlayerError::Platform(format!(
            "stream request returned {}",
            status
        )));
    }

    debug!(
        content_length = ?res.content_length(),
        content_type = ?res.headers().get(reqwest::header::CONTENT_TYPE),
        "Opened remote stream"
    );

    let body = res.bytes_stream().map_err(io::Error::other);
    Ok(Box::new(StreamReader::new(Box::pin(body))))
}
