use std::{
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode},
};
use guild_player::{
    client::PlayerClient,
    common::{
        errors::{PlayerError, PlayerResult},
        types::{ChannelId, GuildId},
    },
    configs::{EncoderConfig, PlayerConfig},
    encoder::{EncodeOptions, InputStream, TranscodeSession},
    handler::CommandHandler,
    player::{LogMessenger, Notifier, PlaybackContext, PlayerManager, TrackData},
    sources::{Platform, TrackFetcher},
    transport::{self, AppState},
    voice::{VoiceConnection, VoiceRegistry, VoiceTransport},
};
use pretty_assertions::assert_eq;
use reqwest::Url;
use serde_json::{Value, json};
use tokio::io::{AsyncRead, ReadBuf};
use tower::ServiceExt;

const PASSWORD: &str = "hunter2";

/// Audio source that never yields, so a started track stays current until
/// skipped or stopped.
struct Endless;

impl AsyncRead for Endless {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}

fn track_data(id: &str, secs: u64) -> TrackData {
    TrackData {
        name: format!("Track {}", id),
        url: format!("https://youtu.be/{}", id),
        play_query: format!("youtube:{}", id),
        thumbnail: String::new(),
        duration: Duration::from_secs(secs),
    }
}

struct StubPlatform;

#[async_trait]
impl Platform for StubPlatform {
    fn name(&self) -> &'static str {
        "youtube"
    }

    fn handles_host(&self, host: &str) -> bool {
        host == "youtu.be"
    }

    async fn search_string(&self, query: &str) -> PlayerResult<TrackData> {
        if query == "boom" {
            panic!("search backend exploded");
        }
        Ok(track_data("abc", 180))
    }

    async fn search_url(&self, url: &Url) -> PlayerResult<Vec<TrackData>> {
        match url.path().trim_start_matches('/') {
            "not-a-real-id" => Err(PlayerError::TrackSearchFailed),
            id => Ok(vec![track_data(id, 200)]),
        }
    }

    async fn fetch(&self, _id: &str) -> PlayerResult<InputStream> {
        Ok(Box::new(Endless))
    }
}

struct StubConnection {
    frames: flume::Sender<Vec<u8>>,
}

#[async_trait]
impl VoiceConnection for StubConnection {
    fn frames(&self) -> &flume::Sender<Vec<u8>> {
        &self.frames
    }

    async fn disconnect(self: Box<Self>) {}
}

struct StubVoice;

#[async_trait]
impl VoiceTransport for StubVoice {
    async fn join(
        &self,
        _guild_id: GuildId,
        _channel_id: ChannelId,
    ) -> PlayerResult<Box<dyn VoiceConnection>> {
        let (frames, rx) = flume::bounded(8);
        tokio::spawn(async move { while rx.recv_async().await.is_ok() {} });
        Ok(Box::new(StubConnection { frames }))
    }
}

fn passthrough(input: InputStream, opts: EncodeOptions) -> TranscodeSession {
    TranscodeSession::from_container(input, opts.buffered_frames)
}

fn app() -> Router {
    let fetcher = Arc::new(TrackFetcher::with_platforms(
        Arc::new(StubPlatform),
        Vec::new(),
        Vec::new(),
    ));
    let ctx = Arc::new(PlaybackContext {
        fetcher: fetcher.clone(),
        voice: Arc::new(StubVoice),
        notifier: Notifier::spawn(Arc::new(LogMessenger)),
        player: PlayerConfig {
            max_pool_tries: 0,
            pool_try_delay_ms: 10,
            queue_end_delay_ms: 0,
            ..PlayerConfig::default()
        },
        encoder: EncoderConfig::default(),
        open_session: passthrough,
    });
    let manager = Arc::new(PlayerManager::new(ctx));
    let state = Arc::new(AppState {
        handler: CommandHandler::new(manager, fetcher, Arc::new(VoiceRegistry::new())),
        password: PASSWORD.to_string(),
    });
    transport::router(state)
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", PASSWORD);
    let body = match body {
        Some(v) => {
            req = req.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };

    let res = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
    let status = res.status();
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

async fn wait_for_current(app: &Router, guild: u64, track_id: &str) {
    for _ in 0..200 {
        let (status, body) = call(app, Method::GET, &format!("/guild/{guild}/track"), None).await;
        if status == StatusCode::OK && body["data"]["id"] == track_id {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("guild {guild} never started playing {track_id}");
}

async fn wait_for_no_player(app: &Router, guild: u64) {
    for _ in 0..200 {
        let (status, _) = call(app, Method::GET, &format!("/guild/{guild}/track"), None).await;
        if status == StatusCode::NOT_FOUND {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("guild {guild} player was never removed");
}

fn add_body(ids: &[&str]) -> Value {
    let data: Vec<TrackData> = ids.iter().map(|id| track_data(id, 180)).collect();
    json!({
        "user_id": "1",
        "channel_id": "2",
        "text_channel_id": "3",
        "data": data,
    })
}

#[tokio::test]
async fn test_requests_without_password_are_rejected() {
    let app = app();

    let res = app
        .clone()
        .oneshot(Request::get("/version").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body, json!({ "error": "unauthorized", "error_code": 0 }));

    let res = app
        .clone()
        .oneshot(
            Request::get("/version")
                .header("authorization", "wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_version() {
    let app = app();
    let res = app
        .clone()
        .oneshot(
            Request::get("/version")
                .header("authorization", PASSWORD)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        res.headers()["guild-player-version"],
        env!("CARGO_PKG_VERSION")
    );

    let (_, body) = call(&app, Method::GET, "/version", None).await;
    assert_eq!(body["data"]["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["data"]["active_players"], 0);
}

#[tokio::test]
async fn test_search_error_codes() {
    let app = app();

    let (status, body) = call(&app, Method::GET, "/track/search?query=never%20gonna", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["play_query"], "youtube:abc");

    let (status, body) = call(
        &app,
        Method::GET,
        "/track/search?query=https://youtu.be/not-a-real-id",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_code"], 3);

    let (status, body) = call(
        &app,
        Method::GET,
        "/track/search?query=https://soundcloud.com/artist/song",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_code"], 7);

    let (status, body) = call(&app, Method::GET, "/track/search?query=", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], 0);
}

#[tokio::test]
async fn test_handler_panic_becomes_internal_error() {
    let app = app();
    let (status, body) = call(&app, Method::GET, "/track/search?query=boom", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body,
        json!({ "error": "internal server error", "error_code": 0 })
    );

    // the server keeps serving
    let (status, _) = call(&app, Method::GET, "/version", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_idle_guild() {
    let app = app();

    let (status, body) = call(&app, Method::GET, "/guild/1/track", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_code"], 5);

    let (status, body) = call(&app, Method::GET, "/guild/1/tracks", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "0 tracks in queue");
    assert_eq!(body["data"], json!([]));

    let (status, body) = call(&app, Method::PUT, "/guild/1/skip", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_code"], 5);

    let (status, _) = call(&app, Method::GET, "/guild/not-a-number/track", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_add_track_validation() {
    let app = app();
    let mut body = add_body(&["a"]);
    body["user_id"] = json!("0");

    let (status, res) = call(&app, Method::POST, "/guild/1/track", Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(res["error_code"], 0);

    let (status, _) = call(
        &app,
        Method::POST,
        "/guild/1/track",
        Some(json!({ "user_id": "1" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_queue_lifecycle() {
    let app = app();
    let guild = 42;

    let (status, body) = call(
        &app,
        Method::POST,
        &format!("/guild/{guild}/track"),
        Some(add_body(&["a", "b", "c"])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "added 3 tracks to queue");
    let ids: Vec<String> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["id"].as_str().unwrap().to_string())
        .collect();

    wait_for_current(&app, guild, &ids[0]).await;

    let (_, body) = call(&app, Method::GET, &format!("/guild/{guild}/tracks"), None).await;
    assert_eq!(body["message"], "2 tracks in queue");
    let (_, body) = call(
        &app,
        Method::GET,
        &format!("/guild/{guild}/tracks?offset=1&limit=5"),
        None,
    )
    .await;
    assert_eq!(body["data"][0]["id"], ids[2].as_str());

    let (_, body) = call(&app, Method::GET, &format!("/guild/{guild}/queue"), None).await;
    assert_eq!(body["data"]["total_size"], 2);
    assert_eq!(body["data"]["total_duration"], 360_000);
    assert_eq!(body["data"]["playing"]["id"], ids[0].as_str());

    let (_, body) = call(&app, Method::PUT, &format!("/guild/{guild}/pause"), None).await;
    assert_eq!(body["message"], "paused queue");
    assert_eq!(body["changed"], true);
    let (_, body) = call(&app, Method::PUT, &format!("/guild/{guild}/pause"), None).await;
    assert_eq!(body["changed"], false);
    let (_, body) = call(&app, Method::PUT, &format!("/guild/{guild}/unpause"), None).await;
    assert_eq!(body["message"], "unpaused queue");
    assert_eq!(body["changed"], true);

    let (status, body) = call(
        &app,
        Method::PUT,
        &format!("/guild/{guild}/volume?volume=300"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], 0);
    let (_, body) = call(
        &app,
        Method::PUT,
        &format!("/guild/{guild}/volume?volume=50"),
        None,
    )
    .await;
    assert_eq!(body["message"], "volume set from 100 to 50");

    let (_, body) = call(
        &app,
        Method::PUT,
        &format!("/guild/{guild}/loop?enable=true"),
        None,
    )
    .await;
    assert_eq!(body["changed"], true);

    let (status, body) = call(
        &app,
        Method::DELETE,
        &format!("/guild/{guild}/track/{}", ids[2]),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "track removed");
    let (status, body) = call(
        &app,
        Method::DELETE,
        &format!("/guild/{guild}/track/{}", ids[2]),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_code"], 4);

    let (status, body) = call(
        &app,
        Method::DELETE,
        &format!("/guild/{guild}/queue/7"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_code"], 4);

    let (_, body) = call(&app, Method::PUT, &format!("/guild/{guild}/skip"), None).await;
    assert_eq!(body["message"], "skipped track");
    assert_eq!(body["data"]["id"], ids[0].as_str());
    wait_for_current(&app, guild, &ids[1]).await;

    let (_, body) = call(&app, Method::DELETE, &format!("/guild/{guild}"), None).await;
    assert_eq!(body["message"], "queue stopped");
    wait_for_no_player(&app, guild).await;
}

#[tokio::test]
async fn test_voice_credentials_are_accepted() {
    let app = app();
    let (status, body) = call(
        &app,
        Method::PUT,
        "/guild/9/voice",
        Some(json!({
            "session_id": "s",
            "token": "t",
            "endpoint": "voice.example.test",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["changed"], true);
}

#[tokio::test]
async fn test_client_maps_error_codes() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(axum::serve(listener, app()).into_future());
    let base = format!("http://{}", addr);

    let client = PlayerClient::new(&base, Some(PASSWORD.to_string())).unwrap();
    let version = client.version().await.unwrap();
    assert_eq!(version.data.unwrap().version, env!("CARGO_PKG_VERSION"));

    assert!(matches!(
        client.search("https://youtu.be/not-a-real-id").await,
        Err(PlayerError::TrackSearchFailed)
    ));
    assert!(matches!(
        client.current(GuildId(5)).await,
        Err(PlayerError::NoActivePlayer)
    ));
    assert!(matches!(
        client.search("https://soundcloud.com/x").await,
        Err(PlayerError::UnsupportedPlatform(_))
    ));

    let queue = client.tracks(GuildId(5), 0, Some(10)).await.unwrap();
    assert!(queue.data.unwrap().is_empty());

    let anonymous = PlayerClient::new(&base, None).unwrap();
    assert!(matches!(
        anonymous.version().await,
        Err(PlayerError::Unauthorized)
    ));
}
