use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Form, Query, State};
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tracing_subscriber::{EnvFilter, fmt::SubscriberBuilder};

use beach_sand::cache::{TILE_CELLS, TileCoord, TileStore};
use beach_sand::client::Viewport;
use beach_sand::session::{HttpChannel, RemoteChannel, RemoteError, SessionConfig};
use beach_sand::sync::{EditRecord, FlushOutcome, SyncConfig, SyncCoordinator};
use beach_sand::world::World;

const TOKEN: &str = "tok123";

#[derive(Default)]
struct StubState {
    tiles: Mutex<HashMap<(i64, i64), String>>,
    fetches: Mutex<Vec<HashMap<String, String>>>,
    posts: Mutex<Vec<RecordedPost>>,
    reject_writes: AtomicBool,
}

impl StubState {
    fn put_tile(&self, tx: i64, ty: i64, content: String) {
        self.tiles.lock().unwrap().insert((tx, ty), content);
    }

    fn cell(&self, tx: i64, ty: i64, index: usize) -> Option<char> {
        let tiles = self.tiles.lock().unwrap();
        tiles.get(&(tx, ty)).and_then(|content| content.chars().nth(index))
    }
}

#[derive(Debug, Clone)]
struct RecordedPost {
    cookie: String,
    csrf: String,
    referer: String,
    edits: Value,
}

fn init_tracing() {
    let _ = SubscriberBuilder::default()
        .with_test_writer()
        .with_env_filter(EnvFilter::from_default_env())
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}

fn tile_text(prefix: &str) -> String {
    let mut content: String = prefix.chars().take(TILE_CELLS).collect();
    while content.chars().count() < TILE_CELLS {
        content.push(' ');
    }
    content
}

fn build_router(state: Arc<StubState>) -> Router {
    Router::new()
        .route("/", get(bootstrap))
        .route("/lobby", get(fetch).post(post_edits))
        .route("/broken", get(|| async { "{\"0,0\": " }))
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                "{}"
            }),
        )
        .with_state(state)
}

async fn bootstrap() -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    headers.append(
        SET_COOKIE,
        HeaderValue::from_static("sessionid=abc; Path=/; HttpOnly"),
    );
    headers.append(SET_COOKIE, HeaderValue::from_static("csrftoken=tok123; Path=/"));
    (headers, "welcome")
}

async fn fetch(
    State(state): State<Arc<StubState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, StatusCode> {
    let flag = |name: &str| params.get(name).map(String::as_str);
    if flag("fetch") != Some("1") || flag("v") != Some("3") {
        return Err(StatusCode::BAD_REQUEST);
    }
    let bound = |name: &str| {
        params
            .get(name)
            .and_then(|value| value.parse::<i64>().ok())
            .ok_or(StatusCode::BAD_REQUEST)
    };
    let (min_x, min_y) = (bound("min_tileX")?, bound("min_tileY")?);
    let (max_x, max_y) = (bound("max_tileX")?, bound("max_tileY")?);
    state.fetches.lock().unwrap().push(params.clone());

    let tiles = state.tiles.lock().unwrap();
    let mut body = serde_json::Map::new();
    for ty in min_y..=max_y {
        for tx in min_x..=max_x {
            let value = match tiles.get(&(tx, ty)) {
                Some(content) => json!({"content": content, "properties": {"writable": true}}),
                None => Value::Null,
            };
            body.insert(format!("{ty},{tx}"), value);
        }
    }
    Ok(Json(Value::Object(body)))
}

async fn post_edits(
    State(state): State<Arc<StubState>>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> StatusCode {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    let edits = form
        .get("edits")
        .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
        .unwrap_or(Value::Null);
    let post = RecordedPost {
        cookie: header("cookie"),
        csrf: header("x-csrftoken"),
        referer: header("referer"),
        edits: edits.clone(),
    };
    let accepted = post.csrf == TOKEN && !state.reject_writes.load(Ordering::SeqCst);
    state.posts.lock().unwrap().push(post);
    if !accepted {
        return StatusCode::FORBIDDEN;
    }

    let mut tiles = state.tiles.lock().unwrap();
    for edit in edits.as_array().into_iter().flatten() {
        let field = |index: usize| edit[index].as_i64().unwrap_or_default();
        let (ty, tx, row, col) = (field(0), field(1), field(2), field(3));
        let Some(ch) = edit[5].as_str().and_then(|text| text.chars().next()) else {
            return StatusCode::BAD_REQUEST;
        };
        let content = tiles.entry((tx, ty)).or_insert_with(|| tile_text(""));
        let mut cells: Vec<char> = content.chars().collect();
        cells[(row * 16 + col) as usize] = ch;
        *content = cells.into_iter().collect();
    }
    StatusCode::OK
}

async fn start_stub(state: Arc<StubState>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener bind");
    let addr = listener.local_addr().expect("local addr");
    let router = build_router(state);
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("stub server");
    });
    format!("http://{addr}/")
}

fn channel(base: &str, room: &str) -> HttpChannel {
    let config = SessionConfig::new(base, Some(room)).expect("session config");
    HttpChannel::new(config).expect("http channel")
}

fn world_at_origin() -> Arc<World> {
    let mut viewport = Viewport::new(32, 16);
    viewport.jump_to(16, 8);
    Arc::new(World::new(viewport, TileStore::new(), "it"))
}

#[test_timeout::tokio_timeout_test(20)]
async fn fetch_region_sends_bounds_and_decodes_tiles() {
    init_tracing();
    let state = Arc::new(StubState::default());
    state.put_tile(0, 0, tile_text("hello"));
    let base = start_stub(Arc::clone(&state)).await;

    let tiles = channel(&base, "lobby")
        .fetch_region(TileCoord::new(-1, -1), TileCoord::new(1, 1))
        .await
        .expect("fetch region");
    assert_eq!(tiles.len(), 9);

    let origin = tiles
        .iter()
        .find(|(coord, _)| *coord == TileCoord::new(0, 0))
        .map(|(_, tile)| tile)
        .expect("origin tile");
    assert!(origin.content().starts_with("hello "));
    assert_eq!(origin.properties()["writable"], json!(true));
    let corner = tiles
        .iter()
        .find(|(coord, _)| *coord == TileCoord::new(1, 1))
        .map(|(_, tile)| tile)
        .expect("corner tile");
    assert_eq!(corner.content(), tile_text(""));

    let fetches = state.fetches.lock().unwrap();
    assert_eq!(fetches.len(), 1);
    assert_eq!(fetches[0]["min_tileX"], "-1");
    assert_eq!(fetches[0]["min_tileY"], "-1");
    assert_eq!(fetches[0]["max_tileX"], "1");
    assert_eq!(fetches[0]["max_tileY"], "1");
}

#[test_timeout::tokio_timeout_test(20)]
async fn bootstrap_then_flush_posts_form_with_session_headers() {
    init_tracing();
    let state = Arc::new(StubState::default());
    let base = start_stub(Arc::clone(&state)).await;
    let remote = channel(&base, "lobby");

    let credential = remote.bootstrap_session().await.expect("bootstrap");
    assert_eq!(credential.csrf_token(), TOKEN);
    assert_eq!(credential.cookie(), "sessionid=abc; csrftoken=tok123");

    let edits = vec![
        EditRecord::new(5, 5, 'A', 1_000, Arc::from("it")),
        EditRecord::new(-1, -1, 'z', 1_001, Arc::from("it")),
    ];
    remote
        .flush_edits(&credential, &edits)
        .await
        .expect("flush edits");

    let posts = state.posts.lock().unwrap().clone();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].cookie, credential.cookie());
    assert_eq!(posts[0].csrf, TOKEN);
    assert_eq!(posts[0].referer, format!("{base}lobby"));
    assert_eq!(
        posts[0].edits,
        json!([[0, 0, 5, 5, 1000, "A", "it"], [-1, -1, 7, 15, 1001, "z", "it"]])
    );
    assert_eq!(state.cell(0, 0, 85), Some('A'));
    assert_eq!(state.cell(-1, -1, 127), Some('z'));
}

#[test_timeout::tokio_timeout_test(20)]
async fn rejected_write_is_an_auth_failure() {
    init_tracing();
    let state = Arc::new(StubState::default());
    state.reject_writes.store(true, Ordering::SeqCst);
    let base = start_stub(Arc::clone(&state)).await;
    let remote = channel(&base, "lobby");

    let credential = remote.bootstrap_session().await.expect("bootstrap");
    let edit = EditRecord::new(0, 0, 'x', 1, Arc::from("it"));
    let err = remote
        .flush_edits(&credential, &[edit])
        .await
        .expect_err("write should be refused");
    assert!(err.is_auth_rejection(), "unexpected error: {err}");
}

#[test_timeout::tokio_timeout_test(20)]
async fn malformed_and_slow_responses_are_errors() {
    init_tracing();
    let state = Arc::new(StubState::default());
    let base = start_stub(Arc::clone(&state)).await;

    let err = channel(&base, "broken")
        .fetch_region(TileCoord::new(0, 0), TileCoord::new(0, 0))
        .await
        .expect_err("malformed body");
    assert!(matches!(err, RemoteError::Protocol(_)), "unexpected error: {err}");

    let config = SessionConfig::new(&base, Some("slow"))
        .expect("session config")
        .with_request_timeout(Duration::from_millis(200));
    let err = HttpChannel::new(config)
        .expect("http channel")
        .fetch_region(TileCoord::new(0, 0), TileCoord::new(0, 0))
        .await
        .expect_err("slow body");
    assert!(matches!(err, RemoteError::Timeout), "unexpected error: {err}");
}

#[test_timeout::tokio_timeout_test(20)]
async fn typed_edit_reaches_server_and_survives_refresh() {
    init_tracing();
    let state = Arc::new(StubState::default());
    state.put_tile(0, 0, tile_text("server"));
    let base = start_stub(Arc::clone(&state)).await;

    let world = world_at_origin();
    let coordinator = SyncCoordinator::new(
        Arc::clone(&world),
        Arc::new(channel(&base, "lobby")),
        SyncConfig::default(),
    );

    assert_eq!(coordinator.refresh_once().await.expect("refresh"), 16);
    assert_eq!(world.tiles().read().get_cell(0, 0), Some('s'));

    world.write_char(5, 5, 'A');
    assert_eq!(world.tiles().read().get_cell(5, 5), Some('A'));
    assert_eq!(coordinator.flush_once().await, FlushOutcome::Sent(1));
    assert_eq!(state.cell(0, 0, 85), Some('A'));

    state.put_tile(1, 0, tile_text("Z"));
    coordinator.refresh_once().await.expect("second refresh");
    let tiles = world.tiles().read();
    assert_eq!(tiles.get_cell(5, 5), Some('A'));
    assert_eq!(tiles.get_cell(16, 0), Some('Z'));
}

#[test_timeout::tokio_timeout_test(20)]
async fn dropped_batch_is_reverted_by_next_refresh() {
    init_tracing();
    let state = Arc::new(StubState::default());
    state.put_tile(0, 0, tile_text("server"));
    state.reject_writes.store(true, Ordering::SeqCst);
    let base = start_stub(Arc::clone(&state)).await;

    let world = world_at_origin();
    let config = SyncConfig {
        max_flush_attempts: 1,
        ..SyncConfig::default()
    };
    let coordinator =
        SyncCoordinator::new(Arc::clone(&world), Arc::new(channel(&base, "lobby")), config);

    coordinator.refresh_once().await.expect("refresh");
    world.write_char(0, 0, '#');
    assert_eq!(world.tiles().read().get_cell(0, 0), Some('#'));

    assert_eq!(
        coordinator.flush_once().await,
        FlushOutcome::Dropped {
            dropped: 1,
            requeued: 0
        }
    );
    assert!(world.edits().is_empty());

    coordinator.refresh_once().await.expect("refresh after drop");
    assert_eq!(world.tiles().read().get_cell(0, 0), Some('s'));
}
