// ============================================
// main.rs
// ============================================
mod bot;
mod config;
mod error;
mod friends;
mod hub;
mod matchmaker;
mod message;
mod persona;
mod pool;
mod presence;
mod profile;
mod session;
mod websocket;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;

use tracing_subscriber::EnvFilter;
use warp::http::StatusCode;
use warp::{Filter, Reply};

use config::Config;
use friends::FriendStore;
use hub::{Hub, SharedHub};
use websocket::{client_connected, identity};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let config = Config::load()?;
    init_tracing(&config.general.log_level);

    let store = FriendStore::open(Path::new(&config.storage.db_path))?;
    let responder = bot::responder_from_config(&config.bot)?;
    let hub = Hub::new(&config, store, responder);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let (addr, server) = warp::serve(routes(hub, &config.server.static_dir))
        .bind_with_graceful_shutdown(addr, async {
            tokio::signal::ctrl_c().await.ok();
        });

    tracing::info!(
        %addr,
        version = env!("CARGO_PKG_VERSION"),
        test_mode = config.session.test_mode,
        "Froopy Chat listening"
    );
    server.await;
    tracing::info!("shut down");
    Ok(())
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn routes(
    hub: SharedHub,
    static_dir: &str,
) -> impl Filter<Extract = (warp::reply::Response,), Error = warp::Rejection> + Clone + Send + Sync + 'static {
    let chat = warp::path("ws")
        .and(warp::path::end())
        .and(warp::ws())
        .and(warp::query::<HashMap<String, String>>())
        .and(with_hub(hub))
        .map(|ws: warp::ws::Ws, qs: HashMap<String, String>, hub: SharedHub| match identity(&qs) {
            Ok(profile) => ws
                .on_upgrade(move |socket| client_connected(socket, hub, profile))
                .into_response(),
            Err(e) => warp::reply::with_status(e.to_string(), StatusCode::BAD_REQUEST).into_response(),
        });

    let health = warp::path("health")
        .and(warp::path::end())
        .map(|| "ok".into_response());

    let static_files = warp::fs::dir(static_dir.to_string()).map(|file: warp::fs::File| file.into_response());

    chat.or(health).unify().or(static_files).unify()
}

fn with_hub(hub: SharedHub) -> impl Filter<Extract = (SharedHub,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || hub.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::ScriptedResponder;
    use crate::matchmaker::Matchmaker;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::Value;

    fn test_routes() -> impl Filter<Extract = (warp::reply::Response,), Error = warp::Rejection> + Clone + Send + Sync + 'static {
        let config = Config::default();
        let hub = Hub::with_matchmaker(
            &config,
            Matchmaker::with_rng(&config, StdRng::seed_from_u64(11)),
            FriendStore::open_in_memory().unwrap(),
            Box::new(ScriptedResponder),
        );
        routes(hub, "static")
    }

    async fn recv_json(client: &mut warp::test::WsClient) -> Value {
        let msg = client.recv().await.expect("frame");
        serde_json::from_str(msg.to_str().expect("text frame")).expect("json")
    }

    #[tokio::test]
    async fn health_is_ok() {
        let res = warp::test::request().path("/health").reply(&test_routes()).await;
        assert_eq!(res.status(), 200);
        assert_eq!(res.body(), "ok");
    }

    #[tokio::test]
    async fn upgrade_without_gender_is_rejected() {
        let res = warp::test::request()
            .path("/ws?user=ana")
            .header("connection", "upgrade")
            .header("upgrade", "websocket")
            .header("sec-websocket-version", "13")
            .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
            .reply(&test_routes())
            .await;
        assert_eq!(res.status(), 400);
    }

    #[tokio::test]
    async fn two_sockets_get_paired_and_chat() {
        let routes = test_routes();
        let mut ana = warp::test::ws()
            .path("/ws?user=ana&name=Ana&gender=female")
            .handshake(routes.clone())
            .await
            .expect("handshake");
        assert_eq!(recv_json(&mut ana).await["type"], "connected");

        let mut ben = warp::test::ws()
            .path("/ws?user=ben&name=Ben&gender=male&age=25")
            .handshake(routes.clone())
            .await
            .expect("handshake");
        assert_eq!(recv_json(&mut ben).await["type"], "connected");

        ana.send_text(r#"{"type":"find_match","preference":"male"}"#).await;
        assert_eq!(recv_json(&mut ana).await["type"], "searching");

        ben.send_text(r#"{"type":"find_match"}"#).await;
        let found = recv_json(&mut ben).await;
        assert_eq!(found["type"], "match_found");
        assert_eq!(found["partner"]["name"], "Ana");
        let found = recv_json(&mut ana).await;
        assert_eq!(found["partner"]["age"], 25);

        ben.send_text(r#"{"type":"send_message","text":"hi Ana"}"#).await;
        let msg = recv_json(&mut ana).await;
        assert_eq!(msg["type"], "message");
        assert_eq!(msg["message"]["from"], "Ben");
        assert_eq!(msg["message"]["text"], "hi Ana");
        assert_eq!(msg["mine"], false);
        let echo = recv_json(&mut ben).await;
        assert_eq!(echo["mine"], true);

        ana.send_text("not json").await;
        let err = recv_json(&mut ana).await;
        assert_eq!(err["type"], "error");
        assert_eq!(err["code"], "bad_request");
    }

    #[tokio::test]
    async fn binary_frame_is_rejected_and_socket_stays_open() {
        let routes = test_routes();
        let mut ana = warp::test::ws()
            .path("/ws?user=ana&gender=female")
            .handshake(routes)
            .await
            .expect("handshake");
        assert_eq!(recv_json(&mut ana).await["type"], "connected");

        ana.send(warp::ws::Message::binary(vec![1u8, 2, 3])).await;
        let err = recv_json(&mut ana).await;
        assert_eq!(err["type"], "error");
        assert_eq!(err["code"], "bad_request");

        ana.send_text(r#"{"type":"find_match"}"#).await;
        assert_eq!(recv_json(&mut ana).await["type"], "searching");
    }
}
