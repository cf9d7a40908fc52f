use std::convert::Infallible;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use warp::{Filter, Rejection, Reply};

use crate::server::Server;

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    rooms: usize,
    timestamp: String,
}

/// `GET /ws` upgrades to the room protocol; `GET /health` reports liveness.
pub fn routes(
    server: Arc<Server>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let ws_route = warp::path("ws")
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_server(server.clone()))
        .map(|ws: warp::ws::Ws, server: Arc<Server>| {
            ws.on_upgrade(move |socket| async move {
                server.handle_connection(socket).await;
            })
        });

    let health_route = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_server(server))
        .and_then(health);

    ws_route.or(health_route).with(
        warp::cors()
            .allow_any_origin()
            .allow_methods(vec!["GET", "POST"]),
    )
}

fn with_server(
    server: Arc<Server>,
) -> impl Filter<Extract = (Arc<Server>,), Error = Infallible> + Clone {
    warp::any().map(move || server.clone())
}

async fn health(server: Arc<Server>) -> Result<impl Reply, Infallible> {
    Ok(warp::reply::json(&Health {
        status: "OK",
        rooms: server.registry().room_count().await,
        timestamp: Utc::now().to_rfc3339(),
    }))
}
