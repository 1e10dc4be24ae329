//! Server assembly and the join handshake a fresh process performs before
//! it starts serving (§A.5).

use std::sync::Arc;

use anyhow::Context;
use tower_http::trace::TraceLayer;

use crate::config::Args;
use crate::node::NodeState;
use crate::routes;
use crate::shutdown;

pub async fn run(args: Args) -> anyhow::Result<()> {
    let is_bootstrap = args.is_bootstrap();
    let bootstrap_addr = args.bootstrap_addr();
    let state = NodeState::new(
        args.ip.clone(),
        args.port,
        is_bootstrap,
        bootstrap_addr.clone(),
        args.replication_factor,
        args.consistency.into(),
    );

    if is_bootstrap {
        state.ring.write().await.push(state.addr);
        tracing::info!(id = %state.addr.id, ip = %args.ip, port = args.port, "starting as ring coordinator");
    } else {
        join_ring(&state, bootstrap_addr.expect("checked by is_bootstrap")).await?;
    }

    let app = routes::router(state.clone()).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind((args.ip.as_str(), args.port))
        .await
        .context("binding to port")?;
    tracing::info!(port = args.port, "chord node listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::signal())
        .await
        .context("serving HTTP")?;

    Ok(())
}

/// Asks the bootstrap coordinator to admit this node and installs the
/// neighbor pointers and settings it returns (§4.2).
pub async fn join_ring(state: &Arc<NodeState>, bootstrap_addr: (String, u16)) -> anyhow::Result<()> {
    let url = format!("http://{}:{}/join", bootstrap_addr.0, bootstrap_addr.1);
    let response = state
        .http
        .post(&url)
        .json(&serde_json::json!({"ip": state.addr.ip, "port": state.addr.port}))
        .send()
        .await
        .context("contacting bootstrap coordinator")?
        .error_for_status()
        .context("bootstrap coordinator rejected join")?;

    let body: serde_json::Value = response.json().await.context("parsing join response")?;
    let successor: crate::node::NodeAddress =
        serde_json::from_value(body["successor"].clone()).context("missing successor in join response")?;
    let predecessor: crate::node::NodeAddress =
        serde_json::from_value(body["predecessor"].clone())
            .context("missing predecessor in join response")?;
    state.set_neighbors(successor, predecessor).await;

    if let Some(factor) = body.get("replication_factor").and_then(|v| v.as_u64()) {
        state.config.write().await.replication_factor = factor as u32;
    }
    if let Some(mode) = body
        .get("consistency")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
    {
        state.config.write().await.consistency = mode;
    }

    tracing::info!(id = %state.addr.id, ?successor, ?predecessor, "joined the ring");
    Ok(())
}
