use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use stream_sync::config::{GlobalConfig, VenueConfig};
use stream_sync::{
    BinanceNormalizer, ConnectionId, HmacCredentials, RestClient, SessionManager, SyncEngine,
    SyncError, Update, WsClient, WsTransport, load_config, load_default_config,
};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

type Engine = SyncEngine<RestClient, WsTransport>;

const VIEW_DEPTH: usize = 20;
const RESYNC_DELAY: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("stream_sync=info".parse()?))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => load_config(&path).with_context(|| format!("loading {}", path))?,
        None => load_default_config()?,
    };
    config.validate()?;

    tracing::info!("Starting stream sync for {} venue(s)...", config.enabled_venues().len());

    let transport = Arc::new(WsTransport::new());
    for venue in config.enabled_venues() {
        start_venue(venue, &config.global, &transport)
            .await
            .with_context(|| format!("starting venue {} ({})", venue.id, venue.name))?;
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    Ok(())
}

async fn start_venue(
    venue: &VenueConfig,
    global: &GlobalConfig,
    transport: &Arc<WsTransport>,
) -> anyhow::Result<()> {
    let rest = if venue.is_futures() {
        RestClient::futures(venue.rest_url.as_str())
    } else {
        RestClient::new(venue.rest_url.as_str())
    };
    let normalizer = if venue.is_futures() {
        BinanceNormalizer::futures()
    } else {
        BinanceNormalizer::spot()
    };

    let mut engine = SyncEngine::new(
        venue.engine_config(global),
        Arc::new(rest.clone()),
        Arc::clone(transport),
        Arc::new(normalizer),
    );
    let session = match credentials(venue)? {
        Some(credentials) => {
            let session = Arc::new(SessionManager::new(
                global.session.session_config(),
                Arc::new(rest),
                Arc::new(credentials),
            ));
            engine = engine.with_session(Arc::clone(&session));
            Some(session)
        }
        None => None,
    };
    let engine = Arc::new(engine);
    engine.spawn_watchdog();

    let market = venue.connection_id();
    open(&engine, transport, &market, &venue.ws_url).await?;
    for symbol in &venue.symbols {
        tokio::spawn(log_order_book(Arc::clone(&engine), market.clone(), symbol.clone()));
    }

    if let Some(session) = session {
        let user = ConnectionId::new(venue.id.as_str(), "user");
        open_user_stream(&engine, transport, &session, &user, &venue.ws_url).await?;
        session.spawn_keepalive();
        tokio::spawn(run_user_stream(
            Arc::clone(&engine),
            Arc::clone(transport),
            session,
            user,
            venue.ws_url.clone(),
        ));
    }

    Ok(())
}

fn credentials(venue: &VenueConfig) -> anyhow::Result<Option<HmacCredentials>> {
    let (Some(key_env), Some(secret_env)) = (&venue.api_key_env, &venue.api_secret_env) else {
        return Ok(None);
    };
    let (Ok(api_key), Ok(secret)) = (std::env::var(key_env), std::env::var(secret_env)) else {
        tracing::warn!("{}: {} / {} not set, account streams disabled", venue.id, key_env, secret_env);
        return Ok(None);
    };
    Ok(Some(HmacCredentials::new(api_key, &secret)?))
}

async fn open(
    engine: &Arc<Engine>,
    transport: &WsTransport,
    conn: &ConnectionId,
    url: &str,
) -> anyhow::Result<()> {
    engine.connect(conn.clone());
    let events = transport.open(conn, &WsClient::new(url)).await?;
    engine.on_open(conn)?;
    tokio::spawn(Arc::clone(engine).drive(conn.clone(), events));
    Ok(())
}

/// The user stream URL embeds the listen key, so each new key needs a new socket
async fn open_user_stream(
    engine: &Arc<Engine>,
    transport: &WsTransport,
    session: &SessionManager,
    conn: &ConnectionId,
    ws_url: &str,
) -> anyhow::Result<()> {
    let token = session.ensure_valid().await?;
    let url = format!("{}/{}", ws_url.trim_end_matches('/'), token.value);
    open(engine, transport, conn, &url).await
}

/// Log account updates, reopening the user stream after the session is
/// revoked or the socket drops
async fn run_user_stream(
    engine: Arc<Engine>,
    transport: Arc<WsTransport>,
    session: Arc<SessionManager>,
    conn: ConnectionId,
    ws_url: String,
) {
    loop {
        let error = log_orders(&engine, &conn).await;
        tracing::warn!("{} account stream stopped: {}", conn, error);
        tokio::time::sleep(RESYNC_DELAY).await;

        while let Err(e) = open_user_stream(&engine, &transport, &session, &conn, &ws_url).await {
            tracing::warn!("{} reopening failed: {:#}", conn, e);
            tokio::time::sleep(RESYNC_DELAY).await;
        }
        tracing::info!("{} reopened with a fresh listen key", conn);
    }
}

/// Log top of book on every update, resubscribing after a resync failure
async fn log_order_book(engine: Arc<Engine>, conn: ConnectionId, symbol: String) {
    loop {
        let mut subscription = match engine.watch_order_book(&conn, &symbol, Some(VIEW_DEPTH)).await {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::warn!("{} {}: {}", conn, symbol, e);
                if engine.connection_state(&conn).is_none_or(|state| !state.accepts_subscriptions()) {
                    return;
                }
                tokio::time::sleep(RESYNC_DELAY).await;
                continue;
            }
        };

        loop {
            match subscription.recv().await {
                Ok(Update::OrderBook(book)) => {
                    tracing::info!(
                        "{} {} seq={:?} bid={:?} ask={:?}",
                        conn,
                        book.symbol,
                        book.sequence,
                        book.best_bid().map(|l| l.price),
                        book.best_ask().map(|l| l.price),
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("{} {} resyncing: {}", conn, symbol, e);
                    break;
                }
            }
        }
    }
}

/// Log order updates until the subscription fails
async fn log_orders(engine: &Engine, conn: &ConnectionId) -> SyncError {
    let mut subscription = match engine.watch_orders(conn, None).await {
        Ok(subscription) => subscription,
        Err(e) => return e,
    };
    loop {
        match subscription.recv().await {
            Ok(Update::Orders(orders)) => {
                if let Some(order) = orders.last() {
                    tracing::info!(
                        "{} order {} {} {:?} filled {}",
                        conn,
                        order.id,
                        order.symbol,
                        order.status,
                        order.filled
                    );
                }
            }
            Ok(_) => {}
            Err(e) => return e,
        }
    }
}
