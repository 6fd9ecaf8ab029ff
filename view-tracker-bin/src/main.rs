//! View tracker service - counts deduplicated content views over HTTP.

#![deny(missing_docs)]

use conf::Conf;
use http::{Method, Request, Response, StatusCode};
use hyper::service::service_fn;
use hyper_util::{rt::TokioIo, server::conn::auto};
use sqlx::postgres::PgPoolOptions;
use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use view_tracker::{
    CounterError, PgCounterStore, TrackError, ViewOutcome, ViewTracker, Visitor,
    client_ip::extract_client_ip,
};

/// Top-level configuration for view-tracker.
#[derive(Conf, Debug)]
pub struct Config {
    /// If true, just validate config and don't start
    #[conf(long)]
    dry_run: bool,
    /// Socket to listen for HTTP requests (POST /views/{table}/{id})
    #[conf(long, env, default_value = "0.0.0.0:8000")]
    http_listen_addr: SocketAddr,
    /// Connection string of the database holding the view counters
    #[conf(long, env)]
    database_url: String,
    /// Minimum elapsed time before a repeat view from the same visitor counts again
    #[conf(long, env, default_value = "30m", value_parser = humantime::parse_duration)]
    cooldown: Duration,
    /// Tables whose view counters may be incremented, as a JSON list.
    /// Example: `["posts", "articles"]`
    #[conf(long, env, value_parser = serde_json::from_str, default_value = "[]")]
    tables: Vec<String>,
}

fn init_logging() {
    // Build a default tracing subscriber, writing to STDERR
    // Uses RUST_LOG env var for filtering, defaults to "info" if not set
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_file(true)
        .with_line_number(true)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // load dotenv file
    match dotenvy::dotenv() {
        Ok(path) => info!("Read dotenv file from: {}", path.display()),
        Err(dotenvy::Error::Io(io_error)) => {
            if matches!(io_error.kind(), std::io::ErrorKind::NotFound) {
                info!("Couldn't find a dotenv file");
            } else {
                panic!("Io error when reading dot env file: {io_error}")
            }
        }
        Err(err) => {
            panic!("Error reading dotenv file: {err}")
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let config = Config::parse();
    info!("Config = {config:#?}");

    if config.tables.is_empty() {
        warn!("No tables configured, every view will be rejected");
    }

    if config.dry_run {
        return Ok(());
    }

    // Connections are established on first use
    let pool = PgPoolOptions::new().connect_lazy(&config.database_url)?;
    let counters = PgCounterStore::new(pool, config.tables.clone());
    let tracker = Arc::new(ViewTracker::new(Box::new(counters), config.cooldown));

    let token = CancellationToken::new();

    // Listen for ctrl-c
    let thread_token = token.clone();
    tokio::task::spawn(async move {
        tokio::signal::ctrl_c().await.unwrap();
        warn!("ctrl-c: Stop requested");
        thread_token.cancel();
    });

    let listener = TcpListener::bind(config.http_listen_addr).await?;
    info!("Listening for http on {}", config.http_listen_addr);

    let http_task = start_http_task(listener, tracker, token.clone());

    token.cancelled().await;
    http_task.await?;
    Ok(())
}

fn start_http_task(
    listener: TcpListener,
    tracker: Arc<ViewTracker>,
    token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    // Loop waiting for http incoming connections, and hand them to the tracker
    tokio::task::spawn(async move {
        loop {
            let accepted = tokio::select! {
                _ = token.cancelled() => return,
                accepted = listener.accept() => accepted,
            };
            let Ok((stream, remote_addr)) =
                accepted.inspect_err(|err| error!("Error accepting connection: {err}"))
            else {
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            };
            info!("New connection from: {}", remote_addr);

            // Spawn a new task to handle each connection
            let thread_tracker = tracker.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);

                // Serve the connection using auto protocol detection (HTTP/1 or HTTP/2)
                if let Err(err) = auto::Builder::new(hyper_util::rt::TokioExecutor::new())
                    .serve_connection(
                        io,
                        service_fn(move |req| {
                            let thread_tracker = thread_tracker.clone();
                            async move { handle_http_request(thread_tracker, remote_addr, req).await }
                        }),
                    )
                    .await
                {
                    error!("Error serving connection: {err}");
                }
            });
        }
    })
}

async fn handle_http_request(
    tracker: Arc<ViewTracker>,
    remote_addr: SocketAddr,
    req: Request<hyper::body::Incoming>,
) -> Result<Response<String>, Infallible> {
    match handle_http_request_impl(tracker, remote_addr, req).await {
        Ok(resp) => Ok(resp),
        Err(resp) => Ok(resp),
    }
}

async fn handle_http_request_impl(
    tracker: Arc<ViewTracker>,
    remote_addr: SocketAddr,
    req: Request<hyper::body::Incoming>,
) -> Result<Response<String>, Response<String>> {
    info!(
        "Received http request: {} {} (version: {:?})",
        req.method(),
        req.uri().path(),
        req.version()
    );

    fn ok_resp(text: impl Into<String>) -> Response<String> {
        Response::new(text.into())
    }
    fn err_resp(code: StatusCode, text: impl Into<String>) -> Response<String> {
        let mut resp = Response::new(text.into());
        *resp.status_mut() = code;
        resp
    }

    match req.uri().path() {
        "/" | "/health" | "/ready" => {
            if !matches!(req.method(), &Method::GET | &Method::HEAD) {
                Ok(err_resp(
                    StatusCode::NOT_IMPLEMENTED,
                    "Use GET or HEAD with this route",
                ))
            } else {
                Ok(ok_resp("OK"))
            }
        }
        path => {
            let Some(rest) = path.strip_prefix("/views/") else {
                return Ok(err_resp(
                    StatusCode::NOT_FOUND,
                    format!("Not found '{} {}'", req.method(), path),
                ));
            };
            if !matches!(req.method(), &Method::POST) {
                return Ok(err_resp(
                    StatusCode::NOT_IMPLEMENTED,
                    "Use POST with this route",
                ));
            }
            let Some((table, id_str)) = rest.split_once('/') else {
                return Err(err_resp(
                    StatusCode::NOT_FOUND,
                    "Expected /views/{table}/{id}",
                ));
            };
            let object_id: i64 = id_str.parse().map_err(|err| {
                err_resp(
                    StatusCode::BAD_REQUEST,
                    format!("Invalid object id '{id_str}': {err}"),
                )
            })?;

            let visitor = Visitor {
                ip: extract_client_ip(req.headers(), remote_addr),
                user_agent: req
                    .headers()
                    .get(http::header::USER_AGENT)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_owned(),
            };

            match tracker.handle_view(&visitor, table, object_id).await {
                Ok(outcome) => {
                    let counted = outcome == ViewOutcome::Counted;
                    Ok(ok_resp(
                        serde_json::json!({ "counted": counted }).to_string(),
                    ))
                }
                Err(TrackError::Increment {
                    source: CounterError::TableNotAllowed(table),
                    ..
                }) => Ok(err_resp(
                    StatusCode::BAD_REQUEST,
                    format!("Unknown table '{table}'"),
                )),
                Err(err) => {
                    error!("tracker (handle_view): {err}");
                    Ok(err_resp(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))
                }
            }
        }
    }
}
