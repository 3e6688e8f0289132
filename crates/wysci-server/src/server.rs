use crate::config::{Config, EndpointConfig, ParameterConfig, ParameterType};
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;
use wysci_core::{CsvFormatter, CsvOptions, QueryProcessor, TracingObserver};
use wysci_postgres::{PgConnector, QueryParam};

const PIPE_CAPACITY: usize = 64 * 1024;
const REQUEST_ID_HEADER: &str = "x-request-id";

/// An endpoint with its query text and parameters resolved up front.
#[derive(Debug, Clone)]
struct Endpoint {
    sql: String,
    parameters: Vec<(String, ParameterConfig)>,
}

pub struct AppState {
    connector: PgConnector,
    endpoints: BTreeMap<String, Endpoint>,
    options: CsvOptions,
    query_timeout: Option<Duration>,
}

impl AppState {
    pub fn new(config: &Config, connector: PgConnector) -> anyhow::Result<Self> {
        Ok(Self {
            connector,
            endpoints: resolve_endpoints(config)?,
            options: config.output.csv_options()?,
            query_timeout: config.output.query_timeout(),
        })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BindError {
    #[error("missing required parameter {0}")]
    Missing(String),
    #[error("parameter {name} must be a number, got {value:?}")]
    NotANumber { name: String, value: String },
}

/// Positional parameters for an endpoint, in ordinal order. Absent optional
/// parameters bind as NULL.
pub fn bind_parameters(
    parameters: &[(String, ParameterConfig)],
    query: &HashMap<String, String>,
) -> Result<Vec<QueryParam>, BindError> {
    parameters
        .iter()
        .map(|(name, config)| match query.get(name) {
            None if config.required => Err(BindError::Missing(name.clone())),
            None => Ok(QueryParam::Null),
            Some(value) => match config.kind {
                ParameterType::Number => value
                    .trim()
                    .parse::<i64>()
                    .map(QueryParam::Number)
                    .map_err(|_| BindError::NotANumber {
                        name: name.clone(),
                        value: value.clone(),
                    }),
                ParameterType::String => Ok(QueryParam::Text(value.clone())),
            },
        })
        .collect()
}

fn resolve_endpoints(config: &Config) -> anyhow::Result<BTreeMap<String, Endpoint>> {
    config
        .endpoints
        .iter()
        .map(|(name, endpoint): (&String, &EndpointConfig)| {
            let query = config.queries.get(&endpoint.query).ok_or_else(|| {
                anyhow::anyhow!("endpoint {name} references unknown query {}", endpoint.query)
            })?;
            let parameters = endpoint
                .ordered_parameters()
                .into_iter()
                .map(|(param, param_config)| (param.to_string(), param_config.clone()))
                .collect();
            Ok((
                name.clone(),
                Endpoint {
                    sql: query.sql.clone(),
                    parameters,
                },
            ))
        })
        .collect()
}

/// `/health` plus one `/api/v1/<name>` route per configured endpoint.
pub fn router(state: Arc<AppState>) -> Router {
    let mut app = Router::new().route("/health", get(|| async { "ok" }));
    for name in state.endpoints.keys() {
        let endpoint = name.clone();
        app = app.route(
            &format!("/api/v1/{name}"),
            get(
                move |State(state): State<Arc<AppState>>,
                      Query(query): Query<HashMap<String, String>>| {
                    serve_endpoint(state, endpoint.clone(), query)
                },
            ),
        );
        info!("registered endpoint /api/v1/{name}");
    }
    app.with_state(state)
}

pub async fn run(config: Config, connector: PgConnector) -> anyhow::Result<()> {
    let state = Arc::new(AppState::new(&config, connector)?);
    let app = router(state);

    let listen_addr = config.connection.listen_addr();
    let listener = TcpListener::bind(&listen_addr).await?;
    info!("wysci listening on {listen_addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;
    Ok(())
}

fn with_request_id(mut response: Response, request_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

async fn serve_endpoint(
    state: Arc<AppState>,
    name: String,
    query: HashMap<String, String>,
) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let span = info_span!("request", request_id = %request_id, endpoint = %name);

    let Some(endpoint) = state.endpoints.get(&name) else {
        let response = (StatusCode::NOT_FOUND, "unknown endpoint").into_response();
        return with_request_id(response, &request_id);
    };
    let params = match bind_parameters(&endpoint.parameters, &query) {
        Ok(params) => params,
        Err(err) => {
            span.in_scope(|| warn!("rejected request: {err}"));
            let response = (StatusCode::BAD_REQUEST, err.to_string()).into_response();
            return with_request_id(response, &request_id);
        }
    };

    let mut handle = match state
        .connector
        .open(&endpoint.sql, &params)
        .instrument(span.clone())
        .await
    {
        Ok(handle) => handle,
        Err(err) => {
            span.in_scope(|| error!("query failed to open: {err}"));
            let response = (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
            return with_request_id(response, &request_id);
        }
    };
    let mut formatter = match CsvFormatter::with_options(handle.columns(), state.options.clone()) {
        Ok(formatter) => formatter,
        Err(err) => {
            span.in_scope(|| error!("invalid output options: {err}"));
            let response = (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
            return with_request_id(response, &request_id);
        }
    };

    let cancel = CancellationToken::new();
    if let Some(timeout) = state.query_timeout {
        let deadline = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => deadline.cancel(),
                _ = deadline.cancelled() => {}
            }
        });
    }

    let (mut writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
    let observer = TracingObserver::new(Some(request_id.clone()));
    tokio::spawn(
        async move {
            // stops the deadline task once streaming ends
            let _done = cancel.clone().drop_guard();
            let processor = QueryProcessor::new(observer);
            if let Err(err) = processor
                .process_with(&mut handle, &mut formatter, &mut writer, &cancel)
                .await
            {
                warn!(bytes = err.bytes_written, "stream ended early: {}", err.source);
            }
            let _ = writer.shutdown().await;
        }
        .instrument(span),
    );

    let mut response = Response::new(Body::from_stream(ReaderStream::new(reader)));
    response
        .headers_mut()
        .insert("content-type", HeaderValue::from_static("text/csv"));
    with_request_id(response, &request_id)
}

#[cfg(test)]
mod tests {
    use super::{bind_parameters, router, AppState, BindError, REQUEST_ID_HEADER};
    use crate::config::{Config, ParameterConfig, ParameterType};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;
    use wysci_postgres::{PgConnector, QueryParam};

    const APP_CONFIG: &str = r#"
[output]
query_timeout_secs = 1

[queries.values]
sql = "SELECT id, name FROM (VALUES (1, 'hello world'), (2, NULL), (4, 'embedded,comma')) AS t(id, name) WHERE id >= $1 ORDER BY id"

[queries.slow]
sql = "SELECT g FROM generate_series(1, 10) AS g WHERE EXISTS (SELECT pg_sleep(0.3 + g * 0))"

[endpoints.values]
query = "values"

[endpoints.values.parameters.from]
type = "number"
required = true
ordinal = 1

[endpoints.slow]
query = "slow"
"#;

    fn app(pg: tokio_postgres::Config) -> axum::Router {
        let config: Config = toml::from_str(APP_CONFIG).expect("config");
        let state = AppState::new(&config, PgConnector::new(pg, 2)).expect("state");
        router(Arc::new(state))
    }

    /// A connector aimed at a port nothing listens on.
    fn unreachable_app() -> axum::Router {
        let mut pg = tokio_postgres::Config::new();
        pg.host("127.0.0.1")
            .port(1)
            .user("nobody")
            .connect_timeout(Duration::from_secs(2));
        app(pg)
    }

    fn database_app() -> Option<axum::Router> {
        let connstr = std::env::var("WYSCI_TEST_CONNSTR").ok()?;
        Some(app(connstr.parse().expect("connection string")))
    }

    async fn get(app: axum::Router, uri: &str) -> Response {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).expect("request"))
            .await
            .expect("response")
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        String::from_utf8(bytes.to_vec()).expect("utf8")
    }

    fn parameters() -> Vec<(String, ParameterConfig)> {
        vec![
            (
                "owner".into(),
                ParameterConfig {
                    kind: ParameterType::String,
                    required: true,
                    ordinal: 1,
                },
            ),
            (
                "after".into(),
                ParameterConfig {
                    kind: ParameterType::Number,
                    required: false,
                    ordinal: 2,
                },
            ),
        ]
    }

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn binds_in_ordinal_order() {
        let bound = bind_parameters(&parameters(), &query(&[("after", "10"), ("owner", "ann")]))
            .expect("bind");
        assert_eq!(
            bound,
            vec![QueryParam::Text("ann".into()), QueryParam::Number(10)]
        );
    }

    #[test]
    fn missing_optional_binds_null() {
        let bound = bind_parameters(&parameters(), &query(&[("owner", "ann")])).expect("bind");
        assert_eq!(bound, vec![QueryParam::Text("ann".into()), QueryParam::Null]);
    }

    #[test]
    fn missing_required_is_rejected() {
        let err = bind_parameters(&parameters(), &query(&[("after", "1")])).expect_err("missing");
        assert_eq!(err, BindError::Missing("owner".into()));
        assert_eq!(err.to_string(), "missing required parameter owner");
    }

    #[test]
    fn non_numeric_number_is_rejected() {
        let err = bind_parameters(&parameters(), &query(&[("owner", "ann"), ("after", "ten")]))
            .expect_err("not a number");
        assert_eq!(
            err,
            BindError::NotANumber {
                name: "after".into(),
                value: "ten".into()
            }
        );
        assert_eq!(err.to_string(), "parameter after must be a number, got \"ten\"");
    }

    #[test]
    fn extra_query_keys_are_ignored() {
        let bound = bind_parameters(
            &parameters(),
            &query(&[("owner", "ann"), ("after", "2"), ("debug", "1")]),
        )
        .expect("bind");
        assert_eq!(bound.len(), 2);
    }

    #[tokio::test]
    async fn health_answers_ok() {
        let response = get(unreachable_app(), "/health").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "ok");
    }

    #[tokio::test]
    async fn bad_parameters_are_400_with_a_request_id() {
        let response = get(unreachable_app(), "/api/v1/values").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
        assert_eq!(body_text(response).await, "missing required parameter from");

        let response = get(unreachable_app(), "/api/v1/values?from=two").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn open_failure_is_500_before_any_body() {
        let response = get(unreachable_app(), "/api/v1/values?from=1").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
        assert_ne!(
            response.headers().get("content-type").map(|v| v.as_bytes()),
            Some(&b"text/csv"[..])
        );
    }

    #[tokio::test]
    async fn unknown_endpoint_is_not_routed() {
        let response = get(unreachable_app(), "/api/v1/nothing").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn streams_csv_through_the_pipe() {
        let Some(app) = database_app() else {
            return;
        };
        let response = get(app, "/api/v1/values?from=2").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").map(|v| v.as_bytes()),
            Some(&b"text/csv"[..])
        );
        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .expect("request id")
            .to_string();
        assert!(uuid::Uuid::parse_str(&request_id).is_ok());
        assert_eq!(
            body_text(response).await,
            "id,name\r\n2,\r\n4,\"embedded,comma\"\r\n"
        );
    }

    #[tokio::test]
    async fn query_timeout_cuts_the_stream_at_a_row_boundary() {
        let Some(app) = database_app() else {
            return;
        };
        let started = std::time::Instant::now();
        let response = get(app, "/api/v1/slow").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_text(response).await;
        // ten rows take three seconds; the one second timeout ends it early
        assert!(started.elapsed() < Duration::from_millis(2500));
        // the server may hold rows back in its send buffer, so the cut can
        // land before the header
        if !body.is_empty() {
            assert!(body.starts_with("g\r\n"), "{body:?}");
            assert!(body.ends_with("\r\n"), "{body:?}");
            let rows = body.lines().count() - 1;
            assert!(rows < 10, "timeout should stop before every row, got {rows}");
        }
    }
}
