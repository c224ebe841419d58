//! HTTP surface
//!
//! ## Endpoints
//!
//! GET|POST /run - Start the command, stream its early output
//! GET /ls - List running instances
//! POST /kill - Kill all running instances
//! POST /die - Kill all running instances, then exit

use crate::auth::{Credentials, is_request_authorized};
use crate::config::RunnerConfig;
use crate::errors::{Result, RunnerError};
use crate::execution::stream::{self, PLAIN_TEXT};
use crate::runner::Runner;
use actix_web::body::MessageBody;
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::header;
use actix_web::middleware::{DefaultHeaders, Logger, Next, from_fn};
use actix_web::{App, HttpRequest, HttpResponse, HttpServer, web};
use futures::FutureExt;
use log::{error, info, warn};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

/// Sent by `/kill`
pub const KILL_MESSAGE: &str = "They have left for a better world.";

/// Sent by `/die`
pub const DIE_MESSAGE: &str = "The sweet embrace of death, finally.";

pub const SERVER_NAME: &str = "httprunner";

/// What `/die` does once its response had time to flush
pub type ExitHook = Arc<dyn Fn() + Send + Sync>;

// ============ Application State ============

pub struct AppState {
    runner: Runner,
    credentials: Option<Credentials>,
    die_grace: Duration,
    exit: ExitHook,
}

impl AppState {
    pub fn new(runner: Runner, credentials: Option<Credentials>) -> Self {
        Self {
            runner,
            credentials,
            die_grace: crate::config::DIE_GRACE,
            exit: Arc::new(|| std::process::exit(0)),
        }
    }

    pub fn from_config(config: &RunnerConfig) -> Self {
        Self::new(Runner::from_config(config), config.credentials.clone())
            .with_die_grace(config.die_grace)
    }

    pub fn with_die_grace(mut self, grace: Duration) -> Self {
        self.die_grace = grace;
        self
    }

    pub fn with_exit_hook(mut self, exit: ExitHook) -> Self {
        self.exit = exit;
        self
    }

    pub fn runner(&self) -> &Runner {
        &self.runner
    }

    fn authorize(&self, req: &HttpRequest) -> Result<()> {
        if is_request_authorized(self.credentials.as_ref(), req) {
            Ok(())
        } else {
            Err(RunnerError::Unauthorized)
        }
    }
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("runner", &self.runner)
            .field("credentials", &self.credentials)
            .field("die_grace", &self.die_grace)
            .finish_non_exhaustive()
    }
}

/// Register all routes
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/run", web::get().to(run_command))
        .route("/run", web::post().to(run_command))
        .route("/ls", web::get().to(list_processes))
        .route("/kill", web::post().to(kill_all))
        .route("/die", web::post().to(die));
}

pub fn default_headers() -> DefaultHeaders {
    DefaultHeaders::new().add((header::SERVER, SERVER_NAME))
}

/// Bind and serve until the server stops
pub async fn serve(config: RunnerConfig) -> Result<()> {
    let tls = config.tls.as_ref().map(|paths| paths.load()).transpose()?;
    let state = web::Data::new(AppState::from_config(&config));

    info!(
        "Serving {} on {}://{}",
        config.command,
        if tls.is_some() { "https" } else { "http" },
        config.host
    );
    if sends_credentials_in_clear(&config) {
        warn!("--userpass is set without TLS: credentials travel in clear text");
    }

    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(from_fn(contain_panics))
            .wrap(Logger::default())
            .wrap(default_headers())
            .configure(routes)
    });

    let server = match tls {
        Some(tls) => server.bind_rustls_0_23(&config.host, tls)?,
        None => server.bind(&config.host)?,
    };

    server.run().await?;
    Ok(())
}

/// Basic auth over plain HTTP
pub fn sends_credentials_in_clear(config: &RunnerConfig) -> bool {
    config.credentials.is_some() && config.tls.is_none()
}

/// Turn a panicking handler into a 500 for that request alone
pub async fn contain_panics(
    req: ServiceRequest,
    next: Next<impl MessageBody + 'static>,
) -> std::result::Result<ServiceResponse<impl MessageBody>, actix_web::Error> {
    let http_req = req.request().clone();
    match AssertUnwindSafe(next.call(req)).catch_unwind().await {
        Ok(res) => res.map(ServiceResponse::map_into_left_body),
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("{} {} panicked: {}", http_req.method(), http_req.path(), reason);
            let resp = HttpResponse::InternalServerError()
                .content_type(PLAIN_TEXT)
                .body(reason);
            Ok(ServiceResponse::new(http_req, resp).map_into_right_body())
        }
    }
}

// ============ Handlers ============

/// Start the command and stream its output
async fn run_command(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse> {
    state.authorize(&req)?;
    let running = state.runner.start()?;
    Ok(stream::respond(running.output(), state.runner.stream_settings()).await)
}

/// One `<start time> : <pid>` line per running instance, oldest first
async fn list_processes(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse> {
    state.authorize(&req)?;
    let body: String = state
        .runner
        .list()
        .iter()
        .map(|entry| format!("{}\n", entry))
        .collect();
    Ok(HttpResponse::Ok().content_type(PLAIN_TEXT).body(body))
}

async fn kill_all(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse> {
    state.authorize(&req)?;
    state.runner.kill_all();
    Ok(HttpResponse::Ok().content_type(PLAIN_TEXT).body(KILL_MESSAGE))
}

/// Kill everything, answer, then exit after the grace delay
async fn die(req: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse> {
    state.authorize(&req)?;
    state.runner.kill_all();
    info!("{}", DIE_MESSAGE);

    let exit = Arc::clone(&state.exit);
    let grace = state.die_grace;
    actix_web::rt::spawn(async move {
        actix_web::rt::time::sleep(grace).await;
        exit();
    });

    Ok(HttpResponse::Ok().content_type(PLAIN_TEXT).body(DIE_MESSAGE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{CommandSpec, SpawnOptions, StreamSettings};
    use crate::test_support::serial_guard;
    use actix_web::body::to_bytes;
    use actix_web::http::StatusCode;
    use actix_web::test;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn state(command: &str) -> web::Data<AppState> {
        let runner = Runner::new(
            CommandSpec::parse(command).unwrap(),
            Duration::from_secs(1),
            SpawnOptions {
                echo_stdout: false,
                ..SpawnOptions::default()
            },
            StreamSettings::default(),
        );
        web::Data::new(AppState::new(runner, None).with_exit_hook(Arc::new(|| {})))
    }

    async fn body_of(resp: HttpResponse) -> String {
        let bytes = to_bytes(resp.into_body()).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[actix_web::test]
    async fn list_empty() {
        let state = state("true");
        let req = test::TestRequest::default().to_http_request();
        let resp = list_processes(req, state).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_of(resp).await, "");
    }

    #[actix_web::test]
    async fn kill_all_returns_confirmation() {
        let state = state("true");
        let req = test::TestRequest::default().to_http_request();
        let resp = kill_all(req, state).await.unwrap();
        assert_eq!(body_of(resp).await, KILL_MESSAGE);
    }

    #[actix_web::test]
    async fn run_returns_output() {
        let _guard = serial_guard();
        let state = state("echo hello");
        let req = test::TestRequest::default().to_http_request();
        let resp = run_command(req, state).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_of(resp).await, "hello\n");
    }

    #[actix_web::test]
    async fn run_spawn_failure_is_internal_error() {
        let _guard = serial_guard();
        let state = state("/nonexistent/httprunner-missing");
        let req = test::TestRequest::default().to_http_request();
        let err = run_command(req, state.clone()).await.unwrap_err();
        assert!(matches!(err, RunnerError::Spawn { .. }));
        assert!(state.runner().registry().is_empty());
    }

    #[actix_web::test]
    async fn die_runs_exit_hook_after_grace() {
        let calls = Arc::new(AtomicUsize::new(0));
        let hook_calls = Arc::clone(&calls);
        let runner = Runner::new(
            CommandSpec::parse("true").unwrap(),
            Duration::ZERO,
            SpawnOptions::default(),
            StreamSettings::default(),
        );
        let state = web::Data::new(
            AppState::new(runner, None)
                .with_die_grace(Duration::from_millis(20))
                .with_exit_hook(Arc::new(move || {
                    hook_calls.fetch_add(1, Ordering::SeqCst);
                })),
        );

        let req = test::TestRequest::default().to_http_request();
        let resp = die(req, state).await.unwrap();
        assert_eq!(body_of(resp).await, DIE_MESSAGE);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        actix_web::rt::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[actix_web::test]
    async fn handlers_reject_missing_credentials() {
        let runner = Runner::new(
            CommandSpec::parse("true").unwrap(),
            Duration::ZERO,
            SpawnOptions::default(),
            StreamSettings::default(),
        );
        let creds = Credentials::parse("ci:secret").unwrap();
        let state = web::Data::new(AppState::new(runner, Some(creds)));

        let req = test::TestRequest::default().to_http_request();
        let err = list_processes(req, state.clone()).await.unwrap_err();
        assert!(matches!(err, RunnerError::Unauthorized));

        let req = test::TestRequest::default().to_http_request();
        assert!(run_command(req, state.clone()).await.is_err());
        assert!(state.runner().registry().is_empty());
    }

    async fn explode() -> HttpResponse {
        panic!("handler blew up")
    }

    #[actix_web::test]
    async fn panicking_handler_becomes_internal_error() {
        let app = test::init_service(
            App::new()
                .wrap(from_fn(contain_panics))
                .route("/boom", web::get().to(explode))
                .route("/fine", web::get().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;

        let req = test::TestRequest::get().uri("/boom").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(test::read_body(resp).await, "handler blew up");

        let req = test::TestRequest::get().uri("/fine").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[::core::prelude::v1::test]
    fn credentials_without_tls_are_flagged() {
        let mut config = RunnerConfig::new(CommandSpec::parse("true").unwrap());
        assert!(!sends_credentials_in_clear(&config));

        config.credentials = Some(Credentials::parse("ci:secret").unwrap());
        assert!(sends_credentials_in_clear(&config));

        config.tls = Some(crate::tls::TlsPaths {
            cert: "cert.pem".into(),
            key: "key.pem".into(),
        });
        assert!(!sends_credentials_in_clear(&config));
    }
}
