use axum::{
    extract::{DefaultBodyLimit, Request},
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

pub mod config;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use services::AppState;

type AppRouter = Router<Arc<AppState>>;

/// CSP middleware adds Content-Security-Policy header to all responses
async fn csp_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
    );
    response
}

/// Origins from `CORS_ALLOWED_ORIGINS` (comma separated) get credentialed CORS;
/// without it any origin may call the API without cookies.
fn cors_layer() -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(middlewares::csrf::CSRF_HEADER_NAME),
            HeaderName::from_static(middlewares::trace::TRACE_ID_HEADER),
        ])
        .expose_headers([
            header::RETRY_AFTER,
            HeaderName::from_static(middlewares::trace::TRACE_ID_HEADER),
        ]);

    let origins: Vec<HeaderValue> = std::env::var("CORS_ALLOWED_ORIGINS")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    if origins.is_empty() {
        base.allow_origin(tower_http::cors::Any)
    } else {
        base.allow_origin(AllowOrigin::list(origins))
            .allow_credentials(true)
    }
}

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let upload_limit = app_state.config.upload_max_bytes;

    Router::new()
        // Public endpoints (no auth required)
        .route("/health", get(handlers::health_check))
        // Metrics endpoint with Basic Auth protection
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        .nest("/api/v1/auth", auth_routes(app_state.clone()))
        .nest(
            "/api/v1/profile",
            protected(profile_routes(), app_state.clone()),
        )
        .nest(
            "/api/v1/articles",
            protected(article_routes(app_state.clone()), app_state.clone()),
        )
        .nest(
            "/api/v1/chat",
            protected(chat_routes(app_state.clone()), app_state.clone()),
        )
        .merge(protected(socratic_routes(app_state.clone()), app_state.clone()))
        .nest(
            "/api/v1/instructor",
            protected(
                instructor_routes().route_layer(middleware::from_fn(
                    middlewares::auth::instructor_guard_middleware,
                )),
                app_state.clone(),
            ),
        )
        .with_state(app_state)
        .layer(DefaultBodyLimit::max(upload_limit))
        .layer(middleware::from_fn(csp_middleware))
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors_layer())
}

/// JWT auth, then per-user/IP rate limits, then the CSRF double-submit check.
fn protected(router: AppRouter, app_state: Arc<AppState>) -> AppRouter {
    router
        .route_layer(middleware::from_fn(middlewares::csrf::csrf_middleware))
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            middlewares::rate_limit::rate_limit_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(
            app_state,
            middlewares::auth::auth_middleware,
        ))
}

fn profile_routes() -> AppRouter {
    Router::new().route(
        "/",
        get(handlers::profile::get_profile)
            .patch(handlers::profile::update_profile)
            .delete(handlers::profile::delete_account),
    )
}

fn article_routes(app_state: Arc<AppState>) -> AppRouter {
    Router::new()
        .route("/", get(handlers::articles::list_articles))
        .route("/upload", post(handlers::articles::upload_article))
        .route(
            "/analyze",
            post(handlers::articles::analyze_article).route_layer(
                middleware::from_fn_with_state(
                    app_state.clone(),
                    middlewares::rate_limit::llm_rate_limit_middleware,
                ),
            ),
        )
        .route("/count", get(handlers::articles::count_articles))
        .route("/mine", get(handlers::articles::my_articles))
        .route(
            "/compare",
            get(handlers::articles::compare_articles_handler),
        )
        .route(
            "/compare/report.pdf",
            get(handlers::articles::comparison_report),
        )
        .route(
            "/{id}",
            get(handlers::articles::get_article).delete(handlers::articles::delete_article),
        )
        .route("/{id}/download", get(handlers::articles::download_article))
        .route("/{id}/abstract.pdf", get(handlers::articles::abstract_pdf))
}

fn chat_routes(app_state: Arc<AppState>) -> AppRouter {
    Router::new()
        .route(
            "/",
            post(handlers::chat::chat).route_layer(
                middleware::from_fn_with_state(
                    app_state.clone(),
                    middlewares::rate_limit::llm_rate_limit_middleware,
                ),
            ),
        )
        .route(
            "/{article_id}/history",
            get(handlers::chat::chat_history).delete(handlers::chat::clear_chat_history),
        )
}

fn socratic_routes(app_state: Arc<AppState>) -> AppRouter {
    Router::new()
        .route(
            "/api/v1/socraticbot",
            post(handlers::socratic::socratic_step).route_layer(
                middleware::from_fn_with_state(
                    app_state.clone(),
                    middlewares::rate_limit::llm_rate_limit_middleware,
                ),
            ),
        )
        .route(
            "/api/v1/socratic/sessions",
            post(handlers::socratic::create_session),
        )
        .route(
            "/api/v1/socratic/sessions/active",
            get(handlers::socratic::active_session),
        )
        .route(
            "/api/v1/socratic/progress/{article_id}",
            get(handlers::socratic::article_progress),
        )
}

fn instructor_routes() -> AppRouter {
    Router::new()
        .route("/stats", get(handlers::instructor::get_stats))
        .route("/students", get(handlers::instructor::list_students))
        .route(
            "/students/{id}/progress",
            get(handlers::instructor::student_progress),
        )
        .route(
            "/students/{id}/progress/export",
            get(handlers::instructor::export_student_progress),
        )
        .route("/articles", get(handlers::instructor::list_articles))
        .route(
            "/articles/{id}",
            delete(handlers::instructor::delete_article),
        )
        .route("/analytics", get(handlers::instructor::get_analytics))
}

fn auth_routes(app_state: Arc<AppState>) -> AppRouter {
    // Public routes with rate limiting
    let register_route = Router::new()
        .route("/register", post(handlers::auth::register))
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            middlewares::rate_limit::register_rate_limit_middleware,
        ));

    let login_route = Router::new()
        .route("/login", post(handlers::auth::login))
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            middlewares::rate_limit::login_rate_limit_middleware,
        ));

    let public_routes = Router::new()
        .route("/captcha", get(handlers::auth::captcha))
        .route("/refresh", post(handlers::auth::refresh_token))
        .route("/logout", post(handlers::auth::logout))
        .route("/csrf-token", get(handlers::auth::get_csrf_token))
        .route(
            "/password-strength",
            post(handlers::auth::password_strength),
        )
        .merge(register_route)
        .merge(login_route);

    // Protected routes (require JWT auth + CSRF protection)
    let protected_routes = Router::new()
        .route("/me", get(handlers::auth::get_current_user))
        .route("/change-password", post(handlers::auth::change_password))
        .route_layer(middleware::from_fn(middlewares::csrf::csrf_middleware))
        .route_layer(middleware::from_fn_with_state(
            app_state,
            middlewares::auth::auth_middleware,
        ));

    public_routes.merge(protected_routes)
}
