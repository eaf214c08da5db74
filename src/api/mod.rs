pub mod auth;
mod cars;
pub mod csrf;
pub mod error;
pub mod rate_limit;
mod test_drives;
mod validation;

use axum::{
    http::{header, HeaderName, HeaderValue, Method},
    middleware,
    routing::{delete, get, patch, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let csrf = middleware::from_fn_with_state(state.clone(), csrf::require_csrf);

    // Credential exchange: anti-forgery token plus the tight auth rate limit
    let credential_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/register", post(auth::register))
        .route_layer(csrf.clone())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_auth,
        ));

    let account_mutations = Router::new()
        .route("/profile", put(auth::update_profile))
        .route("/users/:id/status", patch(auth::update_user_status))
        .route("/users/:id", delete(auth::delete_user))
        .route_layer(csrf.clone());

    let auth_routes = Router::new()
        .route("/csrf-token", get(csrf::csrf_token))
        .route("/me", get(auth::me))
        .route("/users", get(auth::list_users))
        .merge(credential_routes)
        .merge(account_mutations);

    let booking_mutations = Router::new()
        .route("/", post(test_drives::create_test_drive))
        .route("/:id/cancel", patch(test_drives::cancel))
        .route("/admin/:id/status", patch(test_drives::update_status))
        .route_layer(csrf);

    let booking_routes = Router::new()
        .route("/my-bookings", get(test_drives::my_bookings))
        .route("/admin/all", get(test_drives::list_all))
        .route("/admin/stats", get(test_drives::stats))
        .merge(booking_mutations);

    let car_routes = Router::new()
        .route("/", get(cars::list_cars))
        .route("/:id", get(cars::get_car));

    let api_routes = Router::new()
        .nest("/auth", auth_routes)
        .nest("/test-drives", booking_routes)
        .nest("/cars", car_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_api,
        ));

    let mut router = Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http());

    if let Some(cors) = cors_layer(&state.config.server.cors_origins) {
        router = router.layer(cors);
    }

    router.with_state(state)
}

/// CORS for the configured browser origins; `None` keeps the API same-origin
fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
            .allow_headers([
                header::AUTHORIZATION,
                header::CONTENT_TYPE,
                HeaderName::from_static(csrf::CSRF_HEADER),
                HeaderName::from_static(csrf::SESSION_CSRF_HEADER),
            ])
            .allow_credentials(true),
    )
}

async fn health_check() -> &'static str {
    "OK"
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct Reply {
        status: StatusCode,
        set_cookie: Option<String>,
        body: Value,
    }

    async fn send(app: &Router, request: Request<Body>) -> Reply {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or_default().to_string());
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        Reply {
            status,
            set_cookie,
            body,
        }
    }

    /// Cookie pair and token from the anti-forgery endpoint
    async fn csrf(app: &Router) -> (String, String) {
        let reply = send(
            app,
            Request::get("/api/auth/csrf-token").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(reply.status, StatusCode::OK);
        let token = reply.body["csrfToken"].as_str().unwrap().to_string();
        (reply.set_cookie.unwrap(), token)
    }

    fn json_request(
        method: &str,
        uri: &str,
        body: Value,
        bearer: Option<&str>,
        csrf: Option<&(String, String)>,
    ) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some((cookie, token)) = csrf {
            builder = builder
                .header(header::COOKIE, cookie)
                .header(csrf::CSRF_HEADER, token)
                .header(csrf::SESSION_CSRF_HEADER, token);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn login(app: &Router, email: &str, password: &str) -> Reply {
        let csrf = csrf(app).await;
        send(
            app,
            json_request(
                "POST",
                "/api/auth/login",
                json!({ "email": email, "password": password }),
                None,
                Some(&csrf),
            ),
        )
        .await
    }

    async fn register(app: &Router, name: &str, email: &str) -> String {
        let csrf = csrf(app).await;
        let reply = send(
            app,
            json_request(
                "POST",
                "/api/auth/register",
                json!({ "name": name, "email": email, "password": "drive2024", "phone": "555-0100" }),
                None,
                Some(&csrf),
            ),
        )
        .await;
        assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);
        assert_eq!(reply.body["user"]["role"], "user");
        reply.body["token"].as_str().unwrap().to_string()
    }

    fn tomorrow() -> String {
        (chrono::Local::now().date_naive() + chrono::Duration::days(1))
            .format("%Y-%m-%d")
            .to_string()
    }

    async fn first_car_id(app: &Router) -> String {
        let reply = send(app, Request::get("/api/cars").body(Body::empty()).unwrap()).await;
        assert_eq!(reply.status, StatusCode::OK);
        reply.body[0]["id"].as_str().unwrap().to_string()
    }

    fn booking_body(car_id: &str, date: &str, time: &str) -> Value {
        json!({
            "carId": car_id,
            "date": date,
            "time": time,
            "customerName": "Ada Lovelace",
            "customerEmail": "ada@example.com",
            "customerPhone": "555-0100"
        })
    }

    #[tokio::test]
    async fn test_health() {
        let app = create_router(test_state().await);
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_login_requires_anti_forgery_token() {
        let app = create_router(test_state().await);

        let reply = send(
            &app,
            json_request(
                "POST",
                "/api/auth/login",
                json!({ "email": ADMIN_EMAIL, "password": ADMIN_PASSWORD }),
                None,
                None,
            ),
        )
        .await;
        assert_eq!(reply.status, StatusCode::FORBIDDEN);
        assert_eq!(reply.body["code"], "csrf_invalid");

        // Headers that disagree are rejected too
        let (cookie, token) = csrf(&app).await;
        let request = Request::post("/api/auth/login")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::COOKIE, &cookie)
            .header(csrf::CSRF_HEADER, &token)
            .header(csrf::SESSION_CSRF_HEADER, "something-else")
            .body(Body::from(
                json!({ "email": ADMIN_EMAIL, "password": ADMIN_PASSWORD }).to_string(),
            ))
            .unwrap();
        assert_eq!(send(&app, request).await.status, StatusCode::FORBIDDEN);

        let reply = login(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["user"]["role"], "admin");
        assert!(reply.body["token"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_bad_credentials_are_unauthorized() {
        let app = create_router(test_state().await);
        let reply = login(&app, ADMIN_EMAIL, "wrong-password").await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
        assert_eq!(reply.body["message"], "Invalid email or password");
    }

    #[tokio::test]
    async fn test_me_and_profile() {
        let app = create_router(test_state().await);
        let token = register(&app, "Ada", "ada@example.com").await;

        let reply = send(
            &app,
            json_request("GET", "/api/auth/me", Value::Null, Some(&token), None),
        )
        .await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["email"], "ada@example.com");

        let unauthenticated = send(
            &app,
            json_request("GET", "/api/auth/me", Value::Null, Some("bogus"), None),
        )
        .await;
        assert_eq!(unauthenticated.status, StatusCode::UNAUTHORIZED);

        let csrf = csrf(&app).await;
        let reply = send(
            &app,
            json_request(
                "PUT",
                "/api/auth/profile",
                json!({ "name": "Ada L.", "phone": "" }),
                Some(&token),
                Some(&csrf),
            ),
        )
        .await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["name"], "Ada L.");
        assert!(reply.body["phone"].is_null());
    }

    #[tokio::test]
    async fn test_duplicate_email_is_plain_conflict() {
        let app = create_router(test_state().await);
        register(&app, "Ada", "ada@example.com").await;

        let csrf = csrf(&app).await;
        let reply = send(
            &app,
            json_request(
                "POST",
                "/api/auth/register",
                json!({ "name": "Ada", "email": "ADA@example.com", "password": "drive2024" }),
                None,
                Some(&csrf),
            ),
        )
        .await;
        assert_eq!(reply.status, StatusCode::CONFLICT);
        assert!(reply.body.get("conflict").is_none());
    }

    #[tokio::test]
    async fn test_slot_collision_is_flagged_conflict() {
        let app = create_router(test_state().await);
        let ada = register(&app, "Ada", "ada@example.com").await;
        let bob = register(&app, "Bob", "bob@example.com").await;
        let car_id = first_car_id(&app).await;
        let date = tomorrow();

        let csrf = csrf(&app).await;
        let first = send(
            &app,
            json_request(
                "POST",
                "/api/test-drives",
                booking_body(&car_id, &date, "10:00"),
                Some(&ada),
                Some(&csrf),
            ),
        )
        .await;
        assert_eq!(first.status, StatusCode::CREATED, "{}", first.body);
        assert_eq!(first.body["status"], "pending");

        let second = send(
            &app,
            json_request(
                "POST",
                "/api/test-drives",
                booking_body(&car_id, &date, "10:00"),
                Some(&bob),
                Some(&csrf),
            ),
        )
        .await;
        assert_eq!(second.status, StatusCode::CONFLICT);
        assert_eq!(second.body["conflict"], true);
        assert_eq!(second.body["code"], "conflict");
    }

    #[tokio::test]
    async fn test_validation_failure_lists_fields() {
        let app = create_router(test_state().await);
        let ada = register(&app, "Ada", "ada@example.com").await;
        let car_id = first_car_id(&app).await;
        let today = chrono::Local::now().date_naive().format("%Y-%m-%d").to_string();

        let csrf = csrf(&app).await;
        let reply = send(
            &app,
            json_request(
                "POST",
                "/api/test-drives",
                booking_body(&car_id, &today, "13:00"),
                Some(&ada),
                Some(&csrf),
            ),
        )
        .await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(reply.body["code"], "validation_error");
        assert!(reply.body["details"]["date"].is_array());
        assert!(reply.body["details"]["time"].is_array());
        assert!(reply.body.get("conflict").is_none());
    }

    #[tokio::test]
    async fn test_admin_endpoints_are_gated() {
        let app = create_router(test_state().await);
        let ada = register(&app, "Ada", "ada@example.com").await;

        for uri in ["/api/test-drives/admin/all", "/api/test-drives/admin/stats", "/api/auth/users"] {
            let reply = send(&app, json_request("GET", uri, Value::Null, Some(&ada), None)).await;
            assert_eq!(reply.status, StatusCode::FORBIDDEN, "{}", uri);
            assert_eq!(reply.body["code"], "forbidden");

            let reply = send(&app, json_request("GET", uri, Value::Null, None, None)).await;
            assert_eq!(reply.status, StatusCode::UNAUTHORIZED, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_admin_lifecycle_and_invalid_transition() {
        let app = create_router(test_state().await);
        let ada = register(&app, "Ada", "ada@example.com").await;
        let admin = login(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await.body["token"]
            .as_str()
            .unwrap()
            .to_string();
        let car_id = first_car_id(&app).await;
        let csrf = csrf(&app).await;

        let booking = send(
            &app,
            json_request(
                "POST",
                "/api/test-drives",
                booking_body(&car_id, &tomorrow(), "14:00"),
                Some(&ada),
                Some(&csrf),
            ),
        )
        .await;
        let id = booking.body["id"].as_str().unwrap().to_string();

        let set_status = |status: &'static str| {
            json_request(
                "PATCH",
                &format!("/api/test-drives/admin/{}/status", id),
                json!({ "status": status }),
                Some(&admin),
                Some(&csrf),
            )
        };

        let reply = send(&app, set_status("confirmed")).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["status"], "confirmed");

        let reply = send(&app, set_status("completed")).await;
        assert_eq!(reply.body["status"], "completed");

        let reply = send(&app, set_status("pending")).await;
        assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(reply.body["code"], "invalid_transition");

        let reply = send(&app, set_status("archived")).await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);

        // The owner cannot cancel a completed booking either
        let reply = send(
            &app,
            json_request(
                "PATCH",
                &format!("/api/test-drives/{}/cancel", id),
                Value::Null,
                Some(&ada),
                Some(&csrf),
            ),
        )
        .await;
        assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);

        let stats = send(
            &app,
            json_request("GET", "/api/test-drives/admin/stats", Value::Null, Some(&admin), None),
        )
        .await;
        assert_eq!(stats.body["completed"], 1);
        assert_eq!(stats.body["totalTestDrives"], 1);
    }

    #[tokio::test]
    async fn test_admin_user_management() {
        let state = test_state().await;
        let app = create_router(state.clone());
        let ada = register(&app, "Ada", "ada@example.com").await;
        let admin = login(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await.body["token"]
            .as_str()
            .unwrap()
            .to_string();
        let csrf = csrf(&app).await;

        let users = send(
            &app,
            json_request("GET", "/api/auth/users", Value::Null, Some(&admin), None),
        )
        .await;
        let ada_id = users.body
            .as_array()
            .unwrap()
            .iter()
            .find(|u| u["email"] == "ada@example.com")
            .unwrap()["id"]
            .as_str()
            .unwrap()
            .to_string();

        let reply = send(
            &app,
            json_request(
                "PATCH",
                &format!("/api/auth/users/{}/status", ada_id),
                json!({ "status": "inactive" }),
                Some(&admin),
                Some(&csrf),
            ),
        )
        .await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["status"], "inactive");

        // An active booking blocks deletion
        let car_id = first_car_id(&app).await;
        let booking = send(
            &app,
            json_request(
                "POST",
                "/api/test-drives",
                booking_body(&car_id, &tomorrow(), "09:00"),
                Some(&ada),
                Some(&csrf),
            ),
        )
        .await;
        assert_eq!(booking.status, StatusCode::CREATED);

        let delete = |bearer: &str| {
            json_request(
                "DELETE",
                &format!("/api/auth/users/{}", ada_id),
                Value::Null,
                Some(bearer),
                Some(&csrf),
            )
        };
        assert_eq!(send(&app, delete(&admin)).await.status, StatusCode::CONFLICT);

        let booking_id = booking.body["id"].as_str().unwrap();
        let cancelled = send(
            &app,
            json_request(
                "PATCH",
                &format!("/api/test-drives/{}/cancel", booking_id),
                Value::Null,
                Some(&ada),
                Some(&csrf),
            ),
        )
        .await;
        assert_eq!(cancelled.body["status"], "cancelled");

        assert_eq!(send(&app, delete(&admin)).await.status, StatusCode::NO_CONTENT);

        // The deleted account's bearer token no longer resolves
        let me = send(&app, json_request("GET", "/api/auth/me", Value::Null, Some(&ada), None)).await;
        assert_eq!(me.status, StatusCode::UNAUTHORIZED);

        // History is kept
        let remaining: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM test_drives")
            .fetch_one(&state.db)
            .await
            .unwrap();
        assert_eq!(remaining.0, 1);
    }

    #[tokio::test]
    async fn test_unknown_car_is_not_found() {
        let app = create_router(test_state().await);
        let reply = send(&app, Request::get("/api/cars/nope").body(Body::empty()).unwrap()).await;
        assert_eq!(reply.status, StatusCode::NOT_FOUND);
        assert_eq!(reply.body["message"], "Car not found");
    }

    #[test]
    fn test_cors_layer_only_with_origins() {
        assert!(cors_layer(&[]).is_none());
        assert!(cors_layer(&["http://localhost:5173".to_string()]).is_some());
    }
}
