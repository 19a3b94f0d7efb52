use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::{Value, json};

use labinv_api::app::{AppServices, build_app, services::prepare_store};
use labinv_auth::PasswordHasher;
use labinv_infra::config::AppConfig;
use labinv_infra::mailer::{MemoryMailer, extract_code};
use labinv_infra::store::{InMemoryStore, LabStore};

const SECRET: &str = "black-box-test-secret-0123456789abcdef";

struct TestServer {
    base_url: String,
    root: String,
    mailer: Arc<MemoryMailer>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let runtime_dir = std::env::temp_dir().join(format!("labinv-test-{}", uuid::Uuid::now_v7()));
        let env: HashMap<&str, String> = HashMap::from([
            ("AUTH_SECRET", SECRET.to_string()),
            ("LABINV_RUNTIME_DIR", runtime_dir.display().to_string()),
        ]);
        let config = AppConfig::from_lookup(|key| env.get(key).cloned()).unwrap();

        let store: Arc<dyn LabStore> = Arc::new(InMemoryStore::new());
        prepare_store(store.as_ref(), config.root_location_id).await.unwrap();
        let mailer = Arc::new(MemoryMailer::new());
        let services = AppServices::new(store, &config, mailer.clone(), PasswordHasher::fast()).unwrap();

        // Same router as prod, bound to an ephemeral port.
        let app = build_app(services);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            root: config.root_location_id.to_string(),
            mailer,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn mint_session(username: &str) -> String {
    let now = Utc::now().timestamp();
    let claims = json!({
        "userId": uuid::Uuid::now_v7(),
        "username": username,
        "iat": now,
        "exp": now + 600,
    });
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

async fn post_json(client: &reqwest::Client, url: String, token: Option<&str>, body: Value) -> (StatusCode, Value) {
    let mut req = client.post(url).json(&body);
    if let Some(token) = token {
        req = req.bearer_auth(token);
    }
    let res = req.send().await.unwrap();
    let status = res.status();
    (status, res.json().await.unwrap())
}

async fn get_json(client: &reqwest::Client, url: String) -> (StatusCode, Value) {
    let res = client.get(url).send().await.unwrap();
    let status = res.status();
    (status, res.json().await.unwrap())
}

#[tokio::test]
async fn health_is_public() {
    let server = TestServer::spawn().await;
    let res = reqwest::get(server.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn writes_require_a_session() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let (status, body) = post_json(&client, server.url("/api/inventory/add"), None, json!({})).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"], "UNAUTHENTICATED");

    let (status, _) = post_json(&client, server.url("/api/inventory/add"), Some("not-a-jwt"), json!({})).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Reads stay public.
    let (status, body) = get_json(&client, server.url("/api/inventory/pm")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["page"]["total"], 0);
}

#[tokio::test]
async fn signup_then_login_sets_session_cookie() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let (status, _) = post_json(
        &client,
        server.url("/api/users/register/init"),
        None,
        json!({ "username": "alice", "email": "Alice@Lab.org" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let mail = server.mailer.last_to("alice@lab.org").expect("code mailed");
    let code = extract_code(&mail.body).unwrap();
    let (status, verified) = post_json(
        &client,
        server.url("/api/users/register/verify"),
        None,
        json!({ "email": "alice@lab.org", "code": code }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let ticket = verified["ticket"].as_str().unwrap().to_string();

    let (status, _) = post_json(
        &client,
        server.url("/api/users/register/complete"),
        None,
        json!({ "ticket": ticket, "password": "correct horse", "passwordConfirm": "correct horse" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // A second signup with the same username is refused.
    let (status, body) = post_json(
        &client,
        server.url("/api/users/register/init"),
        None,
        json!({ "username": "alice", "email": "other@lab.org" }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["message"], "Username already exists");

    let (status, _) = post_json(
        &client,
        server.url("/api/auth/login"),
        None,
        json!({ "username": "alice", "password": "wrong password" }),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let res = client
        .post(server.url("/api/auth/login"))
        .header("x-forwarded-proto", "https")
        .json(&json!({ "email": "alice@lab.org", "password": "correct horse" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let cookie = res
        .headers()
        .get(reqwest::header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    assert!(cookie.starts_with("session="));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("Max-Age=604800"));
    assert!(cookie.ends_with("Secure"));
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["user"]["username"], "alice");

    let pair = cookie.split(';').next().unwrap().to_string();
    let me: Value = client
        .get(server.url("/api/auth/me"))
        .header(reqwest::header::COOKIE, pair)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(me["user"]["username"], "alice");
}

#[tokio::test]
async fn bearer_token_is_accepted() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let token = mint_session("kiosk-admin");

    let me: Value = client
        .get(server.url("/api/auth/me"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(me["ok"], true);
    assert_eq!(me["user"]["username"], "kiosk-admin");
}

#[tokio::test]
async fn tree_save_reports_error_codes() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let token = mint_session("admin");

    let res = client
        .put(server.url("/api/locations/tree"))
        .bearer_auth(&token)
        .json(&json!({ "nodes": [
            { "id": server.root, "label": "Container Area" },
            { "id": "not-a-uuid", "label": "Shelf" },
        ]}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "BAD_ID");

    let res = client
        .put(server.url("/api/locations/tree"))
        .bearer_auth(&token)
        .json(&json!({ "nodes": [
            { "id": server.root, "label": "Container Area", "children": [
                { "id": uuid::Uuid::now_v7(), "label": "Inside" },
            ]},
        ]}))
        .send()
        .await
        .unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "CONTAINER_NO_CHILDREN");
}

#[tokio::test]
async fn stock_moves_and_short_term_loan() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let token = mint_session("admin");

    let (status, created) = post_json(
        &client,
        server.url("/api/products"),
        Some(&token),
        json!({ "name": "Oscilloscope", "brand": "Rigol", "model": "DS1054Z", "isPropertyManaged": true }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let product_id = created["id"].as_str().unwrap().to_string();

    let shelf = uuid::Uuid::now_v7().to_string();
    let saved: Value = client
        .put(server.url("/api/locations/tree"))
        .bearer_auth(&token)
        .json(&json!({ "nodes": [
            { "id": server.root, "label": "Container Area" },
            { "id": shelf, "label": "Bench A" },
        ]}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(saved["created"], 1);

    let (status, added) = post_json(
        &client,
        server.url("/api/inventory/add"),
        Some(&token),
        json!({ "pm": [{ "productId": product_id }] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(added["created"]["pm"], 1);
    assert_eq!(added["total"], 1);

    let (_, listed) = get_json(&client, server.url("/api/inventory/pm?status=in_stock")).await;
    let stock_id = listed["items"][0]["stockId"].as_str().unwrap().to_string();

    let (_, moved) = post_json(
        &client,
        server.url("/api/inventory/transfer"),
        Some(&token),
        json!({ "pm": [{ "stockId": stock_id, "fromLocation": server.root, "toLocation": shelf }] }),
    )
    .await;
    assert_eq!(moved["moved"], 1);
    assert_eq!(moved["details"][0]["ok"], true);

    // Moving it again from the old place fails per item, not per request.
    let (status, again) = post_json(
        &client,
        server.url("/api/inventory/transfer"),
        Some(&token),
        json!({ "pm": [{ "stockId": stock_id, "fromLocation": server.root, "toLocation": shelf }] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["moved"], 0);
    assert_eq!(again["details"][0]["ok"], false);

    let device = uuid::Uuid::now_v7().to_string();
    let (status, _) = post_json(
        &client,
        server.url("/api/devices"),
        None,
        json!({ "id": device, "name": "Kiosk 1" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let borrowed: Value = client
        .post(server.url("/api/rentals/short-term/borrow"))
        .header("x-device-id", &device)
        .json(&json!({ "stockId": stock_id, "borrowerDeviceId": device }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(borrowed["ok"], true);
    assert!(borrowed["dueDate"].is_string());
    let rental_id = borrowed["id"].as_str().unwrap().to_string();

    let active: Value = client
        .get(server.url("/api/rentals/short-term/active?mine=1"))
        .header("x-device-id", &device)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(active["items"].as_array().unwrap().len(), 1);

    // Another device cannot return it.
    let res = client
        .post(server.url("/api/rentals/short-term/return"))
        .header("x-device-id", uuid::Uuid::now_v7().to_string())
        .json(&json!({ "rentedItemId": rental_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = client
        .post(server.url("/api/rentals/short-term/return"))
        .header("x-device-id", &device)
        .json(&json!({ "rentedItemId": rental_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let (_, listed) = get_json(&client, server.url("/api/inventory/pm?status=in_stock")).await;
    assert_eq!(listed["items"][0]["locationId"], shelf);
}

#[tokio::test]
async fn maintenance_toggle_bumps_version() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let (_, before) = get_json(&client, server.url("/api/sys/maintenance")).await;
    assert_eq!(before["on"], false);

    let (status, _) = post_json(&client, server.url("/api/sys/maintenance"), None, json!({ "on": true })).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let token = mint_session("admin");
    let (status, after) = post_json(
        &client,
        server.url("/api/sys/maintenance"),
        Some(&token),
        json!({ "on": true, "message": "Stocktake" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(after["on"], true);
    assert_eq!(after["version"], before["version"].as_u64().unwrap() + 1);
}

#[tokio::test]
async fn product_listing_sorts_by_price_with_missing_prices_last() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let token = mint_session("admin");

    for (model, price) in [("A1", json!(30.0)), ("A2", Value::Null), ("A3", json!(12.5))] {
        let (status, _) = post_json(
            &client,
            server.url("/api/products"),
            Some(&token),
            json!({ "name": "Test Lead", "brand": "Fluke", "model": model, "price": price }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let models = |body: &Value| -> Vec<String> {
        body["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["model"].as_str().unwrap().to_string())
            .collect()
    };

    let (_, asc) = get_json(&client, server.url("/api/products?sortBy=price&sortDir=asc")).await;
    assert_eq!(models(&asc), ["A3", "A1", "A2"]);

    let (_, desc) = get_json(&client, server.url("/api/products?sortBy=price&sortDir=desc")).await;
    assert_eq!(models(&desc), ["A2", "A1", "A3"]);

    let (_, narrowed) = get_json(&client, server.url("/api/products?q=fluke%20a3")).await;
    assert_eq!(models(&narrowed), ["A3"]);
}

#[tokio::test]
async fn malformed_device_id_is_a_bad_request() {
    let server = TestServer::spawn().await;
    let client = reqwest::Client::new();

    for path in ["/api/devices?id=kiosk-7", "/api/devices/verify?deviceId=kiosk-7"] {
        let (status, body) = get_json(&client, server.url(path)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{path}");
        assert_eq!(body["error"], "INVALID_ID");
    }

    let (status, body) = get_json(&client, server.url("/api/devices")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["exists"], false);
}
