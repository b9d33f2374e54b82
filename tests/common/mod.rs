#![allow(dead_code)]

use std::sync::Arc;

use reqwest::multipart::{Form, Part};
use serde_json::Value;
use wishhub::{
    config::{Config, default_extensions},
    media::MemoryImageStore,
    routes,
    state::AppState,
};

pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
    pub images: Arc<MemoryImageStore>,
}

pub struct TestUser {
    pub id: i64,
    pub token: String,
}

/// Spawns the app on a random port, backed by in-memory repositories and
/// an in-memory image store.
pub async fn spawn_app() -> TestApp {
    let config = Config {
        database_url: None,
        jwt_secret: "test_secret_for_integration_tests".to_string(),
        jwt_expiration: 600, // 10 minutes for tests
        crypto_secret: "test_crypto_secret".to_string(),
        rust_log: "error".to_string(),
        port: 0,
        media_dir: std::env::temp_dir()
            .join(format!("wishhub-test-{}", uuid::Uuid::new_v4()))
            .to_string_lossy()
            .into_owned(),
        media_base_url: "http://127.0.0.1/media".to_string(),
        max_file_size_mb: 1,
        max_number_of_files: 10,
        allowed_extensions: default_extensions(),
        store_retry_attempts: 1,
    };

    let images = Arc::new(MemoryImageStore::new(&config.media_base_url));
    let state = AppState::in_memory(images.clone(), config).expect("Failed to build state");
    let app = routes::create_router(state);

    // Bind to port 0 to get a random available port
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        address: format!("http://127.0.0.1:{}", port),
        client: reqwest::Client::new(),
        images,
    }
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    pub async fn register(&self, first_name: &str) -> TestUser {
        let email = format!("{}_{}@example.com", first_name, &uuid::Uuid::new_v4().to_string()[..8]);
        let password = "password123";

        let registered: Value = self
            .client
            .post(self.url("/api/auth/register"))
            .json(&serde_json::json!({
                "email": email,
                "password": password,
                "firstName": first_name
            }))
            .send()
            .await
            .expect("Register failed")
            .json()
            .await
            .expect("Failed to parse register json");

        let login: Value = self
            .client
            .post(self.url("/api/auth/login"))
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await
            .expect("Login failed")
            .json()
            .await
            .expect("Failed to parse login json");

        TestUser {
            id: registered["id"].as_i64().expect("User id not found"),
            token: login["token"].as_str().expect("Token not found").to_string(),
        }
    }

    /// Makes `a` and `b` friends.
    pub async fn befriend(&self, a: &TestUser, b: &TestUser) {
        for (actor, other) in [(a, b), (b, a)] {
            let status = self
                .client
                .post(self.url(&format!("/api/friends/{}", other.id)))
                .bearer_auth(&actor.token)
                .send()
                .await
                .unwrap()
                .status();
            assert_eq!(status.as_u16(), 200);
        }
    }

    pub async fn create_wish(&self, user: &TestUser, data: Value, files: &[(&str, &[u8])]) -> reqwest::Response {
        let mut form = Form::new().text("data", data.to_string());
        for (idx, (name, bytes)) in files.iter().enumerate() {
            let part = Part::bytes(bytes.to_vec())
                .file_name(name.to_string())
                .mime_str("image/png")
                .unwrap();
            form = form.part(format!("image-{}", idx + 1), part);
        }

        self.client
            .post(self.url("/api/wishes"))
            .bearer_auth(&user.token)
            .multipart(form)
            .send()
            .await
            .expect("Create wish failed")
    }
}

pub fn wish_data(name: &str, show: &str) -> Value {
    serde_json::json!({
        "material": true,
        "show": show,
        "name": name,
        "price": "120.00",
        "currency": "EUR",
        "description": format!("I would like a {}", name)
    })
}
