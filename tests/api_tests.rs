// tests/api_tests.rs

mod common;

use common::spawn_app;

#[tokio::test]
async fn health_check_404() {
    // Arrange
    let app = spawn_app().await;

    // Act
    let response = app
        .client
        .get(app.url("/random_path_that_does_not_exist"))
        .send()
        .await
        .expect("Failed to execute request");

    // Assert
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn register_works() {
    // Arrange
    let app = spawn_app().await;

    // Act
    let response = app
        .client
        .post(app.url("/api/auth/register"))
        .json(&serde_json::json!({
            "email": "olena@example.com",
            "password": "password123",
            "firstName": "Olena",
            "lastName": "Shevchenko"
        }))
        .send()
        .await
        .expect("Failed to execute request");

    // Assert
    assert_eq!(response.status().as_u16(), 201);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["email"], "olena@example.com");
    assert_eq!(body["bookingNotifications"], true);
    assert!(body.get("password").is_none());
}

#[tokio::test]
async fn register_fails_validation() {
    // Arrange
    let app = spawn_app().await;

    // Act: password too short, email malformed
    for payload in [
        serde_json::json!({ "email": "a@example.com", "password": "123", "firstName": "A" }),
        serde_json::json!({ "email": "not-an-email", "password": "password123", "firstName": "A" }),
    ] {
        let response = app
            .client
            .post(app.url("/api/auth/register"))
            .json(&payload)
            .send()
            .await
            .expect("Failed to execute request");

        // Assert
        assert_eq!(response.status().as_u16(), 400);
    }
}

#[tokio::test]
async fn duplicate_email_is_a_conflict() {
    let app = spawn_app().await;
    let payload = serde_json::json!({
        "email": "dup@example.com",
        "password": "password123",
        "firstName": "Dup"
    });

    let first = app.client.post(app.url("/api/auth/register")).json(&payload).send().await.unwrap();
    assert_eq!(first.status().as_u16(), 201);

    let second = app.client.post(app.url("/api/auth/register")).json(&payload).send().await.unwrap();
    assert_eq!(second.status().as_u16(), 409);
}

#[tokio::test]
async fn login_rejects_wrong_password() {
    let app = spawn_app().await;
    app.client
        .post(app.url("/api/auth/register"))
        .json(&serde_json::json!({
            "email": "taras@example.com",
            "password": "password123",
            "firstName": "Taras"
        }))
        .send()
        .await
        .unwrap();

    let response = app
        .client
        .post(app.url("/api/auth/login"))
        .json(&serde_json::json!({ "email": "taras@example.com", "password": "wrong-pass" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);

    let response = app
        .client
        .post(app.url("/api/auth/login"))
        .json(&serde_json::json!({ "email": "TARAS@example.com", "password": "password123" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["type"], "Bearer");
}

#[tokio::test]
async fn protected_routes_need_a_token() {
    let app = spawn_app().await;

    let missing = app.client.get(app.url("/api/users/me")).send().await.unwrap();
    assert_eq!(missing.status().as_u16(), 401);

    let forged = app
        .client
        .get(app.url("/api/wishes"))
        .bearer_auth("not.a.token")
        .send()
        .await
        .unwrap();
    assert_eq!(forged.status().as_u16(), 401);
}
