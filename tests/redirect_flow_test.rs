// Integration tests for logins that finish by redirecting back with a one-time code
use actix_web::http::StatusCode;
use actix_web::{test, App};
use discharger::configure_services;
use discharger::error::ErrorKind;
use discharger::models::DischargeTokenResponse;
use discharger::testing::fixtures::{BOB_PASSWORD, TEST_LOCATION};
use discharger::testing::{assert_error_kind, location, redirect_param, TestFixtures};
use serde_json::Value;

fn login_uri(return_to: &str, state: &str) -> String {
    format!(
        "/login?return_to={}&state={}",
        urlencoding::encode(return_to),
        urlencoding::encode(state)
    )
}

#[actix_web::test]
async fn test_redirect_login_issues_single_use_code() {
    let fixtures = TestFixtures::new().await;
    let app = test::init_service(
        App::new()
            .app_data(fixtures.app_data())
            .configure(configure_services),
    )
    .await;
    let return_to = format!("{TEST_LOCATION}/app/callback");

    let req = test::TestRequest::get()
        .uri(&login_uri(&return_to, "xyz"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    let sealed = redirect_param(resp.headers(), "m").expect("sealed completion mode");

    let req = test::TestRequest::post()
        .uri("/login/static/login")
        .set_form([
            ("m", sealed.as_str()),
            ("username", "bob"),
            ("password", BOB_PASSWORD),
        ])
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert!(location(resp.headers()).starts_with(&return_to));
    assert_eq!(redirect_param(resp.headers(), "state").as_deref(), Some("xyz"));
    let code = redirect_param(resp.headers(), "code").expect("one-time code");

    let req = test::TestRequest::post()
        .uri("/discharge-token")
        .set_form([("code", code.as_str())])
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let token: DischargeTokenResponse = test::read_body_json(resp).await;
    assert_eq!(
        fixtures.declared_username(&token.discharge_token).as_deref(),
        Some("bob")
    );

    // Codes are single use
    let req = test::TestRequest::post()
        .uri("/discharge-token")
        .set_form([("code", code.as_str())])
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = test::read_body_json(resp).await;
    assert_error_kind(&body, ErrorKind::NotFound);
}

#[actix_web::test]
async fn test_foreign_return_to_is_rejected() {
    let fixtures = TestFixtures::new().await;
    let app = test::init_service(
        App::new()
            .app_data(fixtures.app_data())
            .configure(configure_services),
    )
    .await;

    for return_to in [
        "https://evil.example.com/callback",
        "https://discharger.example.com.evil.example/callback",
        "not a url",
    ] {
        let req = test::TestRequest::get()
            .uri(&login_uri(return_to, "s"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{return_to}");
        assert!(resp.headers().get("location").is_none());
    }
}

#[actix_web::test]
async fn test_forged_redirect_state_never_redirects() {
    let fixtures = TestFixtures::new().await;
    let app = test::init_service(
        App::new()
            .app_data(fixtures.app_data())
            .configure(configure_services),
    )
    .await;

    // A sealed mode naming a foreign address is still refused at completion
    let sealed = fixtures.seal(&discharger::models::CompletionMode::Redirect {
        return_to: "https://evil.example.com/steal".to_string(),
        state: String::new(),
    });
    let req = test::TestRequest::post()
        .uri("/login/static/login")
        .set_form([
            ("m", sealed.as_str()),
            ("username", "bob"),
            ("password", BOB_PASSWORD),
        ])
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(resp.headers().get("location").is_none());

    // A mode that does not open is a bad request
    let req = test::TestRequest::post()
        .uri("/login/static/login")
        .set_form([("m", "tampered"), ("username", "bob"), ("password", BOB_PASSWORD)])
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn test_failed_login_redirects_with_error_code() {
    let fixtures = TestFixtures::new().await;
    let app = test::init_service(
        App::new()
            .app_data(fixtures.app_data())
            .configure(configure_services),
    )
    .await;
    let return_to = format!("{TEST_LOCATION}/app/callback");

    let req = test::TestRequest::get()
        .uri(&login_uri(&return_to, "abc"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    let sealed = redirect_param(resp.headers(), "m").expect("sealed completion mode");

    let req = test::TestRequest::post()
        .uri("/login/static/login")
        .set_form([
            ("m", sealed.as_str()),
            ("username", "bob"),
            ("password", "wrong"),
        ])
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        redirect_param(resp.headers(), "error_code").as_deref(),
        Some("unauthorized")
    );
    assert_eq!(redirect_param(resp.headers(), "state").as_deref(), Some("abc"));
    assert!(redirect_param(resp.headers(), "code").is_none());
}

#[actix_web::test]
async fn test_login_lists_providers_when_several() {
    let mut settings = TestFixtures::settings();
    settings.providers.push(TestFixtures::static_provider("staff"));
    let fixtures = TestFixtures::with_settings(settings).await;
    let app = test::init_service(
        App::new()
            .app_data(fixtures.app_data())
            .configure(configure_services),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/login?discharge-id=abc123")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    let choices = body.as_array().expect("list of providers");
    assert_eq!(choices.len(), 2);

    let req = test::TestRequest::get()
        .uri("/login/nobody/login")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn test_code_exchange_requires_code() {
    let fixtures = TestFixtures::new().await;
    let app = test::init_service(
        App::new()
            .app_data(fixtures.app_data())
            .configure(configure_services),
    )
    .await;

    let req = test::TestRequest::post().uri("/discharge-token").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::post()
        .uri("/discharge-token?code=never-issued")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn test_health() {
    let fixtures = TestFixtures::new().await;
    let app = test::init_service(
        App::new()
            .app_data(fixtures.app_data())
            .configure(configure_services),
    )
    .await;

    let req = test::TestRequest::get().uri("/ping").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
}
