//! Login completion
//!
//! Every identity provider finishes a login by calling [`VisitCompleter`].
//! The completer mints the discharge credential and routes it back the way
//! the interaction started: to a waiting discharge request through the
//! rendezvous, or to the `return_to` address through a one-time code.

use crate::credential::{DischargeCredentialMinter, Oven};
use crate::error::DischargeError;
use crate::models::{CompletionMode, Credential, Identity, LoginOutcome, MACAROON_KIND};
use crate::rendezvous::RendezvousPlace;
use crate::store::IdentityStore;
use crate::templates::PageRenderer;
use crate::token_store::{DischargeTokenStore, CODE_VALIDITY};
use crate::utils::logging::Logger;
use crate::utils::redirect::{redirect_target, validate_return_to};
use crate::utils::responses::ResponseBuilder;
use actix_web::HttpResponse;
use chrono::Utc;
use std::sync::Arc;

/// Collaborators of a [`VisitCompleter`]
pub struct CompleterParts {
    pub rendezvous: RendezvousPlace,
    pub token_store: DischargeTokenStore,
    pub minter: DischargeCredentialMinter,
    pub oven: Arc<dyn Oven>,
    pub identity_store: Arc<dyn IdentityStore>,
    pub renderer: Arc<dyn PageRenderer>,
    pub location: String,
}

/// Single convergence point for login outcomes
#[derive(Clone)]
pub struct VisitCompleter {
    rendezvous: RendezvousPlace,
    token_store: DischargeTokenStore,
    minter: DischargeCredentialMinter,
    oven: Arc<dyn Oven>,
    identity_store: Arc<dyn IdentityStore>,
    renderer: Arc<dyn PageRenderer>,
    location: String,
    logger: Logger,
}

impl VisitCompleter {
    #[must_use]
    pub fn new(parts: CompleterParts, logger: Logger) -> Self {
        Self {
            rendezvous: parts.rendezvous,
            token_store: parts.token_store,
            minter: parts.minter,
            oven: parts.oven,
            identity_store: parts.identity_store,
            renderer: parts.renderer,
            location: parts.location,
            logger,
        }
    }

    /// Complete a successful login for `identity`
    pub async fn success(&self, mode: &CompletionMode, mut identity: Identity) -> HttpResponse {
        if let Err(e) = self.check_gate(mode) {
            return ResponseBuilder::error(&e);
        }
        match self.minter.mint(&mut identity).await {
            Ok(credential) => self.success_token(mode, credential, Some(identity)).await,
            Err(e) => self.failure(mode, e).await,
        }
    }

    /// Complete a login for which the provider already holds a credential
    ///
    /// When `identity` is `None` the confirmation page is rendered for the
    /// username the credential declares.
    pub async fn success_token(
        &self,
        mode: &CompletionMode,
        credential: Credential,
        identity: Option<Identity>,
    ) -> HttpResponse {
        match mode {
            CompletionMode::Direct { discharge_id } => {
                let outcome = LoginOutcome::Success {
                    credential: credential.clone(),
                };
                if let Err(e) = self.rendezvous.done(discharge_id, outcome).await {
                    self.logger.warn(format_args!(
                        "cannot complete discharge {discharge_id}: {e}"
                    ));
                    return ResponseBuilder::error(&e.context("cannot complete login"));
                }
                let identity = match identity {
                    Some(identity) => identity,
                    None => self.identity_for(&credential).await,
                };
                self.logger.info(format_args!(
                    "login completed for {} (discharge {discharge_id})",
                    identity.username
                ));
                self.confirmation_page(&identity)
            }
            CompletionMode::Redirect { return_to, state } => {
                if let Err(e) = validate_return_to(&self.location, return_to, &self.logger) {
                    return ResponseBuilder::error(&e);
                }
                let code = match self
                    .token_store
                    .put(&credential, Utc::now() + CODE_VALIDITY)
                    .await
                {
                    Ok(code) => code,
                    Err(e) => return self.failure(mode, e).await,
                };
                let mut params = vec![("code", code.as_str())];
                if !state.is_empty() {
                    params.push(("state", state.as_str()));
                }
                match redirect_target(&self.location, return_to, &params, &self.logger) {
                    Ok(target) => ResponseBuilder::see_other(&target),
                    Err(e) => ResponseBuilder::error(&e),
                }
            }
        }
    }

    /// Complete a failed login
    pub async fn failure(&self, mode: &CompletionMode, err: DischargeError) -> HttpResponse {
        self.logger
            .info(format_args!("login failed ({}): {err}", err.kind()));
        match mode {
            CompletionMode::Direct { discharge_id } => {
                let outcome = LoginOutcome::Failure {
                    error: err.to_body(),
                };
                if let Err(e) = self.rendezvous.done(discharge_id, outcome).await {
                    self.logger.warn(format_args!(
                        "cannot report failure for discharge {discharge_id}: {e}"
                    ));
                }
                ResponseBuilder::error(&err)
            }
            CompletionMode::Redirect { return_to, state } => {
                let message = err.to_string();
                let mut params = vec![
                    ("error", message.as_str()),
                    ("error_code", err.kind().as_str()),
                ];
                if !state.is_empty() {
                    params.push(("state", state.as_str()));
                }
                match redirect_target(&self.location, return_to, &params, &self.logger) {
                    Ok(target) => ResponseBuilder::see_other(&target),
                    Err(e) => ResponseBuilder::error(&e),
                }
            }
        }
    }

    fn check_gate(&self, mode: &CompletionMode) -> Result<(), DischargeError> {
        match mode {
            CompletionMode::Direct { .. } => Ok(()),
            CompletionMode::Redirect { return_to, .. } => {
                validate_return_to(&self.location, return_to, &self.logger).map(|_| ())
            }
        }
    }

    // The lookup only enriches the page; failures are logged.
    async fn identity_for(&self, credential: &Credential) -> Identity {
        let username = if credential.kind == MACAROON_KIND {
            self.oven
                .infer_declared(&credential.value)
                .map(|declared| declared.username)
                .unwrap_or_default()
        } else {
            String::new()
        };
        if username.is_empty() {
            self.logger
                .warn(format_args!("credential declares no username"));
            return Identity::default();
        }
        match self.identity_store.identity(&username).await {
            Ok(Some(identity)) => identity,
            Ok(None) => {
                self.logger
                    .warn(format_args!("no identity found for {username}"));
                Identity::new(&username)
            }
            Err(e) => {
                self.logger
                    .error(format_args!("cannot look up identity {username}: {e}"));
                Identity::new(&username)
            }
        }
    }

    fn confirmation_page(&self, identity: &Identity) -> HttpResponse {
        match self.renderer.render_login(identity) {
            Ok(page) => ResponseBuilder::html(page),
            Err(e) => {
                self.logger
                    .error(format_args!("cannot render login page: {e:#}"));
                ResponseBuilder::text(format!("Login successful as {}\n", identity.username))
            }
        }
    }
}

impl std::fmt::Debug for VisitCompleter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisitCompleter")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::HmacOven;
    use crate::error::ErrorKind;
    use crate::rendezvous::RendezvousConfig;
    use crate::store::{MemoryIdentityStore, MemoryKeyValueStore};
    use actix_web::{body::to_bytes, http::header, http::StatusCode};
    use std::time::Duration;
    use tokio::time::Instant;

    const LOCATION: &str = "https://svc";

    struct FixedRenderer;

    impl PageRenderer for FixedRenderer {
        fn render_login(&self, identity: &Identity) -> anyhow::Result<String> {
            Ok(format!("<p>{}</p>", identity.username))
        }
    }

    struct BrokenRenderer;

    impl PageRenderer for BrokenRenderer {
        fn render_login(&self, _identity: &Identity) -> anyhow::Result<String> {
            Err(anyhow::anyhow!("template missing"))
        }
    }

    struct Setup {
        completer: VisitCompleter,
        rendezvous: RendezvousPlace,
        token_store: DischargeTokenStore,
        oven: Arc<HmacOven>,
        codes: Arc<MemoryKeyValueStore>,
    }

    async fn setup_with(renderer: Arc<dyn PageRenderer>) -> Setup {
        let oven = Arc::new(HmacOven::new(b"completer test secret").unwrap());
        let identities = Arc::new(MemoryIdentityStore::new());
        identities.update_identity(&Identity::new("U")).await.unwrap();
        let rendezvous = RendezvousPlace::new(
            Arc::new(MemoryKeyValueStore::new()),
            RendezvousConfig {
                poll_interval: Duration::from_millis(10),
                ..RendezvousConfig::default()
            },
            Logger::default(),
        );
        let codes = Arc::new(MemoryKeyValueStore::new());
        let token_store = DischargeTokenStore::new(codes.clone(), Logger::default());
        let minter =
            DischargeCredentialMinter::new(oven.clone(), identities.clone(), Logger::default());
        let completer = VisitCompleter::new(
            CompleterParts {
                rendezvous: rendezvous.clone(),
                token_store: token_store.clone(),
                minter,
                oven: oven.clone(),
                identity_store: identities,
                renderer,
                location: LOCATION.to_string(),
            },
            Logger::default(),
        );
        Setup {
            completer,
            rendezvous,
            token_store,
            oven,
            codes,
        }
    }

    async fn setup() -> Setup {
        setup_with(Arc::new(FixedRenderer)).await
    }

    fn redirect_mode(return_to: &str, state: &str) -> CompletionMode {
        CompletionMode::Redirect {
            return_to: return_to.to_string(),
            state: state.to_string(),
        }
    }

    fn location_of(response: &HttpResponse) -> url::Url {
        let location = response.headers().get(header::LOCATION).unwrap();
        url::Url::parse(location.to_str().unwrap()).unwrap()
    }

    fn query_param(url: &url::Url, name: &str) -> Option<String> {
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    async fn body_text(response: HttpResponse) -> String {
        let bytes = to_bytes(response.into_body()).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[actix_web::test]
    async fn test_direct_success_wakes_waiter() {
        let s = setup().await;
        let id = s.rendezvous.new_rendezvous().await.unwrap();

        let waiter = {
            let rendezvous = s.rendezvous.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let started = Instant::now();
                let outcome = rendezvous.wait(&id, started + Duration::from_secs(30)).await;
                (outcome, started.elapsed())
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mode = CompletionMode::Direct { discharge_id: id };
        let response = s.completer.success(&mode, Identity::new("U")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "<p>U</p>");

        let (outcome, elapsed) = waiter.await.unwrap();
        let LoginOutcome::Success { credential } = outcome.unwrap() else {
            panic!("expected success");
        };
        assert_eq!(s.oven.infer_declared(&credential.value).unwrap().username, "U");
        assert!(elapsed < Duration::from_secs(5));
    }

    #[actix_web::test]
    async fn test_direct_failure_reaches_waiter() {
        let s = setup().await;
        let id = s.rendezvous.new_rendezvous().await.unwrap();
        let mode = CompletionMode::Direct {
            discharge_id: id.clone(),
        };

        let response = s
            .completer
            .failure(&mode, DischargeError::bad_request("bad"))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let outcome = s
            .rendezvous
            .wait(&id, Instant::now() + Duration::from_secs(1))
            .await
            .unwrap();
        let LoginOutcome::Failure { error } = outcome else {
            panic!("expected failure");
        };
        assert_eq!(error.code, ErrorKind::BadRequest);
        assert_eq!(error.message, "bad");
    }

    #[actix_web::test]
    async fn test_direct_success_for_unknown_id() {
        let s = setup().await;
        let mode = CompletionMode::Direct {
            discharge_id: "never-allocated".to_string(),
        };
        let response = s.completer.success(&mode, Identity::new("U")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_redirect_success_issues_code() {
        let s = setup().await;
        let mode = redirect_mode("https://svc/x", "s1");

        let response = s.completer.success(&mode, Identity::new("U")).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let target = location_of(&response);
        assert_eq!(target.path(), "/x");
        assert_eq!(query_param(&target, "state").as_deref(), Some("s1"));

        let code = query_param(&target, "code").unwrap();
        let credential = s.token_store.get(&code).await.unwrap();
        assert_eq!(s.oven.infer_declared(&credential.value).unwrap().username, "U");
    }

    #[actix_web::test]
    async fn test_redirect_omits_empty_state() {
        let s = setup().await;
        let response = s
            .completer
            .success(&redirect_mode("https://svc/x", ""), Identity::new("U"))
            .await;
        let target = location_of(&response);
        assert!(query_param(&target, "code").is_some());
        assert!(query_param(&target, "state").is_none());
    }

    #[actix_web::test]
    async fn test_redirect_gate_rejects_foreign_target() {
        let s = setup().await;
        let mode = redirect_mode("https://evil.example/x", "s1");

        let response = s.completer.success(&mode, Identity::new("U")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get(header::LOCATION).is_none());
        assert!(s.codes.is_empty().await);

        let response = s
            .completer
            .failure(&mode, DischargeError::unauthorized("nope"))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().get(header::LOCATION).is_none());
    }

    #[actix_web::test]
    async fn test_redirect_failure_carries_error() {
        let s = setup().await;
        let response = s
            .completer
            .failure(
                &redirect_mode("https://svc/x", "s1"),
                DischargeError::unauthorized("invalid password"),
            )
            .await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let target = location_of(&response);
        assert_eq!(query_param(&target, "error").as_deref(), Some("invalid password"));
        assert_eq!(query_param(&target, "error_code").as_deref(), Some("unauthorized"));
        assert_eq!(query_param(&target, "state").as_deref(), Some("s1"));
    }

    #[actix_web::test]
    async fn test_success_token_infers_username() {
        let s = setup().await;
        let id = s.rendezvous.new_rendezvous().await.unwrap();
        let value = s
            .oven
            .mint(
                &crate::models::Declaration {
                    username: "U".to_string(),
                },
                Utc::now() + chrono::Duration::hours(1),
            )
            .await
            .unwrap();

        let response = s
            .completer
            .success_token(
                &CompletionMode::Direct { discharge_id: id },
                Credential::macaroon(value),
                None,
            )
            .await;
        assert_eq!(body_text(response).await, "<p>U</p>");
    }

    #[actix_web::test]
    async fn test_render_failure_falls_back_to_text() {
        let s = setup_with(Arc::new(BrokenRenderer)).await;
        let id = s.rendezvous.new_rendezvous().await.unwrap();

        let response = s
            .completer
            .success(&CompletionMode::Direct { discharge_id: id }, Identity::new("U"))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "Login successful as U\n");
    }
}
