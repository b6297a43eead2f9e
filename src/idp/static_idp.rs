//! Identity provider backed by a fixed list of users from the settings

use super::{IdentityProvider, IdpRequest, InitParams, MODE_PARAM};
use crate::error::DischargeError;
use crate::models::{CompletionMode, Identity};
use crate::settings::{ProviderSettings, StaticUserSettings};
use crate::templates::html_escape;
use crate::utils::crypto::{generate_token, hmac_sha256, verify_hmac_sha256};
use crate::utils::responses::ResponseBuilder;
use actix_web::{http::Method, HttpResponse};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Username and password login against configured users
pub struct StaticIdentityProvider {
    name: String,
    description: String,
    users: HashMap<String, StaticUserSettings>,
    password_key: String,
    params: OnceLock<InitParams>,
}

impl StaticIdentityProvider {
    #[must_use]
    pub fn new(settings: &ProviderSettings) -> Self {
        Self {
            name: settings.name.clone(),
            description: settings
                .description
                .clone()
                .unwrap_or_else(|| "Static users".to_string()),
            users: settings
                .users
                .iter()
                .map(|user| (user.username.clone(), user.clone()))
                .collect(),
            password_key: generate_token(),
            params: OnceLock::new(),
        }
    }

    // Compared as MACs so the check takes the same time for any guess.
    fn password_matches(&self, user: &StaticUserSettings, presented: &str) -> bool {
        if user.password.is_empty() {
            return false;
        }
        let key = self.password_key.as_bytes();
        hmac_sha256(key, user.password.as_bytes())
            .is_ok_and(|expected| verify_hmac_sha256(key, presented.as_bytes(), &expected))
    }

    fn params(&self) -> Result<&InitParams, DischargeError> {
        self.params
            .get()
            .ok_or_else(|| DischargeError::internal(format!("{} not initialized", self.name)))
    }

    fn completion_mode(
        params: &InitParams,
        request: &IdpRequest,
    ) -> Result<(String, CompletionMode), DischargeError> {
        let sealed = request
            .param(MODE_PARAM)
            .filter(|m| !m.is_empty())
            .ok_or_else(|| DischargeError::bad_request("login state not found"))?;
        let mode = params
            .codec
            .open(sealed)
            .map_err(|e| DischargeError::bad_request(format!("invalid login state: {e}")))?;
        Ok((sealed.to_string(), mode))
    }

    fn login_form(&self, params: &InitParams, sealed: &str) -> HttpResponse {
        ResponseBuilder::html(format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>Log in - {description}</title>
</head>
<body>
    <h1>{description}</h1>
    <form method="post" action="{action}">
        <input type="hidden" name="{MODE_PARAM}" value="{sealed}">
        <label>Username <input type="text" name="username" autofocus></label>
        <label>Password <input type="password" name="password"></label>
        <button type="submit">Log in</button>
    </form>
</body>
</html>"#,
            description = html_escape(&self.description),
            action = html_escape(&format!("{}/login", params.url_prefix)),
            sealed = html_escape(sealed),
        ))
    }

    async fn authenticate(&self, params: &InitParams, request: &IdpRequest) -> HttpResponse {
        let (_, mode) = match Self::completion_mode(params, request) {
            Ok(found) => found,
            Err(e) => return ResponseBuilder::error(&e),
        };

        let username = request.param("username").unwrap_or_default();
        let password = request.param("password").unwrap_or_default();
        let Some(user) = self
            .users
            .get(username)
            .filter(|user| self.password_matches(user, password))
        else {
            params
                .logger
                .info(format_args!("failed login attempt for {username:?}"));
            return params
                .completer
                .failure(
                    &mode,
                    DischargeError::unauthorized("invalid username or password"),
                )
                .await;
        };

        let identity = Identity {
            username: user.username.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            groups: user.groups.clone(),
            last_login: None,
        };
        if let Err(e) = params.identity_store.update_identity(&identity).await {
            return params
                .completer
                .failure(&mode, DischargeError::from(e).context("cannot update identity"))
                .await;
        }
        params.completer.success(&mode, identity).await
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn init(&self, params: InitParams) -> Result<(), DischargeError> {
        params
            .logger
            .debug(format_args!("{} users configured", self.users.len()));
        self.params
            .set(params)
            .map_err(|_| DischargeError::internal(format!("{} initialized twice", self.name)))
    }

    fn login_url(&self, sealed_mode: &str) -> String {
        let prefix = self
            .params
            .get()
            .map(|params| params.url_prefix.as_str())
            .unwrap_or_default();
        format!(
            "{prefix}/login?{MODE_PARAM}={}",
            urlencoding::encode(sealed_mode)
        )
    }

    async fn handle(&self, request: IdpRequest) -> HttpResponse {
        let params = match self.params() {
            Ok(params) => params,
            Err(e) => return ResponseBuilder::error(&e),
        };
        if request.path != "/login" {
            return ResponseBuilder::error(&DischargeError::not_found(format!(
                "{} not found",
                request.path
            )));
        }
        if request.method == Method::GET {
            match Self::completion_mode(params, &request) {
                Ok((sealed, _)) => self.login_form(params, &sealed),
                Err(e) => ResponseBuilder::error(&e),
            }
        } else {
            self.authenticate(params, &request).await
        }
    }
}
