use super::helpers::RequestParams;
use crate::error::DischargeError;
use crate::models::{DischargeTokenResponse, LoginOutcome};
use crate::service::ServiceContainer;
use actix_web::{web, HttpResponse};
use std::collections::HashMap;
use tokio::time::Instant;

/// Wait for the login started for `discharge-id` to complete
///
/// Blocks for at most the configured wait timeout. A client that disconnects
/// abandons the wait and the pending login is discarded.
///
/// # Errors
///
/// Returns an error if:
/// - `discharge-id` is missing or unknown (404)
/// - No login completed before the timeout (408)
/// - The login failed, with that failure's kind
pub async fn wait(
    query: web::Query<HashMap<String, String>>,
    services: web::Data<ServiceContainer>,
) -> Result<HttpResponse, DischargeError> {
    let params = RequestParams::new(query, None);
    let discharge_id = params.require("discharge-id")?;

    let deadline = Instant::now()
        .checked_add(services.settings.wait_timeout())
        .ok_or_else(|| DischargeError::internal("wait timeout out of range"))?;
    match services.rendezvous.wait(discharge_id, deadline).await? {
        LoginOutcome::Success { credential } => Ok(HttpResponse::Ok().json(
            DischargeTokenResponse {
                discharge_token: credential,
            },
        )),
        LoginOutcome::Failure { error } => Err(DischargeError::from(error)),
    }
}
