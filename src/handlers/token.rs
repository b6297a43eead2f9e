use super::helpers::RequestParams;
use crate::error::DischargeError;
use crate::models::DischargeTokenResponse;
use crate::service::ServiceContainer;
use actix_web::{web, HttpResponse};
use std::collections::HashMap;

/// Exchange the one-time `code` from a redirect login for its discharge token
///
/// # Errors
///
/// Returns an error if `code` is missing, unknown, expired or already used
pub async fn discharge_token(
    query: web::Query<HashMap<String, String>>,
    form: Option<web::Form<HashMap<String, String>>>,
    services: web::Data<ServiceContainer>,
) -> Result<HttpResponse, DischargeError> {
    let params = RequestParams::new(query, form);
    let code = params.require("code")?;

    let credential = services.token_store.get(code).await?;
    Ok(HttpResponse::Ok().json(DischargeTokenResponse {
        discharge_token: credential,
    }))
}
