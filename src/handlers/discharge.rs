use super::helpers::{decode_base64, RequestParams};
use crate::checker::DischargeRequest;
use crate::error::DischargeError;
use crate::models::{Credential, DischargeResponse};
use crate::service::ServiceContainer;
use actix_web::{web, HttpResponse};
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use std::collections::HashMap;

/// Discharge a third-party caveat
///
/// The caveat id comes as `id` (raw) or `id64` (base64). A credential from an
/// earlier login may be presented as `token-kind` and `token64`.
///
/// # Errors
///
/// Returns an error if:
/// - The caveat id or credential parameters are malformed
/// - The caveat needs interaction (401 carrying the visit and wait URLs)
/// - The logged in user does not meet the caveat's condition
/// - Minting the discharge fails
pub async fn discharge(
    query: web::Query<HashMap<String, String>>,
    form: Option<web::Form<HashMap<String, String>>>,
    services: web::Data<ServiceContainer>,
) -> Result<HttpResponse, DischargeError> {
    let params = RequestParams::new(query, form);
    let caveat_id = caveat_id(&params)?;
    let request = DischargeRequest {
        credential: presented_credential(&params)?,
    };

    let declaration = services.checker.check(&request, &caveat_id).await?;
    let expires_at = Utc::now() + services.settings.discharge_validity();
    let discharge = services
        .oven
        .mint_discharge(&caveat_id, &declaration, expires_at)
        .await
        .map_err(|e| e.context("cannot mint discharge"))?;

    services.logger.info(format_args!(
        "discharged caveat for {}",
        declaration.username
    ));
    Ok(HttpResponse::Ok().json(DischargeResponse {
        macaroon: general_purpose::URL_SAFE_NO_PAD.encode(discharge),
    }))
}

fn caveat_id(params: &RequestParams) -> Result<Vec<u8>, DischargeError> {
    if let Some(id) = params.get("id") {
        return Ok(id.as_bytes().to_vec());
    }
    if let Some(id64) = params.get("id64") {
        return decode_base64(id64, "id64");
    }
    Err(DischargeError::bad_request("missing id parameter"))
}

fn presented_credential(params: &RequestParams) -> Result<Option<Credential>, DischargeError> {
    match (params.get("token-kind"), params.get("token64")) {
        (None, None) => Ok(None),
        (Some(kind), Some(token64)) => Ok(Some(Credential {
            kind: kind.to_string(),
            value: decode_base64(token64, "token64")?,
        })),
        _ => Err(DischargeError::bad_request(
            "token-kind and token64 must be given together",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn params(pairs: &[(&str, &str)]) -> RequestParams {
        RequestParams::from(
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect::<HashMap<_, _>>(),
        )
    }

    #[test]
    fn test_caveat_id_forms() {
        assert_eq!(caveat_id(&params(&[("id", "raw")])).unwrap(), b"raw");
        assert_eq!(caveat_id(&params(&[("id64", "cmF3")])).unwrap(), b"raw");
        let err = caveat_id(&params(&[])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn test_presented_credential() {
        assert!(presented_credential(&params(&[])).unwrap().is_none());

        let credential = presented_credential(&params(&[
            ("token-kind", "macaroon"),
            ("token64", "AQID"),
        ]))
        .unwrap()
        .unwrap();
        assert_eq!(credential, Credential::macaroon(vec![1, 2, 3]));

        let err = presented_credential(&params(&[("token64", "AQID")])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }
}
