use super::helpers::RequestParams;
use crate::error::DischargeError;
use crate::idp::IdpRequest;
use crate::models::CompletionMode;
use crate::service::ServiceContainer;
use crate::utils::logging::Logger;
use crate::utils::redirect::validate_return_to;
use crate::utils::responses::ResponseBuilder;
use actix_web::{web, HttpRequest, HttpResponse};
use std::collections::HashMap;

/// Start an interactive login
///
/// `?discharge-id=` completes a waiting discharge directly;
/// `?return_to=&state=` sends the user agent back with a one-time code. The
/// choice is sealed into the provider login URL. With one provider the user
/// agent is redirected straight to it, otherwise the providers are listed.
///
/// # Errors
///
/// Returns an error if:
/// - Neither `discharge-id` nor `return_to` is given
/// - `return_to` is outside the service location
/// - No identity provider is configured
pub async fn login(
    query: web::Query<HashMap<String, String>>,
    services: web::Data<ServiceContainer>,
) -> Result<HttpResponse, DischargeError> {
    let params = RequestParams::new(query, None);
    let mode = completion_mode(&params, &services.location, &services.logger.child("login"))?;
    let sealed = services
        .codec
        .seal(&mode)
        .map_err(|e| DischargeError::internal(format!("cannot seal login state: {e}")))?;

    let mut providers = services.registry.iter();
    match (providers.next(), providers.next()) {
        (None, _) => Err(DischargeError::not_found("no identity providers configured")),
        (Some(provider), None) => Ok(ResponseBuilder::see_other(&provider.login_url(&sealed))),
        (Some(_), Some(_)) => Ok(HttpResponse::Ok().json(services.registry.choices(&sealed))),
    }
}

fn completion_mode(
    params: &RequestParams,
    location: &str,
    logger: &Logger,
) -> Result<CompletionMode, DischargeError> {
    if let Some(discharge_id) = params.get("discharge-id") {
        return Ok(CompletionMode::Direct {
            discharge_id: discharge_id.to_string(),
        });
    }
    if let Some(return_to) = params.get("return_to") {
        validate_return_to(location, return_to, logger)?;
        return Ok(CompletionMode::Redirect {
            return_to: return_to.to_string(),
            state: params.get("state").unwrap_or_default().to_string(),
        });
    }
    Err(DischargeError::bad_request(
        "missing discharge-id or return_to parameter",
    ))
}

/// Forward `/login/{provider}/...` to the named identity provider
///
/// # Errors
///
/// Returns a `NotFound` error if no provider has that name
pub async fn provider_login(
    req: HttpRequest,
    path: web::Path<(String, String)>,
    query: web::Query<HashMap<String, String>>,
    form: Option<web::Form<HashMap<String, String>>>,
    services: web::Data<ServiceContainer>,
) -> Result<HttpResponse, DischargeError> {
    let (name, rest) = path.into_inner();
    let provider = services
        .registry
        .get(&name)
        .ok_or_else(|| DischargeError::not_found(format!("identity provider {name} not found")))?;

    let request = IdpRequest {
        method: req.method().clone(),
        path: format!("/{}", rest.trim_start_matches('/')),
        query: query.into_inner(),
        form: form.map(web::Form::into_inner).unwrap_or_default(),
    };
    Ok(provider.handle(request).await)
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
    fn test_completion_mode_selection() {
        let mode = completion_mode(&params(&[("discharge-id", "abc123")]), "https://svc", &Logger::default()).unwrap();
        assert_eq!(
            mode,
            CompletionMode::Direct {
                discharge_id: "abc123".to_string()
            }
        );

        let mode = completion_mode(
            &params(&[("return_to", "https://svc/x"), ("state", "s1")]),
            "https://svc",
            &Logger::default(),
        )
        .unwrap();
        assert_eq!(
            mode,
            CompletionMode::Redirect {
                return_to: "https://svc/x".to_string(),
                state: "s1".to_string()
            }
        );
    }

    #[test]
    fn test_completion_mode_rejects_bad_input() {
        let err = completion_mode(&params(&[]), "https://svc", &Logger::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);

        let err = completion_mode(&params(&[("return_to", "https://evil.example/")]), "https://svc", &Logger::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }
}
