//! Third-party caveat checking
//!
//! Decides whether a discharge request already carries proof of login or
//! whether the client must first visit the login page.

use crate::credential::Oven;
use crate::error::DischargeError;
use crate::models::{Credential, Declaration, InteractionInfo, MACAROON_KIND};
use crate::rendezvous::RendezvousPlace;
use crate::store::IdentityStore;
use crate::utils::logging::Logger;
use chrono::Utc;
use std::sync::Arc;

/// Condition a caveat asks the discharger to check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaveatCondition {
    /// `is-authenticated-user`
    AuthenticatedUser,
    /// `is-member-of <group>...`, satisfied by membership of any group
    MemberOf(Vec<String>),
}

impl CaveatCondition {
    /// # Errors
    ///
    /// Returns `BadRequest` for unrecognised or incomplete conditions
    pub fn parse(condition: &str) -> Result<Self, DischargeError> {
        let mut words = condition.split_whitespace();
        match words.next() {
            Some("is-authenticated-user") if words.next().is_none() => {
                Ok(CaveatCondition::AuthenticatedUser)
            }
            Some("is-member-of") => {
                let groups: Vec<String> = words.map(str::to_string).collect();
                if groups.is_empty() {
                    return Err(DischargeError::bad_request(
                        "is-member-of caveat names no groups",
                    ));
                }
                Ok(CaveatCondition::MemberOf(groups))
            }
            _ => Err(DischargeError::bad_request(format!(
                "caveat not recognized: {condition:?}"
            ))),
        }
    }
}

/// Inputs of a discharge request relevant to the caveat check
#[derive(Debug, Clone, Default)]
pub struct DischargeRequest {
    /// Proof of an earlier login, if the client presented one
    pub credential: Option<Credential>,
}

/// Decides between immediate discharge and interaction
#[derive(Clone)]
pub struct ThirdPartyCaveatChecker {
    oven: Arc<dyn Oven>,
    identity_store: Arc<dyn IdentityStore>,
    rendezvous: RendezvousPlace,
    location: String,
    logger: Logger,
}

impl ThirdPartyCaveatChecker {
    #[must_use]
    pub fn new(
        oven: Arc<dyn Oven>,
        identity_store: Arc<dyn IdentityStore>,
        rendezvous: RendezvousPlace,
        location: &str,
        logger: Logger,
    ) -> Self {
        Self {
            oven,
            identity_store,
            rendezvous,
            location: location.trim_end_matches('/').to_string(),
            logger,
        }
    }

    /// Check the caveat identified by `caveat_id` against `request`
    ///
    /// A valid credential satisfying the condition yields its declaration
    /// without touching the rendezvous store. Otherwise a discharge id is
    /// allocated and an `InteractionRequired` error returned, carrying the
    /// visit and wait URLs for that id.
    ///
    /// # Errors
    ///
    /// - `BadRequest` if the caveat cannot be decoded or is not recognised
    /// - `Unauthorized` if the logged in user does not meet the condition
    /// - `InteractionRequired` if no valid credential was presented
    /// - `Transient` if a store is unavailable
    pub async fn check(
        &self,
        request: &DischargeRequest,
        caveat_id: &[u8],
    ) -> Result<Declaration, DischargeError> {
        let caveat = self.oven.decode_caveat(caveat_id).await?;
        let condition = CaveatCondition::parse(&caveat.condition)?;

        if let Some(declaration) = self.verified_declaration(request).await {
            self.check_condition(&condition, &declaration).await?;
            return Ok(declaration);
        }

        let id = self
            .rendezvous
            .new_rendezvous()
            .await
            .map_err(|e| e.context("cannot start interaction"))?;
        self.logger
            .debug(format_args!("interaction required, discharge id {id}"));

        Err(DischargeError::interaction_required(
            "interaction required",
            InteractionInfo {
                visit_url: format!("{}/login?discharge-id={id}", self.location),
                wait_url: format!("{}/wait?discharge-id={id}", self.location),
            },
        ))
    }

    async fn verified_declaration(&self, request: &DischargeRequest) -> Option<Declaration> {
        let credential = request.credential.as_ref()?;
        if credential.kind != MACAROON_KIND {
            self.logger.debug(format_args!(
                "ignoring credential of unsupported kind {:?}",
                credential.kind
            ));
            return None;
        }
        match self.oven.verify(&credential.value, Utc::now()).await {
            Ok(declaration) => Some(declaration),
            Err(e) => {
                self.logger
                    .debug(format_args!("ignoring presented credential: {e}"));
                None
            }
        }
    }

    async fn check_condition(
        &self,
        condition: &CaveatCondition,
        declaration: &Declaration,
    ) -> Result<(), DischargeError> {
        let CaveatCondition::MemberOf(groups) = condition else {
            return Ok(());
        };

        let identity = self
            .identity_store
            .identity(&declaration.username)
            .await
            .map_err(|e| DischargeError::from(e).context("cannot check group membership"))?;

        match identity {
            Some(identity) if identity.is_member_of_any(groups) => Ok(()),
            _ => Err(DischargeError::unauthorized(format!(
                "user {} is not a member of a required group",
                declaration.username
            ))),
        }
    }
}

impl std::fmt::Debug for ThirdPartyCaveatChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThirdPartyCaveatChecker")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{HmacOven, CREDENTIAL_VALIDITY};
    use crate::error::ErrorKind;
    use crate::models::Identity;
    use crate::rendezvous::RendezvousConfig;
    use crate::store::{KeyValueStore, MemoryIdentityStore, MemoryKeyValueStore};
    use crate::testing::mock::FailureSwitch;
    use crate::testing::{FailingIdentityStore, FailingKeyValueStore};

    const LOCATION: &str = "https://svc";

    struct Setup {
        checker: ThirdPartyCaveatChecker,
        oven: Arc<HmacOven>,
        slots: Arc<MemoryKeyValueStore>,
    }

    async fn setup() -> Setup {
        let oven = Arc::new(HmacOven::new(b"checker test secret").unwrap());
        let identities = Arc::new(MemoryIdentityStore::new());
        identities
            .update_identity(&Identity {
                groups: vec!["admin".to_string()],
                ..Identity::new("alice")
            })
            .await
            .unwrap();
        let slots = Arc::new(MemoryKeyValueStore::new());
        let rendezvous =
            RendezvousPlace::new(slots.clone(), RendezvousConfig::default(), Logger::default());
        let checker = ThirdPartyCaveatChecker::new(
            oven.clone(),
            identities,
            rendezvous,
            LOCATION,
            Logger::default(),
        );
        Setup {
            checker,
            oven,
            slots,
        }
    }

    async fn login(oven: &HmacOven, username: &str) -> DischargeRequest {
        let value = oven
            .mint(
                &Declaration {
                    username: username.to_string(),
                },
                Utc::now() + CREDENTIAL_VALIDITY,
            )
            .await
            .unwrap();
        DischargeRequest {
            credential: Some(Credential::macaroon(value)),
        }
    }

    #[test]
    fn test_parse_conditions() {
        assert_eq!(
            CaveatCondition::parse("is-authenticated-user").unwrap(),
            CaveatCondition::AuthenticatedUser
        );
        assert_eq!(
            CaveatCondition::parse("is-member-of a b").unwrap(),
            CaveatCondition::MemberOf(vec!["a".to_string(), "b".to_string()])
        );
        assert!(CaveatCondition::parse("is-member-of").is_err());
        assert!(CaveatCondition::parse("is-authenticated-user extra").is_err());
        assert!(CaveatCondition::parse("something-else").is_err());
    }

    #[tokio::test]
    async fn test_valid_credential_discharges_without_rendezvous() {
        let s = setup().await;
        let caveat_id = s.oven.encode_caveat("is-authenticated-user").unwrap();
        let request = login(&s.oven, "alice").await;

        let declaration = s.checker.check(&request, &caveat_id).await.unwrap();
        assert_eq!(declaration.username, "alice");
        assert!(s.slots.is_empty().await);
    }

    #[tokio::test]
    async fn test_missing_credential_requires_interaction() {
        let s = setup().await;
        let caveat_id = s.oven.encode_caveat("is-authenticated-user").unwrap();

        let err = s
            .checker
            .check(&DischargeRequest::default(), &caveat_id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InteractionRequired);

        let info = err.interaction().unwrap();
        let id = info
            .visit_url
            .strip_prefix("https://svc/login?discharge-id=")
            .unwrap();
        assert_eq!(info.wait_url, format!("https://svc/wait?discharge-id={id}"));
        assert_eq!(s.slots.len().await, 1);
    }

    #[tokio::test]
    async fn test_forged_credential_requires_interaction() {
        let s = setup().await;
        let caveat_id = s.oven.encode_caveat("is-authenticated-user").unwrap();
        let forger = HmacOven::new(b"not the service secret").unwrap();
        let request = login(&forger, "alice").await;

        let err = s.checker.check(&request, &caveat_id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InteractionRequired);
    }

    #[tokio::test]
    async fn test_group_membership() {
        let s = setup().await;
        let admins = s.oven.encode_caveat("is-member-of staff admin").unwrap();
        let staff = s.oven.encode_caveat("is-member-of staff").unwrap();
        let request = login(&s.oven, "alice").await;

        assert!(s.checker.check(&request, &admins).await.is_ok());
        let err = s.checker.check(&request, &staff).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);

        let unknown = login(&s.oven, "mallory").await;
        let err = s.checker.check(&unknown, &admins).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn test_bad_caveats() {
        let s = setup().await;
        let err = s
            .checker
            .check(&DischargeRequest::default(), b"undecodable")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);

        let unknown = s.oven.encode_caveat("is-root").unwrap();
        let err = s
            .checker
            .check(&DischargeRequest::default(), &unknown)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert!(s.slots.is_empty().await);
    }

    fn checker_with(
        oven: Arc<HmacOven>,
        identities: Arc<dyn IdentityStore>,
        slots: Arc<dyn KeyValueStore>,
    ) -> ThirdPartyCaveatChecker {
        let rendezvous =
            RendezvousPlace::new(slots, RendezvousConfig::default(), Logger::default());
        ThirdPartyCaveatChecker::new(oven, identities, rendezvous, LOCATION, Logger::default())
    }

    #[tokio::test]
    async fn test_rendezvous_store_outage_is_transient() {
        let oven = Arc::new(HmacOven::new(b"checker test secret").unwrap());
        let checker = checker_with(
            oven.clone(),
            Arc::new(MemoryIdentityStore::new()),
            Arc::new(FailingKeyValueStore::new(FailureSwitch::new(true))),
        );
        let caveat_id = oven.encode_caveat("is-authenticated-user").unwrap();

        let err = checker
            .check(&DischargeRequest::default(), &caveat_id)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(err.interaction().is_none());
    }

    #[tokio::test]
    async fn test_identity_store_outage_fails_group_check_as_transient() {
        let oven = Arc::new(HmacOven::new(b"checker test secret").unwrap());
        let slots = Arc::new(MemoryKeyValueStore::new());
        let checker = checker_with(
            oven.clone(),
            Arc::new(FailingIdentityStore::new(FailureSwitch::new(true))),
            slots.clone(),
        );
        let caveat_id = oven.encode_caveat("is-member-of admin").unwrap();
        let request = login(&oven, "alice").await;

        let err = checker.check(&request, &caveat_id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(slots.is_empty().await);
    }
}
