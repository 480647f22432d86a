use std::sync::Arc;

use crate::cache::CacheState;
use crate::roles::{Capabilities, RoleState};
use crate::testing::{identity, project_fixture, Harness};
use crate::types::{Principal, ProviderInfo, RegistrationInput, Role, RoleInfo};
use crate::{ClientError, PreconditionError};

#[tokio::test]
async fn starts_anonymous_and_initialized() {
    let h = Harness::new().await;
    let session = h.marketplace.sessions().session().await;
    assert!(session.initialized);
    assert!(!session.authenticated);

    let binding = h.marketplace.binding().await;
    assert!(binding.principal().is_none());
    assert_eq!(h.marketplace.roles().state().await, RoleState::NotRegistered);
    assert_eq!(h.marketplace.roles().capabilities().await, Capabilities::default());
}

#[tokio::test]
async fn initialize_restores_persisted_identity_and_role() {
    let h = Harness::new().await;
    let alice = Principal::from("alice");
    h.ledger.register(&alice, Role::Requester).await;
    h.provider.persist(identity("alice")).await;

    // A second marketplace over the same provider picks the identity up.
    let restored = crate::Marketplace::new(
        &crate::Config::new("memory://ledger", "marketplace"),
        h.provider.clone(),
        h.connector.clone(),
    );
    let session = restored.initialize().await.unwrap();
    assert!(session.authenticated);
    assert_eq!(restored.binding().await.principal(), Some(&alice));
    assert!(restored.roles().is_requester().await);
}

#[tokio::test]
async fn identity_switch_never_shows_previous_account() {
    let h = Harness::new().await;
    let alice = Principal::from("alice");
    let bob = Principal::from("bob");
    h.ledger.register(&alice, Role::Requester).await;
    h.ledger.register(&bob, Role::Provider).await;
    h.ledger.credit(&alice, 9_000).await;
    h.ledger.credit(&bob, 10).await;

    h.sign_in_as("alice").await.unwrap();
    assert!(h.marketplace.roles().is_requester().await);
    h.marketplace.orchestrator().load_balance().await.unwrap();
    let alice_epoch = h.marketplace.binding().await.epoch();

    h.marketplace.sign_out().await.unwrap();
    let anonymous = h.marketplace.binding().await;
    assert!(anonymous.principal().is_none());
    assert!(anonymous.epoch() > alice_epoch);
    assert_eq!(anonymous.cache().snapshot().await, CacheState::default());
    assert_eq!(h.marketplace.roles().account().await, None);

    h.sign_in_as("bob").await.unwrap();
    let account = h.marketplace.roles().account().await.unwrap();
    assert_eq!(account.principal, bob);
    assert_eq!(account.role, Role::Provider);
    assert!(h.marketplace.roles().is_provider().await);
    assert!(!h.marketplace.roles().is_requester().await);

    // Nothing from alice's session survives into bob's.
    let binding = h.marketplace.binding().await;
    assert_eq!(binding.cache().balance().await, None);
    assert_eq!(h.marketplace.orchestrator().load_balance().await.unwrap(), 10);
}

#[tokio::test]
async fn gates_close_until_resolution_completes() {
    let h = Harness::new().await;
    let alice = Principal::from("alice");
    h.ledger.register(&alice, Role::Requester).await;

    let gate = h.ledger.hold("isUserRegistered").await;
    h.provider.push_login(Ok(identity("alice"))).await;
    let marketplace = h.marketplace.clone();
    let sign_in = tokio::spawn(async move { marketplace.sign_in().await });

    assert!(h.ledger.wait_for_calls("isUserRegistered", 1).await);
    assert_eq!(h.marketplace.binding().await.principal(), Some(&alice));
    assert_eq!(h.marketplace.roles().state().await, RoleState::Unresolved);
    assert_eq!(h.marketplace.roles().capabilities().await, Capabilities::default());

    gate.notify_one();
    sign_in.await.unwrap().unwrap();
    assert!(h.marketplace.roles().capabilities().await.can_create_project);
}

#[tokio::test]
async fn sign_out_during_in_flight_deposit_does_not_leak() {
    let h = Harness::new().await;
    let alice = Principal::from("alice");
    h.ledger.register(&alice, Role::Requester).await;
    h.ledger.credit(&alice, 1_000).await;
    h.ledger.insert_project(project_fixture(1, &alice)).await;

    h.sign_in_as("alice").await.unwrap();
    let alice_binding = h.marketplace.binding().await;

    let gate = h.ledger.hold("depositToEscrow").await;
    let marketplace = h.marketplace.clone();
    let deposit =
        tokio::spawn(async move { marketplace.orchestrator().deposit_to_escrow(1, 400).await });
    assert!(h.ledger.wait_for_calls("depositToEscrow", 1).await);

    h.marketplace.sign_out().await.unwrap();
    gate.notify_one();
    deposit.await.unwrap().unwrap();

    // The backend applied the deposit and the refresh landed on alice's
    // retired binding only.
    assert_eq!(h.ledger.escrow_of(1).await, 400);
    assert_eq!(alice_binding.cache().escrow(1).await, Some(400));

    let current = h.marketplace.binding().await;
    assert!(current.principal().is_none());
    assert_eq!(current.cache().snapshot().await, CacheState::default());
}

#[tokio::test]
async fn unusable_identity_falls_back_to_anonymous_client() {
    let h = Harness::new().await;
    h.ledger
        .insert_project(project_fixture(1, &Principal::from("carol")))
        .await;
    h.connector.refuse_identities(true);

    let session = h.sign_in_as("alice").await.unwrap();
    assert!(session.authenticated);
    assert!(h.marketplace.config_warning().await.is_some());
    assert!(h.marketplace.binding().await.principal().is_none());

    // Reads keep working, gated operations do not.
    assert_eq!(h.marketplace.orchestrator().load_projects().await.unwrap().len(), 1);
    assert!(matches!(
        h.marketplace.orchestrator().apply_to_project(1).await,
        Err(ClientError::Precondition(PreconditionError::NotAuthenticated))
    ));

    h.connector.refuse_identities(false);
    h.marketplace.sign_out().await.unwrap();
    assert!(h.marketplace.config_warning().await.is_none());
}

#[tokio::test]
async fn resolution_transport_failure_is_retryable() {
    let h = Harness::new().await;
    let alice = Principal::from("alice");
    h.ledger.register(&alice, Role::Requester).await;
    h.ledger.fail_next("isUserRegistered", "connection reset").await;

    h.sign_in_as("alice").await.unwrap();
    assert_eq!(h.marketplace.roles().state().await, RoleState::Unresolved);
    assert!(h.marketplace.orchestrator().last_error().await.is_some());

    let state = h.marketplace.roles().resolve().await.unwrap();
    assert_eq!(state.role(), Some(Role::Requester));
    assert_eq!(h.marketplace.orchestrator().last_error().await, None);
}

#[tokio::test]
async fn unreadable_account_is_distinct_from_unregistered() {
    let h = Harness::new().await;
    let alice = Principal::from("alice");
    h.ledger.register(&alice, Role::Requester).await;
    h.ledger.reject_next("getMyAccount", "AccountLocked").await;

    h.sign_in_as("alice").await.unwrap();
    let state = h.marketplace.roles().state().await;
    assert_eq!(state, RoleState::Unreadable("AccountLocked".into()));
    assert!(state.is_registered());
    assert_eq!(h.marketplace.roles().capabilities().await, Capabilities::default());
    assert_eq!(
        h.marketplace.orchestrator().last_error().await.as_deref(),
        Some("AccountLocked")
    );

    assert!(matches!(
        h.marketplace.roles().resolve().await,
        Ok(RoleState::Registered(_))
    ));
}

#[tokio::test]
async fn registration_resolves_new_role() {
    let h = Harness::new().await;
    h.sign_in_as("dana").await.unwrap();
    assert_eq!(h.marketplace.roles().state().await, RoleState::NotRegistered);

    let account = h
        .marketplace
        .orchestrator()
        .register_user(RegistrationInput {
            role: Role::Provider,
            role_info: Some(RoleInfo::Provider(ProviderInfo {
                specializations: vec!["illustration".into()],
                hourly_rate: Some(80),
                ..Default::default()
            })),
            profile: None,
        })
        .await
        .unwrap();
    assert_eq!(account.principal, Principal::from("dana"));
    assert!(h.marketplace.roles().is_provider().await);

    let again = h
        .marketplace
        .orchestrator()
        .register_user(RegistrationInput {
            role: Role::Requester,
            role_info: None,
            profile: None,
        })
        .await;
    assert!(matches!(again, Err(ClientError::Rejected(ref m)) if m == "AlreadyRegistered"));
    assert!(h.marketplace.roles().is_provider().await);
}

#[tokio::test]
async fn registration_surfaces_unreadable_account() {
    let h = Harness::new().await;
    h.sign_in_as("dana").await.unwrap();
    h.ledger.reject_next("getMyAccount", "AccountLocked").await;

    let account = h
        .marketplace
        .orchestrator()
        .register_user(RegistrationInput {
            role: Role::Requester,
            role_info: None,
            profile: None,
        })
        .await
        .unwrap();
    assert_eq!(account.principal, Principal::from("dana"));

    assert_eq!(
        h.marketplace.roles().state().await,
        RoleState::Unreadable("AccountLocked".into())
    );
    assert_eq!(
        h.marketplace.orchestrator().last_error().await.as_deref(),
        Some("AccountLocked")
    );
}

#[tokio::test]
async fn sign_out_requires_session() {
    let h = Harness::new().await;
    let before = h.marketplace.binding().await.epoch();
    assert!(matches!(
        h.marketplace.sign_out().await,
        Err(ClientError::InvalidTransition { .. })
    ));
    assert_eq!(h.marketplace.binding().await.epoch(), before);
}

#[tokio::test]
async fn failed_sign_in_keeps_anonymous_binding() {
    let h = Harness::new().await;
    h.provider.push_login(Err("UserInterrupt".into())).await;
    let before = h.marketplace.binding().await;

    let err = h.marketplace.sign_in().await.unwrap_err();
    assert!(matches!(err, ClientError::Auth(_)));
    assert!(Arc::ptr_eq(&before, &h.marketplace.binding().await));
}
