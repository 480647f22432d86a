use crate::testing::{project_fixture, Harness};
use crate::types::{Principal, Role};
use crate::{ClientError, PreconditionError};

/// Alice (Requester, 1000 tokens) signed in and owning project 1.
async fn requester_with_project() -> (Harness, Principal) {
    let h = Harness::new().await;
    let alice = Principal::from("alice");
    h.ledger.register(&alice, Role::Requester).await;
    h.ledger.credit(&alice, 1_000).await;
    h.ledger.insert_project(project_fixture(1, &alice)).await;
    h.sign_in_as("alice").await.unwrap();
    (h, alice)
}

#[tokio::test]
async fn deposit_refreshes_from_backend() {
    let (h, _) = requester_with_project().await;
    h.marketplace
        .orchestrator()
        .deposit_to_escrow(1, 400)
        .await
        .unwrap();

    let calls = h.ledger.calls().await;
    let deposit = calls.iter().position(|m| m == "depositToEscrow").unwrap();
    let refresh = calls.iter().rposition(|m| m == "getEscrowBalance").unwrap();
    assert!(refresh > deposit);

    let binding = h.marketplace.binding().await;
    assert_eq!(binding.cache().escrow(1).await, Some(400));
    assert_eq!(binding.cache().balance().await, Some(600));
    assert_eq!(h.marketplace.orchestrator().last_error().await, None);
}

#[tokio::test]
async fn rejected_deposit_leaves_cache_untouched() {
    let (h, _) = requester_with_project().await;
    let orchestrator = h.marketplace.orchestrator();
    orchestrator.load_escrow_balance(1).await.unwrap();
    let refreshes = h.ledger.call_count("getEscrowBalance").await;

    h.ledger.reject_next("depositToEscrow", "EscrowFrozen").await;
    let err = orchestrator.deposit_to_escrow(1, 400).await.unwrap_err();
    assert!(matches!(err, ClientError::Rejected(ref m) if m == "EscrowFrozen"));
    assert_eq!(err.to_string(), "EscrowFrozen");

    let binding = h.marketplace.binding().await;
    assert_eq!(binding.cache().escrow(1).await, Some(0));
    assert_eq!(h.ledger.call_count("getEscrowBalance").await, refreshes);
    assert_eq!(orchestrator.last_error().await.as_deref(), Some("EscrowFrozen"));
}

#[tokio::test]
async fn local_checks_make_no_remote_call() {
    let (h, _) = requester_with_project().await;
    let orchestrator = h.marketplace.orchestrator();
    orchestrator.load_balance().await.unwrap();

    assert!(matches!(
        orchestrator.deposit_to_escrow(1, 5_000).await,
        Err(ClientError::Precondition(PreconditionError::InsufficientBalance {
            requested: 5_000,
            available: 1_000,
        }))
    ));
    assert!(matches!(
        orchestrator.deposit_to_escrow(1, 0).await,
        Err(ClientError::Precondition(PreconditionError::ZeroAmount))
    ));
    assert_eq!(h.ledger.call_count("depositToEscrow").await, 0);
    assert_eq!(h.ledger.balance_of(&Principal::from("alice")).await, 1_000);
}

#[tokio::test]
async fn unknown_balance_defers_to_backend() {
    let (h, _) = requester_with_project().await;
    let err = h
        .marketplace
        .orchestrator()
        .deposit_to_escrow(1, 5_000)
        .await
        .unwrap_err();
    assert!(err.is_rejection());
    assert_eq!(err.to_string(), "InsufficientBalance");
    assert_eq!(h.ledger.call_count("depositToEscrow").await, 1);
}

#[tokio::test]
async fn provider_cannot_touch_escrow() {
    let h = Harness::new().await;
    let bob = Principal::from("bob");
    h.ledger.register(&bob, Role::Provider).await;
    h.ledger.credit(&bob, 1_000).await;
    h.ledger.insert_project(project_fixture(1, &bob)).await;
    h.sign_in_as("bob").await.unwrap();

    let orchestrator = h.marketplace.orchestrator();
    for outcome in [
        orchestrator.deposit_to_escrow(1, 10).await,
        orchestrator.withdraw_escrow(1).await,
        orchestrator.release_funds(1, &bob).await,
    ] {
        assert!(matches!(
            outcome,
            Err(ClientError::Precondition(PreconditionError::WrongRole {
                required: Role::Requester
            }))
        ));
    }
    assert!(h
        .ledger
        .calls()
        .await
        .iter()
        .all(|m| !matches!(m.as_str(), "depositToEscrow" | "withdrawEscrow" | "releaseFunds")));
}

#[tokio::test]
async fn withdraw_returns_funds_to_owner() {
    let (h, alice) = requester_with_project().await;
    let orchestrator = h.marketplace.orchestrator();
    orchestrator.deposit_to_escrow(1, 400).await.unwrap();
    orchestrator.withdraw_escrow(1).await.unwrap();

    assert_eq!(h.ledger.balance_of(&alice).await, 1_000);
    let binding = h.marketplace.binding().await;
    assert_eq!(binding.cache().escrow(1).await, Some(0));
    assert_eq!(binding.cache().balance().await, Some(1_000));
}

#[tokio::test]
async fn withdraw_from_completed_project_is_refused_locally() {
    let (h, alice) = requester_with_project().await;
    let mut done = project_fixture(2, &alice);
    done.is_completed = true;
    h.ledger.insert_project(done).await;

    let orchestrator = h.marketplace.orchestrator();
    orchestrator.load_projects().await.unwrap();
    assert!(matches!(
        orchestrator.withdraw_escrow(2).await,
        Err(ClientError::Precondition(PreconditionError::ProjectCompleted(2)))
    ));
    assert_eq!(h.ledger.call_count("withdrawEscrow").await, 0);
}

#[tokio::test]
async fn release_pays_selected_provider() {
    let (h, alice) = requester_with_project().await;
    let bob = Principal::from("bob");
    let mut project = project_fixture(2, &alice);
    project.applicants.push(bob.clone());
    project.selected_provider = Some(bob.clone());
    h.ledger.insert_project(project).await;

    let orchestrator = h.marketplace.orchestrator();
    orchestrator.deposit_to_escrow(2, 700).await.unwrap();
    orchestrator.load_projects().await.unwrap();
    orchestrator.release_funds(2, &bob).await.unwrap();

    assert_eq!(h.ledger.balance_of(&bob).await, 700);
    assert!(h.ledger.project(2).await.unwrap().is_completed);

    let binding = h.marketplace.binding().await;
    assert_eq!(binding.cache().escrow(2).await, Some(0));
    assert!(binding.cache().project(2).await.unwrap().is_completed);
}

#[tokio::test]
async fn release_checks_selected_provider_locally() {
    let (h, alice) = requester_with_project().await;
    let bob = Principal::from("bob");
    let carol = Principal::from("carol");
    let mut selected = project_fixture(2, &alice);
    selected.selected_provider = Some(bob.clone());
    h.ledger.insert_project(selected).await;

    let orchestrator = h.marketplace.orchestrator();
    orchestrator.load_projects().await.unwrap();

    assert!(matches!(
        orchestrator.release_funds(2, &carol).await,
        Err(ClientError::Precondition(PreconditionError::ProviderMismatch(2)))
    ));
    assert!(matches!(
        orchestrator.release_funds(1, &bob).await,
        Err(ClientError::Precondition(PreconditionError::NoProviderSelected(1)))
    ));

    orchestrator.load_escrow_balance(2).await.unwrap();
    assert!(matches!(
        orchestrator.release_funds(2, &bob).await,
        Err(ClientError::Precondition(PreconditionError::EmptyEscrow(2)))
    ));
    assert_eq!(h.ledger.call_count("releaseFunds").await, 0);
}

#[tokio::test]
async fn rejected_release_keeps_escrow_and_project() {
    let (h, alice) = requester_with_project().await;
    let bob = Principal::from("bob");
    let mut project = project_fixture(2, &alice);
    project.selected_provider = Some(bob.clone());
    h.ledger.insert_project(project).await;

    let orchestrator = h.marketplace.orchestrator();
    orchestrator.deposit_to_escrow(2, 300).await.unwrap();
    orchestrator.load_projects().await.unwrap();

    h.ledger.reject_next("releaseFunds", "ReleaseLocked").await;
    let err = orchestrator.release_funds(2, &bob).await.unwrap_err();
    assert_eq!(err.to_string(), "ReleaseLocked");

    let binding = h.marketplace.binding().await;
    assert_eq!(binding.cache().escrow(2).await, Some(300));
    assert!(!binding.cache().project(2).await.unwrap().is_completed);
    assert_eq!(h.ledger.balance_of(&bob).await, 0);
}

#[tokio::test]
async fn transport_failure_refetches_affected_entries() {
    let (h, _) = requester_with_project().await;
    h.ledger.fail_next("depositToEscrow", "timed out").await;

    let err = h
        .marketplace
        .orchestrator()
        .deposit_to_escrow(1, 400)
        .await
        .unwrap_err();
    assert!(err.is_transport());

    // Outcome unknown, so the entries come from the backend rather than
    // from the attempted amount.
    let binding = h.marketplace.binding().await;
    assert_eq!(h.ledger.call_count("getEscrowBalance").await, 1);
    assert_eq!(binding.cache().escrow(1).await, Some(0));
    assert_eq!(binding.cache().balance().await, Some(1_000));
}

#[tokio::test]
async fn failed_refresh_drops_stale_entry() {
    let (h, _) = requester_with_project().await;
    let orchestrator = h.marketplace.orchestrator();
    orchestrator.load_escrow_balance(1).await.unwrap();

    h.ledger.fail_next("depositToEscrow", "timed out").await;
    h.ledger.fail_next("getEscrowBalance", "timed out").await;
    assert!(orchestrator.deposit_to_escrow(1, 400).await.is_err());

    let binding = h.marketplace.binding().await;
    assert_eq!(binding.cache().escrow(1).await, None);
    assert!(orchestrator.last_error().await.is_some());

    assert_eq!(orchestrator.load_escrow_balance(1).await.unwrap(), 0);
}

#[tokio::test]
async fn rejected_withdraw_leaves_cache_untouched() {
    let (h, alice) = requester_with_project().await;
    let orchestrator = h.marketplace.orchestrator();
    orchestrator.deposit_to_escrow(1, 400).await.unwrap();
    let refreshes = h.ledger.call_count("getEscrowBalance").await;

    h.ledger.reject_next("withdrawEscrow", "WithdrawLocked").await;
    let err = orchestrator.withdraw_escrow(1).await.unwrap_err();
    assert!(matches!(err, ClientError::Rejected(ref m) if m == "WithdrawLocked"));
    assert_eq!(err.to_string(), "WithdrawLocked");

    let binding = h.marketplace.binding().await;
    assert_eq!(binding.cache().escrow(1).await, Some(400));
    assert_eq!(binding.cache().balance().await, Some(600));
    assert_eq!(h.ledger.call_count("getEscrowBalance").await, refreshes);
    assert_eq!(h.ledger.escrow_of(1).await, 400);
    assert_eq!(h.ledger.balance_of(&alice).await, 600);
    assert_eq!(orchestrator.last_error().await.as_deref(), Some("WithdrawLocked"));
}
