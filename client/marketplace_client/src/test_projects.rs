use crate::testing::{project_fixture, Harness};
use crate::types::{Principal, ProjectInput, Role};
use crate::{ClientError, PreconditionError};

fn input(title: &str, budget: u64) -> ProjectInput {
    ProjectInput {
        title: title.to_string(),
        description: "Brand refresh for a small studio".to_string(),
        budget,
    }
}

#[tokio::test]
async fn requester_creates_project() {
    let h = Harness::new().await;
    let alice = Principal::from("alice");
    h.ledger.register(&alice, Role::Requester).await;
    h.sign_in_as("alice").await.unwrap();

    let orchestrator = h.marketplace.orchestrator();
    let project = orchestrator
        .create_project(input("Logo design", 2_500))
        .await
        .unwrap();
    assert_eq!(project.owner, alice);
    assert!(project.applicants.is_empty());

    let binding = h.marketplace.binding().await;
    assert_eq!(binding.cache().projects().await.unwrap(), vec![project.clone()]);
    assert_eq!(binding.cache().my_projects().await.unwrap(), vec![project]);
}

#[tokio::test]
async fn create_project_checks_input_locally() {
    let h = Harness::new().await;
    h.ledger
        .register(&Principal::from("alice"), Role::Requester)
        .await;
    h.sign_in_as("alice").await.unwrap();
    let orchestrator = h.marketplace.orchestrator();

    assert!(matches!(
        orchestrator.create_project(input("  ", 100)).await,
        Err(ClientError::Precondition(PreconditionError::EmptyField("title")))
    ));
    assert!(matches!(
        orchestrator.create_project(input("Logo", 0)).await,
        Err(ClientError::Precondition(PreconditionError::ZeroAmount))
    ));
    assert_eq!(h.ledger.call_count("createProject").await, 0);
}

#[tokio::test]
async fn provider_cannot_create_project() {
    let h = Harness::new().await;
    h.ledger.register(&Principal::from("bob"), Role::Provider).await;
    h.sign_in_as("bob").await.unwrap();

    assert!(matches!(
        h.marketplace
            .orchestrator()
            .create_project(input("Logo", 100))
            .await,
        Err(ClientError::Precondition(PreconditionError::WrongRole {
            required: Role::Requester
        }))
    ));
}

#[tokio::test]
async fn provider_applies_once() {
    let h = Harness::new().await;
    let alice = Principal::from("alice");
    let bob = Principal::from("bob");
    h.ledger.register(&bob, Role::Provider).await;
    h.ledger.insert_project(project_fixture(7, &alice)).await;
    h.sign_in_as("bob").await.unwrap();

    let orchestrator = h.marketplace.orchestrator();
    orchestrator.apply_to_project(7).await.unwrap();

    let binding = h.marketplace.binding().await;
    assert_eq!(binding.cache().applicants(7).await, Some(vec![bob.clone()]));
    assert_eq!(binding.cache().my_applications().await.unwrap().len(), 1);
    assert!(binding.cache().has_applied(7, &bob).await);

    assert!(matches!(
        orchestrator.apply_to_project(7).await,
        Err(ClientError::Precondition(PreconditionError::AlreadyApplied(7)))
    ));
    assert_eq!(h.ledger.call_count("applyToProject").await, 1);
}

#[tokio::test]
async fn rejected_application_surfaces_backend_message() {
    let h = Harness::new().await;
    let alice = Principal::from("alice");
    let carol = Principal::from("carol");
    let bob = Principal::from("bob");
    h.ledger.register(&bob, Role::Provider).await;
    let mut project = project_fixture(7, &alice);
    project.applicants.push(carol.clone());
    h.ledger.insert_project(project).await;
    h.sign_in_as("bob").await.unwrap();

    let orchestrator = h.marketplace.orchestrator();
    orchestrator.load_applicants(7).await.unwrap();

    h.ledger.reject_next("applyToProject", "AlreadyApplied").await;
    let err = orchestrator.apply_to_project(7).await.unwrap_err();
    assert!(matches!(err, ClientError::Rejected(ref m) if m == "AlreadyApplied"));
    assert_eq!(err.to_string(), "AlreadyApplied");
    assert_eq!(orchestrator.last_error().await.as_deref(), Some("AlreadyApplied"));

    let binding = h.marketplace.binding().await;
    assert_eq!(binding.cache().applicants(7).await, Some(vec![carol]));
}

#[tokio::test]
async fn requester_cannot_apply() {
    let h = Harness::new().await;
    let alice = Principal::from("alice");
    h.ledger.register(&alice, Role::Requester).await;
    h.ledger.insert_project(project_fixture(1, &alice)).await;
    h.sign_in_as("alice").await.unwrap();

    assert!(matches!(
        h.marketplace.orchestrator().apply_to_project(1).await,
        Err(ClientError::Precondition(PreconditionError::WrongRole {
            required: Role::Provider
        }))
    ));
}

#[tokio::test]
async fn owner_approves_applicant() {
    let h = Harness::new().await;
    let alice = Principal::from("alice");
    let bob = Principal::from("bob");
    h.ledger.register(&alice, Role::Requester).await;
    let mut project = project_fixture(3, &alice);
    project.applicants.push(bob.clone());
    h.ledger.insert_project(project).await;
    h.sign_in_as("alice").await.unwrap();

    h.marketplace
        .orchestrator()
        .approve_applicant(3, &bob)
        .await
        .unwrap();

    assert_eq!(h.ledger.project(3).await.unwrap().selected_provider, Some(bob.clone()));
    let cached = h.marketplace.binding().await.cache().project(3).await.unwrap();
    assert_eq!(cached.selected_provider, Some(bob));
}

#[tokio::test]
async fn approval_on_foreign_project_is_refused_locally() {
    let h = Harness::new().await;
    let alice = Principal::from("alice");
    let dana = Principal::from("dana");
    let bob = Principal::from("bob");
    h.ledger.register(&alice, Role::Requester).await;
    let mut project = project_fixture(4, &dana);
    project.applicants.push(bob.clone());
    h.ledger.insert_project(project).await;
    h.sign_in_as("alice").await.unwrap();

    let orchestrator = h.marketplace.orchestrator();
    orchestrator.load_projects().await.unwrap();
    assert!(matches!(
        orchestrator.approve_applicant(4, &bob).await,
        Err(ClientError::Precondition(PreconditionError::NotProjectOwner(4)))
    ));
    assert_eq!(h.ledger.call_count("approveApplicant").await, 0);
}

#[tokio::test]
async fn approving_non_applicant_is_rejected_by_backend() {
    let h = Harness::new().await;
    let alice = Principal::from("alice");
    h.ledger.register(&alice, Role::Requester).await;
    h.ledger.insert_project(project_fixture(5, &alice)).await;
    h.sign_in_as("alice").await.unwrap();

    let err = h
        .marketplace
        .orchestrator()
        .approve_applicant(5, &Principal::from("eve"))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "NotAnApplicant");
    assert_eq!(h.ledger.project(5).await.unwrap().selected_provider, None);
}

#[tokio::test]
async fn anonymous_reads_public_data_only() {
    let h = Harness::new().await;
    h.ledger
        .insert_project(project_fixture(1, &Principal::from("alice")))
        .await;
    let orchestrator = h.marketplace.orchestrator();

    assert_eq!(orchestrator.load_projects().await.unwrap().len(), 1);
    assert!(orchestrator.load_applicants(1).await.unwrap().is_empty());
    assert!(matches!(
        orchestrator.load_my_projects().await,
        Err(ClientError::Precondition(PreconditionError::NotAuthenticated))
    ));
    assert!(matches!(
        orchestrator.load_balance().await,
        Err(ClientError::Precondition(PreconditionError::NotAuthenticated))
    ));
    assert_eq!(h.ledger.call_count("getUserBalance").await, 0);
}

#[tokio::test]
async fn profile_lookup_caches_result() {
    let h = Harness::new().await;
    let alice = Principal::from("alice");
    h.ledger.register(&alice, Role::Requester).await;
    let orchestrator = h.marketplace.orchestrator();

    let profile = orchestrator.load_profile(&alice).await.unwrap();
    assert_eq!(profile.username.as_deref(), Some("alice"));
    assert_eq!(
        h.marketplace.binding().await.cache().profile(&alice).await,
        Some(profile)
    );

    let err = orchestrator
        .load_profile(&Principal::from("nobody"))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "ProfileNotFound");
}

#[tokio::test]
async fn unregistered_caller_is_told_to_register() {
    let h = Harness::new().await;
    h.sign_in_as("dana").await.unwrap();
    let orchestrator = h.marketplace.orchestrator();

    assert!(matches!(
        orchestrator.create_project(input("Logo", 100)).await,
        Err(ClientError::NotRegistered)
    ));
    assert!(matches!(
        orchestrator.apply_to_project(1).await,
        Err(ClientError::NotRegistered)
    ));
    assert_eq!(h.ledger.call_count("createProject").await, 0);
    assert_eq!(h.ledger.call_count("applyToProject").await, 0);
    assert_eq!(
        orchestrator.last_error().await,
        Some(ClientError::NotRegistered.to_string())
    );
}
