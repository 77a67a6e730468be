use super::common::*;
use std::sync::Arc;

use crate::workflows::exit_pass::clock::FixedClock;
use crate::workflows::exit_pass::domain::{
    MonthKey, PassCategory, PassDraft, PassId, PassStatus, StaffId, StaffRole, StudentId,
};
use crate::workflows::exit_pass::lifecycle::PassAction;
use crate::workflows::exit_pass::memory::{RecordingAuditLog, RecordingNotifier};
use crate::workflows::exit_pass::repository::{
    AuditActor, PassRepository, QuotaRepository, Recipient, RepositoryError,
};
use crate::workflows::exit_pass::validation::ValidationError;
use crate::workflows::exit_pass::{AccessDenied, ExitPassService, PassServiceError};

#[test]
fn submit_stores_pending_request_and_fans_out_to_approvers() {
    let (service, store, notifier, audit) = build_service();

    let pass = service
        .submit(short_draft(), &student("stu-1"))
        .expect("submission succeeds");

    assert_eq!(pass.status(), PassStatus::Pending);
    assert_eq!(pass.requested_at, now());
    assert_eq!(status_of(&store, &pass.id), PassStatus::Pending);

    let recipients: Vec<Recipient> = notifier
        .delivered()
        .into_iter()
        .map(|notification| notification.recipient)
        .collect();
    assert_eq!(recipients.len(), 3, "DSA, CSO and assistant CSO are told");
    assert!(recipients
        .iter()
        .all(|recipient| matches!(recipient, Recipient::Staff { .. })));

    let entries = audit.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, "pass_requested");
    assert_eq!(entries[0].actor, AuditActor::Student(StudentId("stu-1".to_string())));
    assert_eq!(entries[0].metadata["pass_type"], "short");
    assert_eq!(entries[0].metadata["destination"], "Town centre");
}

#[test]
fn submit_messages_guardian_only_when_requested_and_on_file() {
    let (service, _store, notifier, _audit) = build_service();

    let draft = PassDraft {
        notify_guardian: true,
        ..short_draft()
    };
    service
        .submit(draft.clone(), &student("stu-1"))
        .expect("submission succeeds");
    let guardians = notifier
        .delivered()
        .into_iter()
        .filter(|notification| matches!(notification.recipient, Recipient::Guardian { .. }))
        .count();
    assert_eq!(guardians, 1);

    let mut no_guardian = student("stu-2");
    no_guardian.guardian_phone = None;
    service
        .submit(draft, &no_guardian)
        .expect("missing guardian contact does not block submission");
    let guardians = notifier
        .delivered()
        .into_iter()
        .filter(|notification| matches!(notification.recipient, Recipient::Guardian { .. }))
        .count();
    assert_eq!(guardians, 1);
}

#[test]
fn submit_rejects_long_pass_without_return_and_stores_nothing() {
    let (service, store, notifier, _audit) = build_service();

    let draft = PassDraft {
        return_time: None,
        ..long_draft()
    };
    match service.submit(draft, &student("stu-1")) {
        Err(PassServiceError::Validation(ValidationError::MissingReturn)) => {}
        other => panic!("expected missing return, got {other:?}"),
    }
    assert!(store.list(None).expect("list succeeds").is_empty());
    assert!(notifier.delivered().is_empty());
}

#[test]
fn submit_for_unknown_student_is_not_found() {
    let (service, _store, _notifier, _audit) = build_service();

    match service.submit(short_draft(), &student("ghost")) {
        Err(PassServiceError::StudentNotFound(id)) => assert_eq!(id.0, "ghost"),
        other => panic!("expected unknown student, got {other:?}"),
    }
}

#[test]
fn third_short_pass_is_refused_after_two_grants() {
    let (service, store, _notifier, _audit) = build_service();
    let owner = student("stu-1");

    for _ in 0..2 {
        let pass = service.submit(short_draft(), &owner).expect("under limit");
        approve_fully(&service, &pass.id);
    }
    let counter = counter_of(&store, "stu-1").expect("counter exists");
    assert_eq!(counter.short_count, 2);
    assert_eq!(counter.long_count, 0);

    match service.submit(short_draft(), &owner) {
        Err(PassServiceError::QuotaExceeded(refusal)) => {
            assert_eq!(refusal.category, PassCategory::Short);
            assert_eq!(refusal.limit, 2);
            assert_eq!(refusal.used, 2);
            assert_eq!(refusal.remaining, 0);
            assert_eq!(
                refusal.reason,
                "You have reached the maximum of 2 short passes per month."
            );
        }
        other => panic!("expected quota refusal, got {other:?}"),
    }
    assert_eq!(store.list(None).expect("list succeeds").len(), 2);

    service
        .submit(long_draft(), &owner)
        .expect("long allowance is tracked separately");
}

#[test]
fn pending_requests_do_not_count_against_the_limit() {
    let (service, _store, _notifier, _audit) = build_service();
    let owner = student("stu-1");

    for _ in 0..3 {
        service
            .submit(short_draft(), &owner)
            .expect("in-flight passes are not counted");
    }
}

#[test]
fn special_privilege_bypasses_limit_but_grants_are_still_counted() {
    let (service, store, _notifier, _audit) = build_service();
    let vip = privileged_student("stu-vip");

    for _ in 0..3 {
        let pass = service.submit(long_draft(), &vip).expect("privilege bypasses limit");
        approve_fully(&service, &pass.id);
    }

    let counter = counter_of(&store, "stu-vip").expect("counter exists");
    assert_eq!(counter.long_count, 3);
}

#[test]
fn dsa_approval_forwards_and_notifies_student_and_cso_tier() {
    let (service, _store, notifier, audit) = build_service();
    let pass = service
        .submit(short_draft(), &student("stu-1"))
        .expect("submission succeeds");
    let before = notifier.delivered().len();

    let updated = service
        .approve_as_dsa(&pass.id, &dsa(), Some("  ok to go  ".to_string()))
        .expect("dsa approval succeeds");

    assert_eq!(updated.status(), PassStatus::DsaApproved);
    let stamp = updated.dsa_approval().expect("dsa stamp");
    assert_eq!(stamp.by, dsa().id);
    assert_eq!(stamp.at, now());
    assert_eq!(stamp.comments.as_deref(), Some("ok to go"));
    assert!(updated.cso_approval().is_none());

    let fresh: Vec<Recipient> = notifier.delivered()[before..]
        .iter()
        .map(|notification| notification.recipient.clone())
        .collect();
    assert!(fresh.contains(&Recipient::Student {
        id: StudentId("stu-1".to_string())
    }));
    assert!(fresh.contains(&Recipient::Staff { id: cso().id }));
    assert!(fresh.contains(&Recipient::Staff {
        id: assistant_cso().id
    }));
    assert!(!fresh.contains(&Recipient::Staff { id: dsa().id }));

    let last = audit.entries().pop().expect("audit entry");
    assert_eq!(last.action, "pass_dsa_approved");
    assert_eq!(last.actor, AuditActor::Staff(dsa().id));
}

#[test]
fn cso_approval_requires_dsa_forwarding() {
    let (service, store, _notifier, _audit) = build_service();
    let pass = service
        .submit(short_draft(), &student("stu-1"))
        .expect("submission succeeds");

    match service.approve_as_cso(&pass.id, &cso(), None) {
        Err(PassServiceError::InvalidTransition { status, .. }) => {
            assert_eq!(status, PassStatus::Pending)
        }
        other => panic!("expected invalid transition, got {other:?}"),
    }
    assert_eq!(status_of(&store, &pass.id), PassStatus::Pending);
    assert!(counter_of(&store, "stu-1").is_none());
}

#[test]
fn wrong_roles_are_refused_before_state_is_checked() {
    let (service, store, _notifier, _audit) = build_service();
    let pass = service
        .submit(short_draft(), &student("stu-1"))
        .expect("submission succeeds");

    match service.approve_as_dsa(&pass.id, &porter(), None) {
        Err(PassServiceError::Unauthorized(AccessDenied::Role { action, role })) => {
            assert_eq!(action, PassAction::ApproveAsDsa);
            assert_eq!(role, StaffRole::Porter);
        }
        other => panic!("expected role refusal, got {other:?}"),
    }

    match service.approve_as_cso(&pass.id, &dsa(), None) {
        Err(PassServiceError::Unauthorized(AccessDenied::Role { role, .. })) => {
            assert_eq!(role, StaffRole::Dsa)
        }
        other => panic!("expected role refusal, got {other:?}"),
    }
    assert_eq!(status_of(&store, &pass.id), PassStatus::Pending);
}

#[test]
fn assistant_cso_grants_and_counts_once() {
    let (service, store, notifier, _audit) = build_service();
    let pass = service
        .submit(long_draft(), &student("stu-1"))
        .expect("submission succeeds");
    service
        .approve_as_dsa(&pass.id, &dsa(), None)
        .expect("dsa approval succeeds");

    let granted = service
        .approve_as_cso(&pass.id, &assistant_cso(), Some("safe travels".to_string()))
        .expect("assistant cso approval succeeds");

    assert_eq!(granted.status(), PassStatus::CsoApproved);
    assert_eq!(granted.dsa_approval().map(|stamp| &stamp.by), Some(&dsa().id));
    assert_eq!(
        granted.cso_approval().map(|stamp| &stamp.by),
        Some(&assistant_cso().id)
    );
    assert!(granted.rejection().is_none());

    let counter = counter_of(&store, "stu-1").expect("counter exists");
    assert_eq!(counter.long_count, 1);
    assert_eq!(counter.short_count, 0);

    let last = notifier.delivered().pop().expect("student notified");
    assert_eq!(last.title, "Pass approved");

    match service.approve_as_cso(&pass.id, &cso(), None) {
        Err(PassServiceError::InvalidTransition { status, .. }) => {
            assert_eq!(status, PassStatus::CsoApproved)
        }
        other => panic!("expected invalid transition, got {other:?}"),
    }
    assert_eq!(counter_of(&store, "stu-1").map(|c| c.long_count), Some(1));
}

#[test]
fn rejection_requires_a_reason() {
    let (service, store, _notifier, _audit) = build_service();
    let pass = service
        .submit(short_draft(), &student("stu-1"))
        .expect("submission succeeds");

    match service.reject(&pass.id, &dsa(), "   ") {
        Err(PassServiceError::Validation(ValidationError::BlankRejectionReason)) => {}
        other => panic!("expected blank reason error, got {other:?}"),
    }
    assert_eq!(status_of(&store, &pass.id), PassStatus::Pending);
}

#[test]
fn cso_rejection_after_forwarding_keeps_only_rejection_data() {
    let (service, store, notifier, audit) = build_service();
    let pass = service
        .submit(short_draft(), &student("stu-1"))
        .expect("submission succeeds");
    service
        .approve_as_dsa(&pass.id, &dsa(), None)
        .expect("dsa approval succeeds");

    let rejected = service
        .reject(&pass.id, &cso(), " Exams this week ")
        .expect("rejection succeeds");

    assert_eq!(rejected.status(), PassStatus::Rejected);
    let rejection = rejected.rejection().expect("rejection recorded");
    assert_eq!(rejection.by, cso().id);
    assert_eq!(rejection.by_role, StaffRole::Cso);
    assert_eq!(rejection.reason, "Exams this week");
    assert!(rejected.dsa_approval().is_none());
    assert!(rejected.cso_approval().is_none());
    assert!(counter_of(&store, "stu-1").is_none());

    let entries = audit.entries();
    let last = entries.last().expect("audit entry");
    assert_eq!(last.action, "pass_rejected");
    assert_eq!(last.metadata["role"], "CSO");
    assert_eq!(last.metadata["reason"], "Exams this week");
    assert!(entries
        .iter()
        .any(|entry| entry.action == "pass_dsa_approved"));

    let message = notifier.delivered().pop().expect("student notified");
    assert_eq!(message.title, "Pass rejected");
    assert!(message.body.contains("Exams this week"));

    match service.reject(&pass.id, &dsa(), "again") {
        Err(PassServiceError::InvalidTransition { status, .. }) => {
            assert_eq!(status, PassStatus::Rejected)
        }
        other => panic!("expected invalid transition, got {other:?}"),
    }
}

#[test]
fn gate_movement_follows_check_out_then_check_in() {
    let (service, _store, _notifier, audit) = build_service();
    let pass = service
        .submit(short_draft(), &student("stu-1"))
        .expect("submission succeeds");

    match service.check_out(&pass.id, &porter()) {
        Err(PassServiceError::InvalidTransition { status, .. }) => {
            assert_eq!(status, PassStatus::Pending)
        }
        other => panic!("expected invalid transition, got {other:?}"),
    }

    approve_fully(&service, &pass.id);

    match service.check_in(&pass.id, &security()) {
        Err(PassServiceError::InvalidTransition { .. }) => {}
        other => panic!("check-in before check-out must fail, got {other:?}"),
    }

    let out = service
        .check_out(&pass.id, &porter())
        .expect("porter checks out");
    let movement = out.movement().expect("movement present");
    assert_eq!(
        movement.checked_out.as_ref().map(|stamp| &stamp.by),
        Some(&porter().id)
    );
    assert!(movement.checked_in.is_none());

    match service.check_out(&pass.id, &security()) {
        Err(PassServiceError::InvalidTransition { .. }) => {}
        other => panic!("second check-out must fail, got {other:?}"),
    }

    let back = service
        .check_in(&pass.id, &security())
        .expect("security checks in");
    assert_eq!(back.status(), PassStatus::CsoApproved);
    let movement = back.movement().expect("movement present");
    assert_eq!(
        movement.checked_in.as_ref().map(|stamp| &stamp.by),
        Some(&security().id)
    );

    let actions: Vec<String> = audit
        .entries()
        .into_iter()
        .map(|entry| entry.action)
        .collect();
    assert!(actions.ends_with(&["pass_checked_out".to_string(), "pass_checked_in".to_string()]));
}

#[test]
fn dsa_cannot_record_gate_movement() {
    let (service, _store, _notifier, _audit) = build_service();
    let pass = service
        .submit(short_draft(), &student("stu-1"))
        .expect("submission succeeds");
    approve_fully(&service, &pass.id);

    match service.check_out(&pass.id, &dsa()) {
        Err(PassServiceError::Unauthorized(AccessDenied::Role { action, .. })) => {
            assert_eq!(action, PassAction::CheckOut)
        }
        other => panic!("expected role refusal, got {other:?}"),
    }
}

#[test]
fn withdraw_removes_pending_pass_for_its_owner_only() {
    let (service, store, _notifier, audit) = build_service();
    let pass = service
        .submit(short_draft(), &student("stu-1"))
        .expect("submission succeeds");

    match service.withdraw(&pass.id, &StudentId("stu-2".to_string())) {
        Err(PassServiceError::Unauthorized(AccessDenied::NotOwner { .. })) => {}
        other => panic!("expected ownership refusal, got {other:?}"),
    }

    service
        .withdraw(&pass.id, &StudentId("stu-1".to_string()))
        .expect("owner withdraws");
    assert!(store.fetch(&pass.id).expect("fetch succeeds").is_none());
    assert_eq!(
        audit.entries().last().map(|entry| entry.action.as_str()),
        Some("pass_withdrawn")
    );

    match service.get(&pass.id) {
        Err(PassServiceError::PassNotFound(_)) => {}
        other => panic!("expected not found, got {other:?}"),
    }
}

#[test]
fn withdraw_after_dsa_decision_is_refused() {
    let (service, store, _notifier, _audit) = build_service();
    let pass = service
        .submit(short_draft(), &student("stu-1"))
        .expect("submission succeeds");
    service
        .approve_as_dsa(&pass.id, &dsa(), None)
        .expect("dsa approval succeeds");

    match service.withdraw(&pass.id, &StudentId("stu-1".to_string())) {
        Err(PassServiceError::InvalidTransition { status, .. }) => {
            assert_eq!(status, PassStatus::DsaApproved)
        }
        other => panic!("expected invalid transition, got {other:?}"),
    }
    assert_eq!(status_of(&store, &pass.id), PassStatus::DsaApproved);
}

#[test]
fn failed_counter_write_reports_grant_not_recorded_without_rollback() {
    let store = Arc::new(CounterOutageStore {
        inner: seeded_store(),
    });
    let service = ExitPassService::with_clock(
        store.clone(),
        Arc::new(RecordingNotifier::default()),
        Arc::new(RecordingAuditLog::default()),
        Arc::new(FixedClock(now())),
    );
    let pass = service
        .submit(short_draft(), &student("stu-1"))
        .expect("submission succeeds");
    service
        .approve_as_dsa(&pass.id, &dsa(), None)
        .expect("dsa approval succeeds");

    match service.approve_as_cso(&pass.id, &cso(), None) {
        Err(PassServiceError::GrantNotRecorded {
            month,
            category,
            source,
            ..
        }) => {
            assert_eq!(month, march());
            assert_eq!(category, PassCategory::Short);
            assert!(matches!(source, RepositoryError::Unavailable(_)));
        }
        other => panic!("expected grant not recorded, got {other:?}"),
    }
    assert_eq!(status_of(&store.inner, &pass.id), PassStatus::CsoApproved);
}

#[test]
fn side_effect_failures_do_not_block_transitions() {
    let store = Arc::new(seeded_store());
    let service = ExitPassService::with_clock(
        store.clone(),
        Arc::new(FailingNotifier),
        Arc::new(FailingAuditLog),
        Arc::new(FixedClock(now())),
    );

    let pass = service
        .submit(
            PassDraft {
                notify_guardian: true,
                ..short_draft()
            },
            &student("stu-1"),
        )
        .expect("submission succeeds");
    let granted = approve_fully(&service, &pass.id);
    assert_eq!(granted.status(), PassStatus::CsoApproved);
    assert_eq!(counter_of(&store, "stu-1").map(|c| c.short_count), Some(1));
}

#[test]
fn grants_count_toward_the_month_of_approval() {
    let store = Arc::new(seeded_store());
    let service_at = |at| {
        ExitPassService::with_clock(
            store.clone(),
            Arc::new(RecordingNotifier::default()),
            Arc::new(RecordingAuditLog::default()),
            Arc::new(FixedClock(at)),
        )
    };
    let owner = student("stu-1");

    let march_service = service_at(mid_month(2025, 3));
    let pass = march_service
        .submit(long_draft(), &owner)
        .expect("march submission succeeds");
    march_service
        .approve_as_dsa(&pass.id, &dsa(), None)
        .expect("dsa approval succeeds");

    let april_service = service_at(mid_month(2025, 4));
    april_service
        .approve_as_cso(&pass.id, &cso(), None)
        .expect("april approval succeeds");

    let owner_id = StudentId("stu-1".to_string());
    assert!(store
        .counter(&owner_id, &MonthKey("2025-03".to_string()))
        .expect("counter read")
        .is_none());
    assert_eq!(
        store
            .counter(&owner_id, &MonthKey("2025-04".to_string()))
            .expect("counter read")
            .map(|counter| counter.long_count),
        Some(1)
    );

    match april_service.submit(long_draft(), &owner) {
        Err(PassServiceError::QuotaExceeded(refusal)) => {
            assert_eq!(refusal.month, MonthKey("2025-04".to_string()))
        }
        other => panic!("expected april quota refusal, got {other:?}"),
    }
    march_service
        .submit(long_draft(), &owner)
        .expect("march allowance untouched");
}

#[test]
fn concurrent_final_approvals_commit_exactly_once() {
    let (service, store, _notifier, _audit) = build_service();
    let pass = service
        .submit(short_draft(), &student("stu-1"))
        .expect("submission succeeds");
    service
        .approve_as_dsa(&pass.id, &dsa(), None)
        .expect("dsa approval succeeds");

    let outcomes = std::thread::scope(|scope| {
        let first = scope.spawn(|| service.approve_as_cso(&pass.id, &cso(), None));
        let second = scope.spawn(|| service.approve_as_cso(&pass.id, &assistant_cso(), None));
        [
            first.join().expect("first approver finished"),
            second.join().expect("second approver finished"),
        ]
    });

    let committed = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    assert_eq!(committed, 1);
    assert!(outcomes.iter().any(|outcome| matches!(
        outcome,
        Err(PassServiceError::InvalidTransition { .. })
    )));
    assert_eq!(counter_of(&store, "stu-1").map(|c| c.short_count), Some(1));
}

#[test]
fn staff_resolution_rejects_unknown_ids() {
    let (service, _store, _notifier, _audit) = build_service();

    assert_eq!(service.staff(&dsa().id).expect("known staff"), dsa());
    match service.staff(&StaffId("nobody".to_string())) {
        Err(PassServiceError::Unauthorized(AccessDenied::UnknownStaff(id))) => {
            assert_eq!(id.0, "nobody")
        }
        other => panic!("expected unknown staff, got {other:?}"),
    }
}

#[test]
fn history_lists_own_passes_newest_first() {
    let store = Arc::new(seeded_store());
    stored_pass(&store, "p-old", "stu-1", "Bank visit", mid_month(2025, 1));
    stored_pass(&store, "p-new", "stu-1", "Bank visit", mid_month(2025, 3));
    stored_pass(&store, "p-other", "stu-2", "Bank visit", mid_month(2025, 2));
    let service = ExitPassService::new(
        store,
        Arc::new(RecordingNotifier::default()),
        Arc::new(RecordingAuditLog::default()),
    );

    let history = service
        .history(&StudentId("stu-1".to_string()))
        .expect("history loads");
    let ids: Vec<&str> = history.iter().map(|pass| pass.id.0.as_str()).collect();
    assert_eq!(ids, vec!["p-new", "p-old"]);

    assert!(service
        .history(&StudentId("stu-9".to_string()))
        .expect("empty history")
        .is_empty());
    assert!(matches!(
        service.get(&PassId("p-missing".to_string())),
        Err(PassServiceError::PassNotFound(_))
    ));
}
