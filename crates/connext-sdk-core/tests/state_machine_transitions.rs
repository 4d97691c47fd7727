use connext_sdk_core::{deposit_transition, DepositAction, DepositState};

#[test]
fn deposit_happy_path_transitions() {
    let (s1, _) = deposit_transition(DepositState::Idle, DepositAction::RequestRights)
        .expect("idle -> awaiting rights");
    assert_eq!(s1, DepositState::AwaitingRights);
    let (s2, _) =
        deposit_transition(s1, DepositAction::RightsGranted).expect("awaiting -> watching");
    assert_eq!(s2, DepositState::Watching);
    let (s3, _) =
        deposit_transition(s2, DepositAction::BalanceIncreased).expect("watching -> settling");
    assert_eq!(s3, DepositState::Settling);
    let (s4, t4) = deposit_transition(s3, DepositAction::Settled).expect("settling -> idle");
    assert_eq!(s4, DepositState::Idle);
    assert_eq!(t4.from, DepositState::Settling);
}

#[test]
fn failed_teardown_still_lands_in_idle() {
    let (s, t) = deposit_transition(DepositState::Settling, DepositAction::SettleFailed)
        .expect("settling -> idle on failure");
    assert_eq!(s, DepositState::Idle);
    assert_eq!(t.reason, "deposit teardown failed");
}

#[test]
fn reload_recovery_paths_start_from_idle() {
    let (resumed, _) = deposit_transition(DepositState::Idle, DepositAction::ResumeWatch)
        .expect("idle -> watching on resume");
    assert_eq!(resumed, DepositState::Watching);
    let (settling, _) = deposit_transition(DepositState::Idle, DepositAction::BalanceIncreased)
        .expect("idle -> settling when deposit landed while unloaded");
    assert_eq!(settling, DepositState::Settling);
}

#[test]
fn watching_requires_rights_first() {
    let err = deposit_transition(DepositState::Idle, DepositAction::RightsGranted)
        .expect_err("must fail");
    assert!(err.to_string().contains("illegal deposit transition"));
}

#[test]
fn second_deposit_cannot_start_while_watching() {
    let err = deposit_transition(DepositState::Watching, DepositAction::RequestRights)
        .expect_err("must fail");
    assert!(err.to_string().contains("illegal deposit transition"));
}

#[test]
fn settling_cannot_be_cancelled() {
    deposit_transition(DepositState::Settling, DepositAction::Cancel).expect_err("must fail");
}
