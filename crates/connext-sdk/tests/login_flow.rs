mod common;

use connext_sdk::{SdkError, SdkNotification, AUTHENTICATION_MESSAGE};
use connext_sdk_adapters::{DeterministicAuth, MemoryStore, Screen};
use connext_sdk_core::{methods, FlowStage, KeyValueStore, PortError, PRE_DEPOSIT_BALANCE_KEY};

use common::{drain, harness, harness_with, logged_in};

#[tokio::test]
async fn email_login_authenticates_the_channel() {
    let mut h = harness();
    h.sdk.events().login("alice@example.com");

    let identity = h.sdk.login().await.expect("login");
    assert_eq!(identity.multisig_address, Some(h.wallet.multisig_address()));
    assert!(h.sdk.is_logged_in());
    assert_eq!(
        h.sdk.public_identifier().expect("public identifier"),
        identity.public_identifier.clone().expect("identifier")
    );
    assert_eq!(
        h.ui.login_stages(),
        vec![FlowStage::Idle, FlowStage::Pending, FlowStage::Success]
    );
    assert_eq!(h.auth.signed_messages(), vec![AUTHENTICATION_MESSAGE.to_owned()]);

    let auth = h
        .transport
        .posted_requests()
        .into_iter()
        .find(|r| r.method == methods::AUTHENTICATE)
        .expect("authenticate posted");
    assert_eq!(auth.params["network"], "rinkeby");
    assert!(auth.params["signature"]
        .as_str()
        .expect("signature")
        .starts_with("0x"));

    assert_eq!(
        drain(&mut h.notifications),
        vec![SdkNotification::LoginSuccess {
            public_identifier: identity.public_identifier
        }]
    );
}

#[tokio::test]
async fn live_session_skips_the_email_prompt() {
    let h = harness_with(
        DeterministicAuth::logged_in("bob@example.com"),
        MemoryStore::default(),
    );
    h.sdk.login().await.expect("login");
    assert!(h.ui.login_stages().is_empty());
    assert_eq!(h.ui.screen(), Screen::Hidden);
    assert!(h.ui.is_mounted());
}

#[tokio::test]
async fn login_without_email_times_out() {
    let h = harness();
    let err = h.sdk.login().await.expect_err("no email");
    assert_eq!(err, SdkError::LoginTimeout { after_ms: 600_000 });
    assert_eq!(h.ui.login_stages().last(), Some(&FlowStage::Failure));
    assert!(!h.sdk.is_logged_in());
}

#[tokio::test]
async fn rejected_email_login_marks_failure() {
    let h = harness();
    h.auth.reject_logins(Some("magic link expired"));
    h.sdk.events().login("alice@example.com");

    let err = h.sdk.login().await.expect_err("rejected");
    assert_eq!(
        err,
        SdkError::Port(PortError::Remote("magic link expired".to_owned()))
    );
    assert_eq!(
        h.ui.login_stages(),
        vec![FlowStage::Idle, FlowStage::Pending, FlowStage::Failure]
    );
}

#[tokio::test]
async fn closing_the_overlay_cancels_login() {
    let h = harness();
    h.sdk.events().close();
    let err = h.sdk.login().await.expect_err("closed");
    assert_eq!(
        err,
        SdkError::Port(PortError::Cancelled {
            method: "login".to_owned()
        })
    );
}

#[tokio::test]
async fn calls_before_login_are_refused() {
    let h = harness();
    assert_eq!(
        h.sdk.balance().await.expect_err("balance"),
        SdkError::NotInitialized("balance")
    );
    assert!(h.sdk.deposit().await.expect_err("deposit").is_not_initialized());
    assert!(h.sdk.public_identifier().expect_err("id").is_not_initialized());
    assert!(h.transport.posted().is_empty());

    // Initialized but not authenticated is a state error.
    h.sdk.init().await.expect("init");
    let err = h.sdk.transfer("x", "1").await.expect_err("transfer");
    assert!(matches!(err, SdkError::Port(PortError::State(_))));
}

#[tokio::test]
async fn login_settles_a_deposit_that_landed_while_away() {
    let store = MemoryStore::default();
    store
        .set(
            PRE_DEPOSIT_BALANCE_KEY,
            r#"{"tokenBalance":"100","ethBalance":"0"}"#,
        )
        .await
        .expect("seed record");
    let mut h = harness_with(DeterministicAuth::default(), store);
    h.chain.set_token_balance(
        h.wallet.multisig_address(),
        h.sdk.config().asset_id,
        alloy::primitives::U256::from(150u64),
    );

    h.sdk.events().login("alice@example.com");
    h.sdk.login().await.expect("login");

    assert!(h.store.raw(PRE_DEPOSIT_BALANCE_KEY).is_none());
    let notes = drain(&mut h.notifications);
    assert!(notes.contains(&SdkNotification::DepositSuccess));
    assert_eq!(h.ui.deposit_stages(), vec![FlowStage::Success]);
}

#[tokio::test]
async fn logout_tears_everything_down_and_login_works_again() {
    let h = logged_in().await;
    h.sdk.deposit().await.expect("deposit");
    assert!(h.chain.is_watching());

    h.sdk.logout().await.expect("logout");
    assert!(!h.sdk.is_initialized());
    assert!(!h.ui.is_mounted());
    assert!(!h.chain.is_watching());
    assert!(h.store.is_empty());
    assert_eq!(h.transport.remove_count(), 1);
    assert!(h.sdk.public_identifier().is_err());

    h.sdk.logout().await.expect("second logout");

    h.sdk.login().await.expect("login with live session");
    assert_eq!(h.transport.render_count(), 2);
    assert!(h.sdk.is_logged_in());
}
