// SPDX-FileCopyrightText: Copyright (C) The eggplant authors
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::sync::Arc;

use chrono::{Duration, Utc};
use tempfile::TempDir;

use eggplant_core::auth::{AccessToken, Invitation, InvitationToken};
use eggplant_repo::{InvitationRepo as _, UserRepo as _};
use eggplant_repo_redb::{open_database, TransactionProvider};

use crate::auth::{Auth, LastSeenUpdater, PasswordHasher};
use crate::Error;

struct Fixture {
    _dir: TempDir,
    provider: Arc<TransactionProvider>,
    updater: Arc<LastSeenUpdater>,
    auth: Auth,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let db = open_database(&dir.path().join("eggplant.database")).unwrap();
    let provider = TransactionProvider::new(db);
    let updater = LastSeenUpdater::new(Arc::clone(&provider));
    let auth = Auth::new(
        Arc::clone(&provider),
        // The default cost is deliberately slow.
        PasswordHasher::with_cost(4),
        Arc::clone(&updater),
    );
    Fixture {
        _dir: dir,
        provider,
        updater,
        auth,
    }
}

#[tokio::test]
async fn login_check_logout_round_trip() {
    let fixture = fixture();
    fixture.auth.register_initial("u", "p").await.unwrap();

    let token = fixture.auth.login("u", "p").await.unwrap();

    let user = fixture.auth.check_access_token(&token).await.unwrap();
    assert_eq!("u", user.username);
    assert!(user.administrator);
    assert_eq!(1, user.sessions.len());

    fixture.auth.logout(&token).await.unwrap();
    assert!(matches!(
        fixture.auth.check_access_token(&token).await,
        Err(Error::Unauthorized)
    ));
}

#[tokio::test]
async fn register_initial_refuses_to_run_twice() {
    let fixture = fixture();
    fixture.auth.register_initial("u", "p").await.unwrap();
    assert!(matches!(
        fixture.auth.register_initial("other", "p").await,
        Err(Error::InvalidParameters(_))
    ));
}

#[tokio::test]
async fn registration_parameters_are_validated() {
    let fixture = fixture();
    assert!(matches!(
        fixture.auth.register_initial("", "p").await,
        Err(Error::InvalidParameters(_))
    ));
    assert!(matches!(
        fixture.auth.register_initial(&"u".repeat(101), "p").await,
        Err(Error::InvalidParameters(_))
    ));
    assert!(matches!(
        fixture.auth.register_initial("u", "").await,
        Err(Error::InvalidParameters(_))
    ));
    assert!(matches!(
        fixture.auth.register_initial("u", &"p".repeat(10_001)).await,
        Err(Error::InvalidParameters(_))
    ));
}

#[tokio::test]
async fn invitations_authorize_exactly_one_registration() {
    let fixture = fixture();
    fixture.auth.register_initial("admin", "p").await.unwrap();

    let invitation = fixture.auth.create_invitation().await.unwrap();
    fixture
        .auth
        .register("guest", "pw", &invitation)
        .await
        .unwrap();

    let guest = fixture.auth.login("guest", "pw").await.unwrap();
    let guest = fixture.auth.check_access_token(&guest).await.unwrap();
    assert!(!guest.administrator);

    // The invitation was consumed.
    assert!(matches!(
        fixture.auth.register("another", "pw", &invitation).await,
        Err(Error::NotFound)
    ));
}

#[tokio::test]
async fn registering_a_taken_username_fails() {
    let fixture = fixture();
    fixture.auth.register_initial("admin", "p").await.unwrap();

    let invitation = fixture.auth.create_invitation().await.unwrap();
    assert!(matches!(
        fixture.auth.register("admin", "pw", &invitation).await,
        Err(Error::UsernameTaken)
    ));
}

#[tokio::test]
async fn expired_invitations_do_not_authorize_registrations() {
    let fixture = fixture();

    let stale = Invitation {
        token: InvitationToken::new("stale"),
        created: Utc::now() - Duration::hours(49),
    };
    fixture
        .provider
        .write(move |repositories| repositories.invitations.put(&stale))
        .await
        .unwrap();

    assert!(matches!(
        fixture
            .auth
            .register("guest", "pw", &InvitationToken::new("stale"))
            .await,
        Err(Error::NotFound)
    ));
}

#[tokio::test]
async fn login_failures_are_opaque() {
    let fixture = fixture();
    fixture.auth.register_initial("u", "p").await.unwrap();

    assert!(matches!(
        fixture.auth.login("u", "wrong").await,
        Err(Error::Unauthorized)
    ));
    assert!(matches!(
        fixture.auth.login("ghost", "p").await,
        Err(Error::Unauthorized)
    ));
    assert!(matches!(
        fixture.auth.login("", "p").await,
        Err(Error::Unauthorized)
    ));
}

#[tokio::test]
async fn check_rejects_tampered_tokens() {
    let fixture = fixture();
    fixture.auth.register_initial("u", "p").await.unwrap();
    fixture.auth.login("u", "p").await.unwrap();

    for token in ["", "garbage", "a-b-c"] {
        assert!(matches!(
            fixture
                .auth
                .check_access_token(&AccessToken::new(token))
                .await,
            Err(Error::Unauthorized)
        ));
    }

    // A well-formed token for an existing user without a matching
    // session is rejected as well.
    let forged = AccessToken::new(format!("deadbeef-{}", hex::encode("u")));
    assert!(matches!(
        fixture.auth.check_access_token(&forged).await,
        Err(Error::Unauthorized)
    ));
}

#[tokio::test]
async fn set_password_replaces_the_credentials() {
    let fixture = fixture();
    fixture.auth.register_initial("u", "old").await.unwrap();

    fixture.auth.set_password("u", "new").await.unwrap();

    assert!(matches!(
        fixture.auth.login("u", "old").await,
        Err(Error::Unauthorized)
    ));
    fixture.auth.login("u", "new").await.unwrap();
}

#[tokio::test]
async fn removing_a_user_invalidates_their_sessions() {
    let fixture = fixture();
    fixture.auth.register_initial("u", "p").await.unwrap();
    let token = fixture.auth.login("u", "p").await.unwrap();

    fixture.auth.remove("u").await.unwrap();

    assert!(matches!(
        fixture.auth.check_access_token(&token).await,
        Err(Error::Unauthorized)
    ));
    assert!(matches!(
        fixture.auth.login("u", "p").await,
        Err(Error::Unauthorized)
    ));
}

#[tokio::test]
async fn list_returns_projections_of_all_users() {
    let fixture = fixture();
    fixture.auth.register_initial("admin", "p").await.unwrap();
    let invitation = fixture.auth.create_invitation().await.unwrap();
    fixture
        .auth
        .register("guest", "pw", &invitation)
        .await
        .unwrap();

    let mut users = fixture.auth.list().await.unwrap();
    users.sort_by(|lhs, rhs| lhs.username.cmp(&rhs.username));
    assert_eq!(2, users.len());
    assert_eq!("admin", users[0].username);
    assert!(users[0].administrator);
    assert_eq!("guest", users[1].username);
    assert!(!users[1].administrator);
}

#[tokio::test]
async fn flushing_advances_last_seen_timestamps() {
    let fixture = fixture();
    fixture.auth.register_initial("u", "p").await.unwrap();
    let token = fixture.auth.login("u", "p").await.unwrap();

    let future = Utc::now() + Duration::minutes(5);
    fixture.updater.update("u", &token, future);
    // An observation for an unknown user is skipped during the flush.
    fixture.updater.update("ghost", &token, future);
    fixture.updater.flush().await.unwrap();

    let user = fixture
        .provider
        .read(|repositories| repositories.users.get("u"))
        .await
        .unwrap();
    assert_eq!(future, user.last_seen);
    assert_eq!(future, user.sessions[0].last_seen);
}

#[tokio::test]
async fn flushing_never_moves_timestamps_backwards() {
    let fixture = fixture();
    fixture.auth.register_initial("u", "p").await.unwrap();
    let token = fixture.auth.login("u", "p").await.unwrap();

    let before = fixture
        .provider
        .read(|repositories| repositories.users.get("u"))
        .await
        .unwrap();

    fixture
        .updater
        .update("u", &token, Utc::now() - Duration::hours(1));
    fixture.updater.flush().await.unwrap();

    let after = fixture
        .provider
        .read(|repositories| repositories.users.get("u"))
        .await
        .unwrap();
    assert_eq!(before.last_seen, after.last_seen);
    assert_eq!(
        before.sessions[0].last_seen,
        after.sessions[0].last_seen
    );
}
