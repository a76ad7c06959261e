//! Registration, login and session tests.

use super::{engine, register, PASSWORD};
use crate::{InChatError, UserFacing};
use versioned_store::Identity;

#[test]
fn register_creates_linked_records() {
    let chat = engine();
    let alice = register(&chat, "alice");

    assert_eq!(alice.account.value().user, alice.user.identity());
    assert_eq!(alice.session.value().account, alice.account.identity());
    assert!(alice.account.value().channels.is_empty());
    assert_eq!(chat.user(&alice.user.identity()).unwrap(), alice.user);
    assert_eq!(
        chat.restore_session(&alice.session.identity()).unwrap(),
        alice.session
    );
}

#[test]
fn register_rejects_taken_name() {
    let chat = engine();
    register(&chat, "alice");

    let err = chat.register("alice", PASSWORD, PASSWORD).unwrap_err();
    assert!(matches!(err, InChatError::UsernameTaken(ref name) if name.as_str() == "alice"));
    assert_eq!(err.user_facing(), UserFacing::Rejected);
}

#[test]
fn register_validates_input() {
    let chat = engine();

    assert!(matches!(
        chat.register("bob", PASSWORD, "Something-Else1"),
        Err(InChatError::PasswordMismatch)
    ));
    assert!(matches!(
        chat.register("bob", "short", "short"),
        Err(InChatError::WeakPassword(_))
    ));
    assert!(matches!(
        chat.register("bad name", PASSWORD, PASSWORD),
        Err(InChatError::InvalidUserName(_))
    ));
}

#[test]
fn login_checks_password() {
    let chat = engine();
    let alice = register(&chat, "alice");

    let session = chat.login("alice", PASSWORD).unwrap();
    assert_eq!(session.value().account, alice.account.identity());
    assert_ne!(session.identity(), alice.session.identity());

    assert!(matches!(
        chat.login("alice", "Wrong-Pass1"),
        Err(InChatError::InvalidCredentials)
    ));
    assert!(matches!(
        chat.login("nobody", PASSWORD),
        Err(InChatError::InvalidCredentials)
    ));
    assert!(matches!(
        chat.login("not valid", PASSWORD),
        Err(InChatError::InvalidCredentials)
    ));
}

#[test]
fn logout_removes_session() {
    let chat = engine();
    let alice = register(&chat, "alice");
    let session = alice.session.identity();

    chat.logout(&session).unwrap();
    assert!(chat.restore_session(&session).unwrap_err().is_not_found());
    assert!(chat.logout(&session).unwrap_err().is_not_found());
}

#[test]
fn expired_session_is_rejected_and_removed() {
    let chat = crate::InChat::in_memory(crate::InChatOptions {
        session_ttl: chrono::Duration::zero(),
        ..Default::default()
    })
    .unwrap()
    .with_credentials(super::fast_hashing());
    let alice = register(&chat, "alice");
    let session = alice.session.identity();

    assert!(matches!(
        chat.restore_session(&session),
        Err(InChatError::SessionExpired(id)) if id == session
    ));
    assert!(chat.restore_session(&session).unwrap_err().is_not_found());
}

#[test]
fn unknown_session_is_gone() {
    let chat = engine();
    let err = chat.restore_session(&Identity::new()).unwrap_err();
    assert_eq!(err.user_facing(), UserFacing::Gone);
}
