use super::{create_user, run_test};
use chrono::Utc;
use ptt_alertor::db::bindings::{self, SERVICE_TELEGRAM};
use ptt_alertor::errors::Error;

#[test]
fn one_chat_identity_per_service() {
    run_test(|pool| async move {
        let db = pool.get().await.unwrap();
        let u1 = create_user(&db, "u1@example.com").await;
        let u2 = create_user(&db, "u2@example.com").await;

        bindings::create(&db, u1, SERVICE_TELEGRAM, "123").await.unwrap();
        let err = bindings::create(&db, u2, SERVICE_TELEGRAM, "123")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::Conflict(_))
        ));

        // u2 is untouched by the failed attempt
        assert!(bindings::find_by_user_and_service(&db, u2, SERVICE_TELEGRAM)
            .await
            .unwrap()
            .is_none());
    });
}

#[test]
fn pending_rows_do_not_collide() {
    run_test(|pool| async move {
        let db = pool.get().await.unwrap();
        let u1 = create_user(&db, "p1@example.com").await;
        let u2 = create_user(&db, "p2@example.com").await;
        let expires = Utc::now() + chrono::Duration::minutes(10);

        // two unconfirmed enrollments share the empty service_id
        bindings::set_bind_code(&db, u1, SERVICE_TELEGRAM, "code1", expires)
            .await
            .unwrap();
        bindings::set_bind_code(&db, u2, SERVICE_TELEGRAM, "code2", expires)
            .await
            .unwrap();

        let b1 = bindings::find_by_bind_code(&db, SERVICE_TELEGRAM, "code1")
            .await
            .unwrap()
            .unwrap();
        assert!(!b1.is_confirmed());
        assert!(b1.code_is_valid("code1", Utc::now()));
    });
}

#[test]
fn confirm_sets_identity_and_clears_code() {
    run_test(|pool| async move {
        let db = pool.get().await.unwrap();
        let user = create_user(&db, "c@example.com").await;
        let expires = Utc::now() + chrono::Duration::minutes(10);
        bindings::set_bind_code(&db, user, SERVICE_TELEGRAM, "code", expires)
            .await
            .unwrap();

        bindings::confirm(&db, user, SERVICE_TELEGRAM, "987").await.unwrap();

        let binding = bindings::find_by_service_id(&db, SERVICE_TELEGRAM, "987")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(binding.user_id, user);
        assert!(binding.is_confirmed());
        assert!(binding.bind_code.is_none());
        assert!(bindings::find_by_bind_code(&db, SERVICE_TELEGRAM, "code")
            .await
            .unwrap()
            .is_none());
    });
}

#[test]
fn one_binding_per_user_and_service() {
    run_test(|pool| async move {
        let db = pool.get().await.unwrap();
        let user = create_user(&db, "once@example.com").await;
        bindings::create(&db, user, SERVICE_TELEGRAM, "111").await.unwrap();
        let err = bindings::create(&db, user, SERVICE_TELEGRAM, "222")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::Conflict(_))
        ));
    });
}

#[test]
fn toggle_and_delete() {
    run_test(|pool| async move {
        let db = pool.get().await.unwrap();
        let user = create_user(&db, "t@example.com").await;
        bindings::create(&db, user, SERVICE_TELEGRAM, "555").await.unwrap();

        bindings::set_enabled(&db, user, SERVICE_TELEGRAM, false)
            .await
            .unwrap();
        let binding = bindings::find_by_user_and_service(&db, user, SERVICE_TELEGRAM)
            .await
            .unwrap()
            .unwrap();
        assert!(!binding.enabled);

        bindings::delete(&db, user, SERVICE_TELEGRAM).await.unwrap();
        let err = bindings::delete(&db, user, SERVICE_TELEGRAM).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::NotFound(_))
        ));
    });
}
