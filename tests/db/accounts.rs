use super::run_test;
use ptt_alertor::db::accounts;
use ptt_alertor::errors::Error;

#[test]
fn seeded_role_limits() {
    run_test(|pool| async move {
        let db = pool.get().await.unwrap();
        let limits = accounts::list_role_limits(&db).await.unwrap();
        let by_role = |role: &str| limits.iter().find(|l| l.role == role).unwrap();
        assert_eq!(by_role("admin").max_subscriptions, -1);
        assert_eq!(by_role("vip").max_subscriptions, 20);
        assert_eq!(by_role("user").max_subscriptions, 3);

        // unknown roles fall back to the default instead of erroring
        assert_eq!(accounts::max_subscriptions(&db, "mystery").await.unwrap(), 3);
    });
}

#[test]
fn account_create_and_lookup() {
    run_test(|pool| async move {
        let db = pool.get().await.unwrap();
        let account = accounts::create_account(&db, "a@example.com", "hash", "user")
            .await
            .unwrap();
        assert!(account.enabled);

        let found = accounts::find_account_by_email(&db, "A@Example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, account.id);

        let err = accounts::create_account(&db, "a@example.com", "hash", "user")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::Conflict(_))
        ));
    });
}

#[test]
fn role_deletion_rules() {
    run_test(|pool| async move {
        let db = pool.get().await.unwrap();

        // built-ins are undeletable
        let err = accounts::delete_role_limit(&db, "user").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::Conflict(_))
        ));

        // a held role is undeletable
        accounts::upsert_role_limit(&db, "tester", 5, "temporary").await.unwrap();
        db.execute(
            "INSERT INTO users (email, password_hash, role) VALUES ('t@example.com', 'x', 'tester')",
            &[],
        )
        .await
        .unwrap();
        let err = accounts::delete_role_limit(&db, "tester").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::Conflict(_))
        ));

        // free it and delete
        db.execute("DELETE FROM users WHERE role = 'tester'", &[])
            .await
            .unwrap();
        accounts::delete_role_limit(&db, "tester").await.unwrap();
        let err = accounts::delete_role_limit(&db, "tester").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::NotFound(_))
        ));
    });
}
