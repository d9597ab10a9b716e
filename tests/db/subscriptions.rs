use super::{create_user, run_test};
use ptt_alertor::db::subscriptions::{self, SubKind};
use ptt_alertor::errors::Error;

#[test]
fn insert_find_delete_round_trip() {
    run_test(|pool| async move {
        let db = pool.get().await.unwrap();
        let user = create_user(&db, "sub@example.com").await;

        let sub = subscriptions::insert(&db, user, "Gossiping", SubKind::Keyword, "問卦")
            .await
            .unwrap();
        assert_eq!(sub.board, "Gossiping");
        assert!(sub.enabled);
        assert!(sub.mail.is_none());

        assert_eq!(subscriptions::count_by_user(&db, user).await.unwrap(), 1);

        subscriptions::delete(&db, sub.id).await.unwrap();
        assert_eq!(subscriptions::count_by_user(&db, user).await.unwrap(), 0);
    });
}

#[test]
fn duplicate_value_is_conflict() {
    run_test(|pool| async move {
        let db = pool.get().await.unwrap();
        let user = create_user(&db, "dup@example.com").await;

        subscriptions::insert(&db, user, "movie", SubKind::Keyword, "雷")
            .await
            .unwrap();
        let err = subscriptions::insert(&db, user, "movie", SubKind::Keyword, "雷")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::Conflict(_))
        ));
    });
}

#[test]
fn sibling_detection_drives_set_cleanup() {
    run_test(|pool| async move {
        let db = pool.get().await.unwrap();
        let user = create_user(&db, "sibling@example.com").await;

        let a = subscriptions::insert(&db, user, "Stock", SubKind::Keyword, "台積")
            .await
            .unwrap();
        let b = subscriptions::insert(&db, user, "Stock", SubKind::Keyword, "股價")
            .await
            .unwrap();

        assert!(
            subscriptions::has_other_for_board(&db, user, "Stock", SubKind::Keyword, a.id)
                .await
                .unwrap()
        );
        subscriptions::delete(&db, b.id).await.unwrap();
        assert!(
            !subscriptions::has_other_for_board(&db, user, "Stock", SubKind::Keyword, a.id)
                .await
                .unwrap()
        );
    });
}

#[test]
fn update_rewrites_row() {
    run_test(|pool| async move {
        let db = pool.get().await.unwrap();
        let user = create_user(&db, "upd@example.com").await;

        let sub = subscriptions::insert(&db, user, "Stock", SubKind::Pushsum, "50")
            .await
            .unwrap();
        subscriptions::update(&db, sub.id, "Stock", SubKind::Pushsum, "-20", true, None)
            .await
            .unwrap();

        let found = subscriptions::find(&db, sub.id).await.unwrap().unwrap();
        assert_eq!(found.value, "-20");

        let by_value =
            subscriptions::find_by_value(&db, user, "stock", SubKind::Pushsum, "-20")
                .await
                .unwrap();
        assert!(by_value.is_some());
    });
}

#[test]
fn kind_listing_only_returns_enabled() {
    run_test(|pool| async move {
        let db = pool.get().await.unwrap();
        let user = create_user(&db, "kinds@example.com").await;

        let tracked =
            subscriptions::insert(&db, user, "Stock", SubKind::Article, "M.1.A.2")
                .await
                .unwrap();
        subscriptions::insert(&db, user, "Stock", SubKind::Keyword, "台積")
            .await
            .unwrap();

        let list = subscriptions::list_by_kind(&db, SubKind::Article).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].value, "M.1.A.2");

        subscriptions::update(&db, tracked.id, "Stock", SubKind::Article, "M.1.A.2", false, None)
            .await
            .unwrap();
        assert!(subscriptions::list_by_kind(&db, SubKind::Article)
            .await
            .unwrap()
            .is_empty());
    });
}

#[test]
fn tracked_article_state_is_per_subscription() {
    run_test(|pool| async move {
        let db = pool.get().await.unwrap();
        let u1 = create_user(&db, "t1@example.com").await;
        let u2 = create_user(&db, "t2@example.com").await;

        // two users track the same article code
        let s1 = subscriptions::insert(&db, u1, "Stock", SubKind::Article, "M.7.A.FFF")
            .await
            .unwrap();
        let s2 = subscriptions::insert(&db, u2, "Stock", SubKind::Article, "M.7.A.FFF")
            .await
            .unwrap();

        assert_eq!(subscriptions::seen_comment_count(&db, s1.id).await.unwrap(), None);

        subscriptions::set_seen_comment_count(&db, s1.id, 5).await.unwrap();
        subscriptions::set_seen_comment_count(&db, s1.id, 8).await.unwrap();
        assert_eq!(
            subscriptions::seen_comment_count(&db, s1.id).await.unwrap(),
            Some(8)
        );
        // advancing one tracker leaves the other's baseline untouched
        assert_eq!(subscriptions::seen_comment_count(&db, s2.id).await.unwrap(), None);

        // state dies with its subscription
        subscriptions::delete(&db, s1.id).await.unwrap();
        assert_eq!(subscriptions::seen_comment_count(&db, s1.id).await.unwrap(), None);
    });
}

#[test]
fn user_cascade_removes_subscriptions() {
    run_test(|pool| async move {
        let db = pool.get().await.unwrap();
        let user = create_user(&db, "cascade@example.com").await;
        subscriptions::insert(&db, user, "movie", SubKind::Author, "alice")
            .await
            .unwrap();

        db.execute("DELETE FROM users WHERE id = $1", &[&user])
            .await
            .unwrap();
        assert_eq!(subscriptions::count_by_user(&db, user).await.unwrap(), 0);
    });
}
