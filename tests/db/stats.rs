use super::run_test;
use ptt_alertor::db::stats;
use ptt_alertor::db::subscriptions::SubKind;

#[test]
fn increment_decrement_round_trip() {
    run_test(|pool| async move {
        let db = pool.get().await.unwrap();

        stats::increment(&db, "Gossiping", SubKind::Keyword, "問卦").await.unwrap();
        stats::increment(&db, "Gossiping", SubKind::Keyword, "問卦").await.unwrap();
        assert_eq!(
            stats::find_count(&db, "Gossiping", SubKind::Keyword, "問卦").await.unwrap(),
            2
        );

        stats::decrement(&db, "Gossiping", SubKind::Keyword, "問卦").await.unwrap();
        stats::decrement(&db, "Gossiping", SubKind::Keyword, "問卦").await.unwrap();
        assert_eq!(
            stats::find_count(&db, "Gossiping", SubKind::Keyword, "問卦").await.unwrap(),
            0
        );
    });
}

#[test]
fn decrement_clamps_at_zero() {
    run_test(|pool| async move {
        let db = pool.get().await.unwrap();
        stats::increment(&db, "movie", SubKind::Author, "alice").await.unwrap();
        for _ in 0..3 {
            stats::decrement(&db, "movie", SubKind::Author, "alice").await.unwrap();
        }
        assert_eq!(
            stats::find_count(&db, "movie", SubKind::Author, "alice").await.unwrap(),
            0
        );
    });
}

#[test]
fn top_orders_by_count_and_hides_zeroes() {
    run_test(|pool| async move {
        let db = pool.get().await.unwrap();

        for _ in 0..3 {
            stats::increment(&db, "Gossiping", SubKind::Keyword, "爆卦").await.unwrap();
        }
        stats::increment(&db, "Stock", SubKind::Keyword, "台積").await.unwrap();
        stats::increment(&db, "movie", SubKind::Keyword, "雷").await.unwrap();
        stats::decrement(&db, "movie", SubKind::Keyword, "雷").await.unwrap();

        let top = stats::top(&db, SubKind::Keyword, None, 10).await.unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].value, "爆卦");
        assert_eq!(top[0].count, 3);
        assert_eq!(top[1].value, "台積");

        let top_board = stats::top(&db, SubKind::Keyword, Some("Stock"), 10)
            .await
            .unwrap();
        assert_eq!(top_board.len(), 1);
        assert_eq!(top_board[0].board, "Stock");
    });
}

#[test]
fn batch_counts_each_component_once() {
    run_test(|pool| async move {
        let db = pool.get().await.unwrap();
        let values = vec!["台積".to_string(), "股價".to_string()];
        stats::increment_batch(&db, "Stock", SubKind::Keyword, &values)
            .await
            .unwrap();
        assert_eq!(
            stats::find_count(&db, "Stock", SubKind::Keyword, "台積").await.unwrap(),
            1
        );
        assert_eq!(
            stats::find_count(&db, "Stock", SubKind::Keyword, "股價").await.unwrap(),
            1
        );

        stats::decrement_batch(&db, "Stock", SubKind::Keyword, &values)
            .await
            .unwrap();
        assert!(stats::top(&db, SubKind::Keyword, Some("Stock"), 10)
            .await
            .unwrap()
            .is_empty());
    });
}
