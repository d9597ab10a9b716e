use super::run_test;
use ptt_alertor::db::articles::{self, Article, Comment, CommentTag};

fn sample_article(code: &str, board: &str) -> Article {
    Article {
        code: code.to_string(),
        id: 1512733113,
        title: "[問卦] 測試文章".to_string(),
        link: format!("https://www.ptt.cc/bbs/{board}/{code}.html"),
        date: "12/08".to_string(),
        author: "alice".to_string(),
        board: board.to_string(),
        comments: vec![
            Comment {
                tag: CommentTag::Positive,
                user_id: "bob".to_string(),
                content: "推".to_string(),
                datetime: None,
            },
            Comment {
                tag: CommentTag::Negative,
                user_id: "carol".to_string(),
                content: "噓".to_string(),
                datetime: None,
            },
        ],
        ..Article::default()
    }
}

#[test]
fn save_and_find_article() {
    run_test(|pool| async move {
        let mut db = pool.get().await.unwrap();
        let mut article = sample_article("M.1.A.AAA", "Gossiping");
        article.recount();
        articles::save_article(&mut db, &article).await.unwrap();

        let found = articles::find_article(&db, "M.1.A.AAA").await.unwrap().unwrap();
        assert_eq!(found.title, article.title);
        assert_eq!(found.board, "Gossiping");
        assert_eq!(found.comments.len(), 2);
        assert_eq!(found.positive_count, 1);
        assert_eq!(found.negative_count, 1);
        assert_eq!(found.push_sum, 0);

        assert!(articles::find_article(&db, "M.9.A.ZZZ").await.unwrap().is_none());
    });
}

#[test]
fn resaving_identical_comments_keeps_row_count() {
    run_test(|pool| async move {
        let mut db = pool.get().await.unwrap();
        let mut article = sample_article("M.2.A.BBB", "movie");
        article.recount();
        articles::save_article(&mut db, &article).await.unwrap();
        articles::save_article(&mut db, &article).await.unwrap();

        let count: i64 = db
            .query_one(
                "SELECT COUNT(*) FROM comments WHERE article_code = $1",
                &[&"M.2.A.BBB"],
            )
            .await
            .unwrap()
            .get(0);
        assert_eq!(count, 2);

        let found = articles::find_article(&db, "M.2.A.BBB").await.unwrap().unwrap();
        assert_eq!(found.comments.len(), 2);
    });
}

#[test]
fn board_save_is_transactional_and_diffable() {
    run_test(|pool| async move {
        let mut db = pool.get().await.unwrap();
        let batch = vec![
            sample_article("M.3.A.C01", "Stock"),
            sample_article("M.4.A.C02", "Stock"),
        ];
        articles::save_board_articles(&mut db, "Stock", &batch)
            .await
            .unwrap();

        let codes = articles::board_article_codes(&db, "Stock").await.unwrap();
        assert!(codes.contains("M.3.A.C01"));
        assert!(codes.contains("M.4.A.C02"));
        assert_eq!(codes.len(), 2);

        let boards = articles::list_boards(&db).await.unwrap();
        assert_eq!(boards, vec!["Stock"]);

        // every article's board exists in boards
        let orphans: i64 = db
            .query_one(
                "SELECT COUNT(*) FROM articles a
                 LEFT JOIN boards b ON a.board_name = b.name WHERE b.name IS NULL",
                &[],
            )
            .await
            .unwrap()
            .get(0);
        assert_eq!(orphans, 0);
    });
}

#[test]
fn upsert_updates_push_totals() {
    run_test(|pool| async move {
        let mut db = pool.get().await.unwrap();
        let mut article = sample_article("M.5.A.DDD", "Stock");
        articles::save_board_articles(&mut db, "Stock", std::slice::from_ref(&article))
            .await
            .unwrap();

        article.push_sum = 57;
        article.title = "[情報] 更新過的標題".to_string();
        articles::save_board_articles(&mut db, "Stock", &[article])
            .await
            .unwrap();

        let found = articles::find_article(&db, "M.5.A.DDD").await.unwrap().unwrap();
        assert_eq!(found.push_sum, 57);
        assert_eq!(found.title, "[情報] 更新過的標題");
    });
}

#[test]
fn deleting_article_cascades_comments() {
    run_test(|pool| async move {
        let mut db = pool.get().await.unwrap();
        let mut article = sample_article("M.6.A.EEE", "movie");
        article.recount();
        articles::save_article(&mut db, &article).await.unwrap();

        articles::delete_article(&db, "M.6.A.EEE").await.unwrap();
        let count: i64 = db
            .query_one(
                "SELECT COUNT(*) FROM comments WHERE article_code = $1",
                &[&"M.6.A.EEE"],
            )
            .await
            .unwrap()
            .get(0);
        assert_eq!(count, 0);
    });
}
