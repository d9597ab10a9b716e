//! Tests for the repository layer.
//!
//! [`run_test`] provisions a throwaway PostgreSQL cluster, runs the
//! migrations and hands your callback a [`ClientPool`]:
//!
//! ```rust,ignore
//! #[test]
//! fn example() {
//!     run_test(|pool| async move {
//!         let db = pool.get().await.unwrap();
//!         // exercise the repositories
//!     });
//! }
//! ```

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Command;

use ptt_alertor::db::ClientPool;

mod accounts;
mod articles;
mod bindings;
mod stats;
mod subscriptions;

struct PgContext {
    db_dir: PathBuf,
}

impl Drop for PgContext {
    fn drop(&mut self) {
        stop_postgres(&self.db_dir);
    }
}

pub fn run_test<F, Fut>(f: F)
where
    F: FnOnce(ClientPool) -> Fut,
    Fut: Future<Output = ()>,
{
    let Some(db_dir) = setup_postgres() else {
        if std::env::var_os("CI").is_some() {
            panic!("postgres must be installed in CI");
        }
        eprintln!("postgres not found, skipping test");
        return;
    };
    let ctx = PgContext { db_dir };
    let pool = ClientPool::new(postgres_database_url(&ctx.db_dir));
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(async move {
            ptt_alertor::db::run_migrations(&pool.get().await.unwrap())
                .await
                .unwrap();
            f(pool).await;
        });
}

/// Inserts a user row for foreign keys; most repositories hang off one.
pub async fn create_user(db: &tokio_postgres::Client, email: &str) -> i32 {
    db.query_one(
        "INSERT INTO users (email, password_hash, role) VALUES ($1, 'x', 'user') RETURNING id",
        &[&email],
    )
    .await
    .unwrap()
    .get(0)
}

fn postgres_database_url(db_dir: &Path) -> String {
    format!(
        "postgres:///ptt_alertor?user=ptt_alertor&host={}",
        db_dir.display()
    )
}

fn setup_postgres() -> Option<PathBuf> {
    let pg_dir = find_postgres()?;
    let test_dir = super::test_dir();
    let db_dir = test_dir.join("db");

    std::fs::create_dir(&db_dir).unwrap();
    let db_dir_str = db_dir.to_str().unwrap();
    run_command(
        &pg_dir.join("initdb"),
        &["--auth=trust", "--username=ptt_alertor", "-D", db_dir_str],
        &db_dir,
    );
    run_command(
        &pg_dir.join("pg_ctl"),
        &[
            // -h '' disables TCP, -k picks the unix-socket directory
            "-o",
            &format!("-h '' -k {db_dir_str}"),
            "-D",
            db_dir_str,
            "-l",
            db_dir.join("postgres.log").to_str().unwrap(),
            "start",
        ],
        &db_dir,
    );
    run_command(
        &pg_dir.join("createdb"),
        &["--user", "ptt_alertor", "-h", db_dir_str, "ptt_alertor"],
        &db_dir,
    );
    Some(db_dir)
}

fn stop_postgres(db_dir: &Path) {
    let pg_dir = find_postgres().unwrap();
    match Command::new(pg_dir.join("pg_ctl"))
        .args(["-D", db_dir.to_str().unwrap(), "stop"])
        .output()
    {
        Ok(output) => {
            if !output.status.success() {
                eprintln!(
                    "failed to stop postgres:\n---stdout\n{}\n---stderr\n{}",
                    String::from_utf8_lossy(&output.stdout),
                    String::from_utf8_lossy(&output.stderr)
                );
            }
        }
        Err(e) => eprintln!("could not run pg_ctl to stop: {e}"),
    }
}

/// Finds the root for PostgreSQL commands; some distros keep them off PATH.
fn find_postgres() -> Option<PathBuf> {
    if let Ok(o) = Command::new("initdb").arg("-V").output() {
        if o.status.success() {
            return Some(PathBuf::new());
        }
    }
    if let Ok(dirs) = std::fs::read_dir("/usr/lib/postgresql") {
        let mut versions: Vec<_> = dirs
            .filter_map(|entry| {
                let entry = entry.unwrap();
                if let Ok(n) = entry.file_name().to_str().unwrap().parse::<f32>() {
                    Some((n, entry.path()))
                } else {
                    None
                }
            })
            .collect();
        if !versions.is_empty() {
            versions.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
            return Some(versions.last().unwrap().1.join("bin"));
        }
    }
    None
}

fn run_command(command: &Path, args: &[&str], cwd: &Path) {
    eprintln!("running {command:?}: {args:?}");
    let output = Command::new(command)
        .args(args)
        .current_dir(cwd)
        .output()
        .unwrap_or_else(|e| panic!("`{command:?}` failed to run: {e}"));
    if !output.status.success() {
        panic!(
            "{command:?} failed:\n---stdout\n{}\n---stderr\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
    }
}
