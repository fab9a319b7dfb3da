use std::collections::HashMap;
use std::path::Path;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, Result};

use crate::models::{Category, CategoryTotal, Expense, ExpenseInput, User};

pub type DbPool = Pool<SqliteConnectionManager>;

pub fn init_db(path: &Path) -> DbPool {
    let manager = SqliteConnectionManager::file(path);
    let pool = Pool::new(manager).expect("db pool");
    {
        let conn = pool.get().expect("db connection");
        run_migrations(&conn).expect("db migrations");
    }
    pool
}

pub(crate) fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            token TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS expenses (
            id INTEGER PRIMARY KEY,
            owner_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            category TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            spent_on TEXT NOT NULL,
            spent_at TEXT NOT NULL,
            note TEXT,
            FOREIGN KEY(owner_id) REFERENCES users(id) ON DELETE CASCADE
        );
        ",
    )?;
    Ok(())
}

pub fn insert_user(
    conn: &Connection,
    email: &str,
    password_hash: Option<&str>,
    created_at: &str,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO users (email, password_hash, created_at) VALUES (?1, ?2, ?3)",
        params![email, password_hash, created_at],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn user_by_email(conn: &Connection, email: &str) -> Result<Option<User>> {
    let mut stmt = conn.prepare(
        "
        SELECT id, email
        FROM users
        WHERE email = ?1
        ",
    )?;
    let mut rows = stmt.query(params![email])?;
    if let Some(row) = rows.next()? {
        Ok(Some(User {
            id: row.get(0)?,
            email: row.get(1)?,
        }))
    } else {
        Ok(None)
    }
}

/// Credentials for local login. The hash is NULL for accounts created
/// through a federated identity, which have no usable local password.
pub fn user_credentials(conn: &Connection, email: &str) -> Result<Option<(i64, Option<String>)>> {
    let mut stmt = conn.prepare(
        "
        SELECT id, password_hash
        FROM users
        WHERE email = ?1
        ",
    )?;
    let mut rows = stmt.query(params![email])?;
    if let Some(row) = rows.next()? {
        Ok(Some((row.get(0)?, row.get(1)?)))
    } else {
        Ok(None)
    }
}

pub fn create_session(
    conn: &Connection,
    user_id: i64,
    token: &str,
    created_at: &str,
    expires_at: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO sessions (user_id, token, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
        params![user_id, token, created_at, expires_at],
    )?;
    Ok(())
}

/// Resolves a session token to its principal. The session row only
/// binds token to user id; the user record is re-read here.
pub fn user_by_session(conn: &Connection, token: &str, now: &str) -> Result<Option<User>> {
    let mut stmt = conn.prepare(
        "
        SELECT u.id, u.email
        FROM sessions s
        JOIN users u ON s.user_id = u.id
        WHERE s.token = ?1
          AND s.expires_at > ?2
        ",
    )?;
    let mut rows = stmt.query(params![token, now])?;
    if let Some(row) = rows.next()? {
        Ok(Some(User {
            id: row.get(0)?,
            email: row.get(1)?,
        }))
    } else {
        Ok(None)
    }
}

pub fn delete_session(conn: &Connection, token: &str) -> Result<()> {
    conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
    Ok(())
}

pub fn delete_expired_sessions(conn: &Connection, now: &str) -> Result<()> {
    conn.execute("DELETE FROM sessions WHERE expires_at <= ?1", params![now])?;
    Ok(())
}

pub fn prune_sessions(conn: &Connection, user_id: i64, keep: i64) -> Result<()> {
    conn.execute(
        "
        DELETE FROM sessions
        WHERE user_id = ?1
          AND id NOT IN (
            SELECT id
            FROM sessions
            WHERE user_id = ?1
            ORDER BY created_at DESC, id DESC
            LIMIT ?2
          )
        ",
        params![user_id, keep],
    )?;
    Ok(())
}

pub fn insert_expense(conn: &Connection, owner_id: i64, input: &ExpenseInput) -> Result<i64> {
    conn.execute(
        "
        INSERT INTO expenses (owner_id, name, category, amount_cents, spent_on, spent_at, note)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ",
        params![
            owner_id,
            input.name,
            input.category.as_str(),
            input.amount_cents,
            input.spent_on,
            input.spent_at,
            input.note
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Owner-scoped lookup. A row owned by someone else is absent here,
/// indistinguishable from an id that never existed.
pub fn expense_by_id(conn: &Connection, owner_id: i64, id: i64) -> Result<Option<Expense>> {
    let mut stmt = conn.prepare(
        "
        SELECT id, owner_id, name, category, amount_cents, spent_on, spent_at, note
        FROM expenses
        WHERE id = ?1 AND owner_id = ?2
        ",
    )?;
    let mut rows = stmt.query(params![id, owner_id])?;
    if let Some(row) = rows.next()? {
        Ok(Some(Expense {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            name: row.get(2)?,
            category: row.get(3)?,
            amount_cents: row.get(4)?,
            spent_on: row.get(5)?,
            spent_at: row.get(6)?,
            note: row.get(7)?,
        }))
    } else {
        Ok(None)
    }
}

/// Full-field replace. Returns false when no owned row matched.
pub fn update_expense(
    conn: &Connection,
    owner_id: i64,
    id: i64,
    input: &ExpenseInput,
) -> Result<bool> {
    let changed = conn.execute(
        "
        UPDATE expenses
        SET name = ?1, category = ?2, amount_cents = ?3, spent_on = ?4, spent_at = ?5, note = ?6
        WHERE id = ?7 AND owner_id = ?8
        ",
        params![
            input.name,
            input.category.as_str(),
            input.amount_cents,
            input.spent_on,
            input.spent_at,
            input.note,
            id,
            owner_id
        ],
    )?;
    Ok(changed > 0)
}

pub fn delete_expense(conn: &Connection, owner_id: i64, id: i64) -> Result<bool> {
    let changed = conn.execute(
        "DELETE FROM expenses WHERE id = ?1 AND owner_id = ?2",
        params![id, owner_id],
    )?;
    Ok(changed > 0)
}

pub fn list_expenses(conn: &Connection, owner_id: i64) -> Result<Vec<Expense>> {
    let mut stmt = conn.prepare(
        "
        SELECT id, owner_id, name, category, amount_cents, spent_on, spent_at, note
        FROM expenses
        WHERE owner_id = ?1
        ORDER BY spent_on DESC, spent_at DESC, id DESC
        ",
    )?;
    let rows = stmt.query_map(params![owner_id], |row| {
        Ok(Expense {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            name: row.get(2)?,
            category: row.get(3)?,
            amount_cents: row.get(4)?,
            spent_on: row.get(5)?,
            spent_at: row.get(6)?,
            note: row.get(7)?,
        })
    })?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Per-category sums for one owner in a single grouped pass. Every
/// category in the fixed set is present in the result; categories with
/// no rows carry zero.
pub fn category_totals(conn: &Connection, owner_id: i64) -> Result<Vec<CategoryTotal>> {
    let mut stmt = conn.prepare(
        "
        SELECT category, COALESCE(SUM(amount_cents), 0)
        FROM expenses
        WHERE owner_id = ?1
        GROUP BY category
        ",
    )?;
    let rows = stmt.query_map(params![owner_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;

    let mut sums: HashMap<String, i64> = HashMap::new();
    for row in rows {
        let (category, total) = row?;
        sums.insert(category, total);
    }
    Ok(Category::ALL
        .into_iter()
        .map(|category| CategoryTotal {
            category,
            total_cents: sums.get(category.as_str()).copied().unwrap_or(0),
        })
        .collect())
}

/// Income and expenditure totals for one owner, computed in one pass.
/// The two are independent sums over the same rows, not a partition
/// checked against a grand total.
pub fn income_vs_expenditure(conn: &Connection, owner_id: i64) -> Result<(i64, i64)> {
    conn.query_row(
        "
        SELECT COALESCE(SUM(CASE WHEN category = 'Income' THEN amount_cents END), 0),
               COALESCE(SUM(CASE WHEN category != 'Income' THEN amount_cents END), 0)
        FROM expenses
        WHERE owner_id = ?1
        ",
        params![owner_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("in-memory db");
        run_migrations(&conn).expect("migrations");
        conn
    }

    fn test_user(conn: &Connection, email: &str) -> i64 {
        insert_user(conn, email, Some("hash"), "2026-01-01T00:00:00+00:00").expect("insert user")
    }

    fn entry(category: Category, amount_cents: i64) -> ExpenseInput {
        ExpenseInput {
            name: "entry".to_string(),
            category,
            amount_cents,
            spent_on: "2026-01-15".to_string(),
            spent_at: "12:30".to_string(),
            note: None,
        }
    }

    #[test]
    fn expense_round_trips_through_create_and_get() {
        let conn = test_conn();
        let owner = test_user(&conn, "a@x.com");
        let input = ExpenseInput {
            name: "Lunch".to_string(),
            category: Category::FoodAndDrinks,
            amount_cents: 2000,
            spent_on: "2026-01-15".to_string(),
            spent_at: "12:30".to_string(),
            note: Some("team lunch".to_string()),
        };
        let id = insert_expense(&conn, owner, &input).expect("insert");

        let fetched = expense_by_id(&conn, owner, id).expect("get").expect("present");
        assert_eq!(fetched.owner_id, owner);
        assert_eq!(fetched.name, "Lunch");
        assert_eq!(fetched.category, "Food & Drinks");
        assert_eq!(fetched.amount_cents, 2000);
        assert_eq!(fetched.spent_on, "2026-01-15");
        assert_eq!(fetched.spent_at, "12:30");
        assert_eq!(fetched.note.as_deref(), Some("team lunch"));
    }

    #[test]
    fn cross_owner_access_looks_like_not_found() {
        let conn = test_conn();
        let alice = test_user(&conn, "alice@x.com");
        let bob = test_user(&conn, "bob@x.com");
        let id = insert_expense(&conn, alice, &entry(Category::Shopping, 500)).expect("insert");

        assert!(expense_by_id(&conn, bob, id).expect("get").is_none());
        assert!(!update_expense(&conn, bob, id, &entry(Category::Other, 1)).expect("update"));
        assert!(!delete_expense(&conn, bob, id).expect("delete"));

        // Alice's row is untouched by Bob's attempts.
        let kept = expense_by_id(&conn, alice, id).expect("get").expect("present");
        assert_eq!(kept.amount_cents, 500);
        assert_eq!(kept.category, "Shopping");
    }

    #[test]
    fn update_replaces_every_field() {
        let conn = test_conn();
        let owner = test_user(&conn, "a@x.com");
        let id = insert_expense(&conn, owner, &entry(Category::Vehicle, 100)).expect("insert");

        let replacement = ExpenseInput {
            name: "Fuel".to_string(),
            category: Category::Transportation,
            amount_cents: 4200,
            spent_on: "2026-02-01".to_string(),
            spent_at: "08:05".to_string(),
            note: Some("motorway".to_string()),
        };
        assert!(update_expense(&conn, owner, id, &replacement).expect("update"));

        let fetched = expense_by_id(&conn, owner, id).expect("get").expect("present");
        assert_eq!(fetched.name, "Fuel");
        assert_eq!(fetched.category, "Transportation");
        assert_eq!(fetched.amount_cents, 4200);
        assert_eq!(fetched.note.as_deref(), Some("motorway"));
    }

    #[test]
    fn category_totals_are_zero_filled_for_an_empty_ledger() {
        let conn = test_conn();
        let owner = test_user(&conn, "a@x.com");

        let totals = category_totals(&conn, owner).expect("totals");
        assert_eq!(totals.len(), Category::ALL.len());
        for total in totals {
            assert_eq!(total.total_cents, 0);
        }
    }

    #[test]
    fn category_totals_sum_per_category_and_per_owner() {
        let conn = test_conn();
        let alice = test_user(&conn, "alice@x.com");
        let bob = test_user(&conn, "bob@x.com");
        insert_expense(&conn, alice, &entry(Category::FoodAndDrinks, 2000)).expect("insert");
        insert_expense(&conn, alice, &entry(Category::FoodAndDrinks, 350)).expect("insert");
        insert_expense(&conn, alice, &entry(Category::Income, 10000)).expect("insert");
        insert_expense(&conn, bob, &entry(Category::FoodAndDrinks, 9999)).expect("insert");

        let totals = category_totals(&conn, alice).expect("totals");
        let by_category = |wanted: Category| {
            totals
                .iter()
                .find(|t| t.category == wanted)
                .expect("category present")
                .total_cents
        };
        assert_eq!(by_category(Category::FoodAndDrinks), 2350);
        assert_eq!(by_category(Category::Income), 10000);
        assert_eq!(by_category(Category::Housing), 0);
    }

    #[test]
    fn income_split_from_expenditure() {
        let conn = test_conn();
        let owner = test_user(&conn, "a@x.com");
        insert_expense(&conn, owner, &entry(Category::FoodAndDrinks, 2000)).expect("insert");
        insert_expense(&conn, owner, &entry(Category::Income, 10000)).expect("insert");

        let (income, expenditure) = income_vs_expenditure(&conn, owner).expect("split");
        assert_eq!(income, 10000);
        assert_eq!(expenditure, 2000);
    }

    #[test]
    fn income_split_is_zero_for_an_empty_ledger() {
        let conn = test_conn();
        let owner = test_user(&conn, "a@x.com");
        assert_eq!(income_vs_expenditure(&conn, owner).expect("split"), (0, 0));
    }

    #[test]
    fn duplicate_email_violates_unique_constraint() {
        let conn = test_conn();
        test_user(&conn, "a@x.com");
        assert!(insert_user(&conn, "a@x.com", Some("other"), "2026-01-02T00:00:00+00:00").is_err());
    }

    #[test]
    fn expired_sessions_do_not_resolve() {
        let conn = test_conn();
        let owner = test_user(&conn, "a@x.com");
        create_session(
            &conn,
            owner,
            "token-live",
            "2026-01-01T00:00:00+00:00",
            "2026-01-01T01:00:00+00:00",
        )
        .expect("create");
        create_session(
            &conn,
            owner,
            "token-stale",
            "2025-12-31T00:00:00+00:00",
            "2025-12-31T01:00:00+00:00",
        )
        .expect("create");

        let now = "2026-01-01T00:30:00+00:00";
        assert!(user_by_session(&conn, "token-live", now).expect("resolve").is_some());
        assert!(user_by_session(&conn, "token-stale", now).expect("resolve").is_none());

        delete_expired_sessions(&conn, now).expect("sweep");
        assert!(user_by_session(&conn, "token-live", now).expect("resolve").is_some());
    }

    #[test]
    fn destroy_session_is_idempotent() {
        let conn = test_conn();
        let owner = test_user(&conn, "a@x.com");
        create_session(
            &conn,
            owner,
            "token",
            "2026-01-01T00:00:00+00:00",
            "2026-01-02T00:00:00+00:00",
        )
        .expect("create");

        delete_session(&conn, "token").expect("first delete");
        delete_session(&conn, "token").expect("second delete");
        assert!(user_by_session(&conn, "token", "2026-01-01T00:30:00+00:00")
            .expect("resolve")
            .is_none());
    }

    #[test]
    fn prune_keeps_only_the_newest_sessions() {
        let conn = test_conn();
        let owner = test_user(&conn, "a@x.com");
        for i in 0..4 {
            create_session(
                &conn,
                owner,
                &format!("token-{i}"),
                &format!("2026-01-0{}T00:00:00+00:00", i + 1),
                "2026-02-01T00:00:00+00:00",
            )
            .expect("create");
        }
        prune_sessions(&conn, owner, 2).expect("prune");

        let now = "2026-01-10T00:00:00+00:00";
        assert!(user_by_session(&conn, "token-0", now).expect("resolve").is_none());
        assert!(user_by_session(&conn, "token-1", now).expect("resolve").is_none());
        assert!(user_by_session(&conn, "token-2", now).expect("resolve").is_some());
        assert!(user_by_session(&conn, "token-3", now).expect("resolve").is_some());
    }
}
