use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Result};
use std::fmt;
use std::str::FromStr;

use crate::core::Role;
use crate::storage::migrations;

/// A registered Telegram user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Telegram user ID
    pub user_id: i64,
    /// Phone number in E.164 form (`+380...`)
    pub phone_number: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub roles: Vec<Role>,
}

impl User {
    pub fn full_name(&self) -> String {
        [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// Roles formatted as `[ADMIN, CASHIER]`.
    pub fn roles_label(&self) -> String {
        let names: Vec<&str> = self.roles.iter().map(|r| r.as_str()).collect();
        format!("[{}]", names.join(", "))
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} ({}) {}",
            self.user_id,
            self.phone_number,
            self.full_name(),
            self.roles_label()
        )
    }
}

/// Contact data used to register a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub user_id: i64,
    pub phone_number: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// Create a new database connection pool
///
/// Initializes a connection pool with up to 10 connections and applies the
/// embedded migrations before returning.
pub fn create_pool(database_path: &str) -> anyhow::Result<DbPool> {
    let manager =
        SqliteConnectionManager::file(database_path).with_init(|c| c.execute_batch("PRAGMA foreign_keys = ON;"));
    let pool = Pool::builder()
        .max_size(10) // Maximum 10 connections in the pool
        .build(manager)?;

    let mut conn = pool.get()?;
    migrations::run_migrations(&mut conn)?;

    Ok(pool)
}

/// Get a connection from the pool
///
/// The connection is returned to the pool when dropped.
pub fn get_connection(pool: &DbPool) -> Result<DbConnection, r2d2::Error> {
    pool.get()
}

fn load_roles(conn: &Connection, user_id: i64) -> Result<Vec<Role>> {
    let mut stmt = conn.prepare("SELECT role_name FROM user_roles WHERE user_id = ?1 ORDER BY role_name")?;
    let rows = stmt.query_map([user_id], |row| row.get::<_, String>(0))?;

    let mut roles = Vec::new();
    for name in rows {
        let name = name?;
        match Role::from_str(&name) {
            Ok(role) => roles.push(role),
            Err(_) => log::warn!("Unknown role {} for user {}", name, user_id),
        }
    }
    Ok(roles)
}

fn read_user(conn: &Connection, row: (i64, String, Option<String>, Option<String>)) -> Result<User> {
    let (user_id, phone_number, first_name, last_name) = row;
    Ok(User {
        user_id,
        phone_number,
        first_name,
        last_name,
        roles: load_roles(conn, user_id)?,
    })
}

/// Registers a user unless one with the same ID already exists.
///
/// Returns the stored user either way.
pub fn add_user(conn: &Connection, new_user: &NewUser) -> Result<User> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO users (user_id, phone_number, first_name, last_name) VALUES (?1, ?2, ?3, ?4)",
        params![
            new_user.user_id,
            new_user.phone_number,
            new_user.first_name,
            new_user.last_name
        ],
    )?;

    let user = get_user(conn, new_user.user_id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
    if inserted > 0 {
        log::info!("new user: {}", user);
    }
    Ok(user)
}

/// Gets a user by Telegram ID.
pub fn get_user(conn: &Connection, user_id: i64) -> Result<Option<User>> {
    let row = conn
        .query_row(
            "SELECT user_id, phone_number, first_name, last_name FROM users WHERE user_id = ?1",
            [user_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()?;

    row.map(|row| read_user(conn, row)).transpose()
}

/// Gets a user by normalized phone number.
pub fn find_user_by_phone(conn: &Connection, phone_number: &str) -> Result<Option<User>> {
    let row = conn
        .query_row(
            "SELECT user_id, phone_number, first_name, last_name FROM users WHERE phone_number = ?1",
            [phone_number],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()?;

    row.map(|row| read_user(conn, row)).transpose()
}

/// All users ordered by ID.
pub fn get_all_users(conn: &Connection) -> Result<Vec<User>> {
    let mut stmt = conn.prepare("SELECT user_id, phone_number, first_name, last_name FROM users ORDER BY user_id")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))?;

    let mut users = Vec::new();
    for row in rows {
        users.push(read_user(conn, row?)?);
    }
    Ok(users)
}

/// Removes a user and their roles. Returns `false` if the user did not exist.
pub fn delete_user(conn: &Connection, user_id: i64) -> Result<bool> {
    conn.execute("DELETE FROM user_roles WHERE user_id = ?1", [user_id])?;
    let deleted = conn.execute("DELETE FROM users WHERE user_id = ?1", [user_id])?;
    if deleted > 0 {
        log::info!("user {} deleted", user_id);
    }
    Ok(deleted > 0)
}

/// Grants a role. Granting a role twice is a no-op.
pub fn add_role(conn: &Connection, user_id: i64, role: Role) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO roles (name) VALUES (?1)",
        [role.as_str()],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO user_roles (user_id, role_name) VALUES (?1, ?2)",
        params![user_id, role.as_str()],
    )?;
    log::info!("{} is a {} now", user_id, role);
    Ok(())
}

pub fn has_role(conn: &Connection, user_id: i64, role: Role) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM user_roles WHERE user_id = ?1 AND role_name = ?2)",
        params![user_id, role.as_str()],
        |row| row.get(0),
    )
}

/// IDs of every user holding `role`.
pub fn user_ids_with_role(conn: &Connection, role: Role) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare("SELECT user_id FROM user_roles WHERE role_name = ?1 ORDER BY user_id")?;
    let rows = stmt.query_map([role.as_str()], |row| row.get(0))?;
    rows.collect()
}

pub fn role_has_users(conn: &Connection, role: Role) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM user_roles WHERE role_name = ?1)",
        [role.as_str()],
        |row| row.get(0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn test_pool() -> (TempDir, DbPool) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");
        let pool = create_pool(path.to_str().unwrap()).unwrap();
        (dir, pool)
    }

    fn taras() -> NewUser {
        NewUser {
            user_id: 42,
            phone_number: "+380501234567".to_string(),
            first_name: Some("Тарас".to_string()),
            last_name: Some("Шевченко".to_string()),
        }
    }

    #[test]
    fn test_add_user_is_idempotent() {
        let (_dir, pool) = test_pool();
        let conn = get_connection(&pool).unwrap();

        let first = add_user(&conn, &taras()).unwrap();
        let second = add_user(
            &conn,
            &NewUser {
                first_name: Some("Other".to_string()),
                ..taras()
            },
        )
        .unwrap();

        assert_eq!(first, second);
        assert_eq!(get_all_users(&conn).unwrap().len(), 1);
    }

    #[test]
    fn test_roles() {
        let (_dir, pool) = test_pool();
        let conn = get_connection(&pool).unwrap();
        add_user(&conn, &taras()).unwrap();

        assert!(!role_has_users(&conn, Role::Admin).unwrap());
        add_role(&conn, 42, Role::Admin).unwrap();
        add_role(&conn, 42, Role::Admin).unwrap();
        add_role(&conn, 42, Role::Cashier).unwrap();

        assert!(has_role(&conn, 42, Role::Admin).unwrap());
        assert!(!has_role(&conn, 42, Role::Supervisor).unwrap());
        assert!(role_has_users(&conn, Role::Admin).unwrap());
        assert_eq!(user_ids_with_role(&conn, Role::Cashier).unwrap(), vec![42]);

        let user = get_user(&conn, 42).unwrap().unwrap();
        assert_eq!(user.roles, vec![Role::Admin, Role::Cashier]);
        assert_eq!(user.to_string(), "42: +380501234567 (Тарас Шевченко) [ADMIN, CASHIER]");
    }

    #[test]
    fn test_find_and_delete() {
        let (_dir, pool) = test_pool();
        let conn = get_connection(&pool).unwrap();
        add_user(&conn, &taras()).unwrap();
        add_role(&conn, 42, Role::Supervisor).unwrap();

        let found = find_user_by_phone(&conn, "+380501234567").unwrap();
        assert_eq!(found.map(|u| u.user_id), Some(42));

        assert!(delete_user(&conn, 42).unwrap());
        assert!(!delete_user(&conn, 42).unwrap());
        assert!(get_user(&conn, 42).unwrap().is_none());
        assert!(!role_has_users(&conn, Role::Supervisor).unwrap());
    }
}
