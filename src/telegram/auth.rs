//! Contact sign-in and the role gate.

use rusqlite::Connection;
use teloxide::prelude::*;

use crate::core::{Role, SignMode};
use crate::storage::db::{self, DbPool, NewUser, User};
use crate::storage::get_connection;
use crate::telegram::keyboards::contact_keyboard;
use crate::telegram::Bot;

/// Normalizes a Ukrainian phone number to `+380XXXXXXXXX`.
///
/// Numbers of other countries keep their digits behind a `+`.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }

    let international = if digits.len() == 10 && digits.starts_with('0') {
        format!("38{}", digits)
    } else if digits.len() == 9 && !raw.trim_start().starts_with('+') {
        format!("380{}", digits)
    } else {
        digits
    };
    Some(format!("+{}", international))
}

/// Registration is open while sign mode is enabled or nobody is an admin yet.
pub fn sign_in_allowed(conn: &Connection, mode: SignMode) -> rusqlite::Result<bool> {
    Ok(mode.enabled() || !db::role_has_users(conn, Role::Admin)?)
}

/// Registers the contact when registration is open.
///
/// `ONE` falls back to `OFF` after a registration. Configured admin phones
/// receive the ADMIN role. Returns `None` when registration is closed.
pub fn sign_in(
    conn: &Connection,
    contact: &NewUser,
    mode: &mut SignMode,
    admin_phones: &[String],
) -> rusqlite::Result<Option<User>> {
    if !sign_in_allowed(conn, *mode)? {
        return Ok(None);
    }

    let user = db::add_user(conn, contact)?;

    if *mode == SignMode::One {
        *mode = SignMode::Off;
    }

    let is_admin = admin_phones
        .iter()
        .filter_map(|phone| normalize_phone(phone))
        .any(|phone| phone == user.phone_number);
    if is_admin {
        db::add_role(conn, user.user_id, Role::Admin)?;
        return db::get_user(conn, user.user_id);
    }

    Ok(Some(user))
}

/// Whether `user_id` may use handlers of `role`.
///
/// When it may not and registration is open, the user is asked to share
/// their contact.
pub async fn authorize(bot: &Bot, db_pool: &DbPool, user_id: i64, role: Role, mode: SignMode) -> anyhow::Result<bool> {
    let prompt = {
        let conn = get_connection(db_pool)?;
        if db::has_role(&conn, user_id, role)? {
            return Ok(true);
        }
        sign_in_allowed(&conn, mode)?
    };

    log::info!("user {} lacks role {}", user_id, role);
    if prompt {
        bot.send_message(ChatId(user_id), "Потрібна авторизація")
            .reply_markup(contact_keyboard())
            .await?;
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::db::create_pool;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn contact(user_id: i64, phone: &str) -> NewUser {
        NewUser {
            user_id,
            phone_number: normalize_phone(phone).unwrap(),
            first_name: Some("Олена".to_string()),
            last_name: None,
        }
    }

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("+380 50 123 45 67").as_deref(), Some("+380501234567"));
        assert_eq!(normalize_phone("380501234567").as_deref(), Some("+380501234567"));
        assert_eq!(normalize_phone("050-123-45-67").as_deref(), Some("+380501234567"));
        assert_eq!(normalize_phone("501234567").as_deref(), Some("+380501234567"));
        assert_eq!(normalize_phone("+48 601 234 567").as_deref(), Some("+48601234567"));
        assert_eq!(normalize_phone("n/a"), None);
    }

    #[test]
    fn test_first_user_can_sign_in_without_sign_mode() {
        let dir = TempDir::new().unwrap();
        let pool = create_pool(dir.path().join("auth.db").to_str().unwrap()).unwrap();
        let conn = get_connection(&pool).unwrap();
        let admins = vec!["0501234567".to_string()];
        let mut mode = SignMode::Off;

        let admin = sign_in(&conn, &contact(1, "+380501234567"), &mut mode, &admins)
            .unwrap()
            .unwrap();
        assert_eq!(admin.roles, vec![Role::Admin]);

        // An admin exists and sign mode is off.
        assert!(sign_in(&conn, &contact(2, "+380671111111"), &mut mode, &admins)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_sign_mode_one_closes_after_registration() {
        let dir = TempDir::new().unwrap();
        let pool = create_pool(dir.path().join("auth.db").to_str().unwrap()).unwrap();
        let conn = get_connection(&pool).unwrap();
        db::add_user(&conn, &contact(1, "+380501234567")).unwrap();
        db::add_role(&conn, 1, Role::Admin).unwrap();

        let mut mode = SignMode::One;
        let user = sign_in(&conn, &contact(2, "+380671111111"), &mut mode, &[])
            .unwrap()
            .unwrap();

        assert!(user.roles.is_empty());
        assert_eq!(mode, SignMode::Off);
        assert!(sign_in(&conn, &contact(3, "+380672222222"), &mut mode, &[])
            .unwrap()
            .is_none());
    }
}
