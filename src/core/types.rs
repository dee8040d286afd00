use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Access role stored in `roles` / `user_roles`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, AsRefStr, EnumIter)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Role {
    Admin,
    Cashier,
    Supervisor,
}

impl Role {
    pub fn as_str(&self) -> &str {
        self.as_ref()
    }
}

/// Whether contact sharing may register new users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SignMode {
    /// Anyone may sign in
    On,
    /// A single sign-in, then back to `Off`
    One,
    #[default]
    Off,
}

impl SignMode {
    pub fn enabled(&self) -> bool {
        matches!(self, SignMode::On | SignMode::One)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_role_names() {
        assert_eq!(Role::Admin.to_string(), "ADMIN");
        assert_eq!(Role::from_str("cashier").unwrap(), Role::Cashier);
        assert!(Role::from_str("owner").is_err());
        assert_eq!(Role::iter().count(), 3);
    }

    #[test]
    fn test_sign_mode() {
        assert_eq!(SignMode::default(), SignMode::Off);
        assert_eq!(SignMode::from_str("one").unwrap(), SignMode::One);
        assert!(SignMode::One.enabled());
        assert!(!SignMode::Off.enabled());
        assert_eq!(SignMode::On.to_string(), "on");
    }
}
