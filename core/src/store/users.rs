//! User lookups.

use duckdb::params;

use super::{RetrieveUser, Store};
use crate::schema::User;
use crate::Result;

impl RetrieveUser for Store {
    fn user_by_login(&self, login: &str) -> Result<Option<User>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare("SELECT id, login, real_name FROM users WHERE login = ?")?;
        let mut rows = stmt.query(params![login])?;

        match rows.next()? {
            Some(row) => Ok(Some(User {
                id: row.get(0)?,
                login: row.get(1)?,
                real_name: row.get(2)?,
            })),
            None => Ok(None),
        }
    }
}

impl Store {
    /// Insert a user, replacing an existing one with the same id.
    pub fn write_user(&self, user: &User) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT OR REPLACE INTO users VALUES (?, ?, ?)",
            params![user.id, user.login, user.real_name],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::setup_store;

    #[test]
    fn test_user_by_login() {
        let (_tmp, store) = setup_store();
        store.write_user(&User::new(101, "alice")).unwrap();

        let found = store.user_by_login("alice").unwrap().unwrap();
        assert_eq!(found.id, 101);
        assert!(store.user_by_login("bob").unwrap().is_none());
    }
}
