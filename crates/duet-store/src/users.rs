use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::database::Database;
use crate::error::{not_found, Result};
use crate::models::{UserId, UserProfile};
use crate::row::{ts_from_sql, ts_to_sql, uuid_from_sql};

const USER_COLUMNS: &str = "id, full_name, profile_pic, bio, last_seen";

impl Database {
    /// Insert a user or refresh the profile fields of an existing one.
    pub fn upsert_user(&self, user: &UserProfile) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, full_name, profile_pic, bio, last_seen, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                 full_name = excluded.full_name,
                 profile_pic = excluded.profile_pic,
                 bio = excluded.bio",
            params![
                user.id.to_string(),
                user.full_name,
                user.profile_pic,
                user.bio,
                user.last_seen.as_ref().map(ts_to_sql),
                ts_to_sql(&Utc::now()),
            ],
        )?;
        Ok(())
    }

    pub fn get_user(&self, id: UserId) -> Result<UserProfile> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.to_string()],
                row_to_user,
            )
            .map_err(not_found)
    }

    /// Every known user except `id`, ordered by name.
    pub fn list_users_except(&self, id: UserId) -> Result<Vec<UserProfile>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id != ?1 ORDER BY full_name COLLATE NOCASE ASC"
        ))?;

        let rows = stmt.query_map(params![id.to_string()], row_to_user)?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    /// Update name and bio, and the avatar when `profile_pic` is given.
    pub fn update_profile(
        &self,
        id: UserId,
        full_name: &str,
        bio: &str,
        profile_pic: Option<&str>,
    ) -> Result<UserProfile> {
        let affected = self.conn().execute(
            "UPDATE users
             SET full_name = ?2, bio = ?3, profile_pic = COALESCE(?4, profile_pic)
             WHERE id = ?1",
            params![id.to_string(), full_name, bio, profile_pic],
        )?;
        if affected == 0 {
            return Err(crate::StoreError::NotFound);
        }
        self.get_user(id)
    }

    /// Record when a user was last connected. Returns `false` for unknown users.
    pub fn touch_last_seen(&self, id: UserId, at: DateTime<Utc>) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE users SET last_seen = ?2 WHERE id = ?1",
            params![id.to_string(), ts_to_sql(&at)],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserProfile> {
    let id_str: String = row.get(0)?;
    let full_name: String = row.get(1)?;
    let profile_pic: Option<String> = row.get(2)?;
    let bio: String = row.get(3)?;
    let last_seen: Option<String> = row.get(4)?;

    Ok(UserProfile {
        id: UserId(uuid_from_sql(0, &id_str)?),
        full_name,
        profile_pic,
        bio,
        last_seen: last_seen.map(|s| ts_from_sql(4, &s)).transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreError;
    use chrono::SubsecRound;

    fn user(name: &str) -> UserProfile {
        UserProfile {
            id: UserId::new(),
            full_name: name.to_string(),
            profile_pic: None,
            bio: format!("{name}'s bio"),
            last_seen: None,
        }
    }

    #[test]
    fn test_upsert_and_list_excludes_self() {
        let db = Database::open_in_memory().unwrap();
        let (ada, grace, linus) = (user("Ada"), user("grace"), user("Linus"));
        for u in [&linus, &ada, &grace] {
            db.upsert_user(u).unwrap();
        }

        let listed = db.list_users_except(ada.id).unwrap();
        let names: Vec<_> = listed.iter().map(|u| u.full_name.as_str()).collect();
        assert_eq!(names, vec!["grace", "Linus"]);
    }

    #[test]
    fn test_upsert_overwrites_profile_fields() {
        let db = Database::open_in_memory().unwrap();
        let mut ada = user("Ada");
        db.upsert_user(&ada).unwrap();

        ada.full_name = "Ada Lovelace".into();
        db.upsert_user(&ada).unwrap();
        assert_eq!(db.get_user(ada.id).unwrap().full_name, "Ada Lovelace");
    }

    #[test]
    fn test_update_profile_keeps_avatar_when_absent() {
        let db = Database::open_in_memory().unwrap();
        let mut ada = user("Ada");
        ada.profile_pic = Some("http://localhost/media/a".into());
        db.upsert_user(&ada).unwrap();

        let updated = db.update_profile(ada.id, "Countess", "math", None).unwrap();
        assert_eq!(updated.full_name, "Countess");
        assert_eq!(updated.bio, "math");
        assert_eq!(updated.profile_pic, ada.profile_pic);

        let updated = db
            .update_profile(ada.id, "Countess", "math", Some("http://localhost/media/b"))
            .unwrap();
        assert_eq!(updated.profile_pic.as_deref(), Some("http://localhost/media/b"));
    }

    #[test]
    fn test_update_unknown_user_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.update_profile(UserId::new(), "x", "", None),
            Err(StoreError::NotFound)
        ));
        assert!(matches!(db.get_user(UserId::new()), Err(StoreError::NotFound)));
    }

    #[test]
    fn test_last_seen_is_recorded() {
        let db = Database::open_in_memory().unwrap();
        let ada = user("Ada");
        db.upsert_user(&ada).unwrap();

        let now = Utc::now().trunc_subsecs(6);
        assert!(db.touch_last_seen(ada.id, now).unwrap());
        assert_eq!(db.get_user(ada.id).unwrap().last_seen, Some(now));
        assert!(!db.touch_last_seen(UserId::new(), now).unwrap());
    }
}
