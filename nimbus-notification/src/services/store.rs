use diesel::prelude::*;
use uuid::Uuid;

use nimbus_shared::errors::AppResult;

use crate::models::{Device, NewNotification, User};
use crate::schema::{notifications, users};

/// Storage seam for the dispatch engine: recipient lookup plus the bulk
/// notification write. The engine stays testable without a database.
pub trait DispatchStore {
    /// Load users with their devices eagerly attached. Empty filters mean
    /// every user (broadcast). Users with zero devices are included.
    fn load_recipients(
        &mut self,
        user_ids: &[Uuid],
        user_emails: &[String],
    ) -> AppResult<Vec<(User, Vec<Device>)>>;

    /// Persist all rows in one bulk insert. A failure fails the whole batch.
    fn save_notifications(&mut self, rows: &[NewNotification]) -> AppResult<()>;
}

pub struct DieselStore<'a> {
    conn: &'a mut PgConnection,
}

impl<'a> DieselStore<'a> {
    pub fn new(conn: &'a mut PgConnection) -> Self {
        Self { conn }
    }
}

impl DispatchStore for DieselStore<'_> {
    fn load_recipients(
        &mut self,
        user_ids: &[Uuid],
        user_emails: &[String],
    ) -> AppResult<Vec<(User, Vec<Device>)>> {
        let mut query = users::table.into_boxed();
        if !user_ids.is_empty() || !user_emails.is_empty() {
            query = query.filter(
                users::id.eq_any(user_ids).or(users::email.eq_any(user_emails)),
            );
        }

        let users = query.load::<User>(self.conn)?;
        let devices = Device::belonging_to(&users)
            .load::<Device>(self.conn)?
            .grouped_by(&users);

        Ok(users.into_iter().zip(devices).collect())
    }

    fn save_notifications(&mut self, rows: &[NewNotification]) -> AppResult<()> {
        diesel::insert_into(notifications::table)
            .values(rows)
            .execute(self.conn)?;
        Ok(())
    }
}
