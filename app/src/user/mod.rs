use crate::database::Database;

mod entities;

pub use entities::{Id, User};

pub async fn get(db: &Database, id: Id) -> Option<User> {
    queries::get(db, id).await
}

mod queries {
    use super::{Id, User};
    use crate::database::Database;
    use chrono::{DateTime, Utc};
    use uuid::Uuid;

    pub(super) async fn get(db: &Database, id: Id) -> Option<User> {
        sqlx::query_as::<_, UserRow>("SELECT id, email, created_at FROM users WHERE id = $1")
            .bind(id.0)
            .fetch_optional(db)
            .await
            .unwrap()
            .map(|row| row.into_entity())
    }

    #[derive(sqlx::FromRow, Debug)]
    struct UserRow {
        id: Uuid,
        email: String,
        created_at: DateTime<Utc>,
    }

    impl UserRow {
        fn into_entity(self) -> User {
            User {
                id: Id(self.id),
                email: self.email,
                created_at: self.created_at,
            }
        }
    }
}
