use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Id(pub Uuid);

#[derive(Debug)]
pub struct User {
    pub id: Id,
    pub email: String,
    pub created_at: DateTime<Utc>,
}
