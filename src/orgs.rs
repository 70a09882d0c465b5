use chrono::{DateTime, Utc};
use diesel::prelude::*;

/// A tenant of the platform. Read-only to the engine; the retention window
/// comes from runtime config, not the row.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::orgs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Org {
    pub id: i32,
    pub name: String,
    pub created_on: DateTime<Utc>,
    pub is_anon: bool,
    pub is_active: bool,
}
