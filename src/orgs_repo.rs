use anyhow::Result;
use diesel::prelude::*;

use crate::orgs::Org;
use crate::runtime::PgPool;

/// Fetch all active orgs, ordered by id. The pass walks this list
/// sequentially; the ordering is part of the engine's contract.
pub async fn active_orgs(pool: &PgPool) -> Result<Vec<Org>> {
    use crate::schema::orgs::dsl::*;

    let pool = pool.clone();

    let result = tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;

        let rows = orgs
            .filter(is_active.eq(true))
            .order(id.asc())
            .select(Org::as_select())
            .load::<Org>(&mut conn)?;

        Ok::<Vec<Org>, anyhow::Error>(rows)
    })
    .await??;

    Ok(result)
}
