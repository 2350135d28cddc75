// Chat store. Each domain lives in its own file with `impl ChatStore`.
//
// The store owns conversation and message rows. User, listing, and session
// rows belong to the surrounding application and are only read here.

use sqlx::sqlite::SqlitePool;

mod conversations;
mod directory;
mod messages;

#[cfg(test)]
pub(crate) mod test_helpers;

#[derive(Clone)]
pub struct ChatStore {
    pub(crate) pool: SqlitePool,
}

impl ChatStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}
