//! Read-only lookups against rows owned by collaborating apps: listing
//! ownership, public user profiles, and the identity provider's sessions.

use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::ChatStore;
use crate::error::ChatError;
use crate::models::{Listing, UserSummary};

fn user_from_row(r: &SqliteRow) -> UserSummary {
    UserSummary {
        id: r.get("id"),
        first_name: r.get("first_name"),
        last_name: r.get("last_name"),
        email: r.get("email"),
        profile_image_url: r.get("profile_image_url"),
    }
}

impl ChatStore {
    pub async fn get_listing(&self, listing_id: i64) -> Result<Option<Listing>, ChatError> {
        let row = sqlx::query("SELECT id, owner_id, title FROM listings WHERE id = ?")
            .bind(listing_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| Listing {
            id: r.get("id"),
            owner_id: r.get("owner_id"),
            title: r.get("title"),
        }))
    }

    pub async fn get_user_summary(&self, user_id: i64) -> Result<Option<UserSummary>, ChatError> {
        let row = sqlx::query(
            "SELECT id, first_name, last_name, email, profile_image_url FROM users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(user_from_row))
    }

    /// Like `get_user_summary`, but never fails on a missing row.
    pub async fn user_summary_or_unknown(&self, user_id: i64) -> Result<UserSummary, ChatError> {
        Ok(self
            .get_user_summary(user_id)
            .await?
            .unwrap_or_else(|| UserSummary::unknown(user_id)))
    }

    /// Resolve a bearer token to the user it was issued for. Expired tokens resolve to nothing.
    pub async fn principal_for_token(&self, token: &str) -> Result<Option<i64>, ChatError> {
        let user_id = sqlx::query_scalar::<_, i64>(
            "SELECT user_id FROM sessions WHERE token = ? AND expires_at > ?",
        )
        .bind(token)
        .bind(Utc::now().timestamp())
        .fetch_optional(&self.pool)
        .await?;
        Ok(user_id)
    }
}
