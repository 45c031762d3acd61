//! The article dual-write: one transaction, two relations.
//!
//! Archive is append-only (`ON CONFLICT (guid) DO NOTHING`); Current is
//! always overwritten with the latest observation. Both statements run in
//! the same `sqlx::Transaction` at the default isolation level and commit
//! together — this is the only multi-statement transaction in the engine,
//! and it must not hold the connection across network I/O (the `Article`
//! is fully materialised before this call).

use super::{Store, StoreError};
use crate::models::Article;

impl Store {
    pub async fn dual_write_article(&self, article: &Article) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::classify)?;

        sqlx::query(
            "INSERT INTO articles_archive
                (guid, title, link, published_at, body, summary, author, categories, feed_name, feed_url)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (guid) DO NOTHING",
        )
        .bind(&article.guid)
        .bind(&article.title)
        .bind(&article.link)
        .bind(article.published_at)
        .bind(&article.body)
        .bind(&article.summary)
        .bind(&article.author)
        .bind(&article.categories)
        .bind(&article.feed_name)
        .bind(&article.feed_url)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::classify)?;

        sqlx::query(
            "INSERT INTO articles_current
                (guid, title, link, published_at, body, summary, author, categories, feed_name, feed_url, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, now())
             ON CONFLICT (guid) DO UPDATE SET
               title = EXCLUDED.title,
               link = EXCLUDED.link,
               published_at = EXCLUDED.published_at,
               body = EXCLUDED.body,
               summary = EXCLUDED.summary,
               author = EXCLUDED.author,
               categories = EXCLUDED.categories,
               feed_name = EXCLUDED.feed_name,
               feed_url = EXCLUDED.feed_url,
               updated_at = EXCLUDED.updated_at",
        )
        .bind(&article.guid)
        .bind(&article.title)
        .bind(&article.link)
        .bind(article.published_at)
        .bind(&article.body)
        .bind(&article.summary)
        .bind(&article.author)
        .bind(&article.categories)
        .bind(&article.feed_name)
        .bind(&article.feed_url)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::classify)?;

        tx.commit().await.map_err(StoreError::classify)?;
        Ok(())
    }
}
