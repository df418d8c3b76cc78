use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection as SqliteConnection, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::{AppError, Result};
use crate::models::{IngestOutcome, NewWatch, RawItem, ResultItem, ResultsMeta, Watch};

use super::schema::SCHEMA;

/// Persistence layer for watches and their results.
///
/// All calls run on tokio-rusqlite's single connection thread, so every
/// mutation below is observed atomically; `ingest` and `acknowledge`
/// additionally wrap their multi-statement work in one transaction so a
/// failure rolls back cleanly.
pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // Watch operations

    pub async fn insert_watch(&self, watch: NewWatch) -> Result<i64> {
        let terms_json = serde_json::to_string(&watch.terms)?;
        let sites_json = serde_json::to_string(&watch.enabled_sites)?;
        let strict = watch.strict;
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO watches (terms, strict, enabled_sites) VALUES (?1, ?2, ?3)",
                    params![terms_json, strict, sites_json],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    pub async fn get_all_watches(&self) -> Result<Vec<Watch>> {
        let watches = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, terms, active, strict, enabled_sites, last_run, created_at FROM watches ORDER BY id",
                )?;
                let watches = stmt
                    .query_map([], |row| Ok(watch_from_row(row)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(watches)
            })
            .await?;
        Ok(watches)
    }

    pub async fn get_active_watches(&self) -> Result<Vec<Watch>> {
        let watches = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, terms, active, strict, enabled_sites, last_run, created_at FROM watches WHERE active = 1 ORDER BY id",
                )?;
                let watches = stmt
                    .query_map([], |row| Ok(watch_from_row(row)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(watches)
            })
            .await?;
        Ok(watches)
    }

    pub async fn get_watch(&self, id: i64) -> Result<Option<Watch>> {
        let watch = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, terms, active, strict, enabled_sites, last_run, created_at FROM watches WHERE id = ?1",
                )?;
                let watch = stmt
                    .query_row(params![id], |row| Ok(watch_from_row(row)))
                    .optional()?;
                Ok(watch)
            })
            .await?;
        Ok(watch)
    }

    pub async fn set_watch_active(&self, id: i64, active: bool) -> Result<()> {
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE watches SET active = ?1 WHERE id = ?2",
                    params![active, id],
                )?;
                Ok(changed)
            })
            .await?;
        if changed == 0 {
            return Err(AppError::WatchNotFound(id));
        }
        Ok(())
    }

    pub async fn update_watch_last_run(&self, id: i64) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE watches SET last_run = datetime('now') WHERE id = ?1",
                    params![id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn delete_watch(&self, id: i64) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM results_meta WHERE watch_id = ?1", params![id])?;
                conn.execute("DELETE FROM results WHERE watch_id = ?1", params![id])?;
                conn.execute("DELETE FROM watches WHERE id = ?1", params![id])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Result operations

    /// Merge a fresh batch of raw items into the watch's persisted state.
    ///
    /// Links already persisted (and duplicate links within the batch) are
    /// ignored; their rows keep the title, price and is_new flag they had.
    /// One row is inserted per previously-unseen link, and the meta counts
    /// are recomputed from the results table, all in one transaction.
    pub async fn ingest(&self, watch_id: i64, raw_items: Vec<RawItem>) -> Result<IngestOutcome> {
        let now = Utc::now();
        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                let exists: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM watches WHERE id = ?1",
                    params![watch_id],
                    |row| row.get(0),
                )?;
                if exists == 0 {
                    return Ok(None);
                }

                let mut seen: HashSet<String> = {
                    let mut stmt =
                        tx.prepare("SELECT link FROM results WHERE watch_id = ?1")?;
                    let links = stmt
                        .query_map(params![watch_id], |row| row.get::<_, String>(0))?
                        .collect::<std::result::Result<HashSet<_>, _>>()?;
                    links
                };

                let mut new_items = Vec::new();
                for item in raw_items {
                    if !seen.insert(item.link.clone()) {
                        continue;
                    }
                    tx.execute(
                        "INSERT INTO results (watch_id, link, title, source, price, image, first_seen_at, is_new)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1)",
                        params![
                            watch_id,
                            item.link,
                            item.title,
                            item.source,
                            item.price,
                            item.image,
                            now.to_rfc3339(),
                        ],
                    )?;
                    new_items.push(ResultItem {
                        id: tx.last_insert_rowid(),
                        watch_id,
                        link: item.link,
                        title: item.title,
                        source: item.source,
                        price: item.price,
                        image: item.image,
                        first_seen_at: now,
                        is_new: true,
                    });
                }

                let meta = recompute_meta(&tx, watch_id)?;
                tx.commit()?;

                Ok(Some(IngestOutcome {
                    new_items,
                    total_count: meta.total_count,
                }))
            })
            .await?;
        outcome.ok_or(AppError::WatchNotFound(watch_id))
    }

    /// Mark every result of the watch as read and zero its new count.
    pub async fn acknowledge(&self, watch_id: i64) -> Result<()> {
        let found = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                let exists: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM watches WHERE id = ?1",
                    params![watch_id],
                    |row| row.get(0),
                )?;
                if exists == 0 {
                    return Ok(false);
                }

                tx.execute(
                    "UPDATE results SET is_new = 0 WHERE watch_id = ?1",
                    params![watch_id],
                )?;
                recompute_meta(&tx, watch_id)?;
                tx.commit()?;
                Ok(true)
            })
            .await?;
        if !found {
            return Err(AppError::WatchNotFound(watch_id));
        }
        Ok(())
    }

    pub async fn get_results(&self, watch_id: i64) -> Result<Vec<ResultItem>> {
        let items = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, watch_id, link, title, source, price, image, first_seen_at, is_new
                     FROM results WHERE watch_id = ?1 ORDER BY first_seen_at DESC, id DESC",
                )?;
                let items = stmt
                    .query_map(params![watch_id], |row| Ok(result_from_row(row)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(items)
            })
            .await?;
        Ok(items)
    }

    pub async fn get_meta(&self, watch_id: i64) -> Result<ResultsMeta> {
        let meta = self
            .conn
            .call(move |conn| {
                let meta = conn
                    .query_row(
                        "SELECT total_count, new_count FROM results_meta WHERE watch_id = ?1",
                        params![watch_id],
                        |row| {
                            Ok(ResultsMeta {
                                total_count: row.get(0)?,
                                new_count: row.get(1)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(meta.unwrap_or_default())
            })
            .await?;
        Ok(meta)
    }
}

/// Rebuild the meta row from the results table. Must run inside the same
/// transaction as the mutation it follows.
fn recompute_meta(conn: &SqliteConnection, watch_id: i64) -> rusqlite::Result<ResultsMeta> {
    conn.execute(
        "INSERT INTO results_meta (watch_id, total_count, new_count)
         SELECT ?1, COUNT(*), COALESCE(SUM(is_new), 0) FROM results WHERE watch_id = ?1
         ON CONFLICT(watch_id) DO UPDATE SET
             total_count = excluded.total_count,
             new_count = excluded.new_count",
        params![watch_id],
    )?;
    conn.query_row(
        "SELECT total_count, new_count FROM results_meta WHERE watch_id = ?1",
        params![watch_id],
        |row| {
            Ok(ResultsMeta {
                total_count: row.get(0)?,
                new_count: row.get(1)?,
            })
        },
    )
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first (e.g., "2026-01-11T12:34:56+00:00")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Try SQLite datetime format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn watch_from_row(row: &Row) -> Watch {
    let terms: Vec<String> = row
        .get::<_, String>(1)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default();
    let enabled_sites: HashMap<String, bool> = row
        .get::<_, String>(4)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default();
    Watch {
        id: row.get(0).unwrap(),
        terms,
        active: row.get::<_, i64>(2).unwrap() != 0,
        strict: row.get::<_, i64>(3).unwrap() != 0,
        enabled_sites,
        last_run: row
            .get::<_, Option<String>>(5)
            .unwrap()
            .and_then(|s| parse_datetime(&s)),
        created_at: row
            .get::<_, String>(6)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
    }
}

fn result_from_row(row: &Row) -> ResultItem {
    ResultItem {
        id: row.get(0).unwrap(),
        watch_id: row.get(1).unwrap(),
        link: row.get(2).unwrap(),
        title: row.get(3).unwrap(),
        source: row.get(4).unwrap(),
        price: row.get(5).unwrap(),
        image: row.get(6).unwrap(),
        first_seen_at: row
            .get::<_, String>(7)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
        is_new: row.get::<_, i64>(8).unwrap() != 0,
    }
}
