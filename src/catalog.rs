#![forbid(unsafe_code)]

//! SQLite-backed catalog: subjects → chapters → topics → links.
//!
//! Records here are plain data. Link enrichment happens before a write
//! reaches this module; the store only guarantees that a link's URL and its
//! derived columns land in the same statement.

use std::{collections::HashMap, path::Path};

use anyhow::Context;
use libsql::{Builder, Connection, Row, params};
use serde::Serialize;
use thiserror::Error;

use crate::enrich::DerivedFields;

/// Longest name accepted for subjects, chapters and topics.
pub const MAX_NAME_LEN: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subject {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chapter {
    pub id: i64,
    pub subject_id: i64,
    pub name: String,
    pub level: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Topic {
    pub id: i64,
    pub chapter_id: i64,
    pub name: String,
    pub sequence: u32,
}

/// A stored link. `derived` is owned by the enrichment pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Link {
    pub id: i64,
    pub topic_id: i64,
    pub url: String,
    #[serde(flatten)]
    pub derived: DerivedFields,
}

/// Topic plus its links, as rendered on a chapter page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicWithLinks {
    #[serde(flatten)]
    pub topic: Topic,
    pub links: Vec<Link>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Sql(#[from] libsql::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    pub(crate) fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

async fn configure_connection(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
        PRAGMA foreign_keys=ON;
        "#,
    )
    .await?;
    Ok(())
}

async fn ensure_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS subjects (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        );

        CREATE TABLE IF NOT EXISTS chapters (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            subject_id INTEGER NOT NULL REFERENCES subjects(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            level INTEGER NOT NULL CHECK (level >= 0)
        );

        CREATE TABLE IF NOT EXISTS topics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            chapter_id INTEGER NOT NULL REFERENCES chapters(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            sequence INTEGER NOT NULL CHECK (sequence >= 0)
        );

        CREATE TABLE IF NOT EXISTS links (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            topic_id INTEGER NOT NULL REFERENCES topics(id) ON DELETE CASCADE,
            url TEXT NOT NULL,
            video_id TEXT,
            title TEXT,
            description TEXT,
            thumbnail_url TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_chapters_subject ON chapters(subject_id, level);
        CREATE INDEX IF NOT EXISTS idx_topics_chapter ON topics(chapter_id, sequence);
        CREATE INDEX IF NOT EXISTS idx_links_topic ON links(topic_id);
        "#,
    )
    .await?;
    Ok(())
}

fn validate_name(kind: &str, name: &str) -> StoreResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(StoreError::Invalid(format!("{kind} name must not be empty")));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(StoreError::Invalid(format!(
            "{kind} name must be at most {MAX_NAME_LEN} characters"
        )));
    }
    Ok(trimmed.to_string())
}

fn is_unique_violation(err: &libsql::Error) -> bool {
    err.to_string().contains("UNIQUE constraint failed")
}

fn duplicate_subject(name: &str) -> StoreError {
    StoreError::Conflict(format!("a subject named {name:?} already exists"))
}

/// Owns the catalog connection. Cheap to share behind an `Arc`.
pub struct CatalogStore {
    conn: Connection,
}

impl CatalogStore {
    /// Opens (and if necessary creates) the catalog DB and its schema.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating catalog directory {}", parent.display()))?;
        }

        let db = Builder::new_local(path)
            .build()
            .await
            .with_context(|| format!("opening catalog DB {}", path.display()))?;
        let conn = db.connect()?;
        configure_connection(&conn).await?;
        ensure_schema(&conn).await?;
        Ok(Self { conn })
    }

    // Subjects

    pub async fn create_subject(&self, name: &str) -> StoreResult<Subject> {
        let name = validate_name("subject", name)?;
        let mut rows = match self
            .conn
            .query(
                "INSERT INTO subjects (name) VALUES (?1) RETURNING id, name",
                params![name.as_str()],
            )
            .await
        {
            Ok(rows) => rows,
            Err(err) if is_unique_violation(&err) => return Err(duplicate_subject(&name)),
            Err(err) => return Err(err.into()),
        };
        let row = match rows.next().await {
            Ok(row) => row.context("insert returned no subject row")?,
            Err(err) if is_unique_violation(&err) => return Err(duplicate_subject(&name)),
            Err(err) => return Err(err.into()),
        };
        row_to_subject(&row)
    }

    pub async fn rename_subject(&self, id: i64, name: &str) -> StoreResult<Subject> {
        let name = validate_name("subject", name)?;
        let changed = match self
            .conn
            .execute(
                "UPDATE subjects SET name = ?2 WHERE id = ?1",
                params![id, name.as_str()],
            )
            .await
        {
            Ok(changed) => changed,
            Err(err) if is_unique_violation(&err) => return Err(duplicate_subject(&name)),
            Err(err) => return Err(err.into()),
        };
        if changed == 0 {
            return Err(StoreError::not_found("subject", id));
        }
        Ok(Subject { id, name })
    }

    /// Deletes the subject and, through the FK cascade, every chapter, topic
    /// and link below it.
    pub async fn delete_subject(&self, id: i64) -> StoreResult<()> {
        self.delete_row("subjects", "subject", id).await
    }

    pub async fn get_subject(&self, id: i64) -> StoreResult<Option<Subject>> {
        let mut rows = self
            .conn
            .query("SELECT id, name FROM subjects WHERE id = ?1", params![id])
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_subject(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn list_subjects(&self) -> StoreResult<Vec<Subject>> {
        let mut rows = self
            .conn
            .query("SELECT id, name FROM subjects ORDER BY name, id", params![])
            .await?;
        let mut subjects = Vec::new();
        while let Some(row) = rows.next().await? {
            subjects.push(row_to_subject(&row)?);
        }
        Ok(subjects)
    }

    // Chapters

    pub async fn create_chapter(&self, subject_id: i64, name: &str, level: u16) -> StoreResult<Chapter> {
        let name = validate_name("chapter", name)?;
        self.require("subjects", "subject", subject_id).await?;
        let mut rows = self
            .conn
            .query(
                r#"
                INSERT INTO chapters (subject_id, name, level) VALUES (?1, ?2, ?3)
                RETURNING id, subject_id, name, level
                "#,
                params![subject_id, name.as_str(), i64::from(level)],
            )
            .await?;
        let row = rows.next().await?.context("insert returned no chapter row")?;
        row_to_chapter(&row)
    }

    pub async fn update_chapter(&self, id: i64, name: &str, level: u16) -> StoreResult<Chapter> {
        let name = validate_name("chapter", name)?;
        let mut rows = self
            .conn
            .query(
                r#"
                UPDATE chapters SET name = ?2, level = ?3 WHERE id = ?1
                RETURNING id, subject_id, name, level
                "#,
                params![id, name.as_str(), i64::from(level)],
            )
            .await?;
        match rows.next().await? {
            Some(row) => row_to_chapter(&row),
            None => Err(StoreError::not_found("chapter", id)),
        }
    }

    pub async fn delete_chapter(&self, id: i64) -> StoreResult<()> {
        self.delete_row("chapters", "chapter", id).await
    }

    pub async fn get_chapter(&self, id: i64) -> StoreResult<Option<Chapter>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, subject_id, name, level FROM chapters WHERE id = ?1",
                params![id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_chapter(&row)?)),
            None => Ok(None),
        }
    }

    /// Distinct chapter levels of a subject, ascending.
    pub async fn list_levels(&self, subject_id: i64) -> StoreResult<Vec<u16>> {
        let mut rows = self
            .conn
            .query(
                "SELECT DISTINCT level FROM chapters WHERE subject_id = ?1 ORDER BY level",
                params![subject_id],
            )
            .await?;
        let mut levels = Vec::new();
        while let Some(row) = rows.next().await? {
            let level: i64 = row.get(0)?;
            levels.push(u16::try_from(level).context("stored chapter level out of range")?);
        }
        Ok(levels)
    }

    pub async fn list_chapters(&self, subject_id: i64, level: u16) -> StoreResult<Vec<Chapter>> {
        let mut rows = self
            .conn
            .query(
                r#"
                SELECT id, subject_id, name, level
                FROM chapters
                WHERE subject_id = ?1 AND level = ?2
                ORDER BY id
                "#,
                params![subject_id, i64::from(level)],
            )
            .await?;
        let mut chapters = Vec::new();
        while let Some(row) = rows.next().await? {
            chapters.push(row_to_chapter(&row)?);
        }
        Ok(chapters)
    }

    // Topics

    pub async fn create_topic(&self, chapter_id: i64, name: &str, sequence: u32) -> StoreResult<Topic> {
        let name = validate_name("topic", name)?;
        self.require("chapters", "chapter", chapter_id).await?;
        let mut rows = self
            .conn
            .query(
                r#"
                INSERT INTO topics (chapter_id, name, sequence) VALUES (?1, ?2, ?3)
                RETURNING id, chapter_id, name, sequence
                "#,
                params![chapter_id, name.as_str(), i64::from(sequence)],
            )
            .await?;
        let row = rows.next().await?.context("insert returned no topic row")?;
        row_to_topic(&row)
    }

    pub async fn update_topic(&self, id: i64, name: &str, sequence: u32) -> StoreResult<Topic> {
        let name = validate_name("topic", name)?;
        let mut rows = self
            .conn
            .query(
                r#"
                UPDATE topics SET name = ?2, sequence = ?3 WHERE id = ?1
                RETURNING id, chapter_id, name, sequence
                "#,
                params![id, name.as_str(), i64::from(sequence)],
            )
            .await?;
        match rows.next().await? {
            Some(row) => row_to_topic(&row),
            None => Err(StoreError::not_found("topic", id)),
        }
    }

    pub async fn delete_topic(&self, id: i64) -> StoreResult<()> {
        self.delete_row("topics", "topic", id).await
    }

    pub async fn get_topic(&self, id: i64) -> StoreResult<Option<Topic>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, chapter_id, name, sequence FROM topics WHERE id = ?1",
                params![id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_topic(&row)?)),
            None => Ok(None),
        }
    }

    /// Topics of a chapter ordered by sequence (ties by insertion), each with
    /// its links. Links are loaded in one query rather than per topic.
    pub async fn list_topics_with_links(&self, chapter_id: i64) -> StoreResult<Vec<TopicWithLinks>> {
        let mut rows = self
            .conn
            .query(
                r#"
                SELECT id, chapter_id, name, sequence
                FROM topics
                WHERE chapter_id = ?1
                ORDER BY sequence, id
                "#,
                params![chapter_id],
            )
            .await?;
        let mut topics = Vec::new();
        while let Some(row) = rows.next().await? {
            topics.push(row_to_topic(&row)?);
        }

        let mut rows = self
            .conn
            .query(
                r#"
                SELECT l.id, l.topic_id, l.url, l.video_id, l.title, l.description, l.thumbnail_url
                FROM links l
                JOIN topics t ON t.id = l.topic_id
                WHERE t.chapter_id = ?1
                ORDER BY l.id
                "#,
                params![chapter_id],
            )
            .await?;
        let mut links_by_topic: HashMap<i64, Vec<Link>> = HashMap::new();
        while let Some(row) = rows.next().await? {
            let link = row_to_link(&row)?;
            links_by_topic.entry(link.topic_id).or_default().push(link);
        }

        Ok(topics
            .into_iter()
            .map(|topic| TopicWithLinks {
                links: links_by_topic.remove(&topic.id).unwrap_or_default(),
                topic,
            })
            .collect())
    }

    // Links

    /// Inserts a link with its URL and derived fields in one statement.
    pub async fn insert_link(&self, topic_id: i64, url: &str, derived: &DerivedFields) -> StoreResult<Link> {
        self.require("topics", "topic", topic_id).await?;
        let mut rows = self
            .conn
            .query(
                r#"
                INSERT INTO links (topic_id, url, video_id, title, description, thumbnail_url)
                VALUES (:topic_id, :url, :video_id, :title, :description, :thumbnail_url)
                RETURNING id, topic_id, url, video_id, title, description, thumbnail_url
                "#,
                params![
                    topic_id,
                    url,
                    derived.video_id.as_deref(),
                    derived.title.as_deref(),
                    derived.description.as_deref(),
                    derived.thumbnail_url.as_deref(),
                ],
            )
            .await?;
        let row = rows.next().await?.context("insert returned no link row")?;
        row_to_link(&row)
    }

    /// Replaces the URL and every derived column of a link at once, so no
    /// metadata from a previous URL can survive.
    pub async fn update_link(&self, id: i64, url: &str, derived: &DerivedFields) -> StoreResult<Link> {
        let mut rows = self
            .conn
            .query(
                r#"
                UPDATE links SET
                    url = :url,
                    video_id = :video_id,
                    title = :title,
                    description = :description,
                    thumbnail_url = :thumbnail_url
                WHERE id = :id
                RETURNING id, topic_id, url, video_id, title, description, thumbnail_url
                "#,
                params![
                    url,
                    derived.video_id.as_deref(),
                    derived.title.as_deref(),
                    derived.description.as_deref(),
                    derived.thumbnail_url.as_deref(),
                    id,
                ],
            )
            .await?;
        match rows.next().await? {
            Some(row) => row_to_link(&row),
            None => Err(StoreError::not_found("link", id)),
        }
    }

    pub async fn delete_link(&self, id: i64) -> StoreResult<()> {
        self.delete_row("links", "link", id).await
    }

    pub async fn get_link(&self, id: i64) -> StoreResult<Option<Link>> {
        let mut rows = self
            .conn
            .query(
                r#"
                SELECT id, topic_id, url, video_id, title, description, thumbnail_url
                FROM links
                WHERE id = ?1
                "#,
                params![id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_link(&row)?)),
            None => Ok(None),
        }
    }

    /// All links, or only those of one topic, in insertion order.
    pub async fn list_links(&self, topic_id: Option<i64>) -> StoreResult<Vec<Link>> {
        let mut rows = self
            .conn
            .query(
                r#"
                SELECT id, topic_id, url, video_id, title, description, thumbnail_url
                FROM links
                WHERE ?1 IS NULL OR topic_id = ?1
                ORDER BY id
                "#,
                params![topic_id],
            )
            .await?;
        let mut links = Vec::new();
        while let Some(row) = rows.next().await? {
            links.push(row_to_link(&row)?);
        }
        Ok(links)
    }

    async fn require(&self, table: &str, entity: &'static str, id: i64) -> StoreResult<()> {
        let mut rows = self
            .conn
            .query(&format!("SELECT 1 FROM {table} WHERE id = ?1"), params![id])
            .await?;
        match rows.next().await? {
            Some(_) => Ok(()),
            None => Err(StoreError::not_found(entity, id)),
        }
    }

    async fn delete_row(&self, table: &str, entity: &'static str, id: i64) -> StoreResult<()> {
        let deleted = self
            .conn
            .execute(&format!("DELETE FROM {table} WHERE id = ?1"), params![id])
            .await?;
        if deleted == 0 {
            return Err(StoreError::not_found(entity, id));
        }
        Ok(())
    }
}

fn row_to_subject(row: &Row) -> StoreResult<Subject> {
    Ok(Subject {
        id: row.get(0)?,
        name: row.get(1)?,
    })
}

fn row_to_chapter(row: &Row) -> StoreResult<Chapter> {
    let level: i64 = row.get(3)?;
    Ok(Chapter {
        id: row.get(0)?,
        subject_id: row.get(1)?,
        name: row.get(2)?,
        level: u16::try_from(level).context("stored chapter level out of range")?,
    })
}

fn row_to_topic(row: &Row) -> StoreResult<Topic> {
    let sequence: i64 = row.get(3)?;
    Ok(Topic {
        id: row.get(0)?,
        chapter_id: row.get(1)?,
        name: row.get(2)?,
        sequence: u32::try_from(sequence).context("stored topic sequence out of range")?,
    })
}

/// Column order must match the link SELECT/RETURNING clauses above.
fn row_to_link(row: &Row) -> StoreResult<Link> {
    Ok(Link {
        id: row.get(0)?,
        topic_id: row.get(1)?,
        url: row.get(2)?,
        derived: DerivedFields {
            video_id: row.get(3)?,
            title: row.get(4)?,
            description: row.get(5)?,
            thumbnail_url: row.get(6)?,
        },
    })
}
