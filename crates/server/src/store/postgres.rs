use chrono::{DateTime, Utc};
use huddle_common::types::GroupChatType;
use sqlx::PgPool;
use uuid::Uuid;

use super::{
    GroupChatRecord, MessageRecord, NewGroupChat, Page, StoreError, StoreResult, UserRecord,
};

const UNIQUE_VIOLATION: &str = "23505";

const GROUP_CHAT_COLUMNS: &str = r#"
    g.id,
    g.name,
    g.chat_type,
    g.created_by,
    g.created_at,
    g.updated_at,
    COALESCE(
        array_agg(m.user_id ORDER BY m.joined_at, m.user_id) FILTER (WHERE m.user_id IS NOT NULL),
        '{}'
    ) AS members
"#;

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    password_hash: String,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for UserRecord {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            password_hash: row.password_hash,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct GroupChatRow {
    id: Uuid,
    name: String,
    chat_type: String,
    created_by: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    members: Vec<Uuid>,
}

impl TryFrom<GroupChatRow> for GroupChatRecord {
    type Error = StoreError;

    fn try_from(row: GroupChatRow) -> Result<Self, Self::Error> {
        let chat_type = GroupChatType::from_db_value(&row.chat_type).ok_or_else(|| {
            StoreError::Corrupt(format!("unknown chat type '{}' on {}", row.chat_type, row.id))
        })?;

        Ok(Self {
            id: row.id,
            name: row.name,
            chat_type,
            members: row.members,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    group_chat_id: Uuid,
    author_id: Uuid,
    content: String,
    is_read: bool,
    created_at: DateTime<Utc>,
}

impl From<MessageRow> for MessageRecord {
    fn from(row: MessageRow) -> Self {
        Self {
            id: row.id,
            group_chat_id: row.group_chat_id,
            author_id: row.author_id,
            content: row.content,
            is_read: row.is_read,
            created_at: row.created_at,
        }
    }
}

fn page_bounds(page: Page) -> (i64, i64) {
    (page.limit() as i64, page.offset() as i64)
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Database(db_error) if db_error.code().as_deref() == Some(UNIQUE_VIOLATION)
    )
}

pub(super) async fn create_user(
    pool: &PgPool,
    username: &str,
    password_hash: &str,
) -> StoreResult<UserRecord> {
    sqlx::query_as::<_, UserRow>(
        r#"
        INSERT INTO users (id, username, password_hash)
        VALUES ($1, $2, $3)
        RETURNING id, username, password_hash, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(username)
    .bind(password_hash)
    .fetch_one(pool)
    .await
    .map(UserRecord::from)
    .map_err(|error| {
        if is_unique_violation(&error) {
            StoreError::UsernameTaken
        } else {
            StoreError::Database(error)
        }
    })
}

pub(super) async fn find_user_by_username(
    pool: &PgPool,
    username: &str,
) -> StoreResult<Option<UserRecord>> {
    let row = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT id, username, password_hash, created_at
        FROM users
        WHERE username = $1
          AND deleted_at IS NULL
        "#,
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(UserRecord::from))
}

pub(super) async fn find_user_by_id(pool: &PgPool, user_id: Uuid) -> StoreResult<Option<UserRecord>> {
    let row = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT id, username, password_hash, created_at
        FROM users
        WHERE id = $1
          AND deleted_at IS NULL
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(UserRecord::from))
}

pub(super) async fn find_users_by_ids(
    pool: &PgPool,
    user_ids: &[Uuid],
) -> StoreResult<Vec<UserRecord>> {
    let rows = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT id, username, password_hash, created_at
        FROM users
        WHERE id = ANY($1)
          AND deleted_at IS NULL
        "#,
    )
    .bind(user_ids)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(UserRecord::from).collect())
}

pub(super) async fn search_users(
    pool: &PgPool,
    exclude: Uuid,
    keyword: Option<&str>,
    page: Page,
) -> StoreResult<Vec<UserRecord>> {
    let (limit, offset) = page_bounds(page);
    let rows = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT id, username, password_hash, created_at
        FROM users
        WHERE id <> $1
          AND deleted_at IS NULL
          AND ($2::TEXT IS NULL OR strpos(lower(username), lower($2)) > 0)
        ORDER BY lower(username), id
        LIMIT $3 OFFSET $4
        "#,
    )
    .bind(exclude)
    .bind(keyword)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(UserRecord::from).collect())
}

pub(super) async fn create_group_chat(
    pool: &PgPool,
    new_chat: NewGroupChat,
) -> StoreResult<GroupChatRecord> {
    let group_chat_id = Uuid::new_v4();
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO group_chats (id, name, chat_type, created_by)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(group_chat_id)
    .bind(&new_chat.name)
    .bind(new_chat.chat_type.as_str())
    .bind(new_chat.created_by)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO group_chat_members (group_chat_id, user_id)
        SELECT $1, member_id
        FROM unnest($2::UUID[]) AS member_id
        "#,
    )
    .bind(group_chat_id)
    .bind(&new_chat.members)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    get_group_chat(pool, group_chat_id).await?.ok_or_else(|| {
        StoreError::Corrupt(format!("group chat {group_chat_id} vanished after insert"))
    })
}

pub(super) async fn get_group_chat(
    pool: &PgPool,
    group_chat_id: Uuid,
) -> StoreResult<Option<GroupChatRecord>> {
    let query = format!(
        r#"
        SELECT {GROUP_CHAT_COLUMNS}
        FROM group_chats AS g
        LEFT JOIN group_chat_members AS m
            ON m.group_chat_id = g.id
        WHERE g.id = $1
          AND g.deleted_at IS NULL
        GROUP BY g.id
        "#
    );

    sqlx::query_as::<_, GroupChatRow>(&query)
        .bind(group_chat_id)
        .fetch_optional(pool)
        .await?
        .map(GroupChatRecord::try_from)
        .transpose()
}

pub(super) async fn find_personal_chat(
    pool: &PgPool,
    first: Uuid,
    second: Uuid,
) -> StoreResult<Option<GroupChatRecord>> {
    let existing = sqlx::query_scalar::<_, Uuid>(
        r#"
        SELECT g.id
        FROM group_chats AS g
        WHERE g.chat_type = 'PERSONAL'
          AND g.deleted_at IS NULL
          AND EXISTS (
              SELECT 1 FROM group_chat_members
              WHERE group_chat_id = g.id AND user_id = $1
          )
          AND EXISTS (
              SELECT 1 FROM group_chat_members
              WHERE group_chat_id = g.id AND user_id = $2
          )
        ORDER BY g.created_at
        LIMIT 1
        "#,
    )
    .bind(first)
    .bind(second)
    .fetch_optional(pool)
    .await?;

    match existing {
        Some(group_chat_id) => get_group_chat(pool, group_chat_id).await,
        None => Ok(None),
    }
}

pub(super) async fn list_group_chats_for_member(
    pool: &PgPool,
    user_id: Uuid,
    page: Page,
) -> StoreResult<Vec<GroupChatRecord>> {
    let (limit, offset) = page_bounds(page);
    let query = format!(
        r#"
        SELECT {GROUP_CHAT_COLUMNS}
        FROM group_chats AS g
        LEFT JOIN group_chat_members AS m
            ON m.group_chat_id = g.id
        WHERE g.deleted_at IS NULL
          AND EXISTS (
              SELECT 1 FROM group_chat_members AS mine
              WHERE mine.group_chat_id = g.id AND mine.user_id = $1
          )
        GROUP BY g.id
        ORDER BY g.updated_at DESC, g.id
        LIMIT $2 OFFSET $3
        "#
    );

    sqlx::query_as::<_, GroupChatRow>(&query)
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(GroupChatRecord::try_from)
        .collect()
}

pub(super) async fn create_message(
    pool: &PgPool,
    author_id: Uuid,
    group_chat_id: Uuid,
    content: &str,
) -> StoreResult<MessageRecord> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, MessageRow>(
        r#"
        INSERT INTO messages (id, group_chat_id, author_id, content)
        VALUES ($1, $2, $3, $4)
        RETURNING id, group_chat_id, author_id, content, is_read, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(group_chat_id)
    .bind(author_id)
    .bind(content)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("UPDATE group_chats SET updated_at = $2 WHERE id = $1")
        .bind(group_chat_id)
        .bind(row.created_at)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(row.into())
}

pub(super) async fn list_messages(
    pool: &PgPool,
    group_chat_id: Uuid,
    page: Page,
) -> StoreResult<Vec<MessageRecord>> {
    let (limit, offset) = page_bounds(page);
    let rows = sqlx::query_as::<_, MessageRow>(
        r#"
        SELECT id, group_chat_id, author_id, content, is_read, created_at
        FROM messages
        WHERE group_chat_id = $1
        ORDER BY created_at DESC, id DESC
        LIMIT $2 OFFSET $3
        "#,
    )
    .bind(group_chat_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(MessageRecord::from).collect())
}

#[cfg(test)]
mod tests {
    use super::{page_bounds, GroupChatRow};
    use crate::store::{GroupChatRecord, Page, StoreError};
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn page_bounds_translate_to_limit_offset() {
        assert_eq!(page_bounds(Page { page: 1, size: 250 }), (250, 0));
        assert_eq!(page_bounds(Page { page: 4, size: 25 }), (25, 75));
    }

    #[test]
    fn unknown_chat_type_rows_are_rejected() {
        let row = GroupChatRow {
            id: Uuid::new_v4(),
            name: "broken".to_owned(),
            chat_type: "CHANNEL".to_owned(),
            created_by: Uuid::new_v4(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            members: Vec::new(),
        };

        let error = GroupChatRecord::try_from(row).expect_err("unknown type should fail");
        assert!(matches!(error, StoreError::Corrupt(message) if message.contains("CHANNEL")));
    }
}
