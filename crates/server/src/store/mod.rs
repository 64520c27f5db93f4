// Persistence for users, conversations and messages.
//
// `ChatStore` is a closed set of backends: PostgreSQL in production and an
// in-memory variant for tests and database-less local runs. Both must agree
// on ordering and paging so the API behaves identically on either.

mod memory;
mod postgres;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use huddle_common::types::{GroupChatSummary, GroupChatType};
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

pub use memory::MemoryChatStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("username is already taken")]
    UsernameTaken,
    #[error("stored row is inconsistent: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupChatRecord {
    pub id: Uuid,
    pub name: String,
    pub chat_type: GroupChatType,
    pub members: Vec<Uuid>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GroupChatRecord {
    pub fn is_member(&self, user_id: Uuid) -> bool {
        self.members.contains(&user_id)
    }

    pub fn summary(&self) -> GroupChatSummary {
        GroupChatSummary { id: self.id, name: self.name.clone(), chat_type: self.chat_type }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: Uuid,
    pub group_chat_id: Uuid,
    pub author_id: Uuid,
    pub content: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewGroupChat {
    pub name: String,
    pub chat_type: GroupChatType,
    /// Every member, creator included, without duplicates.
    pub members: Vec<Uuid>,
    pub created_by: Uuid,
}

/// One-based page window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub size: u32,
}

impl Page {
    pub fn offset(self) -> usize {
        (self.page.saturating_sub(1) as usize).saturating_mul(self.size as usize)
    }

    pub fn limit(self) -> usize {
        self.size as usize
    }
}

#[derive(Clone)]
pub enum ChatStore {
    Postgres(PgPool),
    Memory(Arc<RwLock<MemoryChatStore>>),
}

impl ChatStore {
    pub fn in_memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(MemoryChatStore::default())))
    }

    pub async fn create_user(&self, username: &str, password_hash: &str) -> StoreResult<UserRecord> {
        match self {
            Self::Postgres(pool) => postgres::create_user(pool, username, password_hash).await,
            Self::Memory(store) => store.write().await.create_user(username, password_hash),
        }
    }

    pub async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<UserRecord>> {
        match self {
            Self::Postgres(pool) => postgres::find_user_by_username(pool, username).await,
            Self::Memory(store) => Ok(store.read().await.find_user_by_username(username)),
        }
    }

    pub async fn find_user_by_id(&self, user_id: Uuid) -> StoreResult<Option<UserRecord>> {
        match self {
            Self::Postgres(pool) => postgres::find_user_by_id(pool, user_id).await,
            Self::Memory(store) => Ok(store.read().await.find_user_by_id(user_id)),
        }
    }

    pub async fn find_users_by_ids(&self, user_ids: &[Uuid]) -> StoreResult<Vec<UserRecord>> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        match self {
            Self::Postgres(pool) => postgres::find_users_by_ids(pool, user_ids).await,
            Self::Memory(store) => Ok(store.read().await.find_users_by_ids(user_ids)),
        }
    }

    /// Users other than `exclude`, ordered by username, optionally filtered by a
    /// case-insensitive substring.
    pub async fn search_users(
        &self,
        exclude: Uuid,
        keyword: Option<&str>,
        page: Page,
    ) -> StoreResult<Vec<UserRecord>> {
        match self {
            Self::Postgres(pool) => postgres::search_users(pool, exclude, keyword, page).await,
            Self::Memory(store) => Ok(store.read().await.search_users(exclude, keyword, page)),
        }
    }

    pub async fn create_group_chat(&self, new_chat: NewGroupChat) -> StoreResult<GroupChatRecord> {
        match self {
            Self::Postgres(pool) => postgres::create_group_chat(pool, new_chat).await,
            Self::Memory(store) => Ok(store.write().await.create_group_chat(new_chat)),
        }
    }

    pub async fn get_group_chat(&self, group_chat_id: Uuid) -> StoreResult<Option<GroupChatRecord>> {
        match self {
            Self::Postgres(pool) => postgres::get_group_chat(pool, group_chat_id).await,
            Self::Memory(store) => Ok(store.read().await.get_group_chat(group_chat_id)),
        }
    }

    /// The PERSONAL conversation shared by exactly these two users, if any.
    pub async fn find_personal_chat(
        &self,
        first: Uuid,
        second: Uuid,
    ) -> StoreResult<Option<GroupChatRecord>> {
        match self {
            Self::Postgres(pool) => postgres::find_personal_chat(pool, first, second).await,
            Self::Memory(store) => Ok(store.read().await.find_personal_chat(first, second)),
        }
    }

    /// Conversations `user_id` belongs to, most recently active first.
    pub async fn list_group_chats_for_member(
        &self,
        user_id: Uuid,
        page: Page,
    ) -> StoreResult<Vec<GroupChatRecord>> {
        match self {
            Self::Postgres(pool) => postgres::list_group_chats_for_member(pool, user_id, page).await,
            Self::Memory(store) => Ok(store.read().await.list_group_chats_for_member(user_id, page)),
        }
    }

    /// Persists a message and bumps the conversation's `updated_at`.
    pub async fn create_message(
        &self,
        author_id: Uuid,
        group_chat_id: Uuid,
        content: &str,
    ) -> StoreResult<MessageRecord> {
        match self {
            Self::Postgres(pool) => {
                postgres::create_message(pool, author_id, group_chat_id, content).await
            }
            Self::Memory(store) => {
                Ok(store.write().await.create_message(author_id, group_chat_id, content))
            }
        }
    }

    /// Messages of a conversation, newest first.
    pub async fn list_messages(
        &self,
        group_chat_id: Uuid,
        page: Page,
    ) -> StoreResult<Vec<MessageRecord>> {
        match self {
            Self::Postgres(pool) => postgres::list_messages(pool, group_chat_id, page).await,
            Self::Memory(store) => Ok(store.read().await.list_messages(group_chat_id, page)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ChatStore, NewGroupChat, Page, StoreError};
    use crate::db::{
        migrations::run_migrations,
        pool::{create_pg_pool, PoolConfig},
    };
    use huddle_common::types::GroupChatType;
    use uuid::Uuid;

    const FIRST_PAGE: Page = Page { page: 1, size: 250 };

    #[test]
    fn page_offsets_are_one_based() {
        assert_eq!(Page { page: 1, size: 10 }.offset(), 0);
        assert_eq!(Page { page: 3, size: 10 }.offset(), 20);
        assert_eq!(Page { page: 0, size: 10 }.offset(), 0);
        assert_eq!(Page { page: 2, size: 7 }.limit(), 7);
    }

    #[tokio::test]
    async fn usernames_are_unique() {
        let store = ChatStore::in_memory();
        store.create_user("alice", "hash").await.expect("first insert should succeed");

        let error = store.create_user("alice", "hash").await.expect_err("duplicate should fail");
        assert!(matches!(error, StoreError::UsernameTaken));
    }

    #[tokio::test]
    async fn search_excludes_caller_and_filters_case_insensitively() {
        let store = ChatStore::in_memory();
        let alice = store.create_user("alice", "h").await.expect("alice");
        store.create_user("Bob", "h").await.expect("bob");
        store.create_user("bobby", "h").await.expect("bobby");
        store.create_user("carol", "h").await.expect("carol");

        let everyone = store.search_users(alice.id, None, FIRST_PAGE).await.expect("search");
        let names = everyone.iter().map(|user| user.username.as_str()).collect::<Vec<_>>();
        assert_eq!(names, ["Bob", "bobby", "carol"]);

        let bobs = store.search_users(alice.id, Some("BOB"), FIRST_PAGE).await.expect("search");
        assert_eq!(bobs.len(), 2);

        let second_page = store
            .search_users(alice.id, None, Page { page: 2, size: 2 })
            .await
            .expect("search");
        assert_eq!(second_page.len(), 1);
        assert_eq!(second_page[0].username, "carol");
    }

    #[tokio::test]
    async fn search_breaks_case_insensitive_ties_by_id() {
        let store = ChatStore::in_memory();
        let alice = store.create_user("alice", "h").await.expect("alice");
        let upper = store.create_user("Sam", "h").await.expect("Sam");
        let lower = store.create_user("sam", "h").await.expect("sam");
        let expected = if upper.id < lower.id { [upper.id, lower.id] } else { [lower.id, upper.id] };

        let mut paged = Vec::new();
        for page in 1..=2 {
            let users = store
                .search_users(alice.id, Some("sam"), Page { page, size: 1 })
                .await
                .expect("search");
            assert_eq!(users.len(), 1);
            paged.push(users[0].id);
        }

        assert_eq!(paged, expected);
    }

    #[tokio::test]
    async fn group_chats_track_members_and_activity() {
        let store = ChatStore::in_memory();
        let alice = store.create_user("alice", "h").await.expect("alice");
        let bob = store.create_user("bob", "h").await.expect("bob");
        let carol = store.create_user("carol", "h").await.expect("carol");

        let personal = store
            .create_group_chat(NewGroupChat {
                name: "bob".to_owned(),
                chat_type: GroupChatType::Personal,
                members: vec![bob.id, alice.id],
                created_by: alice.id,
            })
            .await
            .expect("personal chat");
        let group = store
            .create_group_chat(NewGroupChat {
                name: "trio".to_owned(),
                chat_type: GroupChatType::Group,
                members: vec![bob.id, carol.id, alice.id],
                created_by: alice.id,
            })
            .await
            .expect("group chat");

        assert!(group.is_member(carol.id));
        assert!(!personal.is_member(carol.id));

        let found = store.find_personal_chat(alice.id, bob.id).await.expect("lookup");
        assert_eq!(found.map(|chat| chat.id), Some(personal.id));
        assert!(store.find_personal_chat(alice.id, carol.id).await.expect("lookup").is_none());

        store.create_message(bob.id, personal.id, "ping").await.expect("message");
        let listed = store.list_group_chats_for_member(alice.id, FIRST_PAGE).await.expect("list");
        assert_eq!(listed.iter().map(|chat| chat.id).collect::<Vec<_>>(), [personal.id, group.id]);

        let carols = store.list_group_chats_for_member(carol.id, FIRST_PAGE).await.expect("list");
        assert_eq!(carols.len(), 1);
    }

    #[tokio::test]
    async fn messages_are_listed_newest_first() {
        let store = ChatStore::in_memory();
        let alice = store.create_user("alice", "h").await.expect("alice");
        let bob = store.create_user("bob", "h").await.expect("bob");
        let chat = store
            .create_group_chat(NewGroupChat {
                name: "bob".to_owned(),
                chat_type: GroupChatType::Personal,
                members: vec![bob.id, alice.id],
                created_by: alice.id,
            })
            .await
            .expect("chat");

        for content in ["one", "two", "three"] {
            store.create_message(alice.id, chat.id, content).await.expect("message");
        }

        let messages = store.list_messages(chat.id, FIRST_PAGE).await.expect("list");
        let contents = messages.iter().map(|message| message.content.as_str()).collect::<Vec<_>>();
        assert_eq!(contents, ["three", "two", "one"]);
        assert!(messages.iter().all(|message| !message.is_read));

        let authors = store.find_users_by_ids(&[alice.id, bob.id]).await.expect("authors");
        assert_eq!(authors.len(), 2);
        assert!(store.find_users_by_ids(&[]).await.expect("empty").is_empty());
    }

    #[tokio::test]
    async fn postgres_store_round_trip() {
        let Some(database_url) = std::env::var("HUDDLE_TEST_DATABASE_URL").ok() else {
            eprintln!("skipping postgres store test: set HUDDLE_TEST_DATABASE_URL");
            return;
        };

        let config = PoolConfig { min_connections: 1, max_connections: 2, ..PoolConfig::default() };
        let pool = create_pg_pool(&database_url, &config).await.expect("pool should connect");
        run_migrations(&pool).await.expect("migrations should apply");
        let store = ChatStore::Postgres(pool);

        let suffix = Uuid::new_v4().simple().to_string();
        let alice = store.create_user(&format!("alice-{suffix}"), "h").await.expect("alice");
        let bob = store.create_user(&format!("bob-{suffix}"), "h").await.expect("bob");
        let duplicate = store.create_user(&alice.username, "h").await.expect_err("duplicate");
        assert!(matches!(duplicate, StoreError::UsernameTaken));

        let chat = store
            .create_group_chat(NewGroupChat {
                name: bob.username.clone(),
                chat_type: GroupChatType::Personal,
                members: vec![bob.id, alice.id],
                created_by: alice.id,
            })
            .await
            .expect("chat");
        let found = store.find_personal_chat(bob.id, alice.id).await.expect("lookup");
        assert_eq!(found.map(|found| found.id), Some(chat.id));

        store.create_message(alice.id, chat.id, "one").await.expect("message");
        store.create_message(bob.id, chat.id, "two").await.expect("message");
        let messages = store.list_messages(chat.id, FIRST_PAGE).await.expect("list");
        assert_eq!(messages.first().map(|message| message.content.as_str()), Some("two"));
        assert_eq!(messages.len(), 2);

        let matches = store
            .search_users(alice.id, Some(&suffix), FIRST_PAGE)
            .await
            .expect("search");
        assert_eq!(matches.iter().map(|user| user.id).collect::<Vec<_>>(), [bob.id]);
    }
}
