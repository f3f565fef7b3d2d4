use std::sync::Arc;

use application::repository::{ConversationRepository, MessageStore, ParticipantRepository};
use async_trait::async_trait;
use domain::{
    Conversation, ConversationId, ConversationType, Message, MessageContent, MessageId,
    Participant, RepositoryError, UserId,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Conflict,
        sqlx::Error::RowNotFound => RepositoryError::NotFound,
        _ => RepositoryError::storage(err.to_string()),
    }
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

#[derive(Debug, FromRow)]
struct ConversationRecord {
    id: Uuid,
    name: Option<String>,
    conversation_type: String,
    creator_id: Uuid,
    created_at: OffsetDateTime,
}

impl TryFrom<ConversationRecord> for Conversation {
    type Error = RepositoryError;

    fn try_from(value: ConversationRecord) -> Result<Self, Self::Error> {
        let kind: ConversationType = value
            .conversation_type
            .parse()
            .map_err(|err: domain::DomainError| invalid_data(err.to_string()))?;

        Conversation::new(
            ConversationId::from(value.id),
            value.name,
            kind,
            UserId::from(value.creator_id),
            value.created_at,
        )
        .map_err(|err| invalid_data(err.to_string()))
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: Uuid,
    conversation_id: Uuid,
    sender_id: Uuid,
    content: String,
    created_at: OffsetDateTime,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let content =
            MessageContent::new(value.content).map_err(|err| invalid_data(err.to_string()))?;
        Ok(Message::new(
            MessageId::from(value.id),
            ConversationId::from(value.conversation_id),
            UserId::from(value.sender_id),
            content,
            value.created_at,
        ))
    }
}

#[derive(Clone)]
pub struct PgConversationRepository {
    pool: PgPool,
}

impl PgConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationRepository for PgConversationRepository {
    async fn create_with_participants(
        &self,
        conversation: Conversation,
        participants: Vec<Participant>,
    ) -> Result<Conversation, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let record = sqlx::query_as::<_, ConversationRecord>(
            r#"
            INSERT INTO conversations (id, name, conversation_type, creator_id, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, name, conversation_type, creator_id, created_at
            "#,
        )
        .bind(Uuid::from(conversation.id))
        .bind(conversation.name.as_deref())
        .bind(conversation.kind.as_str())
        .bind(Uuid::from(conversation.creator_id))
        .bind(conversation.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        // 参与者批量写入，与会话同一事务
        let user_ids: Vec<Uuid> = participants.iter().map(|p| Uuid::from(p.user_id)).collect();
        let joined_at: Vec<OffsetDateTime> = participants.iter().map(|p| p.joined_at).collect();
        sqlx::query(
            r#"
            INSERT INTO participants (conversation_id, user_id, joined_at)
            SELECT $1, user_id, joined_at
            FROM UNNEST($2::uuid[], $3::timestamptz[]) AS t(user_id, joined_at)
            ON CONFLICT (conversation_id, user_id) DO NOTHING
            "#,
        )
        .bind(Uuid::from(conversation.id))
        .bind(&user_ids)
        .bind(&joined_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Conversation::try_from(record)
    }

    async fn find_by_id(
        &self,
        id: ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let record = sqlx::query_as::<_, ConversationRecord>(
            r#"SELECT id, name, conversation_type, creator_id, created_at FROM conversations WHERE id = $1"#,
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Conversation::try_from).transpose()
    }

    async fn list_ids(&self) -> Result<Vec<ConversationId>, RepositoryError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(r#"SELECT id FROM conversations"#)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(ids.into_iter().map(ConversationId::from).collect())
    }
}

#[derive(Clone)]
pub struct PgParticipantRepository {
    pool: PgPool,
}

impl PgParticipantRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ParticipantRepository for PgParticipantRepository {
    async fn is_member(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<bool, RepositoryError> {
        sqlx::query_scalar(
            r#"SELECT EXISTS(SELECT 1 FROM participants WHERE conversation_id = $1 AND user_id = $2)"#,
        )
        .bind(Uuid::from(conversation_id))
        .bind(Uuid::from(user_id))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)
    }
}

#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn append(&self, message: Message) -> Result<Message, RepositoryError> {
        let record = sqlx::query_as::<_, MessageRecord>(
            r#"
            INSERT INTO messages (id, conversation_id, sender_id, content, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, conversation_id, sender_id, content, created_at
            "#,
        )
        .bind(Uuid::from(message.id))
        .bind(Uuid::from(message.conversation_id))
        .bind(Uuid::from(message.sender_id))
        .bind(message.content.as_str())
        .bind(message.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Message::try_from(record)
    }
}

#[derive(Clone)]
pub struct PgStorage {
    pub pool: PgPool,
    pub conversation_repository: Arc<PgConversationRepository>,
    pub participant_repository: Arc<PgParticipantRepository>,
    pub message_store: Arc<PgMessageStore>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            conversation_repository: Arc::new(PgConversationRepository::new(pool.clone())),
            participant_repository: Arc::new(PgParticipantRepository::new(pool.clone())),
            message_store: Arc::new(PgMessageStore::new(pool.clone())),
            pool,
        }
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
