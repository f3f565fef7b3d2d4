use std::sync::Arc;

use domain::{Conversation, ConversationId, ConversationType, Participant, UserId};
use tracing::{info, warn};

use crate::{
    clock::Clock,
    directory::MemberSummary,
    error::ApplicationError,
    hub::HubHandle,
    repository::{ConversationRepository, ParticipantRepository},
};

#[derive(Debug, Clone)]
pub struct CreateConversationRequest {
    pub kind: ConversationType,
    pub creator_id: UserId,
    pub participants: Vec<UserId>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct AttachRequest {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
}

pub struct ConversationServiceDependencies {
    pub conversations: Arc<dyn ConversationRepository>,
    pub participants: Arc<dyn ParticipantRepository>,
    pub hub: HubHandle,
    pub clock: Arc<dyn Clock>,
    /// 接入前校验调用方是否为会话参与者
    pub require_participant: bool,
}

pub struct ConversationService {
    deps: ConversationServiceDependencies,
}

impl ConversationService {
    pub fn new(deps: ConversationServiceDependencies) -> Self {
        Self { deps }
    }

    /// 创建会话并在目录中登记空条目
    ///
    /// 创建者总是参与者之一，重复的参与者只保留一份。
    pub async fn create_conversation(
        &self,
        request: CreateConversationRequest,
    ) -> Result<Conversation, ApplicationError> {
        let now = self.deps.clock.now();
        let conversation = Conversation::new(
            ConversationId::generate(),
            request.name,
            request.kind,
            request.creator_id,
            now,
        )?;

        let mut members = vec![request.creator_id];
        for user_id in request.participants {
            if !members.contains(&user_id) {
                members.push(user_id);
            }
        }
        conversation.validate_participants(&members)?;

        let participants = members
            .into_iter()
            .map(|user_id| Participant::new(conversation.id, user_id, now))
            .collect();
        let conversation = self
            .deps
            .conversations
            .create_with_participants(conversation, participants)
            .await?;

        self.deps.hub.track(conversation.id).await?;
        info!(
            conversation_id = %conversation.id,
            kind = %conversation.kind,
            "conversation created"
        );
        Ok(conversation)
    }

    /// 接入前校验：会话必须持久化存在，调用方必须是参与者
    ///
    /// 通过后确保目录中有该会话的条目，目录被回收或进程重启后据此重建。
    pub async fn authorize_attach(&self, request: AttachRequest) -> Result<(), ApplicationError> {
        let AttachRequest {
            conversation_id,
            user_id,
        } = request;

        self.deps
            .conversations
            .find_by_id(conversation_id)
            .await?
            .ok_or(ApplicationError::ConversationNotFound(conversation_id))?;

        if self.deps.require_participant
            && !self
                .deps
                .participants
                .is_member(conversation_id, user_id)
                .await?
        {
            warn!(
                conversation_id = %conversation_id,
                user_id = %user_id,
                "attach rejected: not a participant"
            );
            return Err(ApplicationError::NotParticipant {
                conversation_id,
                user_id,
            });
        }

        self.deps.hub.track(conversation_id).await?;
        Ok(())
    }

    pub async fn connected_clients(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<MemberSummary>, ApplicationError> {
        Ok(self.deps.hub.members(conversation_id).await?)
    }

    /// 启动时把持久化的全部会话登记到目录
    pub async fn hydrate_directory(&self) -> Result<usize, ApplicationError> {
        let ids = self.deps.conversations.list_ids().await?;
        let mut tracked = 0;
        for id in ids {
            if self.deps.hub.track(id).await? {
                tracked += 1;
            }
        }
        info!(tracked, "conversation directory hydrated");
        Ok(tracked)
    }
}
