use crate::domain::board::{Board, BoardAssembler};
use crate::domain::item::UserId;
use crate::domain::query::{self, BoardRequest};
use crate::domain::settings::SettingsProvider;
use crate::domain::transition::{MoveRequest, TransitionProcessor, UpdatedColumns};
use crate::error::{BoardError, Result};
use crate::storage::{Authorizer, Store};
use std::sync::Arc;
use tracing::debug;

/// Request surface: board reads and moves over the host's collaborators
pub struct BoardService<S, A, P> {
    store: Arc<S>,
    authorizer: Arc<A>,
    settings: P,
}

impl<S, A, P> BoardService<S, A, P>
where
    S: Store,
    A: Authorizer,
    P: SettingsProvider,
{
    pub fn new(store: Arc<S>, authorizer: Arc<A>, settings: P) -> Self {
        Self {
            store,
            authorizer,
            settings,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Builds the board for a project, or across every board-enabled project
    pub async fn board(&self, user_id: Option<UserId>, request: &BoardRequest) -> Result<Board> {
        let query = request.to_query()?;
        let settings = self.settings.settings(query.project_id).await?;
        let plan = query::plan(self.store.as_ref(), &query, user_id).await?;
        debug!(project_id = ?query.project_id, "Assembling board");
        BoardAssembler::new(self.store.as_ref(), self.authorizer.as_ref(), &settings)
            .assemble(&plan)
            .await
    }

    /// Applies a move and returns the refreshed source and destination columns
    pub async fn move_item(&self, user_id: UserId, request: &MoveRequest) -> Result<UpdatedColumns> {
        let item = self
            .store
            .item(request.item_id)
            .await?
            .ok_or(BoardError::NotFound(request.item_id))?;
        let settings = self.settings.settings(Some(item.project_id)).await?;
        let query = request
            .board
            .as_ref()
            .map(BoardRequest::to_query)
            .transpose()?;

        TransitionProcessor::new(self.store.as_ref(), self.authorizer.as_ref(), &settings)
            .apply_move(
                user_id,
                request.item_id,
                &request.changes,
                &request.positions,
                query.as_ref(),
            )
            .await
    }
}
