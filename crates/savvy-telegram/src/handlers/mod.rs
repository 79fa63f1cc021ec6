//! Telegram update handlers.
//!
//! Each handler converts the Telegram update into the engine's update model,
//! serializes per user, and hands it to the conversation engine. Engine errors
//! are logged here and never propagate into the dispatcher.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, Message},
};
use tracing::{debug, error};

use savvy_core::messaging::types::IncomingUpdate;

use crate::router::AppState;

mod callback;
mod commands;
mod message;

pub async fn handle_callback(bot: Bot, q: CallbackQuery, state: Arc<AppState>) -> ResponseResult<()> {
    match callback::to_update(&q) {
        Some(update) => dispatch(&state, update).await,
        None => {
            // Stop the client-side spinner even for empty callbacks.
            if let Err(e) = bot.answer_callback_query(q.id).await {
                debug!(error = %e, "failed to answer empty callback");
            }
        }
    }
    Ok(())
}

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    match message::to_update(&msg) {
        Some(update) => dispatch(&state, update).await,
        None => debug!(chat_id = msg.chat.id.0, "ignoring unsupported message"),
    }
    Ok(())
}

async fn dispatch(state: &AppState, update: IncomingUpdate) {
    let user_id = update.sender().user_id;
    let _guard = state.user_locks.lock_user(user_id).await;
    if let Err(e) = state.engine.handle(update).await {
        error!(user_id = %user_id, error = %e, "update handling failed");
    }
}
