use std::future::Future;
use std::sync::Arc;

use starshop_core::AppError;
use starshop_storage::Store;

use crate::update::{Update, start_referrer};

/// Handles one parsed update. Implemented by the bot's command layer.
pub trait UpdateProcessor: Send + Sync + 'static {
    fn process(&self, update: Update) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Registers every sender and credits `/start` deep-link referrals.
///
/// A referral counts only when it arrives with the referred user's first
/// update, so replaying a link cannot inflate a count.
pub struct ReferralProcessor {
    store: Arc<Store>,
}

impl ReferralProcessor {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

impl UpdateProcessor for ReferralProcessor {
    async fn process(&self, update: Update) -> Result<(), AppError> {
        let Some(user) = update.sender() else {
            tracing::debug!(update_id = update.update_id, "Update has no sender");
            return Ok(());
        };
        if user.is_bot {
            return Ok(());
        }

        if !self.store.add_new_user(user.id).await {
            return Ok(());
        }
        tracing::info!(user_id = user.id, "New user");

        let Some(referrer) = update.text().and_then(start_referrer) else {
            return Ok(());
        };
        if referrer == user.id {
            tracing::debug!(user_id = user.id, "Ignoring self-referral");
            return Ok(());
        }

        if !self.store.increment_referral_count(referrer).await {
            return Err(AppError::Processing(format!(
                "could not credit referral of {} to {}",
                user.id, referrer
            )));
        }

        tracing::info!(user_id = user.id, referrer, "Referral credited");
        Ok(())
    }
}
