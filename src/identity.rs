use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    error::{ChatError, ChatResult},
    session::Session,
    store::Store,
};

/// Binds `session` to the user registered under `name`, registering it first
/// if the name is new.
///
/// Names are matched exactly after trimming, so every session using the same
/// name converges on one user. A session that is already bound keeps its
/// identity and gets it back unchanged.
pub async fn bind_identity<S: Store>(
    store: &S,
    session: &mut Session,
    name: &str,
) -> ChatResult<Uuid> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ChatError::validation("name must not be empty"));
    }

    if let Some(user_id) = session.bound_user_id() {
        debug!(%user_id, requested = name, "identity already bound");
        return Ok(user_id);
    }

    let user = match store.find_user_by_name(name).await? {
        Some(user) => {
            debug!(user_id = %user.id, name, "welcome back");
            user
        }
        None => {
            let created = store.create_user(name).await?;
            // Two first binds of a new name can both insert. Every racer reads
            // back after its own insert and binds to the oldest row, so all of
            // them end up on the same user.
            match store.find_user_by_name(name).await? {
                Some(oldest) if oldest.id != created.id => {
                    warn!(
                        user_id = %oldest.id,
                        duplicate = %created.id,
                        name,
                        "name registered concurrently"
                    );
                    oldest
                }
                _ => {
                    info!(user_id = %created.id, name, "registered user");
                    created
                }
            }
        }
    };

    Ok(session.bind(user.id))
}
