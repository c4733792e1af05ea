//! Role resolution: auth-state changes -> one profile read -> coarse role.
//!
//! Every authorization decision in every screen reads the resolved role,
//! so the resolver is deliberately boring: a spawned loop that follows the
//! provider's auth feed and publishes [`RoleState`] through a watch
//! channel. On each signed-in transition it performs exactly one read of
//! the profile document keyed by the identity. A missing profile or a
//! failed read defaults to `resident` rather than failing closed; that
//! fail-open policy favors availability during a permissions outage and is
//! preserved as-is (see DESIGN.md before tightening it).

#![forbid(unsafe_code)]

use std::sync::Arc;

use strata_cloud::DocStore;
use strata_core::{collections, AuthState, Identity, Role, RoleState, ROLE_FIELD};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct RoleResolver {
    rx: watch::Receiver<RoleState>,
    task: Option<JoinHandle<()>>,
}

impl RoleResolver {
    /// Spawn the resolver loop over an auth feed.
    pub fn spawn(store: Arc<dyn DocStore>, mut auth: watch::Receiver<AuthState>) -> Self {
        let (tx, rx) = watch::channel(RoleState::Unresolved);
        let task = tokio::spawn(async move {
            loop {
                let state = auth.borrow_and_update().clone();
                let next = match state {
                    AuthState::Unknown => RoleState::Unresolved,
                    AuthState::SignedOut => RoleState::SignedOut,
                    AuthState::SignedIn(identity) => resolve(store.as_ref(), &identity).await,
                };
                if tx.send(next).is_err() {
                    break;
                }
                if auth.changed().await.is_err() {
                    break;
                }
            }
        });
        Self { rx, task: Some(task) }
    }

    pub fn state(&self) -> RoleState {
        self.rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RoleState> {
        self.rx.clone()
    }

    /// Wait until the state machine leaves `Unresolved` (first auth report
    /// processed) and return that state.
    pub async fn resolved(&self) -> RoleState {
        let mut rx = self.rx.clone();
        loop {
            let state = rx.borrow_and_update().clone();
            if state != RoleState::Unresolved {
                return state;
            }
            if rx.changed().await.is_err() {
                return RoleState::Unresolved;
            }
        }
    }
}

impl Drop for RoleResolver {
    fn drop(&mut self) {
        if let Some(h) = self.task.take() {
            h.abort();
        }
    }
}

async fn resolve(store: &dyn DocStore, identity: &Identity) -> RoleState {
    let role = match store.get_doc(collections::USERS, &identity.uid).await {
        Ok(Some(profile)) => {
            profile.str_field(ROLE_FIELD).map(Role::from_tag).unwrap_or(Role::Resident)
        }
        Ok(None) => {
            debug!(uid = %identity.uid, "no profile document; defaulting to resident");
            Role::Resident
        }
        Err(e) => {
            // Fail open: a broken rule set must not lock everyone out.
            warn!(uid = %identity.uid, error = %e, "profile read failed; defaulting to resident");
            Role::Resident
        }
    };
    debug!(uid = %identity.uid, role = role.as_str(), "role resolved");
    RoleState::Resolved { uid: identity.uid.clone(), role }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strata_cloud::memory::MemoryCloud;
    use strata_cloud::AuthProvider;

    async fn wait_for(rx: &mut watch::Receiver<RoleState>, want: &RoleState) {
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
        loop {
            if &*rx.borrow_and_update() == want {
                return;
            }
            tokio::select! {
                res = rx.changed() => {
                    if res.is_err() {
                        panic!("resolver dropped while waiting for {:?}", want);
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    panic!("timed out waiting for {:?}, last {:?}", want, &*rx.borrow());
                }
            }
        }
    }

    fn resolved(uid: &str, role: Role) -> RoleState {
        RoleState::Resolved { uid: uid.to_string(), role }
    }

    #[tokio::test]
    async fn resolves_role_from_profile_document() {
        let cloud = Arc::new(MemoryCloud::new());
        cloud.put("users", "u-admin", json!({ "role": "admin", "name": "Committee" }));
        let resolver = RoleResolver::spawn(cloud.clone(), cloud.auth_state());
        assert_eq!(resolver.state(), RoleState::Unresolved);

        cloud.sign_in(Identity::new("u-admin"));
        let mut rx = resolver.subscribe();
        wait_for(&mut rx, &resolved("u-admin", Role::Admin)).await;
    }

    #[tokio::test]
    async fn legacy_user_tag_maps_to_resident() {
        let cloud = Arc::new(MemoryCloud::new());
        cloud.put("users", "u-old", json!({ "role": "user" }));
        let resolver = RoleResolver::spawn(cloud.clone(), cloud.auth_state());
        cloud.sign_in(Identity::new("u-old"));
        let mut rx = resolver.subscribe();
        wait_for(&mut rx, &resolved("u-old", Role::Resident)).await;
    }

    #[tokio::test]
    async fn missing_profile_fails_open_to_resident() {
        let cloud = Arc::new(MemoryCloud::new());
        let resolver = RoleResolver::spawn(cloud.clone(), cloud.auth_state());
        cloud.sign_in(Identity::new("u-ghost"));
        let mut rx = resolver.subscribe();
        wait_for(&mut rx, &resolved("u-ghost", Role::Resident)).await;
    }

    #[tokio::test]
    async fn denied_profile_read_fails_open_to_resident() {
        let cloud = Arc::new(MemoryCloud::new());
        cloud.put("users", "u-sec", json!({ "role": "security" }));
        cloud.deny("users");
        let resolver = RoleResolver::spawn(cloud.clone(), cloud.auth_state());
        cloud.sign_in(Identity::new("u-sec"));
        let mut rx = resolver.subscribe();
        // The profile says security, but the read is denied: fail open.
        wait_for(&mut rx, &resolved("u-sec", Role::Resident)).await;
    }

    #[tokio::test]
    async fn sign_out_clears_the_resolved_role() {
        let cloud = Arc::new(MemoryCloud::new());
        cloud.put("users", "u1", json!({ "role": "admin" }));
        let resolver = RoleResolver::spawn(cloud.clone(), cloud.auth_state());

        cloud.sign_in(Identity::new("u1"));
        let mut rx = resolver.subscribe();
        wait_for(&mut rx, &resolved("u1", Role::Admin)).await;

        cloud.sign_out();
        wait_for(&mut rx, &RoleState::SignedOut).await;

        // Signing back in re-reads the profile.
        cloud.sign_in(Identity::new("u1"));
        wait_for(&mut rx, &resolved("u1", Role::Admin)).await;
        assert_eq!(resolver.resolved().await, resolved("u1", Role::Admin));
    }
}
