//! Resolves role ids into the role and permission names baked into access
//! tokens. Lookups are cached for a bounded time per directory instance.

use std::{collections::HashMap, future::Future, hash::Hash, sync::Arc, time::Duration};

use tokio::{sync::RwLock, time::Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use super::repo::RoleStore;
use super::repo_types::{Permission, Role};
use crate::store::StoreError;

#[derive(Debug, Clone)]
struct Cached<T> {
    value: T,
    fetched_at: Instant,
}

impl<T> Cached<T> {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

type Cache<T> = RwLock<HashMap<Uuid, Cached<Option<T>>>>;

/// Role and permission names for one user, in assignment order, without
/// duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedAccess {
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

pub struct RoleDirectory {
    store: Arc<dyn RoleStore>,
    ttl: Duration,
    roles: Cache<Role>,
    permissions: Cache<Permission>,
}

impl RoleDirectory {
    pub fn new(store: Arc<dyn RoleStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            roles: RwLock::new(HashMap::new()),
            permissions: RwLock::new(HashMap::new()),
        }
    }

    /// Dangling role or permission ids are skipped with a warning. Store
    /// errors propagate.
    pub async fn resolve(&self, role_ids: &[Uuid]) -> Result<ResolvedAccess, StoreError> {
        let mut access = ResolvedAccess::default();

        for &role_id in role_ids {
            let store = &self.store;
            let Some(role) =
                cached_lookup(&self.roles, self.ttl, role_id, || store.find_role(role_id)).await?
            else {
                warn!(%role_id, "user references unknown role");
                continue;
            };
            push_unique(&mut access.roles, role.name);

            for &permission_id in &role.permission_ids {
                let found = cached_lookup(&self.permissions, self.ttl, permission_id, || {
                    store.find_permission(permission_id)
                })
                .await?;
                match found {
                    Some(p) => push_unique(&mut access.permissions, p.name),
                    None => warn!(%role_id, %permission_id, "role references unknown permission"),
                }
            }
        }

        debug!(
            roles = access.roles.len(),
            permissions = access.permissions.len(),
            "access resolved"
        );
        Ok(access)
    }
}

async fn cached_lookup<K, T, F, Fut>(
    cache: &RwLock<HashMap<K, Cached<Option<T>>>>,
    ttl: Duration,
    key: K,
    load: F,
) -> Result<Option<T>, StoreError>
where
    K: Eq + Hash,
    T: Clone,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Option<T>, StoreError>>,
{
    if let Some(hit) = cache.read().await.get(&key) {
        if hit.is_fresh(ttl) {
            return Ok(hit.value.clone());
        }
    }

    let value = load().await?;
    cache.write().await.insert(
        key,
        Cached {
            value: value.clone(),
            fetched_at: Instant::now(),
        },
    );
    Ok(value)
}

fn push_unique(names: &mut Vec<String>, name: String) {
    if !names.contains(&name) {
        names.push(name);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::auth::repo::memory::MemoryAuthRepo;

    async fn seeded() -> (Arc<MemoryAuthRepo>, Uuid, Uuid) {
        let repo = Arc::new(MemoryAuthRepo::new());
        let read = repo.add_permission("user.read").await;
        let write = repo.add_permission("user.write").await;
        let admin = repo.add_role("admin", vec![read, write]).await;
        let viewer = repo.add_role("viewer", vec![read]).await;
        (repo, admin, viewer)
    }

    #[tokio::test]
    async fn flattens_and_dedupes_permissions() {
        let (repo, admin, viewer) = seeded().await;
        let dir = RoleDirectory::new(repo, Duration::from_secs(60));

        let access = dir.resolve(&[viewer, admin]).await.unwrap();
        assert_eq!(access.roles, vec!["viewer", "admin"]);
        assert_eq!(access.permissions, vec!["user.read", "user.write"]);
    }

    #[tokio::test]
    async fn skips_dangling_ids() {
        let (repo, admin, _) = seeded().await;
        let ghost_perm = Uuid::new_v4();
        let broken = repo.add_role("broken", vec![ghost_perm]).await;
        let dir = RoleDirectory::new(repo, Duration::from_secs(60));

        let access = dir.resolve(&[Uuid::new_v4(), broken, admin]).await.unwrap();
        assert_eq!(access.roles, vec!["broken", "admin"]);
        assert_eq!(access.permissions, vec!["user.read", "user.write"]);
    }

    #[tokio::test]
    async fn no_roles_means_empty_access() {
        let (repo, _, _) = seeded().await;
        let dir = RoleDirectory::new(repo, Duration::from_secs(60));
        assert_eq!(dir.resolve(&[]).await.unwrap(), ResolvedAccess::default());
    }

    #[tokio::test(start_paused = true)]
    async fn caches_until_ttl_elapses() {
        let (repo, admin, _) = seeded().await;
        let dir = RoleDirectory::new(repo.clone(), Duration::from_secs(300));

        dir.resolve(&[admin]).await.unwrap();
        dir.resolve(&[admin]).await.unwrap();
        assert_eq!(repo.role_lookups.load(Ordering::SeqCst), 1);
        assert_eq!(repo.permission_lookups.load(Ordering::SeqCst), 2);

        repo.rename_role(admin, "superuser").await;
        let stale = dir.resolve(&[admin]).await.unwrap();
        assert_eq!(stale.roles, vec!["admin"]);

        tokio::time::advance(Duration::from_secs(301)).await;
        let fresh = dir.resolve(&[admin]).await.unwrap();
        assert_eq!(fresh.roles, vec!["superuser"]);
        assert_eq!(repo.role_lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn instances_do_not_share_caches() {
        let (repo, admin, _) = seeded().await;
        let first = RoleDirectory::new(repo.clone(), Duration::from_secs(300));
        let second = RoleDirectory::new(repo.clone(), Duration::from_secs(300));

        first.resolve(&[admin]).await.unwrap();
        second.resolve(&[admin]).await.unwrap();
        assert_eq!(repo.role_lookups.load(Ordering::SeqCst), 2);
    }
}
