use std::sync::Arc;
use tollgate_authz::{
    AuthorizationService, BroadcastNotifier, InMemoryRelationStore, PolicyEnforcer,
};

/// Two service replicas sharing one store and one notifier.
pub struct Fleet {
    pub store: InMemoryRelationStore,
    pub a: AuthorizationService,
    pub b: AuthorizationService,
}

pub async fn fleet() -> Fleet {
    let store = InMemoryRelationStore::new();
    let notifier = Arc::new(BroadcastNotifier::new(64));
    let a = PolicyEnforcer::new(Arc::new(store.clone()), notifier.clone())
        .await
        .expect("replica a");
    let b = PolicyEnforcer::new(Arc::new(store.clone()), notifier)
        .await
        .expect("replica b");
    Fleet {
        store,
        a: AuthorizationService::new(a, "default"),
        b: AuthorizationService::new(b, "default"),
    }
}

pub async fn single() -> AuthorizationService {
    fleet().await.a
}
